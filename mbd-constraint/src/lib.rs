//! Bilateral constraint registry, Jacobian assembly, and residual assembly.
//!
//! This crate turns a set of registered constraints over DOF owners into
//! the sparse quantities a velocity-level solver consumes:
//!
//! - [`BilateralConstraint`] - the per-constraint capability set (anchors,
//!   rows, Jacobian blocks, violation, compliance)
//! - [`ConstraintRegistry`] - registration with owner-kind classification,
//!   removal with stable handles, and a structural dirty flag
//! - [`JacobianAssembly`] - two-phase CSR assembly: sequential idempotent
//!   sparsity generation, then allocation-free parallel value refill
//! - [`ResidualAssembly`] - Baumgarte stabilization vector `b` and
//!   compliance diagonal `E`, row-aligned with the Jacobian
//! - [`joints`] - concrete constraints spanning the classification space
//!
//! # Assembly discipline
//!
//! Structural changes (register, remove, layout rebuild) invalidate the
//! cached sparsity pattern; every numeric pass checks freshness and fails
//! with a structural [`AssemblyError`](mbd_types::AssemblyError) rather
//! than writing through a stale pattern.
//!
//! # Example
//!
//! ```
//! use mbd_constraint::joints::GearCouple;
//! use mbd_constraint::{ConstraintContext, ConstraintRegistry, JacobianAssembly};
//! use mbd_state::owners::ShaftDofs;
//! use mbd_state::{DofOwner, StateLayout, StateVectors};
//! use mbd_types::{AssemblyConfig, OwnerHandle};
//!
//! let owners: Vec<Box<dyn DofOwner>> = vec![
//!     Box::new(ShaftDofs::new(1.0).with_angle(0.4)),
//!     Box::new(ShaftDofs::new(2.0).with_angle(0.2)),
//! ];
//! let mut layout = StateLayout::new();
//! layout.setup(
//!     owners
//!         .iter()
//!         .enumerate()
//!         .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
//! );
//! let mut vectors = StateVectors::new();
//! vectors
//!     .gather(
//!         &layout,
//!         owners
//!             .iter()
//!             .enumerate()
//!             .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
//!     )
//!     .unwrap();
//!
//! let mut registry = ConstraintRegistry::new();
//! registry
//!     .register(
//!         Box::new(GearCouple::new(OwnerHandle::new(0), OwnerHandle::new(1), 2.0)),
//!         |h| owners.get(h.index()).map(|o| o.kind()),
//!     )
//!     .unwrap();
//!
//! let mut assembly = JacobianAssembly::new();
//! assembly.generate_sparsity(&layout, &mut registry).unwrap();
//! let ctx = ConstraintContext::new(&layout, &vectors.x, &vectors.w);
//! assembly
//!     .build_d(&registry, &ctx, &AssemblyConfig::default())
//!     .unwrap();
//!
//! assert_eq!(assembly.n_rows(), 1);
//! assert_eq!(assembly.values(), &[1.0, -2.0]);
//! ```

#![doc(html_root_url = "https://docs.rs/mbd-constraint/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod constraint;
mod jacobian;
pub mod joints;
mod registry;
mod residual;

pub use constraint::{BilateralConstraint, ConstraintContext};
pub use jacobian::JacobianAssembly;
pub use registry::{ConstraintEntry, ConstraintRegistry};
pub use residual::ResidualAssembly;
