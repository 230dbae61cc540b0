//! DOF-owner capability set and global state-vector bookkeeping.
//!
//! This crate is the state layer of the multibody constraint-assembly core:
//!
//! - [`DofOwner`] - the capability set any DOF-contributing entity
//!   implements (sizing, gather/scatter, increment law, solver injection)
//! - [`StateLayout`] - assigns contiguous state-vector offsets to owners in
//!   registration order, keyed by handle in a side table
//! - [`StateVectors`] - the global position/velocity vectors
//! - [`SystemDescriptor`] - mass/force terms injected for the solver
//! - [`owners`] - minimal concrete owners (rigid body, shaft, FEA node,
//!   zero-DOF marker)
//!
//! # State conventions
//!
//! Position and velocity DOF counts may differ per owner: a rigid body
//! carries 7 position DOFs (translation + w-first unit quaternion) against
//! 6 velocity DOFs. The owner-specific increment law `x_new = x ⊕ Dv`
//! composes quaternions on SO(3) rather than adding components, and
//! `state_get_increment` is its exact inverse.
//!
//! # Example
//!
//! ```
//! use mbd_state::{DofOwner, StateLayout, StateVectors};
//! use mbd_state::owners::{RigidBodyDofs, ShaftDofs};
//! use mbd_types::OwnerHandle;
//!
//! let body = RigidBodyDofs::sphere(1.0, 0.5);
//! let shaft = ShaftDofs::new(0.2);
//!
//! let mut layout = StateLayout::new();
//! layout.setup([
//!     (OwnerHandle::new(0), &body as &dyn DofOwner),
//!     (OwnerHandle::new(1), &shaft as &dyn DofOwner),
//! ]);
//!
//! assert_eq!(layout.n_x(), 8); // 7 + 1
//! assert_eq!(layout.n_w(), 7); // 6 + 1
//! assert_eq!(layout.slot(OwnerHandle::new(1)).unwrap().offset_w, 6);
//! ```

#![doc(html_root_url = "https://docs.rs/mbd-state/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod descriptor;
mod layout;
mod owner;
pub mod owners;

pub use descriptor::{InverseMassBlock, SystemDescriptor};
pub use layout::{OwnerSlot, StateLayout, StateVectors};
pub use owner::DofOwner;

/// Boxed owner as stored in an owner arena.
pub type BoxedOwner = Box<dyn DofOwner>;
