//! Velocity-level stepping driver over multibody constraint assembly.
//!
//! Ties the state and constraint layers together into a stepped simulation:
//!
//! - [`MultibodySystem`] - owner arena, constraint registry, layout, state
//!   vectors, and the solver descriptor, with structural-change tracking
//! - [`Stepper`] - the per-step phase cycle (gather, assemble, solve,
//!   scatter) with staleness repair and poisoning on aborted cycles
//! - [`ConstraintSolver`] / [`SchurSolver`] - the solver seam and the
//!   bundled dense reference solver
//!
//! # Example
//!
//! Two shafts locked at a 2:1 gear ratio, stepped until the initial phase
//! error is gone:
//!
//! ```
//! use mbd_constraint::joints::GearCouple;
//! use mbd_state::owners::ShaftDofs;
//! use mbd_stepper::{MultibodySystem, SchurSolver, Stepper};
//! use mbd_types::AssemblyConfig;
//!
//! let mut system = MultibodySystem::new();
//! let a = system.add_owner(Box::new(ShaftDofs::new(1.0).with_angle(1.0)));
//! let b = system.add_owner(Box::new(ShaftDofs::new(1.0).with_angle(0.3)));
//! system
//!     .register_constraint(Box::new(GearCouple::new(a, b, 2.0)))
//!     .unwrap();
//!
//! let mut stepper = Stepper::new(AssemblyConfig::default()).unwrap();
//! let mut solver = SchurSolver::new();
//! stepper.step(&mut system, &mut solver, 0.1).unwrap();
//!
//! let theta_a = system.owner_as::<ShaftDofs>(a).unwrap().angle;
//! let theta_b = system.owner_as::<ShaftDofs>(b).unwrap().angle;
//! assert!((theta_a - 2.0 * theta_b).abs() < 1e-9);
//! ```

#![doc(html_root_url = "https://docs.rs/mbd-stepper/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod solver;
mod stepper;
mod system;

pub use solver::{ConstraintSolver, SchurSolver, SolverSolution, SolverSystem};
pub use stepper::{StepPhase, StepReport, Stepper};
pub use system::MultibodySystem;
