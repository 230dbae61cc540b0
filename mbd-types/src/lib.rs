//! Core types for multibody constraint assembly.
//!
//! This crate provides the foundational vocabulary shared by the state,
//! constraint, and stepper layers:
//!
//! - [`OwnerHandle`] / [`ConstraintHandle`] - arena handles for DOF-owners
//!   and registered constraints
//! - [`OwnerKind`] - classification tag for a DOF-owner
//! - [`ConstraintClass`] - bilateral constraint classification by connected
//!   owner kinds
//! - [`AssemblyError`] - error taxonomy for layout, assembly, and stepping
//! - [`AssemblyConfig`] - stabilization and parallelism configuration
//!
//! # Design Philosophy
//!
//! These types are **pure data**. They carry no assembly logic and no
//! references into the owner or constraint arenas; they are the common
//! language between the state bookkeeping, the Jacobian builder, and the
//! stepper driver.

#![doc(html_root_url = "https://docs.rs/mbd-types/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod config;
mod error;
mod id;
mod kind;

pub use config::AssemblyConfig;
pub use error::AssemblyError;
pub use id::{ConstraintHandle, OwnerHandle};
pub use kind::{ConstraintClass, OwnerKind};

/// Result type for assembly operations.
pub type Result<T> = std::result::Result<T, AssemblyError>;
