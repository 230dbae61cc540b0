//! Concrete DOF-owner implementations.
//!
//! A minimal physics-item layer: enough owner variants to exercise every
//! path of the capability set (quaternion increments, partial fixing, the
//! zero-DOF default no-ops) and to drive end-to-end stepping. Full-featured
//! bodies, shafts, and FEA meshes live in the layers that consume this core.

mod marker;
mod node;
mod rigid;
mod shaft;

pub use marker::FixedMarker;
pub use node::FeaNodeDofs;
pub use rigid::RigidBodyDofs;
pub use shaft::ShaftDofs;
