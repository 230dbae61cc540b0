//! Zero-DOF marker owner.

use mbd_types::OwnerKind;

use crate::owner::DofOwner;

/// A stateless kinematic marker contributing no degrees of freedom.
///
/// Exists to anchor constraints to a fixed point without adding state; every
/// capability hook falls through to the trait's no-op default.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMarker;

impl DofOwner for FixedMarker {
    fn kind(&self) -> OwnerKind {
        OwnerKind::Marker
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn ndof_x(&self) -> usize {
        0
    }
}
