//! Stable handles for DOF-owners and constraints.
//!
//! Owners and constraints live in arenas owned by the enclosing system;
//! everything else refers to them through these index handles. Offsets into
//! the global state vectors are kept in a side table keyed by handle, never
//! on the owners themselves, so layout bookkeeping stays decoupled from
//! owner lifetime.

use serde::{Deserialize, Serialize};

/// Handle to a DOF-owner slot in the owner arena.
///
/// Handles are assigned in registration order and remain stable for the
/// lifetime of the slot, including across state-layout rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerHandle(pub usize);

impl OwnerHandle {
    /// Create a handle from a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for OwnerHandle {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for OwnerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Handle to a registered constraint slot in the constraint registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintHandle(pub usize);

impl ConstraintHandle {
    /// Create a handle from a raw registry index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw registry index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for ConstraintHandle {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for ConstraintHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "constraint#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_handle_roundtrip() {
        let h = OwnerHandle::new(42);
        assert_eq!(h.index(), 42);

        let h2: OwnerHandle = 42.into();
        assert_eq!(h, h2);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(format!("{}", OwnerHandle::new(3)), "owner#3");
        assert_eq!(format!("{}", ConstraintHandle::new(7)), "constraint#7");
    }

    #[test]
    fn test_handle_ordering() {
        assert!(OwnerHandle::new(1) < OwnerHandle::new(2));
    }
}
