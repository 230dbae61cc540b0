//! Owner kinds and bilateral constraint classification.
//!
//! Jacobian block extraction differs by the kinds of owners a constraint
//! connects: a rigid body contributes a 6-wide velocity block, a 1-D shaft a
//! single column. Every registered constraint is classified once, at
//! registration time, by the ordered kinds of its anchors. Pairings with no
//! defined Jacobian rule are rejected there and then, never silently
//! assembled with a zero block.

use serde::{Deserialize, Serialize};

/// Kind tag for a DOF-owner, used to classify constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    /// Rigid body: 7 position DOFs (translation + quaternion), 6 velocity DOFs.
    RigidBody,
    /// 1-D rotating shaft element: 1 position DOF, 1 velocity DOF.
    Shaft,
    /// FEA node with translational DOFs only.
    FeaNode,
    /// Massless, stateless marker: 0 DOFs.
    Marker,
}

impl std::fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RigidBody => "rigid body",
            Self::Shaft => "shaft",
            Self::FeaNode => "FEA node",
            Self::Marker => "marker",
        };
        write!(f, "{name}")
    }
}

/// Classification of a bilateral constraint by the owner kinds it connects.
///
/// The class determines the shape of the Jacobian blocks each scalar
/// constraint row carries (one block per connected owner, block width equal
/// to that owner's active velocity DOFs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintClass {
    /// Constraint between two rigid bodies.
    BodyBody,
    /// Constraint between two shaft elements.
    ShaftShaft,
    /// Constraint involving three shaft elements (e.g. planetary coupling).
    ShaftShaftShaft,
    /// Constraint between a shaft and a rigid body.
    ShaftBody,
    /// Constraint involving two shafts and one rigid body.
    ShaftShaftBody,
}

impl ConstraintClass {
    /// Classify a constraint by the ordered kinds of its connected owners.
    ///
    /// Returns `None` when there is no Jacobian rule for the pairing; the
    /// registry turns that into a fatal registration error. Classification is
    /// pure: the same kind sequence always yields the same class.
    #[must_use]
    pub fn classify(kinds: &[OwnerKind]) -> Option<Self> {
        use OwnerKind::{RigidBody, Shaft};

        match kinds {
            [RigidBody, RigidBody] => Some(Self::BodyBody),
            [Shaft, Shaft] => Some(Self::ShaftShaft),
            [Shaft, Shaft, Shaft] => Some(Self::ShaftShaftShaft),
            [Shaft, RigidBody] | [RigidBody, Shaft] => Some(Self::ShaftBody),
            [Shaft, Shaft, RigidBody] => Some(Self::ShaftShaftBody),
            _ => None,
        }
    }

    /// Number of owners a constraint of this class connects.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::BodyBody | Self::ShaftShaft | Self::ShaftBody => 2,
            Self::ShaftShaftShaft | Self::ShaftShaftBody => 3,
        }
    }
}

impl std::fmt::Display for ConstraintClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BodyBody => "body-body",
            Self::ShaftShaft => "shaft-shaft",
            Self::ShaftShaftShaft => "shaft-shaft-shaft",
            Self::ShaftBody => "shaft-body",
            Self::ShaftShaftBody => "shaft-shaft-body",
        };
        write!(f, "{name}")
    }
}
