//! Error types for constraint assembly and stepping.

use crate::kind::OwnerKind;
use thiserror::Error;

/// Errors that can occur during layout setup, assembly, or stepping.
///
/// Structural errors (`UnknownConstraintClass`, `StaleSparsity`,
/// `StaleLayout`) are fatal for the current step: the system must be rebuilt
/// (layout setup + sparsity regeneration) before stepping again. Solver
/// non-convergence is surfaced as-is; retry policy belongs to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssemblyError {
    /// A constraint connects owner kinds with no defined Jacobian rule.
    #[error("no Jacobian rule for owner pairing {kinds:?}")]
    UnknownConstraintClass {
        /// Kinds of the owners the constraint tried to connect.
        kinds: Vec<OwnerKind>,
    },

    /// A constraint connects an unsupported number of owners.
    #[error("constraint connects {count} owners, expected 2 or 3")]
    InvalidAnchorCount {
        /// Number of anchors supplied.
        count: usize,
    },

    /// Owner handle does not refer to a live arena slot.
    #[error("invalid owner handle: owner#{0}")]
    InvalidOwnerHandle(usize),

    /// Constraint handle does not refer to a live registry slot.
    #[error("invalid constraint handle: constraint#{0}")]
    InvalidConstraintHandle(usize),

    /// A constraint's Jacobian blocks no longer fit the cached sparsity
    /// pattern (the owner or constraint set changed without regeneration).
    #[error("stale sparsity pattern at constraint#{constraint}: block for anchor {anchor} has width {found}, pattern expects {expected}")]
    StaleSparsity {
        /// Registry index of the offending constraint.
        constraint: usize,
        /// Anchor position within the constraint.
        anchor: usize,
        /// Block width recorded in the pattern.
        expected: usize,
        /// Block width the constraint produced.
        found: usize,
    },

    /// The owner or constraint set changed after the sparsity pattern was
    /// generated; the pattern must be regenerated before numeric refill.
    #[error("constraint set changed since sparsity generation; regenerate before assembly")]
    StructuralChangePending,

    /// Assembly ran against a state layout generation it was not built for.
    #[error("stale state layout: assembly built for generation {built_for}, layout is at {current}")]
    StaleLayout {
        /// Layout generation the sparsity pattern was generated against.
        built_for: u64,
        /// Current layout generation.
        current: u64,
    },

    /// The external solver failed to converge.
    #[error("solver did not converge after {iterations} iterations (residual {residual:.3e})")]
    SolverNotConverged {
        /// Iterations performed before giving up.
        iterations: usize,
        /// Final residual norm.
        residual: f64,
    },

    /// The linear system handed to the solver is singular or indefinite
    /// beyond what regularization can absorb.
    #[error("solver system is singular ({rows} rows)")]
    SingularSystem {
        /// Number of constraint rows in the failing system.
        rows: usize,
    },

    /// Invalid integration timestep.
    #[error("invalid timestep: {0} (must be non-negative and finite)")]
    InvalidTimestep(f64),

    /// A previous step aborted mid-cycle; the stepper refuses further work
    /// until the system is rebuilt.
    #[error("stepper poisoned by an aborted step; rebuild the system before stepping")]
    StepperPoisoned,

    /// Invalid configuration value.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl AssemblyError {
    /// Create an unknown-classification error from the offending kinds.
    #[must_use]
    pub fn unknown_class(kinds: &[OwnerKind]) -> Self {
        Self::UnknownConstraintClass {
            kinds: kinds.to_vec(),
        }
    }

    /// Create an invalid-configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error requires a full structural rebuild before the
    /// system can be stepped again.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::StaleSparsity { .. }
                | Self::StaleLayout { .. }
                | Self::StructuralChangePending
                | Self::InvalidOwnerHandle(_)
                | Self::InvalidConstraintHandle(_)
        )
    }
}
