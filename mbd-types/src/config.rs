//! Assembly and stabilization configuration.

use serde::{Deserialize, Serialize};

use crate::error::AssemblyError;

/// Configuration for constraint assembly and stabilization.
///
/// Correction terms use Baumgarte stabilization at the velocity level:
/// each constraint row contributes `b_i = -(baumgarte / dt) * C_i`, where
/// `C_i` is the position-level violation. `baumgarte = 1.0` removes the full
/// violation in one step; smaller values trade correction speed for damping
/// of stabilization-induced energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Baumgarte stabilization factor in `[0, 1]`.
    pub baumgarte: f64,
    /// Diagonal regularization added to the effective-mass matrix of the
    /// reference solver. Keeps the Schur complement positive definite in the
    /// presence of redundant constraints.
    pub regularization: f64,
    /// Minimum number of active constraints before the numeric refill phases
    /// (`build_d`, `build_b`, `build_e`) fan out across worker threads.
    /// Below the threshold they run sequentially to avoid scheduling
    /// overhead on small systems.
    pub min_constraints_for_parallel: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            baumgarte: 1.0,
            regularization: 1e-10,
            min_constraints_for_parallel: 64,
        }
    }
}

impl AssemblyConfig {
    /// Set the Baumgarte stabilization factor.
    #[must_use]
    pub fn with_baumgarte(mut self, baumgarte: f64) -> Self {
        self.baumgarte = baumgarte;
        self
    }

    /// Set the diagonal regularization.
    #[must_use]
    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }

    /// Set the parallel-refill threshold.
    #[must_use]
    pub fn with_parallel_threshold(mut self, min_constraints: usize) -> Self {
        self.min_constraints_for_parallel = min_constraints;
        self
    }

    /// Disable parallel numeric refill entirely.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.min_constraints_for_parallel = usize::MAX;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidConfig`] when the Baumgarte factor is
    /// outside `[0, 1]` or the regularization is negative or non-finite.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        if !self.baumgarte.is_finite() || !(0.0..=1.0).contains(&self.baumgarte) {
            return Err(AssemblyError::invalid_config(format!(
                "baumgarte factor {} outside [0, 1]",
                self.baumgarte
            )));
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(AssemblyError::invalid_config(format!(
                "regularization {} must be non-negative and finite",
                self.regularization
            )));
        }
        Ok(())
    }
}
