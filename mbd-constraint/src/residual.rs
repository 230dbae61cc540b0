//! Constraint-space right-hand-side assembly.
//!
//! Builds the two per-row vectors the solver consumes alongside the
//! Jacobian: the stabilization term `b` (Baumgarte-scaled position
//! violation, `b_i = -(beta/dt) * C_i`) and the compliance diagonal `E`.
//! Rows follow registry iteration order, matching the Jacobian's row
//! numbering exactly.

use mbd_types::{AssemblyConfig, AssemblyError, Result};
use nalgebra::DVector;
use rayon::prelude::*;

use crate::constraint::ConstraintContext;
use crate::registry::{ConstraintEntry, ConstraintRegistry};

/// Per-row stabilization and compliance vectors.
#[derive(Debug, Clone, Default)]
pub struct ResidualAssembly {
    b: DVector<f64>,
    e: DVector<f64>,
}

impl ResidualAssembly {
    /// Create an empty assembly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the stabilization vector `b` at the gathered state.
    ///
    /// With `dt <= 0` (the defined no-op cycle) every row is zero: there is
    /// no velocity budget to correct position drift against.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::StructuralChangePending`] when the registry
    /// changed since the last sparsity generation.
    pub fn build_b(
        &mut self,
        registry: &ConstraintRegistry,
        ctx: &ConstraintContext<'_>,
        dt: f64,
        config: &AssemblyConfig,
    ) -> Result<()> {
        if registry.is_dirty() {
            return Err(AssemblyError::StructuralChangePending);
        }
        self.resize_b(registry.total_rows());

        let scale = if dt > 0.0 {
            -config.baumgarte / dt
        } else {
            0.0
        };
        if scale == 0.0 {
            self.b.fill(0.0);
            return Ok(());
        }

        let entries: Vec<&ConstraintEntry> = registry.active().map(|(_, e)| e).collect();
        if entries.len() >= config.min_constraints_for_parallel {
            let chunks = split_by_rows(self.b.as_mut_slice(), &entries);
            chunks
                .into_par_iter()
                .zip(entries.par_iter())
                .for_each(|(chunk, entry)| {
                    for (row, out) in chunk.iter_mut().enumerate() {
                        *out = scale * entry.constraint().violation(ctx, row);
                    }
                });
        } else {
            let mut row0 = 0;
            for entry in &entries {
                let constraint = entry.constraint();
                for row in 0..constraint.num_rows() {
                    self.b[row0 + row] = scale * constraint.violation(ctx, row);
                }
                row0 += constraint.num_rows();
            }
        }
        Ok(())
    }

    /// Assemble the compliance diagonal `E`.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::StructuralChangePending`] when the registry
    /// changed since the last sparsity generation.
    pub fn build_e(&mut self, registry: &ConstraintRegistry, config: &AssemblyConfig) -> Result<()> {
        if registry.is_dirty() {
            return Err(AssemblyError::StructuralChangePending);
        }
        let total = registry.total_rows();
        if self.e.len() != total {
            self.e = DVector::zeros(total);
        }

        let entries: Vec<&ConstraintEntry> = registry.active().map(|(_, e)| e).collect();
        if entries.len() >= config.min_constraints_for_parallel {
            let chunks = split_by_rows(self.e.as_mut_slice(), &entries);
            chunks
                .into_par_iter()
                .zip(entries.par_iter())
                .for_each(|(chunk, entry)| {
                    for (row, out) in chunk.iter_mut().enumerate() {
                        *out = entry.constraint().compliance(row);
                    }
                });
        } else {
            let mut row0 = 0;
            for entry in &entries {
                let constraint = entry.constraint();
                for row in 0..constraint.num_rows() {
                    self.e[row0 + row] = constraint.compliance(row);
                }
                row0 += constraint.num_rows();
            }
        }
        Ok(())
    }

    fn resize_b(&mut self, total: usize) {
        if self.b.len() != total {
            self.b = DVector::zeros(total);
        }
    }

    /// Stabilization vector, one entry per constraint row.
    #[must_use]
    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    /// Compliance diagonal, one entry per constraint row.
    #[must_use]
    pub fn e(&self) -> &DVector<f64> {
        &self.e
    }
}

/// Split a row vector into disjoint per-constraint mutable chunks.
fn split_by_rows<'a>(mut rest: &'a mut [f64], entries: &[&ConstraintEntry]) -> Vec<&'a mut [f64]> {
    let mut chunks = Vec::with_capacity(entries.len());
    for entry in entries {
        let (head, tail) = rest.split_at_mut(entry.constraint().num_rows());
        chunks.push(head);
        rest = tail;
    }
    chunks
}
