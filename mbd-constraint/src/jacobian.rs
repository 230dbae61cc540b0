//! Sparsity-cached constraint Jacobian assembly.
//!
//! Assembly runs in two phases. [`JacobianAssembly::generate_sparsity`]
//! walks the registry once, sequentially, and lays out the CSR pattern:
//! rows grouped per constraint, blocks sorted by column within each row,
//! values stored constraint-contiguous so the flat buffer IS the CSR values
//! array. [`JacobianAssembly::build_d`] then refills the numeric values in
//! place every step without allocating, in parallel across constraints when
//! the system is large enough to pay for it.
//!
//! Both phases carry staleness checks: the values pass refuses to run when
//! the registry changed since generation, when the layout generation moved,
//! or when any anchor's block width no longer matches the cached pattern.

use std::ops::Range;

use mbd_state::StateLayout;
use mbd_types::{AssemblyConfig, AssemblyError, ConstraintHandle, OwnerHandle, Result};
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use tracing::debug;

use crate::constraint::ConstraintContext;
use crate::registry::{ConstraintEntry, ConstraintRegistry};

/// One dense block's placement within the CSR arrays.
#[derive(Debug, Clone, Copy)]
struct BlockSlot {
    /// Anchor index within the owning constraint, in declaration order.
    anchor: usize,
    /// First column of the block.
    col: usize,
    /// Block width (the anchor's active velocity-DOF count).
    len: usize,
    /// Offset of the block's first value in the flat values array.
    at: usize,
}

/// The contiguous region of the CSR arrays owned by one constraint.
#[derive(Debug, Clone)]
struct ConstraintSpan {
    handle: ConstraintHandle,
    first_row: usize,
    rows: usize,
    /// Blocks per row; constant within a constraint (anchors don't vary by row).
    blocks_per_row: usize,
    /// This constraint's slice of the values array.
    values: Range<usize>,
    /// This constraint's slice of the block-slot table.
    blocks: Range<usize>,
    /// Anchor handles with the block width the pattern was built for
    /// (zero for owners excluded from the state).
    anchors: Vec<(OwnerHandle, usize)>,
}

/// CSR constraint Jacobian `D` with a cached sparsity pattern.
#[derive(Debug, Clone, Default)]
pub struct JacobianAssembly {
    n_rows: usize,
    n_cols: usize,
    generation: u64,
    spans: Vec<ConstraintSpan>,
    block_slots: Vec<BlockSlot>,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

impl JacobianAssembly {
    /// Create an empty assembly (no pattern generated yet).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the sparsity pattern for the current registry and layout.
    ///
    /// Sequential and idempotent: the same registry and layout always
    /// produce the same pattern. Sizes the flat values buffer; all
    /// subsequent [`build_d`](Self::build_d) calls refill it in place.
    /// Clears the registry's dirty flag.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidOwnerHandle`] when a constraint
    /// anchors an owner absent from the layout.
    pub fn generate_sparsity(
        &mut self,
        layout: &StateLayout,
        registry: &mut ConstraintRegistry,
    ) -> Result<()> {
        self.spans.clear();
        self.block_slots.clear();
        self.row_offsets.clear();
        self.col_indices.clear();
        self.row_offsets.push(0);

        let mut n_rows = 0;
        let mut row_blocks: Vec<(usize, usize, usize)> = Vec::new(); // (col, len, anchor)
        for (handle, entry) in registry.active() {
            let constraint = entry.constraint();
            let mut anchors = Vec::with_capacity(constraint.anchors().len());
            row_blocks.clear();
            for (ai, &owner) in constraint.anchors().iter().enumerate() {
                let slot = layout.try_slot(owner)?;
                anchors.push((owner, slot.ndof_w));
                if slot.ndof_w > 0 {
                    row_blocks.push((slot.offset_w, slot.ndof_w, ai));
                }
            }
            // CSR wants column-sorted entries within each row.
            row_blocks.sort_unstable_by_key(|&(col, _, _)| col);

            let rows = constraint.num_rows();
            let values_start = self.col_indices.len();
            let blocks_start = self.block_slots.len();
            for _ in 0..rows {
                for &(col, len, anchor) in &row_blocks {
                    self.block_slots.push(BlockSlot {
                        anchor,
                        col,
                        len,
                        at: self.col_indices.len(),
                    });
                    self.col_indices.extend(col..col + len);
                }
                self.row_offsets.push(self.col_indices.len());
            }
            self.spans.push(ConstraintSpan {
                handle,
                first_row: n_rows,
                rows,
                blocks_per_row: row_blocks.len(),
                values: values_start..self.col_indices.len(),
                blocks: blocks_start..self.block_slots.len(),
                anchors,
            });
            n_rows += rows;
        }

        self.n_rows = n_rows;
        self.n_cols = layout.n_w();
        self.values.clear();
        self.values.resize(self.col_indices.len(), 0.0);
        self.generation = layout.generation();
        registry.mark_clean();
        debug!(
            rows = self.n_rows,
            cols = self.n_cols,
            nnz = self.values.len(),
            constraints = self.spans.len(),
            "sparsity pattern generated"
        );
        Ok(())
    }

    /// Refill the Jacobian values at the current state.
    ///
    /// Allocation-free: writes into the buffer sized by the last
    /// [`generate_sparsity`](Self::generate_sparsity). Runs in parallel
    /// across constraints once there are at least
    /// [`AssemblyConfig::min_constraints_for_parallel`] of them.
    ///
    /// # Errors
    ///
    /// - [`AssemblyError::StructuralChangePending`] when the registry
    ///   changed since the pattern was generated
    /// - [`AssemblyError::StaleLayout`] when the layout generation moved
    /// - [`AssemblyError::StaleSparsity`] when an anchor's block width no
    ///   longer matches the pattern
    pub fn build_d(
        &mut self,
        registry: &ConstraintRegistry,
        ctx: &ConstraintContext<'_>,
        config: &AssemblyConfig,
    ) -> Result<()> {
        self.check_fresh(registry, ctx)?;

        let entries: Vec<&ConstraintEntry> = registry.active().map(|(_, e)| e).collect();
        let spans = &self.spans;
        let block_slots = &self.block_slots;

        let mut chunks: Vec<&mut [f64]> = Vec::with_capacity(spans.len());
        let mut rest = self.values.as_mut_slice();
        for span in spans {
            let (head, tail) = rest.split_at_mut(span.values.len());
            chunks.push(head);
            rest = tail;
        }

        let fill = |((chunk, span), entry): ((&mut [f64], &ConstraintSpan), &&ConstraintEntry)| {
            chunk.fill(0.0);
            let constraint = entry.constraint();
            let base = span.values.start;
            for row in 0..span.rows {
                let start = span.blocks.start + row * span.blocks_per_row;
                for slot in &block_slots[start..start + span.blocks_per_row] {
                    let local = slot.at - base;
                    constraint.jacobian_block(
                        ctx,
                        row,
                        slot.anchor,
                        &mut chunk[local..local + slot.len],
                    );
                }
            }
        };

        if spans.len() >= config.min_constraints_for_parallel {
            chunks
                .into_par_iter()
                .zip(spans.par_iter())
                .zip(entries.par_iter())
                .for_each(fill);
        } else {
            chunks
                .into_iter()
                .zip(spans.iter())
                .zip(entries.iter())
                .for_each(fill);
        }
        Ok(())
    }

    /// Verify the cached pattern still matches the registry and layout.
    fn check_fresh(
        &self,
        registry: &ConstraintRegistry,
        ctx: &ConstraintContext<'_>,
    ) -> Result<()> {
        if registry.is_dirty() || registry.active_count() != self.spans.len() {
            return Err(AssemblyError::StructuralChangePending);
        }
        if self.generation != ctx.layout.generation() {
            return Err(AssemblyError::StaleLayout {
                built_for: self.generation,
                current: ctx.layout.generation(),
            });
        }
        for (span, (handle, entry)) in self.spans.iter().zip(registry.active()) {
            if span.handle != handle || entry.constraint().num_rows() != span.rows {
                return Err(AssemblyError::StructuralChangePending);
            }
            for (ai, &(owner, expected)) in span.anchors.iter().enumerate() {
                let found = ctx.layout.try_slot(owner)?.ndof_w;
                if found != expected {
                    return Err(AssemblyError::StaleSparsity {
                        constraint: span.handle.index(),
                        anchor: ai,
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    /// First global row of a registered constraint in the current pattern.
    #[must_use]
    pub fn first_row_of(&self, handle: ConstraintHandle) -> Option<usize> {
        self.spans
            .iter()
            .find(|s| s.handle == handle)
            .map(|s| s.first_row)
    }

    /// Number of constraint rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of velocity-state columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of stored (structurally nonzero) entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Layout generation the pattern was generated against.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// CSR row offsets (`n_rows + 1` entries).
    #[must_use]
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// CSR column indices.
    #[must_use]
    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// Flat values array, constraint-contiguous and row-major.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// `out = D v` (velocity space into constraint space).
    ///
    /// `out` is resized to `n_rows`.
    pub fn mul_vec(&self, v: &DVector<f64>, out: &mut DVector<f64>) {
        debug_assert_eq!(v.len(), self.n_cols);
        if out.len() != self.n_rows {
            *out = DVector::zeros(self.n_rows);
        }
        for row in 0..self.n_rows {
            let mut acc = 0.0;
            for k in self.row_offsets[row]..self.row_offsets[row + 1] {
                acc += self.values[k] * v[self.col_indices[k]];
            }
            out[row] = acc;
        }
    }

    /// `out = Dᵀ λ` (constraint space back into velocity space).
    ///
    /// `out` is resized to `n_cols` and zeroed before accumulation.
    pub fn mul_transpose_vec(&self, lambda: &DVector<f64>, out: &mut DVector<f64>) {
        debug_assert_eq!(lambda.len(), self.n_rows);
        if out.len() != self.n_cols {
            *out = DVector::zeros(self.n_cols);
        } else {
            out.fill(0.0);
        }
        for row in 0..self.n_rows {
            let l = lambda[row];
            if l == 0.0 {
                continue;
            }
            for k in self.row_offsets[row]..self.row_offsets[row + 1] {
                out[self.col_indices[k]] += self.values[k] * l;
            }
        }
    }

    /// Export the current values as an owned CSR matrix.
    ///
    /// Allocates; intended for interop and testing, not the per-step loop.
    #[must_use]
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(self.n_rows, self.n_cols);
        for row in 0..self.n_rows {
            for k in self.row_offsets[row]..self.row_offsets[row + 1] {
                coo.push(row, self.col_indices[k], self.values[k]);
            }
        }
        CsrMatrix::from(&coo)
    }
}
