//! The bilateral constraint capability set.
//!
//! A constraint contributes one or more scalar rows to the global Jacobian.
//! Each row carries one dense block per connected owner, sized by that
//! owner's active velocity-DOF count; owners excluded from the state (zero
//! width) contribute no block at all. Constraints never see global offsets:
//! the assembler hands each block out as a slice and places it.

use mbd_state::StateLayout;
use mbd_types::OwnerHandle;
use nalgebra::{DVector, Vector3};

/// Read-only view of the gathered state handed to constraints during
/// assembly.
///
/// Borrowed for the duration of one assembly pass; constraints read owner
/// state through the layout's offset table rather than touching owners
/// directly, so assembly depends only on the state vectors.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintContext<'a> {
    /// Offset table the state vectors were gathered under.
    pub layout: &'a StateLayout,
    /// Gathered position state.
    pub x: &'a DVector<f64>,
    /// Gathered velocity state.
    pub w: &'a DVector<f64>,
}

impl<'a> ConstraintContext<'a> {
    /// Create a context over gathered state.
    #[must_use]
    pub fn new(layout: &'a StateLayout, x: &'a DVector<f64>, w: &'a DVector<f64>) -> Self {
        Self { layout, x, w }
    }

    /// Translation part of a rigid-body owner's position state.
    ///
    /// Returns `None` when the owner is excluded from the state vectors
    /// (fixed, or a zero-DOF marker); the constraint falls back to its own
    /// stored reference in that case.
    #[must_use]
    pub fn body_position(&self, handle: OwnerHandle) -> Option<Vector3<f64>> {
        let slot = self.layout.slot(handle)?;
        if slot.ndof_x < 3 {
            return None;
        }
        let o = slot.offset_x;
        Some(Vector3::new(self.x[o], self.x[o + 1], self.x[o + 2]))
    }

    /// First position DOF of a scalar owner (a shaft's angle).
    ///
    /// Returns `None` when the owner reserves no position state.
    #[must_use]
    pub fn scalar_position(&self, handle: OwnerHandle) -> Option<f64> {
        let slot = self.layout.slot(handle)?;
        if slot.ndof_x < 1 {
            return None;
        }
        Some(self.x[slot.offset_x])
    }
}

/// A bilateral (equality) constraint between two or three DOF owners.
///
/// Implementors describe WHAT is constrained; sparsity placement, staleness
/// checks, and Baumgarte scaling all live in the assembler. Rows are
/// independent: `row` indexes `0..num_rows()` and `anchor` indexes into
/// [`anchors`](Self::anchors).
pub trait BilateralConstraint: Send + Sync {
    /// Handles of the connected owners, in a fixed order.
    ///
    /// Must not change after registration; length 2 or 3.
    fn anchors(&self) -> &[OwnerHandle];

    /// Number of scalar constraint rows.
    ///
    /// Must not change between sparsity generation and assembly.
    fn num_rows(&self) -> usize {
        1
    }

    /// Write the Jacobian block of `row` with respect to `anchor` into `out`.
    ///
    /// `out` has the anchor's active velocity-DOF width and arrives zeroed;
    /// implementors write only the nonzero entries. Never called for anchors
    /// with zero width.
    fn jacobian_block(
        &self,
        ctx: &ConstraintContext<'_>,
        row: usize,
        anchor: usize,
        out: &mut [f64],
    );

    /// Position-level violation `C` of `row` at the gathered state.
    ///
    /// Zero when the constraint is satisfied; fed back as a Baumgarte
    /// stabilization term by the residual assembler.
    fn violation(&self, ctx: &ConstraintContext<'_>, row: usize) -> f64;

    /// Compliance (inverse stiffness) of `row`.
    ///
    /// Zero means perfectly rigid; positive values soften the row by adding
    /// to the diagonal of the constraint-space system.
    fn compliance(&self, _row: usize) -> f64 {
        0.0
    }
}
