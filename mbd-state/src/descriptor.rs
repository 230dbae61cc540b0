//! Solver-facing descriptor: injected mass blocks and force/speed vectors.
//!
//! Owners do not talk to the numerical solver directly. During assembly each
//! owner injects its inverse-mass block and accumulates its force and speed
//! contributions here through the `variables_*` hooks; the solver consumes
//! the descriptor together with the Jacobian, correction, and compliance
//! terms, and writes new velocities back through `qb`.

use nalgebra::{DMatrix, DVector};

/// A dense inverse-mass block anchored at a velocity-state offset.
///
/// The global mass matrix is block diagonal: one square block per owner with
/// mass, placed at that owner's velocity offset. Owners without mass (or
/// with all DOFs fixed) contribute no block.
#[derive(Debug, Clone)]
pub struct InverseMassBlock {
    /// Offset of the block in the velocity-state vector.
    pub offset: usize,
    /// The inverse mass/inertia matrix (square, `ndof_w_active` wide).
    pub inv_mass: DMatrix<f64>,
}

/// Per-step solver inputs populated by owner injection.
///
/// `fb` is the known term (`M v_old + h f` in velocity-level schemes), `qb`
/// holds speeds: loaded with current speeds before the solve, overwritten
/// with the solution afterwards.
#[derive(Debug, Clone, Default)]
pub struct SystemDescriptor {
    fb: DVector<f64>,
    qb: DVector<f64>,
    blocks: Vec<InverseMassBlock>,
}

impl SystemDescriptor {
    /// Create an empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a velocity-state of size `n_w`: zero `fb`/`qb`, drop all
    /// injected blocks.
    pub fn reset(&mut self, n_w: usize) {
        self.fb = DVector::zeros(n_w);
        self.qb = DVector::zeros(n_w);
        self.blocks.clear();
    }

    /// Size of the velocity state this descriptor was reset for.
    #[must_use]
    pub fn n_w(&self) -> usize {
        self.fb.len()
    }

    /// Register an owner's inverse-mass block.
    pub fn add_inverse_mass(&mut self, offset: usize, inv_mass: DMatrix<f64>) {
        debug_assert!(inv_mass.is_square());
        debug_assert!(offset + inv_mass.nrows() <= self.fb.len());
        self.blocks.push(InverseMassBlock { offset, inv_mass });
    }

    /// Injected inverse-mass blocks, in injection order.
    #[must_use]
    pub fn blocks(&self) -> &[InverseMassBlock] {
        &self.blocks
    }

    /// The known-term vector.
    #[must_use]
    pub fn fb(&self) -> &DVector<f64> {
        &self.fb
    }

    /// Mutable access to the known-term vector (for `variables_fb_*` hooks).
    pub fn fb_mut(&mut self) -> &mut DVector<f64> {
        &mut self.fb
    }

    /// The speed vector.
    #[must_use]
    pub fn qb(&self) -> &DVector<f64> {
        &self.qb
    }

    /// Mutable access to the speed vector.
    pub fn qb_mut(&mut self) -> &mut DVector<f64> {
        &mut self.qb
    }

    /// Replace `qb` with the solver's solution.
    pub fn set_qb(&mut self, qb: DVector<f64>) {
        debug_assert_eq!(qb.len(), self.fb.len());
        self.qb = qb;
    }

    /// Apply the block-diagonal inverse mass: `out = M⁻¹ v`.
    ///
    /// DOFs not covered by any block (infinite mass) map to zero.
    #[must_use]
    pub fn apply_inverse_mass(&self, v: &DVector<f64>) -> DVector<f64> {
        debug_assert_eq!(v.len(), self.fb.len());
        let mut out = DVector::zeros(v.len());
        for block in &self.blocks {
            let n = block.inv_mass.nrows();
            let slice = v.rows(block.offset, n);
            let result = &block.inv_mass * slice;
            out.rows_mut(block.offset, n).copy_from(&result);
        }
        out
    }

    /// Compute the unconstrained velocity `v_free = M⁻¹ fb`, falling back to
    /// the loaded speed `qb` for DOFs with no injected mass (their velocity
    /// cannot change).
    #[must_use]
    pub fn free_velocity(&self) -> DVector<f64> {
        let mut v_free = self.qb.clone();
        for block in &self.blocks {
            let n = block.inv_mass.nrows();
            let slice = self.fb.rows(block.offset, n);
            let result = &block.inv_mass * slice;
            v_free.rows_mut(block.offset, n).copy_from(&result);
        }
        v_free
    }
}
