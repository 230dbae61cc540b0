//! The DOF-owner capability set.
//!
//! Any entity contributing degrees of freedom to the system (rigid body,
//! 1-D shaft, FEA node) implements [`DofOwner`]. The trait covers three
//! concerns:
//!
//! 1. **Sizing** - position and velocity DOF counts, which may differ when
//!    rotation uses a non-minimal parameterization (quaternion position,
//!    angular-velocity derivative), and may shrink when DOFs are fixed.
//! 2. **State transfer** - gather/scatter between the owner's internal state
//!    and caller-supplied global vectors, plus the `x_new = x ⊕ Dv`
//!    increment law and its inverse.
//! 3. **Solver injection** - registering mass blocks and force terms with
//!    the [`SystemDescriptor`] and recovering the solution.
//!
//! Every hook defaults to a no-op so that owners with zero DOFs (markers,
//! kinematic endpoints) are first-class citizens rather than special cases.
//! Offsets passed to these methods come from the state layout; out-of-range
//! offsets are a precondition violation checked with debug assertions, not a
//! recoverable failure.

use std::any::Any;

use mbd_types::OwnerKind;
use nalgebra::DVector;

use crate::descriptor::SystemDescriptor;

/// Capability set for an entity owning degrees of freedom.
pub trait DofOwner: Send + Sync {
    /// Classification tag, used to classify constraints connecting this owner.
    fn kind(&self) -> OwnerKind;

    /// Concrete-type escape hatch for callers holding the owner behind
    /// `dyn DofOwner` (force application, owner-specific state access).
    /// Implement as `self`.
    fn as_any(&self) -> &dyn Any;

    /// Mutable counterpart of [`as_any`](Self::as_any).
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Number of position-level degrees of freedom.
    fn ndof_x(&self) -> usize;

    /// Number of velocity-level degrees of freedom.
    ///
    /// Defaults to [`ndof_x`](Self::ndof_x); override when rotation uses a
    /// non-minimal parameterization (4-component quaternion position against
    /// a 3-component angular velocity).
    fn ndof_w(&self) -> usize {
        self.ndof_x()
    }

    /// Number of *active* position DOFs (those not fixed).
    fn ndof_x_active(&self) -> usize {
        self.ndof_x()
    }

    /// Number of *active* velocity DOFs (those not fixed).
    fn ndof_w_active(&self) -> usize {
        self.ndof_w()
    }

    /// Whether all DOFs of this owner participate in the state vectors.
    ///
    /// Returns `false` when some DOFs are fixed; the layout then reserves
    /// only the active counts.
    fn use_full_dof(&self) -> bool {
        true
    }

    /// Position DOFs this owner occupies in the state vector: the full count
    /// when [`use_full_dof`](Self::use_full_dof) holds, the active count
    /// otherwise.
    fn state_ndof_x(&self) -> usize {
        if self.use_full_dof() {
            self.ndof_x()
        } else {
            self.ndof_x_active()
        }
    }

    /// Velocity DOFs this owner occupies in the state vector.
    fn state_ndof_w(&self) -> usize {
        if self.use_full_dof() {
            self.ndof_w()
        } else {
            self.ndof_w_active()
        }
    }

    /// Read this owner's current state into the global vectors at the given
    /// offsets. Side-effect free; the default does nothing (stateless owner).
    fn state_gather(
        &self,
        off_x: usize,
        x: &mut DVector<f64>,
        off_w: usize,
        w: &mut DVector<f64>,
        t: &mut f64,
    ) {
        let _ = (off_x, x, off_w, w, t);
    }

    /// Write this owner's internal state from the global vectors, triggering
    /// any internal update (derived frames, normalization).
    fn state_scatter(
        &mut self,
        off_x: usize,
        x: &DVector<f64>,
        off_w: usize,
        w: &DVector<f64>,
        t: f64,
    ) {
        let _ = (off_x, x, off_w, w, t);
    }

    /// Apply `x_new = x ⊕ Dv` where `⊕` is owner-specific: plain addition
    /// for translational DOFs, quaternion composition for rotational ones.
    ///
    /// Must be the inverse of [`state_get_increment`](Self::state_get_increment).
    /// The default is componentwise addition, valid only when position and
    /// velocity DOF counts coincide.
    fn state_increment(
        &self,
        off_x: usize,
        x_new: &mut DVector<f64>,
        x: &DVector<f64>,
        off_w: usize,
        dv: &DVector<f64>,
    ) {
        let n = self.state_ndof_x();
        debug_assert_eq!(n, self.state_ndof_w(), "default increment needs ndof_x == ndof_w");
        debug_assert!(off_x + n <= x.len() && off_w + n <= dv.len());
        for i in 0..n {
            x_new[off_x + i] = x[off_x + i] + dv[off_w + i];
        }
    }

    /// Recover `Dv` such that `x_new = x ⊕ Dv`; the inverse of
    /// [`state_increment`](Self::state_increment).
    fn state_get_increment(
        &self,
        off_x: usize,
        x_new: &DVector<f64>,
        x: &DVector<f64>,
        off_w: usize,
        dv: &mut DVector<f64>,
    ) {
        let n = self.state_ndof_x();
        debug_assert_eq!(n, self.state_ndof_w(), "default increment needs ndof_x == ndof_w");
        debug_assert!(off_x + n <= x.len() && off_w + n <= dv.len());
        for i in 0..n {
            dv[off_w + i] = x_new[off_x + i] - x[off_x + i];
        }
    }

    /// Register this owner's inverse-mass block with the solver descriptor.
    /// Owners without mass (or with all DOFs fixed) register nothing.
    fn inject_variables(&self, off_w: usize, descriptor: &mut SystemDescriptor) {
        let _ = (off_w, descriptor);
    }

    /// Zero this owner's slice of the known-term vector `fb`.
    fn variables_fb_reset(&self, off_w: usize, fb: &mut DVector<f64>) {
        let n = self.state_ndof_w();
        debug_assert!(off_w + n <= fb.len());
        for i in 0..n {
            fb[off_w + i] = 0.0;
        }
    }

    /// Accumulate currently applied forces into `fb`: `fb += f * factor`.
    fn variables_fb_load_forces(&self, off_w: usize, fb: &mut DVector<f64>, factor: f64) {
        let _ = (off_w, fb, factor);
    }

    /// Initialize this owner's slice of `qb` with its current speed.
    fn variables_qb_load_speed(&self, off_w: usize, qb: &mut DVector<f64>) {
        let _ = (off_w, qb);
    }

    /// Accumulate `fb += M * qb`, the momentum term used by velocity-level
    /// timestepping schemes (`M v_new = M v_old + h f`).
    fn variables_fb_increment_mq(&self, off_w: usize, fb: &mut DVector<f64>, qb: &DVector<f64>) {
        let _ = (off_w, fb, qb);
    }

    /// Fetch the solved speed from `qb` and store it as the owner's current
    /// speed. `step` is the timestep of the enclosing scheme (available for
    /// backward-difference acceleration estimates; unused by default).
    fn variables_qb_set_speed(&mut self, off_w: usize, qb: &DVector<f64>, step: f64) {
        let _ = (off_w, qb, step);
    }

    /// Increment the owner's position by `qb * step` under the owner's `⊕`
    /// law (first-order explicit position update).
    fn variables_qb_increment_position(&mut self, off_w: usize, qb: &DVector<f64>, step: f64) {
        let _ = (off_w, qb, step);
    }
}

impl std::fmt::Debug for dyn DofOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DofOwner")
            .field("kind", &self.kind())
            .field("ndof_x", &self.ndof_x())
            .field("ndof_w", &self.ndof_w())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Minimal 2-DOF owner exercising the trait defaults.
    struct Planar {
        pos: [f64; 2],
        vel: [f64; 2],
    }

    impl DofOwner for Planar {
        fn kind(&self) -> OwnerKind {
            OwnerKind::FeaNode
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn ndof_x(&self) -> usize {
            2
        }

        fn state_gather(
            &self,
            off_x: usize,
            x: &mut DVector<f64>,
            off_w: usize,
            w: &mut DVector<f64>,
            _t: &mut f64,
        ) {
            x[off_x] = self.pos[0];
            x[off_x + 1] = self.pos[1];
            w[off_w] = self.vel[0];
            w[off_w + 1] = self.vel[1];
        }
    }

    #[test]
    fn test_default_sizing() {
        let p = Planar {
            pos: [0.0; 2],
            vel: [0.0; 2],
        };
        assert_eq!(p.ndof_w(), 2);
        assert_eq!(p.ndof_x_active(), 2);
        assert_eq!(p.ndof_w_active(), 2);
        assert!(p.use_full_dof());
        assert_eq!(p.state_ndof_x(), 2);
    }

    #[test]
    fn test_default_increment_roundtrip() {
        let p = Planar {
            pos: [1.0, 2.0],
            vel: [0.0; 2],
        };
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let mut x_new = DVector::zeros(2);
        let dv = DVector::from_vec(vec![0.5, -0.5]);

        p.state_increment(0, &mut x_new, &x, 0, &dv);
        assert_relative_eq!(x_new[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(x_new[1], 1.5, epsilon = 1e-12);

        let mut recovered = DVector::zeros(2);
        p.state_get_increment(0, &x_new, &x, 0, &mut recovered);
        assert_relative_eq!(recovered[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(recovered[1], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_fb_reset_zeroes_slice() {
        let p = Planar {
            pos: [0.0; 2],
            vel: [0.0; 2],
        };
        let mut fb = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        p.variables_fb_reset(1, &mut fb);
        assert_relative_eq!(fb[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(fb[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(fb[2], 0.0, epsilon = 1e-12);
        assert_relative_eq!(fb[3], 4.0, epsilon = 1e-12);
    }
}
