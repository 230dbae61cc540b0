//! FEA node: three translational DOFs with lumped mass, optionally fixed.

use mbd_types::OwnerKind;
use nalgebra::{DMatrix, DVector, Vector3};

use crate::descriptor::SystemDescriptor;
use crate::owner::DofOwner;

/// A finite-element node with translational DOFs only.
#[derive(Debug, Clone)]
pub struct FeaNodeDofs {
    /// Node position, world frame.
    pub position: Vector3<f64>,
    /// Node velocity, world frame.
    pub velocity: Vector3<f64>,
    mass: f64,
    applied_force: Vector3<f64>,
    fixed: bool,
}

impl FeaNodeDofs {
    /// Create a node at the given position with lumped mass.
    #[must_use]
    pub fn new(mass: f64, position: Vector3<f64>) -> Self {
        debug_assert!(mass > 0.0, "node mass must be positive");
        Self {
            position,
            velocity: Vector3::zeros(),
            mass,
            applied_force: Vector3::zeros(),
            fixed: false,
        }
    }

    /// Fix all DOFs of this node.
    #[must_use]
    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    /// Whether the node is fixed.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Lumped nodal mass.
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Accumulate an applied force.
    pub fn apply_force(&mut self, force: Vector3<f64>) {
        self.applied_force += force;
    }

    /// Clear the accumulated force.
    pub fn clear_forces(&mut self) {
        self.applied_force = Vector3::zeros();
    }
}

impl DofOwner for FeaNodeDofs {
    fn kind(&self) -> OwnerKind {
        OwnerKind::FeaNode
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn ndof_x(&self) -> usize {
        3
    }

    fn ndof_x_active(&self) -> usize {
        if self.fixed {
            0
        } else {
            3
        }
    }

    fn ndof_w_active(&self) -> usize {
        if self.fixed {
            0
        } else {
            3
        }
    }

    fn use_full_dof(&self) -> bool {
        !self.fixed
    }

    fn state_gather(
        &self,
        off_x: usize,
        x: &mut DVector<f64>,
        off_w: usize,
        w: &mut DVector<f64>,
        _t: &mut f64,
    ) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            x[off_x + i] = self.position[i];
            w[off_w + i] = self.velocity[i];
        }
    }

    fn state_scatter(
        &mut self,
        off_x: usize,
        x: &DVector<f64>,
        off_w: usize,
        w: &DVector<f64>,
        _t: f64,
    ) {
        if self.fixed {
            return;
        }
        self.position = Vector3::new(x[off_x], x[off_x + 1], x[off_x + 2]);
        self.velocity = Vector3::new(w[off_w], w[off_w + 1], w[off_w + 2]);
    }

    fn inject_variables(&self, off_w: usize, descriptor: &mut SystemDescriptor) {
        if self.fixed {
            return;
        }
        descriptor.add_inverse_mass(off_w, DMatrix::from_diagonal_element(3, 3, 1.0 / self.mass));
    }

    fn variables_fb_load_forces(&self, off_w: usize, fb: &mut DVector<f64>, factor: f64) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            fb[off_w + i] += self.applied_force[i] * factor;
        }
    }

    fn variables_qb_load_speed(&self, off_w: usize, qb: &mut DVector<f64>) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            qb[off_w + i] = self.velocity[i];
        }
    }

    fn variables_fb_increment_mq(&self, off_w: usize, fb: &mut DVector<f64>, qb: &DVector<f64>) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            fb[off_w + i] += self.mass * qb[off_w + i];
        }
    }

    fn variables_qb_set_speed(&mut self, off_w: usize, qb: &DVector<f64>, _step: f64) {
        if self.fixed {
            return;
        }
        self.velocity = Vector3::new(qb[off_w], qb[off_w + 1], qb[off_w + 2]);
    }

    fn variables_qb_increment_position(&mut self, off_w: usize, qb: &DVector<f64>, step: f64) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            self.position[i] += qb[off_w + i] * step;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_active_counts_follow_fixing() {
        let free = FeaNodeDofs::new(0.1, Vector3::zeros());
        assert_eq!(free.ndof_x_active(), 3);
        assert!(free.use_full_dof());

        let fixed = FeaNodeDofs::new(0.1, Vector3::zeros()).fixed();
        assert_eq!(fixed.ndof_x_active(), 0);
        assert_eq!(fixed.ndof_w_active(), 0);
        assert!(!fixed.use_full_dof());
    }

    #[test]
    fn test_translational_increment_is_addition() {
        let node = FeaNodeDofs::new(0.1, Vector3::new(1.0, 0.0, 0.0));
        let x = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let dv = DVector::from_vec(vec![0.1, 0.2, 0.3]);
        let mut x_new = DVector::zeros(3);
        node.state_increment(0, &mut x_new, &x, 0, &dv);

        let mut recovered = DVector::zeros(3);
        node.state_get_increment(0, &x_new, &x, 0, &mut recovered);
        for i in 0..3 {
            assert_relative_eq!(recovered[i], dv[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_fixed_node_is_inert() {
        let mut node = FeaNodeDofs::new(0.1, Vector3::new(1.0, 2.0, 3.0)).fixed();
        let mut d = SystemDescriptor::new();
        d.reset(0);
        node.inject_variables(0, &mut d);
        assert!(d.blocks().is_empty());

        let qb = DVector::zeros(0);
        node.variables_qb_increment_position(0, &qb, 0.1);
        assert_relative_eq!(node.position.x, 1.0, epsilon = 1e-12);
    }
}
