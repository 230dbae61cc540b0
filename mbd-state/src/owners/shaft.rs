//! 1-D rotating shaft element: a single angle/speed DOF with scalar inertia.

use mbd_types::OwnerKind;
use nalgebra::{DMatrix, DVector};

use crate::descriptor::SystemDescriptor;
use crate::owner::DofOwner;

/// A 1-D shaft element.
///
/// Shafts model driveline components (engine cranks, gears, clutches) as a
/// single rotational DOF, coupled to each other and to rigid bodies through
/// shaft-class constraints.
#[derive(Debug, Clone)]
pub struct ShaftDofs {
    /// Shaft rotation angle.
    pub angle: f64,
    /// Shaft angular speed.
    pub speed: f64,
    inertia: f64,
    applied_torque: f64,
}

impl ShaftDofs {
    /// Create a shaft at rest with the given rotational inertia.
    #[must_use]
    pub fn new(inertia: f64) -> Self {
        debug_assert!(inertia > 0.0, "shaft inertia must be positive");
        Self {
            angle: 0.0,
            speed: 0.0,
            inertia,
            applied_torque: 0.0,
        }
    }

    /// Set the initial angle.
    #[must_use]
    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    /// Set the initial speed.
    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Shaft rotational inertia.
    #[must_use]
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Accumulate an applied torque.
    pub fn apply_torque(&mut self, torque: f64) {
        self.applied_torque += torque;
    }

    /// Clear the accumulated torque.
    pub fn clear_torque(&mut self) {
        self.applied_torque = 0.0;
    }
}

impl DofOwner for ShaftDofs {
    fn kind(&self) -> OwnerKind {
        OwnerKind::Shaft
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn ndof_x(&self) -> usize {
        1
    }

    fn state_gather(
        &self,
        off_x: usize,
        x: &mut DVector<f64>,
        off_w: usize,
        w: &mut DVector<f64>,
        _t: &mut f64,
    ) {
        x[off_x] = self.angle;
        w[off_w] = self.speed;
    }

    fn state_scatter(
        &mut self,
        off_x: usize,
        x: &DVector<f64>,
        off_w: usize,
        w: &DVector<f64>,
        _t: f64,
    ) {
        self.angle = x[off_x];
        self.speed = w[off_w];
    }

    fn inject_variables(&self, off_w: usize, descriptor: &mut SystemDescriptor) {
        descriptor.add_inverse_mass(off_w, DMatrix::from_element(1, 1, 1.0 / self.inertia));
    }

    fn variables_fb_load_forces(&self, off_w: usize, fb: &mut DVector<f64>, factor: f64) {
        fb[off_w] += self.applied_torque * factor;
    }

    fn variables_qb_load_speed(&self, off_w: usize, qb: &mut DVector<f64>) {
        qb[off_w] = self.speed;
    }

    fn variables_fb_increment_mq(&self, off_w: usize, fb: &mut DVector<f64>, qb: &DVector<f64>) {
        fb[off_w] += self.inertia * qb[off_w];
    }

    fn variables_qb_set_speed(&mut self, off_w: usize, qb: &DVector<f64>, _step: f64) {
        self.speed = qb[off_w];
    }

    fn variables_qb_increment_position(&mut self, off_w: usize, qb: &DVector<f64>, step: f64) {
        self.angle += qb[off_w] * step;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scalar_dofs() {
        let shaft = ShaftDofs::new(0.5);
        assert_eq!(shaft.ndof_x(), 1);
        assert_eq!(shaft.ndof_w(), 1);
        assert!(shaft.use_full_dof());
        assert_eq!(shaft.kind(), OwnerKind::Shaft);
    }

    #[test]
    fn test_torque_and_momentum() {
        let mut shaft = ShaftDofs::new(2.0).with_speed(3.0);
        shaft.apply_torque(4.0);

        let mut fb = DVector::zeros(1);
        let mut qb = DVector::zeros(1);
        shaft.variables_qb_load_speed(0, &mut qb);
        shaft.variables_fb_load_forces(0, &mut fb, 0.1);
        shaft.variables_fb_increment_mq(0, &mut fb, &qb);

        // fb = h * tau + I * omega = 0.4 + 6.0
        assert_relative_eq!(fb[0], 6.4, epsilon = 1e-12);
    }

    #[test]
    fn test_position_increment() {
        let mut shaft = ShaftDofs::new(1.0).with_angle(1.0);
        let qb = DVector::from_vec(vec![2.0]);
        shaft.variables_qb_set_speed(0, &qb, 0.1);
        shaft.variables_qb_increment_position(0, &qb, 0.1);

        assert_relative_eq!(shaft.speed, 2.0, epsilon = 1e-12);
        assert_relative_eq!(shaft.angle, 1.2, epsilon = 1e-12);
    }
}
