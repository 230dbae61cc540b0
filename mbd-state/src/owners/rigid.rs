//! Rigid body: 7 position DOFs (translation + unit quaternion), 6 velocity
//! DOFs (linear + angular velocity, world frame).
//!
//! The quaternion is stored w-first in the position state. The increment law
//! composes rotations in the world frame: `q_new = exp(Δ) ∘ q` with `Δ` a
//! rotation vector, and `state_get_increment` recovers `Δ = log(q_new ∘ q⁻¹)`.

use mbd_types::OwnerKind;
use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};

use crate::descriptor::SystemDescriptor;
use crate::owner::DofOwner;

/// A rigid body participating in the global state vectors.
#[derive(Debug, Clone)]
pub struct RigidBodyDofs {
    /// Position of the center of mass, world frame.
    pub position: Vector3<f64>,
    /// Orientation.
    pub rotation: UnitQuaternion<f64>,
    /// Linear velocity, world frame.
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity, world frame.
    pub angular_velocity: Vector3<f64>,
    mass: f64,
    /// Body-frame inertia tensor.
    inertia: Matrix3<f64>,
    applied_force: Vector3<f64>,
    applied_torque: Vector3<f64>,
    fixed: bool,
}

impl RigidBodyDofs {
    /// Create a body at the origin with the given mass and body-frame inertia.
    #[must_use]
    pub fn new(mass: f64, inertia: Matrix3<f64>) -> Self {
        debug_assert!(mass > 0.0, "rigid body mass must be positive");
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            mass,
            inertia,
            applied_force: Vector3::zeros(),
            applied_torque: Vector3::zeros(),
            fixed: false,
        }
    }

    /// Create a body with sphere-like uniform inertia.
    #[must_use]
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self::new(mass, Matrix3::from_diagonal_element(i))
    }

    /// Set the initial position.
    #[must_use]
    pub fn with_position(mut self, position: Vector3<f64>) -> Self {
        self.position = position;
        self
    }

    /// Set the initial orientation.
    #[must_use]
    pub fn with_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set the initial velocities.
    #[must_use]
    pub fn with_velocity(mut self, linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self
    }

    /// Fix all DOFs of this body (excluded from the state vectors).
    #[must_use]
    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    /// Whether the body is fixed.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Body mass.
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Accumulate an applied force at the center of mass.
    pub fn apply_force(&mut self, force: Vector3<f64>) {
        self.applied_force += force;
    }

    /// Accumulate an applied torque.
    pub fn apply_torque(&mut self, torque: Vector3<f64>) {
        self.applied_torque += torque;
    }

    /// Clear accumulated forces and torques.
    pub fn clear_forces(&mut self) {
        self.applied_force = Vector3::zeros();
        self.applied_torque = Vector3::zeros();
    }

    /// World-frame inertia tensor `R I Rᵀ`.
    #[must_use]
    pub fn world_inertia(&self) -> Matrix3<f64> {
        let r = self.rotation.to_rotation_matrix();
        r * self.inertia * r.transpose()
    }

    fn read_quaternion(x: &DVector<f64>, off: usize) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(Quaternion::new(
            x[off],
            x[off + 1],
            x[off + 2],
            x[off + 3],
        ))
    }

    fn write_quaternion(x: &mut DVector<f64>, off: usize, q: &UnitQuaternion<f64>) {
        x[off] = q.w;
        x[off + 1] = q.i;
        x[off + 2] = q.j;
        x[off + 3] = q.k;
    }
}

impl DofOwner for RigidBodyDofs {
    fn kind(&self) -> OwnerKind {
        OwnerKind::RigidBody
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn ndof_x(&self) -> usize {
        7
    }

    fn ndof_w(&self) -> usize {
        6
    }

    fn ndof_x_active(&self) -> usize {
        if self.fixed {
            0
        } else {
            7
        }
    }

    fn ndof_w_active(&self) -> usize {
        if self.fixed {
            0
        } else {
            6
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
        debug_assert!(off_x + 7 <= x.len() && off_w + 6 <= w.len());
        for i in 0..3 {
            x[off_x + i] = self.position[i];
            w[off_w + i] = self.linear_velocity[i];
            w[off_w + 3 + i] = self.angular_velocity[i];
        }
        Self::write_quaternion(x, off_x + 3, &self.rotation);
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
        debug_assert!(off_x + 7 <= x.len() && off_w + 6 <= w.len());
        self.position = Vector3::new(x[off_x], x[off_x + 1], x[off_x + 2]);
        self.rotation = Self::read_quaternion(x, off_x + 3);
        self.linear_velocity = Vector3::new(w[off_w], w[off_w + 1], w[off_w + 2]);
        self.angular_velocity = Vector3::new(w[off_w + 3], w[off_w + 4], w[off_w + 5]);
    }

    fn state_increment(
        &self,
        off_x: usize,
        x_new: &mut DVector<f64>,
        x: &DVector<f64>,
        off_w: usize,
        dv: &DVector<f64>,
    ) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            x_new[off_x + i] = x[off_x + i] + dv[off_w + i];
        }
        let q = Self::read_quaternion(x, off_x + 3);
        let delta = Vector3::new(dv[off_w + 3], dv[off_w + 4], dv[off_w + 5]);
        let q_new = UnitQuaternion::from_scaled_axis(delta) * q;
        Self::write_quaternion(x_new, off_x + 3, &q_new);
    }

    fn state_get_increment(
        &self,
        off_x: usize,
        x_new: &DVector<f64>,
        x: &DVector<f64>,
        off_w: usize,
        dv: &mut DVector<f64>,
    ) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            dv[off_w + i] = x_new[off_x + i] - x[off_x + i];
        }
        let q = Self::read_quaternion(x, off_x + 3);
        let q_new = Self::read_quaternion(x_new, off_x + 3);
        let delta = (q_new * q.inverse()).scaled_axis();
        for i in 0..3 {
            dv[off_w + 3 + i] = delta[i];
        }
    }

    fn inject_variables(&self, off_w: usize, descriptor: &mut SystemDescriptor) {
        if self.fixed {
            return;
        }
        let mut inv = DMatrix::zeros(6, 6);
        let inv_mass = 1.0 / self.mass;
        for i in 0..3 {
            inv[(i, i)] = inv_mass;
        }
        // Singular inertia leaves the angular block zero (no rotation response).
        if let Some(inv_inertia) = self.world_inertia().try_inverse() {
            for i in 0..3 {
                for j in 0..3 {
                    inv[(3 + i, 3 + j)] = inv_inertia[(i, j)];
                }
            }
        }
        descriptor.add_inverse_mass(off_w, inv);
    }

    fn variables_fb_load_forces(&self, off_w: usize, fb: &mut DVector<f64>, factor: f64) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            fb[off_w + i] += self.applied_force[i] * factor;
            fb[off_w + 3 + i] += self.applied_torque[i] * factor;
        }
    }

    fn variables_qb_load_speed(&self, off_w: usize, qb: &mut DVector<f64>) {
        if self.fixed {
            return;
        }
        for i in 0..3 {
            qb[off_w + i] = self.linear_velocity[i];
            qb[off_w + 3 + i] = self.angular_velocity[i];
        }
    }

    fn variables_fb_increment_mq(&self, off_w: usize, fb: &mut DVector<f64>, qb: &DVector<f64>) {
        if self.fixed {
            return;
        }
        let v = Vector3::new(qb[off_w], qb[off_w + 1], qb[off_w + 2]);
        let omega = Vector3::new(qb[off_w + 3], qb[off_w + 4], qb[off_w + 5]);
        let l = self.world_inertia() * omega;
        for i in 0..3 {
            fb[off_w + i] += self.mass * v[i];
            fb[off_w + 3 + i] += l[i];
        }
    }

    fn variables_qb_set_speed(&mut self, off_w: usize, qb: &DVector<f64>, _step: f64) {
        if self.fixed {
            return;
        }
        self.linear_velocity = Vector3::new(qb[off_w], qb[off_w + 1], qb[off_w + 2]);
        self.angular_velocity = Vector3::new(qb[off_w + 3], qb[off_w + 4], qb[off_w + 5]);
    }

    fn variables_qb_increment_position(&mut self, off_w: usize, qb: &DVector<f64>, step: f64) {
        if self.fixed || step == 0.0 {
            return;
        }
        let v = Vector3::new(qb[off_w], qb[off_w + 1], qb[off_w + 2]);
        let omega = Vector3::new(qb[off_w + 3], qb[off_w + 4], qb[off_w + 5]);
        self.position += v * step;
        self.rotation = UnitQuaternion::from_scaled_axis(omega * step) * self.rotation;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gathered(body: &RigidBodyDofs) -> (DVector<f64>, DVector<f64>) {
        let mut x = DVector::zeros(7);
        let mut w = DVector::zeros(6);
        let mut t = 0.0;
        body.state_gather(0, &mut x, 0, &mut w, &mut t);
        (x, w)
    }

    #[test]
    fn test_dof_counts() {
        let body = RigidBodyDofs::sphere(2.0, 0.5);
        assert_eq!(body.ndof_x(), 7);
        assert_eq!(body.ndof_w(), 6);
        assert!(body.use_full_dof());

        let fixed = RigidBodyDofs::sphere(2.0, 0.5).fixed();
        assert_eq!(fixed.ndof_x_active(), 0);
        assert_eq!(fixed.ndof_w_active(), 0);
        assert!(!fixed.use_full_dof());
    }

    #[test]
    fn test_gather_writes_quaternion_w_first() {
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let body = RigidBodyDofs::sphere(1.0, 0.5).with_rotation(q);
        let (x, _) = gathered(&body);

        assert_relative_eq!(x[3], q.w, epsilon = 1e-12);
        assert_relative_eq!(x[4], q.i, epsilon = 1e-12);
        assert_relative_eq!(x[5], q.j, epsilon = 1e-12);
        assert_relative_eq!(x[6], q.k, epsilon = 1e-12);
    }

    #[test]
    fn test_increment_roundtrip_rotational() {
        let q = UnitQuaternion::from_euler_angles(0.4, -0.2, 0.9);
        let body = RigidBodyDofs::sphere(1.0, 0.5)
            .with_position(Vector3::new(1.0, 2.0, 3.0))
            .with_rotation(q);
        let (x, _) = gathered(&body);

        let dv = DVector::from_vec(vec![0.1, -0.2, 0.3, 0.05, 0.1, -0.15]);
        let mut x_new = DVector::zeros(7);
        body.state_increment(0, &mut x_new, &x, 0, &dv);

        let mut recovered = DVector::zeros(6);
        body.state_get_increment(0, &x_new, &x, 0, &mut recovered);

        for i in 0..6 {
            assert_relative_eq!(recovered[i], dv[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_increment_zero_is_identity() {
        let body = RigidBodyDofs::sphere(1.0, 0.5)
            .with_rotation(UnitQuaternion::from_euler_angles(0.3, 0.0, -0.1));
        let (x, _) = gathered(&body);

        let mut x_new = DVector::zeros(7);
        body.state_increment(0, &mut x_new, &x, 0, &DVector::zeros(6));
        for i in 0..7 {
            assert_relative_eq!(x_new[i], x[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_inject_variables_inverse_mass() {
        let body = RigidBodyDofs::new(2.0, Matrix3::from_diagonal_element(0.5));
        let mut d = SystemDescriptor::new();
        d.reset(6);
        body.inject_variables(0, &mut d);

        assert_eq!(d.blocks().len(), 1);
        let block = &d.blocks()[0].inv_mass;
        assert_relative_eq!(block[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(block[(3, 3)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(block[(0, 3)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_body_injects_nothing() {
        let body = RigidBodyDofs::sphere(1.0, 0.5).fixed();
        let mut d = SystemDescriptor::new();
        d.reset(0);
        body.inject_variables(0, &mut d);
        assert!(d.blocks().is_empty());
    }

    #[test]
    fn test_mq_uses_world_inertia() {
        let body = RigidBodyDofs::new(3.0, Matrix3::from_diagonal_element(2.0));
        let mut fb = DVector::zeros(6);
        let mut qb = DVector::zeros(6);
        qb[0] = 1.0; // linear x
        qb[5] = 2.0; // angular z
        body.variables_fb_increment_mq(0, &mut fb, &qb);

        assert_relative_eq!(fb[0], 3.0, epsilon = 1e-12); // m * v
        assert_relative_eq!(fb[5], 4.0, epsilon = 1e-12); // I * omega
    }

    #[test]
    fn test_qb_increment_position_rotates() {
        let mut body = RigidBodyDofs::sphere(1.0, 0.5);
        let mut qb = DVector::zeros(6);
        qb[0] = 1.0;
        qb[5] = std::f64::consts::FRAC_PI_2; // 90 deg/s around z

        body.variables_qb_increment_position(0, &qb, 1.0);

        assert_relative_eq!(body.position.x, 1.0, epsilon = 1e-12);
        let (_roll, _pitch, yaw) = body.rotation.euler_angles();
        assert_relative_eq!(yaw, std::f64::consts::FRAC_PI_2, epsilon = 1e-10);
    }
}
