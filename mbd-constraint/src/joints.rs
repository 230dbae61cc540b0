//! Concrete bilateral constraints.
//!
//! One joint per classification where a canonical element exists:
//! [`AxisDistance`] is a body-body joint, [`GearCouple`] a shaft-shaft
//! transmission ratio, [`PlanetaryCouple`] a three-shaft linear relation,
//! and [`GearboxCouple`] ties two shafts to a supporting body. Shaft-body
//! relations tend to be application-specific (rack-and-pinion, winch) and
//! plug in through the same [`BilateralConstraint`] capability.

use mbd_types::OwnerHandle;
use nalgebra::{Unit, Vector3};

use crate::constraint::{BilateralConstraint, ConstraintContext};

/// Holds the projection of the separation between two bodies onto a world
/// axis at a target value: `C = (p_b - p_a) . axis - target`.
///
/// Anchors excluded from the state (fixed bodies, markers) read their
/// position from [`with_reference`](Self::with_reference) instead of the
/// state vectors, so one side may be welded to the world.
#[derive(Debug, Clone)]
pub struct AxisDistance {
    anchors: [OwnerHandle; 2],
    axis: Unit<Vector3<f64>>,
    target: f64,
    reference: Vector3<f64>,
    compliance: f64,
}

impl AxisDistance {
    /// Create the joint along `axis` (normalized here) holding `target`
    /// separation between owners `a` and `b`.
    #[must_use]
    pub fn new(a: OwnerHandle, b: OwnerHandle, axis: Vector3<f64>, target: f64) -> Self {
        debug_assert!(axis.norm() > 0.0, "constraint axis must be nonzero");
        Self {
            anchors: [a, b],
            axis: Unit::new_normalize(axis),
            target,
            reference: Vector3::zeros(),
            compliance: 0.0,
        }
    }

    /// World position substituted for any anchor excluded from the state.
    #[must_use]
    pub fn with_reference(mut self, reference: Vector3<f64>) -> Self {
        self.reference = reference;
        self
    }

    /// Soften the joint with a compliance (inverse stiffness).
    #[must_use]
    pub fn with_compliance(mut self, compliance: f64) -> Self {
        debug_assert!(compliance >= 0.0, "compliance must be non-negative");
        self.compliance = compliance;
        self
    }

    fn position_of(&self, ctx: &ConstraintContext<'_>, anchor: usize) -> Vector3<f64> {
        ctx.body_position(self.anchors[anchor])
            .unwrap_or(self.reference)
    }
}

impl BilateralConstraint for AxisDistance {
    fn anchors(&self) -> &[OwnerHandle] {
        &self.anchors
    }

    fn jacobian_block(
        &self,
        _ctx: &ConstraintContext<'_>,
        _row: usize,
        anchor: usize,
        out: &mut [f64],
    ) {
        // Translational part only; the angular triplet stays zero.
        let sign = if anchor == 0 { -1.0 } else { 1.0 };
        out[0] = sign * self.axis.x;
        out[1] = sign * self.axis.y;
        out[2] = sign * self.axis.z;
    }

    fn violation(&self, ctx: &ConstraintContext<'_>, _row: usize) -> f64 {
        let pa = self.position_of(ctx, 0);
        let pb = self.position_of(ctx, 1);
        (pb - pa).dot(&self.axis) - self.target
    }

    fn compliance(&self, _row: usize) -> f64 {
        self.compliance
    }
}

/// Kinematic gear ratio between two shafts: `C = theta_a - ratio * theta_b - phase`.
#[derive(Debug, Clone)]
pub struct GearCouple {
    anchors: [OwnerHandle; 2],
    ratio: f64,
    phase: f64,
    compliance: f64,
}

impl GearCouple {
    /// Couple shaft `a` to shaft `b` at the given transmission ratio.
    #[must_use]
    pub fn new(a: OwnerHandle, b: OwnerHandle, ratio: f64) -> Self {
        Self {
            anchors: [a, b],
            ratio,
            phase: 0.0,
            compliance: 0.0,
        }
    }

    /// Angular offset subtracted from the relation (meshing phase).
    #[must_use]
    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    /// Soften the couple with a compliance (torsional flexibility).
    #[must_use]
    pub fn with_compliance(mut self, compliance: f64) -> Self {
        debug_assert!(compliance >= 0.0, "compliance must be non-negative");
        self.compliance = compliance;
        self
    }
}

impl BilateralConstraint for GearCouple {
    fn anchors(&self) -> &[OwnerHandle] {
        &self.anchors
    }

    fn jacobian_block(
        &self,
        _ctx: &ConstraintContext<'_>,
        _row: usize,
        anchor: usize,
        out: &mut [f64],
    ) {
        out[0] = if anchor == 0 { 1.0 } else { -self.ratio };
    }

    fn violation(&self, ctx: &ConstraintContext<'_>, _row: usize) -> f64 {
        let ta = ctx.scalar_position(self.anchors[0]).unwrap_or(0.0);
        let tb = ctx.scalar_position(self.anchors[1]).unwrap_or(0.0);
        ta - self.ratio * tb - self.phase
    }

    fn compliance(&self, _row: usize) -> f64 {
        self.compliance
    }
}

/// Epicyclic (planetary) relation over three shafts:
/// `C = r0 * theta_0 + r1 * theta_1 + r2 * theta_2 - phase`.
///
/// The Willis equation for a carrier/sun/ring train is the usual source of
/// the coefficients, but any linear three-shaft relation fits.
#[derive(Debug, Clone)]
pub struct PlanetaryCouple {
    anchors: [OwnerHandle; 3],
    coeffs: [f64; 3],
    phase: f64,
}

impl PlanetaryCouple {
    /// Couple three shafts through linear coefficients.
    #[must_use]
    pub fn new(shafts: [OwnerHandle; 3], coeffs: [f64; 3]) -> Self {
        Self {
            anchors: shafts,
            coeffs,
            phase: 0.0,
        }
    }

    /// Constant offset subtracted from the relation.
    #[must_use]
    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }
}

impl BilateralConstraint for PlanetaryCouple {
    fn anchors(&self) -> &[OwnerHandle] {
        &self.anchors
    }

    fn jacobian_block(
        &self,
        _ctx: &ConstraintContext<'_>,
        _row: usize,
        anchor: usize,
        out: &mut [f64],
    ) {
        out[0] = self.coeffs[anchor];
    }

    fn violation(&self, ctx: &ConstraintContext<'_>, _row: usize) -> f64 {
        let mut c = -self.phase;
        for (anchor, coeff) in self.anchors.iter().zip(self.coeffs) {
            c += coeff * ctx.scalar_position(*anchor).unwrap_or(0.0);
        }
        c
    }
}

/// Gearbox between two shafts mounted on a supporting body:
/// `C' = ratio * w_a - w_b + (1 - ratio) * (omega . axis) = 0`.
///
/// When the support spins about `axis`, the reaction is split between the
/// shafts according to the transmission ratio; with the support at rest the
/// couple reduces to `w_b = ratio * w_a`. The relation is a velocity-level
/// coupling and tracks no holonomic phase, so `violation` is identically
/// zero and stabilization never acts on it.
#[derive(Debug, Clone)]
pub struct GearboxCouple {
    anchors: [OwnerHandle; 3],
    ratio: f64,
    axis: Unit<Vector3<f64>>,
}

impl GearboxCouple {
    /// Couple shafts `a` and `b` through a gearbox carried by `support`,
    /// with the gear train aligned to the world-frame `axis` (normalized
    /// here).
    #[must_use]
    pub fn new(
        a: OwnerHandle,
        b: OwnerHandle,
        support: OwnerHandle,
        ratio: f64,
        axis: Vector3<f64>,
    ) -> Self {
        debug_assert!(axis.norm() > 0.0, "gearbox axis must be nonzero");
        Self {
            anchors: [a, b, support],
            ratio,
            axis: Unit::new_normalize(axis),
        }
    }
}

impl BilateralConstraint for GearboxCouple {
    fn anchors(&self) -> &[OwnerHandle] {
        &self.anchors
    }

    fn jacobian_block(
        &self,
        _ctx: &ConstraintContext<'_>,
        _row: usize,
        anchor: usize,
        out: &mut [f64],
    ) {
        match anchor {
            0 => out[0] = self.ratio,
            1 => out[0] = -1.0,
            _ => {
                // Angular triplet of the support body; linear part stays zero.
                let r = 1.0 - self.ratio;
                out[3] = r * self.axis.x;
                out[4] = r * self.axis.y;
                out[5] = r * self.axis.z;
            }
        }
    }

    fn violation(&self, _ctx: &ConstraintContext<'_>, _row: usize) -> f64 {
        0.0
    }
}
