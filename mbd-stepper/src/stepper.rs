//! The per-step driver: a fixed phase cycle over gather, assembly, solve,
//! and scatter.
//!
//! Each step runs `Idle -> Gathered -> Assembled -> Solved -> Scattered ->
//! Idle`. Structural staleness (new owners or constraints, a rebuilt
//! layout) is detected at cycle entry and repaired by regenerating the
//! layout and sparsity pattern; once the cycle is past assembly the pattern
//! is guaranteed fresh. An error after the cycle has started poisons the
//! stepper: the system may hold partially updated state, so further steps
//! are refused until [`Stepper::rebuild`] runs.

use mbd_constraint::{ConstraintContext, JacobianAssembly, ResidualAssembly};
use mbd_types::{AssemblyConfig, AssemblyError, Result};
use nalgebra::DVector;
use tracing::{debug, warn};

use crate::solver::{ConstraintSolver, SolverSolution, SolverSystem};
use crate::system::MultibodySystem;

/// Where in the step cycle the stepper currently is.
///
/// Outside a `step` call this is `Idle` (or the phase a failed cycle died
/// in, for diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Between steps.
    Idle,
    /// State vectors hold every owner's current state.
    Gathered,
    /// Jacobian, stabilization, and compliance terms are built.
    Assembled,
    /// The solver produced impulses and a new velocity.
    Solved,
    /// Velocities and positions are written back to owners.
    Scattered,
}

/// Summary of one completed step.
#[derive(Debug, Clone, Copy)]
pub struct StepReport {
    /// Simulation time after the step.
    pub t: f64,
    /// Step size taken.
    pub dt: f64,
    /// Constraint rows in the solved system.
    pub rows: usize,
    /// Euclidean norm of the constraint impulses.
    pub lambda_norm: f64,
}

/// Drives a [`MultibodySystem`] forward through fixed step cycles.
#[derive(Debug)]
pub struct Stepper {
    config: AssemblyConfig,
    jacobian: JacobianAssembly,
    residual: ResidualAssembly,
    phase: StepPhase,
    poisoned: bool,
    steps: u64,
}

impl Stepper {
    /// Create a stepper with the given assembly configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidConfig`] for out-of-range values.
    pub fn new(config: AssemblyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            jacobian: JacobianAssembly::new(),
            residual: ResidualAssembly::new(),
            phase: StepPhase::Idle,
            poisoned: false,
            steps: 0,
        })
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Whether a failed cycle left the stepper refusing further steps.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Steps completed since creation.
    #[must_use]
    pub fn steps_taken(&self) -> u64 {
        self.steps
    }

    /// The Jacobian assembly as of the last step (for inspection).
    #[must_use]
    pub fn jacobian(&self) -> &JacobianAssembly {
        &self.jacobian
    }

    /// The residual assembly as of the last step.
    #[must_use]
    pub fn residual(&self) -> &ResidualAssembly {
        &self.residual
    }

    /// Rebuild the layout and sparsity pattern and clear the poison flag.
    ///
    /// # Errors
    ///
    /// Propagates structural failures (a constraint anchored to a removed
    /// owner); the stepper stays poisoned in that case.
    pub fn rebuild(&mut self, system: &mut MultibodySystem) -> Result<()> {
        system.rebuild_layout();
        let (layout, registry) = system.layout_and_registry_mut();
        self.jacobian.generate_sparsity(layout, registry)?;
        self.poisoned = false;
        self.phase = StepPhase::Idle;
        Ok(())
    }

    /// Advance the system by one step of size `dt`.
    ///
    /// `dt == 0.0` runs a defined no-op cycle: gather and assembly execute
    /// (so diagnostics reflect the current state), velocities and positions
    /// are left untouched, and time does not advance.
    ///
    /// # Errors
    ///
    /// - [`AssemblyError::StepperPoisoned`] after a previously failed cycle
    /// - [`AssemblyError::InvalidTimestep`] for negative or non-finite `dt`
    /// - any structural or solver error from the cycle itself; these poison
    ///   the stepper
    pub fn step(
        &mut self,
        system: &mut MultibodySystem,
        solver: &mut dyn ConstraintSolver,
        dt: f64,
    ) -> Result<StepReport> {
        if self.poisoned {
            return Err(AssemblyError::StepperPoisoned);
        }
        if !dt.is_finite() || dt < 0.0 {
            return Err(AssemblyError::InvalidTimestep(dt));
        }

        match self.run_cycle(system, solver, dt) {
            Ok(report) => {
                self.phase = StepPhase::Idle;
                self.steps += 1;
                Ok(report)
            }
            Err(err) => {
                warn!(phase = ?self.phase, %err, "step cycle aborted");
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn run_cycle(
        &mut self,
        system: &mut MultibodySystem,
        solver: &mut dyn ConstraintSolver,
        dt: f64,
    ) -> Result<StepReport> {
        if system.needs_rebuild()
            || system.registry().is_dirty()
            || self.jacobian.generation() != system.layout().generation()
        {
            system.rebuild_layout();
            let (layout, registry) = system.layout_and_registry_mut();
            self.jacobian.generate_sparsity(layout, registry)?;
        }

        system.gather()?;
        self.phase = StepPhase::Gathered;

        system.load_descriptor(dt)?;
        let ctx = ConstraintContext::new(
            system.layout(),
            &system.vectors().x,
            &system.vectors().w,
        );
        self.jacobian.build_d(system.registry(), &ctx, &self.config)?;
        self.residual
            .build_b(system.registry(), &ctx, dt, &self.config)?;
        self.residual.build_e(system.registry(), &self.config)?;
        self.phase = StepPhase::Assembled;

        let solution = if dt == 0.0 {
            SolverSolution {
                lambda: DVector::zeros(self.jacobian.n_rows()),
                velocity: system.vectors().w.clone(),
            }
        } else {
            solver.solve(&SolverSystem {
                jacobian: &self.jacobian,
                b: self.residual.b(),
                e: self.residual.e(),
                descriptor: system.descriptor(),
                regularization: self.config.regularization,
            })?
        };
        self.phase = StepPhase::Solved;

        let lambda_norm = solution.lambda.norm();
        system.apply_velocities(&solution.velocity, dt)?;
        self.phase = StepPhase::Scattered;

        debug!(
            t = system.time(),
            dt,
            rows = self.jacobian.n_rows(),
            lambda_norm,
            "step complete"
        );
        Ok(StepReport {
            t: system.time(),
            dt,
            rows: self.jacobian.n_rows(),
            lambda_norm,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::solver::SchurSolver;
    use mbd_constraint::joints::GearCouple;
    use mbd_state::owners::ShaftDofs;
    use approx::assert_relative_eq;

    #[test]
    fn test_invalid_timestep_does_not_poison() {
        let mut system = MultibodySystem::new();
        system.add_owner(Box::new(ShaftDofs::new(1.0)));
        let mut stepper = Stepper::new(AssemblyConfig::default()).unwrap();
        let mut solver = SchurSolver::new();

        let err = stepper.step(&mut system, &mut solver, -0.1).unwrap_err();
        assert_eq!(err, AssemblyError::InvalidTimestep(-0.1));
        assert!(!stepper.is_poisoned());

        let err = stepper
            .step(&mut system, &mut solver, f64::NAN)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidTimestep(_)));
        assert!(stepper.step(&mut system, &mut solver, 0.01).is_ok());
    }

    #[test]
    fn test_zero_dt_is_a_noop_cycle() {
        let mut system = MultibodySystem::new();
        let a = system.add_owner(Box::new(ShaftDofs::new(1.0).with_angle(1.0)));
        let b = system.add_owner(Box::new(ShaftDofs::new(1.0).with_angle(0.9)));
        system
            .register_constraint(Box::new(GearCouple::new(a, b, 2.0)))
            .unwrap();

        let mut stepper = Stepper::new(AssemblyConfig::default()).unwrap();
        let mut solver = SchurSolver::new();
        let report = stepper.step(&mut system, &mut solver, 0.0).unwrap();

        assert_eq!(report.rows, 1);
        assert_relative_eq!(report.lambda_norm, 0.0, epsilon = 1e-15);
        assert_relative_eq!(system.time(), 0.0, epsilon = 1e-15);
        let shaft = system.owner_as::<ShaftDofs>(a).unwrap();
        assert_relative_eq!(shaft.angle, 1.0, epsilon = 1e-15);
        assert_relative_eq!(shaft.speed, 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_structural_change_regenerates_automatically() {
        let mut system = MultibodySystem::new();
        let a = system.add_owner(Box::new(ShaftDofs::new(1.0)));
        let b = system.add_owner(Box::new(ShaftDofs::new(1.0)));

        let mut stepper = Stepper::new(AssemblyConfig::default()).unwrap();
        let mut solver = SchurSolver::new();
        stepper.step(&mut system, &mut solver, 0.01).unwrap();
        assert_eq!(stepper.jacobian().n_rows(), 0);

        system
            .register_constraint(Box::new(GearCouple::new(a, b, 1.0)))
            .unwrap();
        let report = stepper.step(&mut system, &mut solver, 0.01).unwrap();
        assert_eq!(report.rows, 1);
    }

    #[test]
    fn test_failed_cycle_poisons_until_rebuild() {
        let mut system = MultibodySystem::new();
        let a = system.add_owner(Box::new(ShaftDofs::new(1.0)));
        let b = system.add_owner(Box::new(ShaftDofs::new(1.0)));
        let gear = system
            .register_constraint(Box::new(GearCouple::new(a, b, 1.0)))
            .unwrap();

        let mut stepper = Stepper::new(AssemblyConfig::default()).unwrap();
        let mut solver = SchurSolver::new();
        stepper.step(&mut system, &mut solver, 0.01).unwrap();

        // Remove an owner the gear still references.
        system.remove_owner(b).unwrap();
        let err = stepper.step(&mut system, &mut solver, 0.01).unwrap_err();
        assert_eq!(err, AssemblyError::InvalidOwnerHandle(b.index()));
        assert!(stepper.is_poisoned());

        let err = stepper.step(&mut system, &mut solver, 0.01).unwrap_err();
        assert_eq!(err, AssemblyError::StepperPoisoned);

        // Rebuild fails while the dangling constraint is still registered.
        assert!(stepper.rebuild(&mut system).is_err());
        system.remove_constraint(gear).unwrap();
        stepper.rebuild(&mut system).unwrap();
        assert!(!stepper.is_poisoned());
        assert!(stepper.step(&mut system, &mut solver, 0.01).is_ok());
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let err = Stepper::new(AssemblyConfig::default().with_baumgarte(2.0)).unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidConfig { .. }));
    }
}
