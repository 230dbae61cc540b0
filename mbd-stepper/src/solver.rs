//! Solver seam and the reference Schur-complement solver.
//!
//! The stepper hands the assembled quantities to a [`ConstraintSolver`]
//! behind a trait object, so iterative or external solvers plug in without
//! touching assembly. [`SchurSolver`] is the bundled reference: it forms the
//! dense effective-mass matrix `A = D M⁻¹ Dᵀ + diag(E) + reg I`, solves
//! `A λ = b - D v_free`, and recovers `v = v_free + M⁻¹ Dᵀ λ`. Dense `A` is
//! fine at the constraint counts this core targets; a sparse solver slots in
//! through the same trait when it is not.

use mbd_constraint::JacobianAssembly;
use mbd_state::SystemDescriptor;
use mbd_types::{AssemblyError, Result};
use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Assembled inputs handed to a solver for one step.
#[derive(Debug, Clone, Copy)]
pub struct SolverSystem<'a> {
    /// Constraint Jacobian `D`.
    pub jacobian: &'a JacobianAssembly,
    /// Stabilization vector: the solver enforces `D v_new = b`.
    pub b: &'a DVector<f64>,
    /// Compliance diagonal `E`.
    pub e: &'a DVector<f64>,
    /// Injected mass blocks and the known term `fb`.
    pub descriptor: &'a SystemDescriptor,
    /// Diagonal regularization added to the effective-mass matrix.
    pub regularization: f64,
}

/// Constraint impulses and the constrained velocity they produce.
#[derive(Debug, Clone)]
pub struct SolverSolution {
    /// Lagrange multipliers, one per constraint row.
    pub lambda: DVector<f64>,
    /// New velocity state, size `n_w`.
    pub velocity: DVector<f64>,
}

/// A velocity-level bilateral constraint solver.
pub trait ConstraintSolver {
    /// Solve one step's constraint system.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::SingularSystem`] (or a solver-specific
    /// error) when no solution exists.
    fn solve(&mut self, system: &SolverSystem<'_>) -> Result<SolverSolution>;
}

/// Reference dense Schur-complement solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchurSolver;

impl SchurSolver {
    /// Create the solver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ConstraintSolver for SchurSolver {
    fn solve(&mut self, system: &SolverSystem<'_>) -> Result<SolverSolution> {
        let d = system.jacobian;
        let rows = d.n_rows();
        let cols = d.n_cols();
        debug_assert_eq!(system.b.len(), rows);
        debug_assert_eq!(system.e.len(), rows);
        debug_assert_eq!(system.descriptor.n_w(), cols);

        let v_free = system.descriptor.free_velocity();
        if rows == 0 {
            return Ok(SolverSolution {
                lambda: DVector::zeros(0),
                velocity: v_free,
            });
        }

        let offsets = d.row_offsets();
        let col_indices = d.col_indices();
        let values = d.values();

        // Columns of W Dᵀ, one per constraint row.
        let mut w_dt = DMatrix::zeros(cols, rows);
        let mut scratch = DVector::zeros(cols);
        for i in 0..rows {
            scratch.fill(0.0);
            for k in offsets[i]..offsets[i + 1] {
                scratch[col_indices[k]] = values[k];
            }
            w_dt.set_column(i, &system.descriptor.apply_inverse_mass(&scratch));
        }

        // A = D (W Dᵀ) + diag(E) + reg I, built row by sparse row.
        let mut a = DMatrix::zeros(rows, rows);
        for i in 0..rows {
            for j in 0..rows {
                let mut acc = 0.0;
                for k in offsets[i]..offsets[i + 1] {
                    acc += values[k] * w_dt[(col_indices[k], j)];
                }
                a[(i, j)] = acc;
            }
            a[(i, i)] += system.e[i] + system.regularization;
        }

        let mut d_vfree = DVector::zeros(rows);
        d.mul_vec(&v_free, &mut d_vfree);
        let rhs = system.b - d_vfree;

        let lambda = match a.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => {
                warn!(rows, "effective-mass matrix not positive definite, retrying with LU");
                a.lu()
                    .solve(&rhs)
                    .ok_or(AssemblyError::SingularSystem { rows })?
            }
        };

        let mut dt_lambda = DVector::zeros(cols);
        d.mul_transpose_vec(&lambda, &mut dt_lambda);
        let velocity = &v_free + system.descriptor.apply_inverse_mass(&dt_lambda);
        Ok(SolverSolution { lambda, velocity })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mbd_constraint::joints::GearCouple;
    use mbd_constraint::{ConstraintContext, ConstraintRegistry};
    use mbd_state::owners::ShaftDofs;
    use mbd_state::{DofOwner, StateLayout, StateVectors};
    use mbd_types::{AssemblyConfig, OwnerHandle};
    use approx::assert_relative_eq;

    #[test]
    fn test_unconstrained_system_returns_free_velocity() {
        let mut descriptor = SystemDescriptor::new();
        descriptor.reset(2);
        descriptor.fb_mut()[0] = 4.0;
        descriptor.add_inverse_mass(0, DMatrix::from_element(1, 1, 0.5));
        descriptor.qb_mut()[1] = 3.0;

        let jacobian = JacobianAssembly::new();
        let b = DVector::zeros(0);
        let e = DVector::zeros(0);
        let mut solver = SchurSolver::new();
        let solution = solver
            .solve(&SolverSystem {
                jacobian: &jacobian,
                b: &b,
                e: &e,
                descriptor: &descriptor,
                regularization: 0.0,
            })
            .unwrap();

        assert_eq!(solution.lambda.len(), 0);
        assert_relative_eq!(solution.velocity[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(solution.velocity[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gear_correction_satisfies_velocity_constraint() {
        let owners: Vec<Box<dyn DofOwner>> = vec![
            Box::new(ShaftDofs::new(1.0).with_angle(1.0)),
            Box::new(ShaftDofs::new(1.0).with_angle(0.3)),
        ];
        let mut layout = StateLayout::new();
        layout.setup(
            owners
                .iter()
                .enumerate()
                .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
        );
        let mut vectors = StateVectors::new();
        vectors
            .gather(
                &layout,
                owners
                    .iter()
                    .enumerate()
                    .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
            )
            .unwrap();

        let mut registry = ConstraintRegistry::new();
        registry
            .register(
                Box::new(GearCouple::new(OwnerHandle::new(0), OwnerHandle::new(1), 2.0)),
                |h| owners.get(h.index()).map(|o| o.kind()),
            )
            .unwrap();

        let mut jacobian = JacobianAssembly::new();
        jacobian.generate_sparsity(&layout, &mut registry).unwrap();
        let ctx = ConstraintContext::new(&layout, &vectors.x, &vectors.w);
        let config = AssemblyConfig::default().with_regularization(0.0);
        jacobian.build_d(&registry, &ctx, &config).unwrap();

        let mut descriptor = SystemDescriptor::new();
        descriptor.reset(2);
        for (i, owner) in owners.iter().enumerate() {
            let slot = layout.slot(OwnerHandle::new(i)).unwrap();
            owner.inject_variables(slot.offset_w, &mut descriptor);
        }

        // b asks for D v = -4 (remove C = 0.4 over dt = 0.1).
        let b = DVector::from_vec(vec![-4.0]);
        let e = DVector::zeros(1);
        let mut solver = SchurSolver::new();
        let solution = solver
            .solve(&SolverSystem {
                jacobian: &jacobian,
                b: &b,
                e: &e,
                descriptor: &descriptor,
                regularization: 0.0,
            })
            .unwrap();

        let mut dv = DVector::zeros(1);
        jacobian.mul_vec(&solution.velocity, &mut dv);
        assert_relative_eq!(dv[0], -4.0, epsilon = 1e-10);
        // Equal unit inertias split the correction 1:-2.
        assert_relative_eq!(solution.velocity[0], -0.8, epsilon = 1e-10);
        assert_relative_eq!(solution.velocity[1], 1.6, epsilon = 1e-10);
    }

    #[test]
    fn test_compliance_softens_the_row() {
        // One-row system behaves like lambda = b / (A + E): larger E,
        // smaller response.
        let owners: Vec<Box<dyn DofOwner>> = vec![
            Box::new(ShaftDofs::new(1.0)),
            Box::new(ShaftDofs::new(1.0)),
        ];
        let mut layout = StateLayout::new();
        layout.setup(
            owners
                .iter()
                .enumerate()
                .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
        );
        let mut registry = ConstraintRegistry::new();
        registry
            .register(
                Box::new(GearCouple::new(OwnerHandle::new(0), OwnerHandle::new(1), 1.0)),
                |h| owners.get(h.index()).map(|o| o.kind()),
            )
            .unwrap();

        let mut descriptor = SystemDescriptor::new();
        descriptor.reset(2);
        descriptor.add_inverse_mass(0, DMatrix::from_element(1, 1, 1.0));
        descriptor.add_inverse_mass(1, DMatrix::from_element(1, 1, 1.0));
        let mut vectors = StateVectors::new();
        vectors
            .gather(
                &layout,
                owners
                    .iter()
                    .enumerate()
                    .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
            )
            .unwrap();
        let mut jacobian = JacobianAssembly::new();
        jacobian.generate_sparsity(&layout, &mut registry).unwrap();
        let ctx = ConstraintContext::new(&layout, &vectors.x, &vectors.w);
        jacobian
            .build_d(&registry, &ctx, &AssemblyConfig::default())
            .unwrap();

        let b = DVector::from_vec(vec![1.0]);
        let mut solver = SchurSolver::new();

        let rigid = solver
            .solve(&SolverSystem {
                jacobian: &jacobian,
                b: &b,
                e: &DVector::zeros(1),
                descriptor: &descriptor,
                regularization: 0.0,
            })
            .unwrap();
        let soft = solver
            .solve(&SolverSystem {
                jacobian: &jacobian,
                b: &b,
                e: &DVector::from_vec(vec![2.0]),
                descriptor: &descriptor,
                regularization: 0.0,
            })
            .unwrap();

        assert!(soft.lambda[0].abs() < rigid.lambda[0].abs());
        // A = 2 rigid, A + E = 4 soft: exactly half the impulse.
        assert_relative_eq!(soft.lambda[0], rigid.lambda[0] / 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_redundant_rows_survive_regularization() {
        // Two identical rows make A singular; regularization keeps it solvable.
        let owners: Vec<Box<dyn DofOwner>> = vec![
            Box::new(ShaftDofs::new(1.0).with_angle(0.5)),
            Box::new(ShaftDofs::new(1.0)),
        ];
        let mut layout = StateLayout::new();
        layout.setup(
            owners
                .iter()
                .enumerate()
                .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
        );
        let mut vectors = StateVectors::new();
        vectors
            .gather(
                &layout,
                owners
                    .iter()
                    .enumerate()
                    .map(|(i, o)| (OwnerHandle::new(i), o.as_ref())),
            )
            .unwrap();

        let mut registry = ConstraintRegistry::new();
        for _ in 0..2 {
            registry
                .register(
                    Box::new(GearCouple::new(OwnerHandle::new(0), OwnerHandle::new(1), 1.0)),
                    |h| owners.get(h.index()).map(|o| o.kind()),
                )
                .unwrap();
        }
        let mut jacobian = JacobianAssembly::new();
        jacobian.generate_sparsity(&layout, &mut registry).unwrap();
        let ctx = ConstraintContext::new(&layout, &vectors.x, &vectors.w);
        jacobian
            .build_d(&registry, &ctx, &AssemblyConfig::default())
            .unwrap();

        let mut descriptor = SystemDescriptor::new();
        descriptor.reset(2);
        descriptor.add_inverse_mass(0, DMatrix::from_element(1, 1, 1.0));
        descriptor.add_inverse_mass(1, DMatrix::from_element(1, 1, 1.0));

        let b = DVector::from_vec(vec![-1.0, -1.0]);
        let mut solver = SchurSolver::new();
        let solution = solver
            .solve(&SolverSystem {
                jacobian: &jacobian,
                b: &b,
                e: &DVector::zeros(2),
                descriptor: &descriptor,
                regularization: 1e-10,
            })
            .unwrap();

        let mut dv = DVector::zeros(2);
        jacobian.mul_vec(&solution.velocity, &mut dv);
        assert_relative_eq!(dv[0], -1.0, epsilon = 1e-6);
        assert_relative_eq!(dv[1], -1.0, epsilon = 1e-6);
    }
}
