//! The multibody system container: owners, constraints, and shared state.
//!
//! Owns the owner arena, the constraint registry, the offset layout, the
//! gathered state vectors, and the solver descriptor. Structural mutations
//! (adding or removing owners) raise a layout-dirty flag; the stepper
//! rebuilds the layout and sparsity before the next cycle. Changing an
//! owner's active-DOF count through [`owner_mut`](MultibodySystem::owner_mut)
//! needs an explicit [`invalidate_layout`](MultibodySystem::invalidate_layout),
//! otherwise the width check in the Jacobian refill reports the stale
//! pattern.

use hashbrown::HashMap;
use mbd_constraint::{BilateralConstraint, ConstraintRegistry};
use mbd_state::{BoxedOwner, DofOwner, StateLayout, StateVectors, SystemDescriptor};
use mbd_types::{AssemblyError, ConstraintHandle, OwnerHandle, OwnerKind, Result};
use nalgebra::DVector;
use tracing::debug;

/// Container for everything one stepped simulation owns.
#[derive(Debug, Default)]
pub struct MultibodySystem {
    owners: Vec<Option<BoxedOwner>>,
    names: HashMap<String, OwnerHandle>,
    registry: ConstraintRegistry,
    layout: StateLayout,
    vectors: StateVectors,
    descriptor: SystemDescriptor,
    layout_dirty: bool,
}

impl MultibodySystem {
    /// Create an empty system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an owner, returning its handle.
    pub fn add_owner(&mut self, owner: BoxedOwner) -> OwnerHandle {
        let handle = OwnerHandle::new(self.owners.len());
        debug!(%handle, kind = ?owner.kind(), "owner added");
        self.owners.push(Some(owner));
        self.layout_dirty = true;
        handle
    }

    /// Add an owner under a name for later lookup.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidConfig`] when the name is taken.
    pub fn add_named_owner(&mut self, name: &str, owner: BoxedOwner) -> Result<OwnerHandle> {
        if self.names.contains_key(name) {
            return Err(AssemblyError::invalid_config(format!(
                "owner name {name:?} already taken"
            )));
        }
        let handle = self.add_owner(owner);
        self.names.insert(name.to_owned(), handle);
        Ok(handle)
    }

    /// Resolve a named owner.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<OwnerHandle> {
        self.names.get(name).copied()
    }

    /// Remove an owner, returning it.
    ///
    /// Constraints still anchored to the removed owner fail the next
    /// sparsity generation; remove them first.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidOwnerHandle`] when the handle does
    /// not refer to a live owner.
    pub fn remove_owner(&mut self, handle: OwnerHandle) -> Result<BoxedOwner> {
        let owner = self
            .owners
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(AssemblyError::InvalidOwnerHandle(handle.index()))?;
        self.names.retain(|_, h| *h != handle);
        self.layout_dirty = true;
        Ok(owner)
    }

    /// Borrow an owner.
    #[must_use]
    pub fn owner(&self, handle: OwnerHandle) -> Option<&dyn DofOwner> {
        self.owners
            .get(handle.index())
            .and_then(Option::as_ref)
            .map(AsRef::as_ref)
    }

    /// Mutably borrow an owner (to apply forces, set state, fix DOFs).
    #[must_use]
    pub fn owner_mut(&mut self, handle: OwnerHandle) -> Option<&mut BoxedOwner> {
        self.owners.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Borrow an owner as its concrete type.
    #[must_use]
    pub fn owner_as<T: DofOwner + 'static>(&self, handle: OwnerHandle) -> Option<&T> {
        self.owner(handle).and_then(|o| o.as_any().downcast_ref())
    }

    /// Mutably borrow an owner as its concrete type.
    #[must_use]
    pub fn owner_as_mut<T: DofOwner + 'static>(&mut self, handle: OwnerHandle) -> Option<&mut T> {
        self.owner_mut(handle)
            .and_then(|o| o.as_any_mut().downcast_mut())
    }

    /// Kind of a live owner.
    #[must_use]
    pub fn kind_of(&self, handle: OwnerHandle) -> Option<OwnerKind> {
        self.owner(handle).map(DofOwner::kind)
    }

    /// Register a constraint over owners already in this system.
    ///
    /// # Errors
    ///
    /// Propagates classification failures from
    /// [`ConstraintRegistry::register`].
    pub fn register_constraint(
        &mut self,
        constraint: Box<dyn BilateralConstraint>,
    ) -> Result<ConstraintHandle> {
        let owners = &self.owners;
        self.registry.register(constraint, |h| {
            owners
                .get(h.index())
                .and_then(Option::as_ref)
                .map(|o| o.kind())
        })
    }

    /// Remove a constraint, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidConstraintHandle`] for dead handles.
    pub fn remove_constraint(
        &mut self,
        handle: ConstraintHandle,
    ) -> Result<Box<dyn BilateralConstraint>> {
        self.registry.remove(handle)
    }

    /// Force a layout rebuild before the next step.
    ///
    /// Required after mutating an owner in a way that changes its
    /// active-DOF counts (fixing or releasing DOFs).
    pub fn invalidate_layout(&mut self) {
        self.layout_dirty = true;
    }

    /// Whether the layout must be rebuilt before the next cycle.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.layout_dirty
    }

    /// The constraint registry.
    #[must_use]
    pub fn registry(&self) -> &ConstraintRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ConstraintRegistry {
        &mut self.registry
    }

    pub(crate) fn layout_and_registry_mut(&mut self) -> (&StateLayout, &mut ConstraintRegistry) {
        (&self.layout, &mut self.registry)
    }

    /// The current offset layout.
    #[must_use]
    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// The gathered state vectors.
    #[must_use]
    pub fn vectors(&self) -> &StateVectors {
        &self.vectors
    }

    /// The solver descriptor as of the last assembly.
    #[must_use]
    pub fn descriptor(&self) -> &SystemDescriptor {
        &self.descriptor
    }

    /// Simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.vectors.t
    }

    /// Number of live owners.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }

    /// Rebuild the offset layout over the live owners and resize the state
    /// vectors. Clears the dirty flag; bumps the layout generation.
    pub fn rebuild_layout(&mut self) {
        let Self {
            owners, layout, ..
        } = self;
        layout.setup(
            owners
                .iter()
                .enumerate()
                .filter_map(|(i, o)| o.as_ref().map(|o| (OwnerHandle::new(i), o.as_ref()))),
        );
        self.vectors.resize_for(&self.layout);
        self.layout_dirty = false;
    }

    /// Gather every live owner's state into the global vectors.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidOwnerHandle`] when an owner has no
    /// slot (layout not rebuilt after a structural change).
    pub fn gather(&mut self) -> Result<()> {
        let Self {
            owners,
            layout,
            vectors,
            ..
        } = self;
        vectors.gather(
            layout,
            owners
                .iter()
                .enumerate()
                .filter_map(|(i, o)| o.as_ref().map(|o| (OwnerHandle::new(i), o.as_ref()))),
        )
    }

    /// Scatter the global vectors back into every live owner.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidOwnerHandle`] when an owner has no
    /// slot.
    pub fn scatter(&mut self) -> Result<()> {
        let Self {
            owners,
            layout,
            vectors,
            ..
        } = self;
        vectors.scatter(
            layout,
            owners.iter_mut().enumerate().filter_map(|(i, o)| {
                o.as_mut()
                    .map(|o| (OwnerHandle::new(i), o.as_mut() as &mut dyn DofOwner))
            }),
        )
    }

    /// Populate the descriptor for one step of size `dt`: inject mass
    /// blocks, load speeds into `qb`, and accumulate `fb = M v + dt * f`.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidOwnerHandle`] when an owner has no
    /// slot.
    pub fn load_descriptor(&mut self, dt: f64) -> Result<()> {
        let Self {
            owners,
            layout,
            descriptor,
            ..
        } = self;
        descriptor.reset(layout.n_w());
        for (i, owner) in owners.iter().enumerate() {
            let Some(owner) = owner.as_ref() else {
                continue;
            };
            let slot = *layout.try_slot(OwnerHandle::new(i))?;
            owner.inject_variables(slot.offset_w, descriptor);
            owner.variables_fb_reset(slot.offset_w, descriptor.fb_mut());
            owner.variables_qb_load_speed(slot.offset_w, descriptor.qb_mut());
            owner.variables_fb_load_forces(slot.offset_w, descriptor.fb_mut(), dt);
        }
        // Momentum term needs the fully loaded qb.
        let qb = descriptor.qb().clone();
        for (i, owner) in owners.iter().enumerate() {
            let Some(owner) = owner.as_ref() else {
                continue;
            };
            let slot = *layout.try_slot(OwnerHandle::new(i))?;
            owner.variables_fb_increment_mq(slot.offset_w, descriptor.fb_mut(), &qb);
        }
        Ok(())
    }

    /// Write the solved velocities back to owners and advance positions by
    /// one step of size `dt`.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidOwnerHandle`] when an owner has no
    /// slot.
    pub fn apply_velocities(&mut self, v: &DVector<f64>, dt: f64) -> Result<()> {
        let Self {
            owners,
            layout,
            vectors,
            descriptor,
            ..
        } = self;
        for (i, owner) in owners.iter_mut().enumerate() {
            let Some(owner) = owner.as_mut() else {
                continue;
            };
            let slot = *layout.try_slot(OwnerHandle::new(i))?;
            owner.variables_qb_set_speed(slot.offset_w, v, dt);
            owner.variables_qb_increment_position(slot.offset_w, v, dt);
        }
        vectors.w.copy_from(v);
        vectors.t += dt;
        descriptor.set_qb(v.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mbd_constraint::joints::GearCouple;
    use mbd_state::owners::{RigidBodyDofs, ShaftDofs};
    use mbd_types::ConstraintClass;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_named_owners_resolve() {
        let mut system = MultibodySystem::new();
        let crank = system
            .add_named_owner("crank", Box::new(ShaftDofs::new(0.2)))
            .unwrap();
        assert_eq!(system.lookup("crank"), Some(crank));
        assert_eq!(system.kind_of(crank), Some(OwnerKind::Shaft));

        let err = system
            .add_named_owner("crank", Box::new(ShaftDofs::new(0.3)))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidConfig { .. }));
    }

    #[test]
    fn test_register_constraint_classifies_through_arena() {
        let mut system = MultibodySystem::new();
        let a = system.add_owner(Box::new(ShaftDofs::new(1.0)));
        let b = system.add_owner(Box::new(ShaftDofs::new(1.0)));
        let h = system
            .register_constraint(Box::new(GearCouple::new(a, b, 2.0)))
            .unwrap();
        assert_eq!(system.registry().class_of(h), Some(ConstraintClass::ShaftShaft));
    }

    #[test]
    fn test_removal_marks_layout_dirty() {
        let mut system = MultibodySystem::new();
        let a = system.add_owner(Box::new(ShaftDofs::new(1.0)));
        system.rebuild_layout();
        assert!(!system.needs_rebuild());

        system.remove_owner(a).unwrap();
        assert!(system.needs_rebuild());
        assert_eq!(system.owner_count(), 0);
    }

    #[test]
    fn test_load_descriptor_builds_momentum_term() {
        let mut system = MultibodySystem::new();
        let h = system.add_owner(Box::new(
            RigidBodyDofs::sphere(2.0, 0.5)
                .with_velocity(Vector3::new(3.0, 0.0, 0.0), Vector3::zeros()),
        ));
        system
            .owner_as_mut::<RigidBodyDofs>(h)
            .unwrap()
            .apply_force(Vector3::new(0.0, 10.0, 0.0));
        system.rebuild_layout();
        system.gather().unwrap();
        system.load_descriptor(0.01).unwrap();

        // fb = M v + dt * f: 2.0 * 3.0 on linear x, 0.01 * 10.0 on linear y.
        assert_relative_eq!(system.descriptor().fb()[0], 6.0, epsilon = 1e-12);
        assert_relative_eq!(system.descriptor().fb()[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(system.descriptor().qb()[0], 3.0, epsilon = 1e-12);
        assert_eq!(system.descriptor().blocks().len(), 1);
    }

    #[test]
    fn test_apply_velocities_advances_time_and_owners() {
        let mut system = MultibodySystem::new();
        let h = system.add_owner(Box::new(ShaftDofs::new(1.0)));
        system.rebuild_layout();
        system.gather().unwrap();

        let v = DVector::from_vec(vec![2.0]);
        system.apply_velocities(&v, 0.5).unwrap();

        assert_relative_eq!(system.time(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(system.vectors().w[0], 2.0, epsilon = 1e-12);
        let owner = system.owner(h).unwrap();
        let mut x = DVector::zeros(1);
        let mut w = DVector::zeros(1);
        let mut t = 0.0;
        owner.state_gather(0, &mut x, 0, &mut w, &mut t);
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12); // 2.0 * 0.5
        assert_relative_eq!(w[0], 2.0, epsilon = 1e-12);
    }
}
