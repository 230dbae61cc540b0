//! Global state-vector layout and the vectors themselves.
//!
//! [`StateLayout::setup`] assigns every active DOF-owner a contiguous slice
//! of the position-state and velocity-state vectors, in registration order.
//! Offsets live in a side table keyed by owner handle, never on the owners,
//! so layout bookkeeping is decoupled from owner lifetime and the table can
//! be read freely during assembly.
//!
//! The layout carries a generation counter bumped on every setup; downstream
//! consumers (sparsity patterns, assembled Jacobians) record the generation
//! they were built against and refuse to run against a different one.

use mbd_types::{AssemblyError, OwnerHandle, Result};
use nalgebra::DVector;
use tracing::debug;

use crate::owner::DofOwner;

/// Offsets and sizes of one owner's slice of the global state vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerSlot {
    /// Offset into the position-state vector.
    pub offset_x: usize,
    /// Offset into the velocity-state vector.
    pub offset_w: usize,
    /// Number of position DOFs reserved (active count for partially fixed owners).
    pub ndof_x: usize,
    /// Number of velocity DOFs reserved.
    pub ndof_w: usize,
}

/// Side table mapping owner handles to state-vector offsets.
#[derive(Debug, Clone, Default)]
pub struct StateLayout {
    slots: Vec<Option<OwnerSlot>>,
    n_x: usize,
    n_w: usize,
    generation: u64,
}

impl StateLayout {
    /// Create an empty layout (generation 0, no owners).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign offsets to every owner, in iteration order.
    ///
    /// Owners with `use_full_dof()` reserve their full DOF counts, others
    /// their active counts (zero for fully fixed owners). Offsets are
    /// contiguous starting at 0 and remain stable until the next `setup`.
    /// Must be re-run whenever the owner set or any owner's active-DOF count
    /// changes.
    pub fn setup<'a, I>(&mut self, owners: I)
    where
        I: IntoIterator<Item = (OwnerHandle, &'a dyn DofOwner)>,
    {
        self.slots.clear();
        self.n_x = 0;
        self.n_w = 0;

        for (handle, owner) in owners {
            let index = handle.index();
            if index >= self.slots.len() {
                self.slots.resize(index + 1, None);
            }

            let ndof_x = owner.state_ndof_x();
            let ndof_w = owner.state_ndof_w();
            self.slots[index] = Some(OwnerSlot {
                offset_x: self.n_x,
                offset_w: self.n_w,
                ndof_x,
                ndof_w,
            });
            self.n_x += ndof_x;
            self.n_w += ndof_w;
        }

        self.generation = self.generation.wrapping_add(1);
        debug!(
            generation = self.generation,
            n_x = self.n_x,
            n_w = self.n_w,
            owners = self.slots.iter().filter(|s| s.is_some()).count(),
            "state layout rebuilt"
        );
    }

    /// Look up an owner's slot.
    #[must_use]
    pub fn slot(&self, handle: OwnerHandle) -> Option<&OwnerSlot> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    /// Look up an owner's slot, failing with a structural error.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidOwnerHandle`] when the handle has no
    /// slot in this layout.
    pub fn try_slot(&self, handle: OwnerHandle) -> Result<&OwnerSlot> {
        self.slot(handle)
            .ok_or(AssemblyError::InvalidOwnerHandle(handle.index()))
    }

    /// Total size of the position-state vector.
    #[must_use]
    pub fn n_x(&self) -> usize {
        self.n_x
    }

    /// Total size of the velocity-state vector.
    #[must_use]
    pub fn n_w(&self) -> usize {
        self.n_w
    }

    /// Generation counter, bumped on every [`setup`](Self::setup).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The global position/velocity state vectors and simulation time.
///
/// Mutated only through owner gather/scatter; the assembler reads them but
/// never writes. Gather and scatter iterate owners sequentially: each owner
/// touches a disjoint slice, but splitting one `DVector` into per-owner
/// mutable slices across trait objects costs more than it saves at the
/// sizes this core handles.
#[derive(Debug, Clone, Default)]
pub struct StateVectors {
    /// Position state, size [`StateLayout::n_x`].
    pub x: DVector<f64>,
    /// Velocity state, size [`StateLayout::n_w`].
    pub w: DVector<f64>,
    /// Simulation time.
    pub t: f64,
}

impl StateVectors {
    /// Create empty state vectors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize to match a layout, zero-filling fresh storage.
    pub fn resize_for(&mut self, layout: &StateLayout) {
        if self.x.len() != layout.n_x() {
            self.x = DVector::zeros(layout.n_x());
        }
        if self.w.len() != layout.n_w() {
            self.w = DVector::zeros(layout.n_w());
        }
    }

    /// Gather one owner's state into the vectors.
    pub fn gather_one(&mut self, slot: &OwnerSlot, owner: &dyn DofOwner) {
        owner.state_gather(slot.offset_x, &mut self.x, slot.offset_w, &mut self.w, &mut self.t);
    }

    /// Scatter one owner's state out of the vectors.
    pub fn scatter_one(&self, slot: &OwnerSlot, owner: &mut dyn DofOwner) {
        owner.state_scatter(slot.offset_x, &self.x, slot.offset_w, &self.w, self.t);
    }

    /// Gather all owners' state, in iteration order.
    pub fn gather<'a, I>(&mut self, layout: &StateLayout, owners: I) -> Result<()>
    where
        I: IntoIterator<Item = (OwnerHandle, &'a dyn DofOwner)>,
    {
        self.resize_for(layout);
        for (handle, owner) in owners {
            let slot = *layout.try_slot(handle)?;
            self.gather_one(&slot, owner);
        }
        Ok(())
    }

    /// Scatter state back to all owners, in iteration order.
    pub fn scatter<'a, I>(&self, layout: &StateLayout, owners: I) -> Result<()>
    where
        I: IntoIterator<Item = (OwnerHandle, &'a mut dyn DofOwner)>,
    {
        for (handle, owner) in owners {
            let slot = *layout.try_slot(handle)?;
            self.scatter_one(&slot, owner);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::owners::{FixedMarker, ShaftDofs};
    use approx::assert_relative_eq;

    fn layout_of(owners: &[&dyn DofOwner]) -> StateLayout {
        let mut layout = StateLayout::new();
        layout.setup(
            owners
                .iter()
                .enumerate()
                .map(|(i, o)| (OwnerHandle::new(i), *o)),
        );
        layout
    }

    #[test]
    fn test_offsets_contiguous_from_zero() {
        let a = ShaftDofs::new(1.0);
        let b = ShaftDofs::new(2.0);
        let c = ShaftDofs::new(3.0);
        let layout = layout_of(&[&a, &b, &c]);

        assert_eq!(layout.n_x(), 3);
        assert_eq!(layout.n_w(), 3);
        for (i, expected) in [(0usize, 0usize), (1, 1), (2, 2)] {
            let slot = layout.slot(OwnerHandle::new(i)).unwrap();
            assert_eq!(slot.offset_x, expected);
            assert_eq!(slot.offset_w, expected);
        }
    }

    #[test]
    fn test_zero_dof_owner_reserves_nothing() {
        let a = ShaftDofs::new(1.0);
        let m = FixedMarker;
        let b = ShaftDofs::new(2.0);
        let layout = layout_of(&[&a, &m, &b]);

        assert_eq!(layout.n_w(), 2);
        let marker_slot = layout.slot(OwnerHandle::new(1)).unwrap();
        assert_eq!(marker_slot.ndof_x, 0);
        assert_eq!(marker_slot.ndof_w, 0);
        // Marker occupies zero width; the next owner starts where it started.
        assert_eq!(marker_slot.offset_w, 1);
        assert_eq!(layout.slot(OwnerHandle::new(2)).unwrap().offset_w, 1);
    }

    #[test]
    fn test_generation_bumps_per_setup() {
        let a = ShaftDofs::new(1.0);
        let mut layout = StateLayout::new();
        assert_eq!(layout.generation(), 0);

        layout.setup([(OwnerHandle::new(0), &a as &dyn DofOwner)]);
        assert_eq!(layout.generation(), 1);
        layout.setup([(OwnerHandle::new(0), &a as &dyn DofOwner)]);
        assert_eq!(layout.generation(), 2);
    }

    #[test]
    fn test_gather_scatter_roundtrip() {
        let mut a = ShaftDofs::new(1.0);
        a.angle = 0.3;
        a.speed = -2.0;
        let mut layout = StateLayout::new();
        layout.setup([(OwnerHandle::new(0), &a as &dyn DofOwner)]);

        let mut vectors = StateVectors::new();
        vectors
            .gather(&layout, [(OwnerHandle::new(0), &a as &dyn DofOwner)])
            .unwrap();
        assert_relative_eq!(vectors.x[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(vectors.w[0], -2.0, epsilon = 1e-12);

        let mut b = ShaftDofs::new(1.0);
        vectors
            .scatter(&layout, [(OwnerHandle::new(0), &mut b as &mut dyn DofOwner)])
            .unwrap();
        assert_relative_eq!(b.angle, 0.3, epsilon = 1e-12);
        assert_relative_eq!(b.speed, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unknown_handle_is_structural_error() {
        let layout = StateLayout::new();
        let err = layout.try_slot(OwnerHandle::new(5)).unwrap_err();
        assert!(err.is_structural());
    }
}
