//! Constraint registry with classification at registration time.
//!
//! Every constraint is classified by the kinds of the owners it connects
//! when it enters the registry; pairings with no Jacobian rule are rejected
//! up front rather than surfacing as assembly failures later. Removal leaves
//! a hole so surviving handles stay valid; iteration order is by slot index
//! and therefore stable across removals.

use mbd_types::{
    AssemblyError, ConstraintClass, ConstraintHandle, OwnerHandle, OwnerKind, Result,
};
use tracing::debug;

use crate::constraint::BilateralConstraint;

/// A registered constraint together with its classification.
#[derive(Debug)]
pub struct ConstraintEntry {
    constraint: Box<dyn BilateralConstraint>,
    class: ConstraintClass,
}

impl ConstraintEntry {
    /// The constraint itself.
    #[must_use]
    pub fn constraint(&self) -> &dyn BilateralConstraint {
        self.constraint.as_ref()
    }

    /// Classification assigned at registration.
    #[must_use]
    pub fn class(&self) -> ConstraintClass {
        self.class
    }
}

impl std::fmt::Debug for dyn BilateralConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BilateralConstraint")
            .field("anchors", &self.anchors())
            .field("num_rows", &self.num_rows())
            .finish()
    }
}

/// Arena of registered constraints.
///
/// The registry tracks a dirty flag raised by every registration and
/// removal; the Jacobian assembler refuses to refill numeric values while
/// the flag is up and clears it when it regenerates the sparsity pattern.
#[derive(Debug, Default)]
pub struct ConstraintRegistry {
    slots: Vec<Option<ConstraintEntry>>,
    dirty: bool,
}

impl ConstraintRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constraint, classifying it by its anchors' owner kinds.
    ///
    /// `kind_of` resolves an owner handle to its kind, returning `None` for
    /// handles that do not refer to a live owner.
    ///
    /// # Errors
    ///
    /// - [`AssemblyError::InvalidAnchorCount`] unless the constraint
    ///   connects two or three owners
    /// - [`AssemblyError::InvalidOwnerHandle`] when an anchor does not
    ///   resolve to a live owner
    /// - [`AssemblyError::UnknownConstraintClass`] when the kind tuple has
    ///   no classification rule
    pub fn register<F>(
        &mut self,
        constraint: Box<dyn BilateralConstraint>,
        kind_of: F,
    ) -> Result<ConstraintHandle>
    where
        F: Fn(OwnerHandle) -> Option<OwnerKind>,
    {
        let anchors = constraint.anchors();
        if !(2..=3).contains(&anchors.len()) {
            return Err(AssemblyError::InvalidAnchorCount {
                count: anchors.len(),
            });
        }

        let mut kinds = Vec::with_capacity(anchors.len());
        for &handle in anchors {
            let kind =
                kind_of(handle).ok_or(AssemblyError::InvalidOwnerHandle(handle.index()))?;
            kinds.push(kind);
        }
        let class =
            ConstraintClass::classify(&kinds).ok_or_else(|| AssemblyError::unknown_class(&kinds))?;

        let handle = ConstraintHandle::new(self.slots.len());
        self.slots.push(Some(ConstraintEntry { constraint, class }));
        self.dirty = true;
        debug!(%handle, ?class, "constraint registered");
        Ok(handle)
    }

    /// Remove a constraint, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidConstraintHandle`] when the handle
    /// does not refer to a live constraint.
    pub fn remove(&mut self, handle: ConstraintHandle) -> Result<Box<dyn BilateralConstraint>> {
        let entry = self
            .slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(AssemblyError::InvalidConstraintHandle(handle.index()))?;
        self.dirty = true;
        Ok(entry.constraint)
    }

    /// Look up a registered constraint.
    #[must_use]
    pub fn get(&self, handle: ConstraintHandle) -> Option<&ConstraintEntry> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    /// Classification of a registered constraint.
    #[must_use]
    pub fn class_of(&self, handle: ConstraintHandle) -> Option<ConstraintClass> {
        self.get(handle).map(ConstraintEntry::class)
    }

    /// Iterate live constraints in slot order.
    pub fn active(&self) -> impl Iterator<Item = (ConstraintHandle, &ConstraintEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (ConstraintHandle::new(i), e)))
    }

    /// Number of live constraints.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Total scalar rows across live constraints.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.active().map(|(_, e)| e.constraint().num_rows()).sum()
    }

    /// Whether the constraint set changed since the last sparsity generation.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag. Called by the assembler after it regenerates
    /// the sparsity pattern over the current constraint set.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
