//! # Dense Component Columns
//!
//! One column per component type, one cell per entity slot. Cells are
//! allocated up front and reset to `Default` when their occupant is
//! despawned, so a column never grows during a tick.
//!
//! The world only knows its columns through [`ErasedStorage`].

use std::any::Any;

use super::component::Component;

/// Fixed-size column of `C`, indexed by entity slot.
///
/// ```rust
/// use spectre_core::{ComponentStorage, Velocity};
///
/// let mut column: ComponentStorage<Velocity> = ComponentStorage::new(8);
/// assert!(column.set(5, Velocity::new(0.0, -9.8, 0.0)));
/// assert!(!column.set(8, Velocity::default()));
/// ```
pub struct ComponentStorage<C: Component> {
    cells: Box<[C]>,
}

impl<C: Component> ComponentStorage<C> {
    /// Allocates `capacity` default cells.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "component column needs at least one slot");
        Self {
            cells: vec![C::default(); capacity].into_boxed_slice(),
        }
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Cell for `slot`, if in range.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&C> {
        self.cells.get(slot)
    }

    /// Mutable cell for `slot`, if in range.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut C> {
        self.cells.get_mut(slot)
    }

    /// Overwrites the cell. Returns `false` when `slot` is out of range.
    #[inline]
    pub fn set(&mut self, slot: usize, value: C) -> bool {
        self.get_mut(slot).map(|cell| *cell = value).is_some()
    }

    /// Every cell, live or not.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[C] {
        &self.cells
    }

    /// Puts the cell back to `C::default()`.
    #[inline]
    pub fn reset(&mut self, slot: usize) {
        let _ = self.set(slot, C::default());
    }
}

/// Column with its component type erased.
pub(crate) trait ErasedStorage: Send + Sync {
    fn reset_slot(&mut self, slot: usize);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<C: Component> ErasedStorage for ComponentStorage<C> {
    fn reset_slot(&mut self, slot: usize) {
        self.reset(slot);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
