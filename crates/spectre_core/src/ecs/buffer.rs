//! # Dynamic Buffers
//!
//! Variable-length per-entity arrays (command histories, inventories, ...).
//! Unlike components they are not part of the archetype and are not
//! pre-allocated; a buffer exists from `add_buffer` until removal or despawn.

use std::any::Any;
use std::collections::HashMap;

/// All buffers of one element type, keyed by entity slot.
pub(crate) struct BufferStore<T> {
    slots: HashMap<u32, Vec<T>>,
}

impl<T> BufferStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    pub(crate) fn get_or_insert(&mut self, index: u32) -> &mut Vec<T> {
        self.slots.entry(index).or_default()
    }

    pub(crate) fn get(&self, index: u32) -> Option<&Vec<T>> {
        self.slots.get(&index)
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Option<&mut Vec<T>> {
        self.slots.get_mut(&index)
    }

    pub(crate) fn remove(&mut self, index: u32) -> Option<Vec<T>> {
        self.slots.remove(&index)
    }
}

/// Type-erased view of a [`BufferStore`], so despawn can drop every buffer.
pub(crate) trait ErasedBuffers: Send + Sync {
    fn clear_slot(&mut self, index: u32);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> ErasedBuffers for BufferStore<T> {
    fn clear_slot(&mut self, index: u32) {
        self.slots.remove(&index);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
