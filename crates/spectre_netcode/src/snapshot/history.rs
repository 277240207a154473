//! # Baseline History
//!
//! Tick-indexed ring of past records. The server keeps one per ghost to
//! encode against acknowledged baselines; the client keeps one per ghost
//! to decode against them and to interpolate between received ticks.
//!
//! ```text
//! slot = tick % capacity
//!
//!  tick 33 ─┐         ┌── tick 34
//!           ▼         ▼
//! [ 32 ][ 33 ][ 34 ][ 3 ][ 4 ] ...   (capacity 32)
//!                      ▲
//!                      └─ tick 3 entry: valid only while slot still says 3
//! ```

use crate::protocol::is_newer_tick;

/// Fixed-capacity ring of `(tick, value)` entries.
#[derive(Clone, Debug)]
pub struct BaselineHistory<T> {
    slots: Vec<Option<(u32, T)>>,
    newest: Option<u32>,
}

impl<T> BaselineHistory<T> {
    /// Creates an empty history.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            newest: None,
        }
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, tick: u32) -> usize {
        tick as usize % self.slots.len()
    }

    /// Stores `value` for `tick`, overwriting whatever shared the slot.
    pub fn insert(&mut self, tick: u32, value: T) {
        let slot = self.slot(tick);
        self.slots[slot] = Some((tick, value));
        if self.newest.map_or(true, |newest| is_newer_tick(tick, newest)) {
            self.newest = Some(tick);
        }
    }

    /// Returns the value stored for exactly `tick`.
    #[must_use]
    pub fn get(&self, tick: u32) -> Option<&T> {
        match &self.slots[self.slot(tick)] {
            Some((stored, value)) if *stored == tick => Some(value),
            _ => None,
        }
    }

    /// Returns the newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<(u32, &T)> {
        let tick = self.newest?;
        self.get(tick).map(|value| (tick, value))
    }

    /// Iterates the stored ticks in slot order.
    pub fn ticks(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().filter_map(|slot| slot.as_ref().map(|(tick, _)| *tick))
    }

    /// Returns the entries around `tick`: the newest at or before it and
    /// the oldest at or after it.
    ///
    /// Either side falls back to the other when `tick` lies outside the
    /// stored range, so callers always get a pair to blend.
    #[must_use]
    pub fn bracket(&self, tick: u32) -> Option<((u32, &T), (u32, &T))> {
        let mut before: Option<(u32, &T)> = None;
        let mut after: Option<(u32, &T)> = None;
        for (stored, value) in self.slots.iter().flatten() {
            let stored = *stored;
            if !is_newer_tick(stored, tick)
                && before.map_or(true, |(best, _)| is_newer_tick(stored, best))
            {
                before = Some((stored, value));
            }
            if !is_newer_tick(tick, stored)
                && after.map_or(true, |(best, _)| is_newer_tick(best, stored))
            {
                after = Some((stored, value));
            }
        }
        match (before, after) {
            (Some(b), Some(a)) => Some((b, a)),
            (Some(b), None) => Some((b, b)),
            (None, Some(a)) => Some((a, a)),
            (None, None) => None,
        }
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.newest = None;
    }
}
