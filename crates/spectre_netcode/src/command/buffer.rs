//! Tick-keyed command history stored as an entity buffer.

use bytemuck::Pod;

use crate::error::NetResult;
use crate::protocol::{is_newer_tick, DeltaBuffer};

/// Samples kept per command type and entity.
pub const COMMAND_BUFFER_CAPACITY: usize = 32;

/// One tick-stamped input sample.
///
/// Samples are delta-encoded against the previously written sample of
/// the same packet; the tick travels separately.
pub trait CommandData: Pod + Send + Sync {
    /// Tick the sample is for.
    fn tick(&self) -> u32;

    /// Writes every field except the tick relative to `baseline`.
    fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer);

    /// Reads a sample written by [`serialize`](Self::serialize) and stamps
    /// it with `tick`.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the buffer.
    fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self, tick: u32) -> NetResult<Self>;
}

/// Ring operations on an entity's command buffer.
pub trait CommandBuffer<T: CommandData> {
    /// Stores `data`, replacing a sample with the same tick.
    ///
    /// When full, the oldest sample is overwritten, unless `data` is not
    /// newer than it; then `data` is dropped.
    fn add_command_data(&mut self, data: T);

    /// Sample for exactly `tick`.
    fn get_data_at_tick(&self, tick: u32) -> Option<&T>;

    /// Newest sample whose tick is not after `tick`.
    fn latest_at_or_before(&self, tick: u32) -> Option<&T>;
}

impl<T: CommandData> CommandBuffer<T> for Vec<T> {
    fn add_command_data(&mut self, data: T) {
        let tick = data.tick();
        if let Some(slot) = self.iter_mut().find(|s| s.tick() == tick) {
            *slot = data;
            return;
        }
        if self.len() < COMMAND_BUFFER_CAPACITY {
            self.push(data);
            return;
        }
        let oldest = self
            .iter()
            .enumerate()
            .reduce(|a, b| if is_newer_tick(a.1.tick(), b.1.tick()) { b } else { a })
            .map(|(index, sample)| (index, sample.tick()));
        if let Some((index, oldest_tick)) = oldest {
            if is_newer_tick(tick, oldest_tick) {
                self[index] = data;
            }
        }
    }

    fn get_data_at_tick(&self, tick: u32) -> Option<&T> {
        self.iter().find(|s| s.tick() == tick)
    }

    fn latest_at_or_before(&self, tick: u32) -> Option<&T> {
        self.iter()
            .filter(|s| !is_newer_tick(s.tick(), tick))
            .reduce(|a, b| if is_newer_tick(b.tick(), a.tick()) { b } else { a })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytemuck::Zeroable;

    /// Movement input used across the command tests.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    #[repr(C)]
    pub(crate) struct MoveInput {
        pub tick: u32,
        pub dx: i32,
        pub dy: i32,
    }

    impl CommandData for MoveInput {
        fn tick(&self) -> u32 {
            self.tick
        }

        fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer) {
            buffer.add_int_delta(self.dx, baseline.dx);
            buffer.add_int_delta(self.dy, baseline.dy);
        }

        fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self, tick: u32) -> NetResult<Self> {
            Ok(Self {
                tick,
                dx: buffer.read_int_delta(baseline.dx)?,
                dy: buffer.read_int_delta(baseline.dy)?,
            })
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn sample(tick: u32) -> MoveInput {
        MoveInput {
            tick,
            dx: tick as i32,
            dy: -1,
        }
    }

    #[test]
    fn test_exact_lookup_until_evicted() {
        let mut buffer: Vec<MoveInput> = Vec::new();
        for tick in 1..=32 {
            buffer.add_command_data(sample(tick));
        }
        assert_eq!(buffer.get_data_at_tick(1), Some(&sample(1)));
        assert_eq!(buffer.get_data_at_tick(33), None);

        buffer.add_command_data(sample(33));
        assert_eq!(buffer.len(), COMMAND_BUFFER_CAPACITY);
        assert_eq!(buffer.get_data_at_tick(1), None);
        assert_eq!(buffer.get_data_at_tick(2), Some(&sample(2)));
        assert_eq!(buffer.get_data_at_tick(33), Some(&sample(33)));
    }

    #[test]
    fn test_late_sample_does_not_evict_newer() {
        let mut buffer: Vec<MoveInput> = Vec::new();
        for tick in 10..=41 {
            buffer.add_command_data(sample(tick));
        }
        buffer.add_command_data(sample(5));
        assert_eq!(buffer.len(), COMMAND_BUFFER_CAPACITY);
        assert_eq!(buffer.get_data_at_tick(5), None);
        assert_eq!(buffer.get_data_at_tick(10), Some(&sample(10)));

        // Same tick as the oldest replaces it in place.
        buffer.add_command_data(MoveInput { tick: 10, dx: 7, dy: 7 });
        assert_eq!(buffer.get_data_at_tick(10).map(|s| s.dx), Some(7));

        buffer.add_command_data(sample(42));
        assert_eq!(buffer.get_data_at_tick(10), None);
        assert_eq!(buffer.get_data_at_tick(42), Some(&sample(42)));
    }

    #[test]
    fn test_same_tick_replaced() {
        let mut buffer: Vec<MoveInput> = Vec::new();
        buffer.add_command_data(sample(5));
        buffer.add_command_data(MoveInput {
            tick: 5,
            dx: 100,
            dy: 0,
        });
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get_data_at_tick(5).map(|s| s.dx), Some(100));
    }

    #[test]
    fn test_latest_at_or_before() {
        let mut buffer: Vec<MoveInput> = Vec::new();
        for tick in [10, 14, 12] {
            buffer.add_command_data(sample(tick));
        }
        assert_eq!(buffer.latest_at_or_before(13).map(|s| s.tick), Some(12));
        assert_eq!(buffer.latest_at_or_before(20).map(|s| s.tick), Some(14));
        assert_eq!(buffer.latest_at_or_before(9), None);
    }
}
