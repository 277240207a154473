//! Smoothed command age.
//!
//! How many ticks late (positive) or early (negative) commands reach the
//! server, kept as 8.8 fixed point and smoothed with
//! `age = (age * 7 + sample) / 8`.

/// Fractional bits of the fixed-point value.
const FRACTION_BITS: u32 = 8;

/// Exponentially smoothed age in 8.8 fixed point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmoothedAge {
    raw: i32,
}

impl SmoothedAge {
    /// Zero age.
    #[must_use]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    /// Folds in a whole-tick sample.
    pub fn add_sample(&mut self, ticks: i32) {
        self.add_raw(ticks.saturating_mul(1 << FRACTION_BITS));
    }

    /// Folds in a fixed-point sample, as carried in snapshot headers.
    pub fn add_raw(&mut self, sample: i32) {
        let smoothed = (i64::from(self.raw) * 7 + i64::from(sample)) / 8;
        // The average of two i32 values always fits.
        #[allow(clippy::cast_possible_truncation)]
        let smoothed = smoothed as i32;
        self.raw = smoothed;
    }

    /// Fixed-point value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.raw
    }

    /// Value in ticks.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ticks(self) -> f32 {
        self.raw as f32 / (1 << FRACTION_BITS) as f32
    }

    /// Forgets every sample.
    pub fn reset(&mut self) {
        self.raw = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_monotonically() {
        let mut age = SmoothedAge::new();
        let mut previous = age.raw();
        for _ in 0..100 {
            age.add_sample(5);
            assert!(age.raw() >= previous);
            assert!(age.raw() <= 5 << 8);
            previous = age.raw();
        }
        assert!((age.ticks() - 5.0).abs() < 0.05);
    }

    #[test]
    fn test_negative_samples() {
        let mut age = SmoothedAge::new();
        let mut previous = age.raw();
        for _ in 0..100 {
            age.add_sample(-3);
            assert!(age.raw() <= previous);
            previous = age.raw();
        }
        assert!((age.ticks() + 3.0).abs() < 0.05);
    }

    #[test]
    fn test_raw_samples_match_tick_samples() {
        let mut from_ticks = SmoothedAge::new();
        let mut from_raw = SmoothedAge::new();
        from_ticks.add_sample(2);
        from_raw.add_raw(512);
        assert_eq!(from_ticks, from_raw);
        assert_eq!(from_ticks.raw(), 64);
    }
}
