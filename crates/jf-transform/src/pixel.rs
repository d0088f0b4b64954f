//! Pixel arithmetic with bad-pixel and overload sentinels.
//!
//! Upstream correction marks unusable pixels with extreme 16-bit values.
//! Anything at or beyond +-32000 is a marker, not a measurement, and must
//! survive halving and summation unchanged.

/// Samples below this value mark a bad pixel.
pub const BAD_PIXEL_THRESHOLD: i16 = -32000;

/// Samples above this value mark an overloaded pixel.
pub const OVERLOAD_THRESHOLD: i16 = 32000;

/// Accumulator value of a summed pixel that saw a bad sample.
pub const BAD_SENTINEL: i32 = i32::MIN;

/// Accumulator value of a summed pixel that saw an overload (and no bad sample).
pub const OVERLOAD_SENTINEL: i32 = i32::MAX;

/// Pixel types that can be split across an expanded chip gap.
///
/// Splitting a value over two output pixels halves it; over four, quarters
/// it. Sentinel values are passed through untouched.
pub trait GapPixel: Copy {
    /// Value for each of the two pixels sharing a gap.
    fn halve(self) -> Self;
    /// Value for each of the four pixels sharing a gap corner.
    fn quarter(self) -> Self;
}

impl GapPixel for i16 {
    #[inline]
    fn halve(self) -> Self {
        if self > BAD_PIXEL_THRESHOLD && self < OVERLOAD_THRESHOLD {
            self / 2
        } else {
            self
        }
    }

    #[inline]
    fn quarter(self) -> Self {
        if self > BAD_PIXEL_THRESHOLD && self < OVERLOAD_THRESHOLD {
            self / 4
        } else {
            self
        }
    }
}

impl GapPixel for i32 {
    #[inline]
    fn halve(self) -> Self {
        if self != BAD_SENTINEL && self != OVERLOAD_SENTINEL {
            self / 2
        } else {
            self
        }
    }

    #[inline]
    fn quarter(self) -> Self {
        if self != BAD_SENTINEL && self != OVERLOAD_SENTINEL {
            self / 4
        } else {
            self
        }
    }
}

/// Add one frame's samples into the running per-pixel sums.
///
/// Sticky rules, applied per sample in order:
/// - a bad sample turns the sum into [`BAD_SENTINEL`] for good;
/// - an overloaded sample turns it into [`OVERLOAD_SENTINEL`] unless already bad;
/// - otherwise the sample is added while the sum is not a sentinel.
#[inline]
pub fn accumulate(sums: &mut [i32], samples: &[i16]) {
    for (sum, &sample) in sums.iter_mut().zip(samples) {
        if sample < BAD_PIXEL_THRESHOLD {
            *sum = BAD_SENTINEL;
        }
        if sample > OVERLOAD_THRESHOLD && *sum != BAD_SENTINEL {
            *sum = OVERLOAD_SENTINEL;
        }
        if *sum != BAD_SENTINEL && *sum != OVERLOAD_SENTINEL {
            *sum += i32::from(sample);
        }
    }
}

/// Sum one pixel's samples with the rules of [`accumulate`].
#[must_use]
pub fn sum_samples<I>(samples: I) -> i32
where
    I: IntoIterator<Item = i16>,
{
    let mut sum = [0i32];
    for sample in samples {
        accumulate(&mut sum, &[sample]);
    }
    sum[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn halving_truncates_toward_zero() {
        assert_eq!(101i16.halve(), 50);
        assert_eq!((-101i16).halve(), -50);
        assert_eq!(103i16.quarter(), 25);
        assert_eq!((-103i16).quarter(), -25);
    }

    #[test]
    fn markers_pass_through_16_bit() {
        for marker in [-32768i16, -32000, 32000, 32767] {
            assert_eq!(marker.halve(), marker);
            assert_eq!(marker.quarter(), marker);
        }
        assert_eq!(31999i16.halve(), 15999);
        assert_eq!((-31999i16).quarter(), -7999);
    }

    #[test]
    fn sentinels_pass_through_32_bit() {
        assert_eq!(BAD_SENTINEL.halve(), BAD_SENTINEL);
        assert_eq!(OVERLOAD_SENTINEL.quarter(), OVERLOAD_SENTINEL);
        assert_eq!(64_000i32.halve(), 32_000);
    }

    #[test]
    fn overload_is_sticky() {
        assert_eq!(sum_samples([10, 32500, 10]), OVERLOAD_SENTINEL);
        assert_eq!(sum_samples([32500, 10, 10]), OVERLOAD_SENTINEL);
    }

    #[test]
    fn bad_wins_over_overload() {
        assert_eq!(sum_samples([32500, -32500, 10]), BAD_SENTINEL);
        assert_eq!(sum_samples([-32500, 32500]), BAD_SENTINEL);
    }

    #[test]
    fn thresholds_are_exclusive() {
        assert_eq!(sum_samples([-32000, 32000]), 0);
        assert_eq!(sum_samples([-32001]), BAD_SENTINEL);
        assert_eq!(sum_samples([32001]), OVERLOAD_SENTINEL);
    }

    #[test]
    fn sticky_bad_law_randomized() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let count = rng.gen_range(2..8);
            let mut samples: Vec<i16> = (0..count).map(|_| rng.gen()).collect();
            let bad_at = rng.gen_range(0..count);
            samples[bad_at] = rng.gen_range(i16::MIN..BAD_PIXEL_THRESHOLD);
            assert_eq!(sum_samples(samples.iter().copied()), BAD_SENTINEL);
        }
    }

    #[test]
    fn overload_law_randomized() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..2000 {
            let count = rng.gen_range(2..8);
            let mut samples: Vec<i16> = (0..count)
                .map(|_| rng.gen_range(BAD_PIXEL_THRESHOLD..=i16::MAX))
                .collect();
            let hot = rng.gen_range(0..count);
            samples[hot] = rng.gen_range(OVERLOAD_THRESHOLD + 1..=i16::MAX);
            assert_eq!(sum_samples(samples.iter().copied()), OVERLOAD_SENTINEL);
        }
    }

    #[test]
    fn plain_samples_add_up() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            let samples: Vec<i16> = (0..5).map(|_| rng.gen_range(-1000..1000)).collect();
            let expected: i32 = samples.iter().map(|&s| i32::from(s)).sum();
            assert_eq!(sum_samples(samples), expected);
        }
    }
}
