//! Frequency arithmetic: scaling raw counts to a fixed-point
//! percentage, smoothing via power/log transforms, and inverting for
//! display. Kept free of trie concerns so both the writable and packed
//! tries can share the exact same rounding behaviour — the stored values
//! are meaningless unless writer and reader apply the same transform.

/// Fixed-point scale applied on top of the 0-100 percentage range.
pub const T_SCALE: u64 = 1_000_000_000;

/// Scale a raw count `r` out of a training total `T` into the canonical
/// fixed-point percentage `round(T_SCALE * 100 * r / T)`.
///
/// Overflow/underflow rules:
/// - if `r == 0`, return 0.
/// - if the product would not fit in `u32`, clamp to `u32::MAX`.
/// - if `r > 0` and the rounded result is zero, return 1.
pub fn scale(r: u64, total: u64) -> u32 {
    if r == 0 {
        return 0;
    }
    debug_assert!(total > 0, "scale() called with zero training total");

    // round(T_SCALE * 100 * r / T), computed in u128 to avoid overflow
    // before the clamp/rounding step.
    let numerator = (T_SCALE as u128) * 100 * (r as u128);
    let denom = total as u128;
    let scaled = (numerator + denom / 2) / denom;

    if scaled > u32::MAX as u128 {
        u32::MAX
    } else if scaled == 0 {
        1
    } else {
        scaled as u32
    }
}

/// Inverse of [`scale`]: recover an approximate percentage (0-100 range,
/// scaled by `T_SCALE`) as a float, for display/debugging.
pub fn unscale(scaled: u32) -> f64 {
    scaled as f64 / T_SCALE as f64
}

/// Smoothing power/log-power pair, precomputed once per model so every
/// leaf scaled with it uses a consistent transform. `log_power` must equal
/// `ln(1 + |power|)` whenever `power < 0`; callers build this via
/// [`Smoothing::new`] rather than constructing the struct directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothing {
    power: i32,
    log_power: f64,
}

impl Smoothing {
    /// Construct a smoothing configuration for the given power, precomputing
    /// `log_power` for the negative-power (logarithmic) branch.
    pub fn new(power: i32) -> Self {
        let log_power = if power < 0 {
            (1.0 + (-power) as f64).ln()
        } else {
            0.0
        };
        Self { power, log_power }
    }

    pub fn power(self) -> i32 {
        self.power
    }

    /// Apply the configured smoothing to a raw count `r` out of total `T`.
    ///
    /// - `power == 0`: linear scaling, identical to [`scale`].
    /// - `power > 0`: `(100 * r / T) ^ power`.
    /// - `power < 0`: `log(1 + r * (-power)) / log_power * 4`, with `r`
    ///   floored at the smallest positive float to avoid `log(0)`.
    pub fn apply(self, r: u64, total: u64) -> f64 {
        if self.power == 0 {
            return scale(r, total) as f64;
        }
        let pct = 100.0 * (r.max(if self.power > 0 { 0 } else { 1 }) as f64) / total as f64;
        if self.power > 0 {
            pct.powi(self.power)
        } else {
            let r_floored = (r as f64).max(f64::MIN_POSITIVE);
            let neg_power = (-self.power) as f64;
            (1.0 + r_floored * neg_power).ln() / self.log_power * 4.0
        }
    }

    /// Invert [`Self::apply`], recovering an approximate raw-count ratio
    /// from a smoothed value. Used by debug/dump tooling only; lossy for
    /// `power != 0` because the forward transform is not exactly invertible
    /// once quantised.
    pub fn invert(self, smoothed: f64, total: u64) -> f64 {
        if self.power == 0 {
            return smoothed / (T_SCALE as f64 * 100.0) * total as f64;
        }
        if self.power > 0 {
            let pct = smoothed.max(0.0).powf(1.0 / self.power as f64);
            pct / 100.0 * total as f64
        } else {
            let neg_power = (-self.power) as f64;
            let exponent = smoothed / 4.0 * self.log_power;
            (exponent.exp() - 1.0) / neg_power
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_zero_count_is_zero() {
        assert_eq!(scale(0, 1000), 0);
    }

    #[test]
    fn scale_rounds_up_to_one_when_nonzero_rounds_to_zero() {
        // r is tiny relative to T: the raw rounded value underflows to 0,
        // but r > 0 so the floor rule forces 1.
        assert_eq!(scale(1, u64::MAX / 10), 1);
    }

    #[test]
    fn scale_clamps_on_overflow() {
        // T=1000, r=100 -> 10^9 * 100 * 100 / 1000 = 10^10, which overflows u32.
        assert_eq!(scale(100, 1000), u32::MAX);
    }

    #[test]
    fn scale_typical_value() {
        // r=T -> round(T_SCALE*100) = 10^11, still overflows u32::MAX (~4.29e9).
        assert_eq!(scale(10, 1_000_000_000_000), 1);
    }

    #[test]
    fn smoothing_power_zero_matches_scale() {
        let s = Smoothing::new(0);
        assert_eq!(s.apply(5, 1000) as u32, scale(5, 1000));
    }

    #[test]
    fn smoothing_positive_power_scales_down_small_ratios() {
        let s = Smoothing::new(2);
        // (100 * 1/100)^2 = 1
        assert!((s.apply(1, 100) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn smoothing_negative_power_is_bounded_and_monotonic() {
        let s = Smoothing::new(-2);
        let low = s.apply(1, 1000);
        let high = s.apply(500, 1000);
        assert!(low < high);
        assert!(low >= 0.0);
    }

    proptest::proptest! {
        #[test]
        fn scale_bounds_hold(r in 0u64..=1_000_000u64, total in 1u64..=1_000_000u64) {
            let r = r.min(total);
            let scaled = scale(r, total);
            if r == 0 {
                proptest::prop_assert_eq!(scaled, 0);
            } else {
                proptest::prop_assert!(scaled >= 1);
            }
        }
    }
}
