//! Q8.24 wire format of the multiplier.
//!
//! Every operand and product crossing the DMA bridge is one 32-bit word:
//! two's-complement fixed point with 8 integer bits and 24 fraction bits.
//!
//! ```text
//!  31      24 23                      0
//! ┌──────────┬─────────────────────────┐
//! │ integer  │        fraction         │   value = integer + fraction / 2^24
//! └──────────┴─────────────────────────┘   negative values: two's complement
//! ```
//!
//! The representable range is `[-128, 128 - 2^-24]` with a fixed step of
//! `2^-24 ≈ 5.96e-8`. Encoding rounds to the nearest step, so a round trip is
//! exact only for values that already sit on the grid.

// Fixed-point conversion is all deliberate truncating / sign-reinterpreting casts.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]

/// Fraction bits in a word.
pub const FRACTION_BITS: u32 = 24;

/// Integer bits in a word (sign included).
pub const INTEGER_BITS: u32 = 8;

/// Sign bit of a word.
pub const SIGN_BIT: u32 = 1 << 31;

/// Largest positive code.
pub const MAX_CODE: u32 = 0x7FFF_FFFF;

const FRACTION_MASK: u32 = (1 << FRACTION_BITS) - 1;
const SCALE: f64 = (1u32 << FRACTION_BITS) as f64;

/// Distance between two adjacent representable values (2^-24).
pub const QUANTIZATION_STEP: f64 = 1.0 / SCALE;

/// Largest positive value that encodes without saturating.
pub const MAX_MAGNITUDE: f64 = MAX_CODE as f64 / SCALE;

/// Most negative representable value (`SIGN_BIT`).
pub const MIN_VALUE: f64 = -128.0;

/// Encode a value into a word, rounding to the nearest step.
///
/// Values outside `[MIN_VALUE, MAX_MAGNITUDE]` saturate; NaN encodes to 0.
/// Use [`checked_encode`] to reject those inputs instead.
#[must_use]
pub fn encode(value: f64) -> u32 {
    if value.is_nan() {
        return 0;
    }

    let negative = value.is_sign_negative();
    let (limit, max_code) = if negative {
        (-MIN_VALUE, SIGN_BIT)
    } else {
        (MAX_MAGNITUDE, MAX_CODE)
    };
    let magnitude = value.abs().min(limit);
    let integer = magnitude.trunc();
    let scaled = (magnitude - integer) * SCALE;
    let mut fraction = scaled.trunc() as u32;

    // Round half up: compare what truncation dropped against half a step.
    let remainder = (scaled - scaled.trunc()) * QUANTIZATION_STEP;
    if remainder >= QUANTIZATION_STEP / 2.0 {
        fraction += 1;
    }

    let code = ((integer as u32) << FRACTION_BITS)
        .saturating_add(fraction)
        .min(max_code);

    if negative {
        code.wrapping_neg()
    } else {
        code
    }
}

/// Encode a value, or `None` if it is not finite or out of range.
#[must_use]
pub fn checked_encode(value: f64) -> Option<u32> {
    if !value.is_finite() || value > MAX_MAGNITUDE || value < MIN_VALUE {
        return None;
    }
    Some(encode(value))
}

/// Decode a word back into a value.
#[must_use]
pub fn decode(word: u32) -> f64 {
    let negative = word & SIGN_BIT != 0;
    let magnitude = if negative { word.wrapping_neg() } else { word };

    let integer = magnitude >> FRACTION_BITS;
    let fraction = magnitude & FRACTION_MASK;
    let value = f64::from(integer) + f64::from(fraction) / SCALE;

    if negative {
        -value
    } else {
        value
    }
}

/// Product of two words as the multiplier IP computes it.
///
/// Full-width signed product, rounded back to 24 fraction bits, saturated
/// to the word range.
#[must_use]
pub fn fixed_mul(lhs: u32, rhs: u32) -> u32 {
    let product = i64::from(lhs as i32) * i64::from(rhs as i32);
    let rounded = (product + (1 << (FRACTION_BITS - 1))) >> FRACTION_BITS;
    rounded.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32 as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_exact() {
        assert_eq!(encode(0.0), 0);
        assert_eq!(encode(-0.0), 0);
        assert_eq!(decode(0), 0.0);
    }

    #[test]
    fn integers_sit_on_the_grid() {
        assert_eq!(encode(1.0), 0x0100_0000);
        assert_eq!(encode(2.0), 0x0200_0000);
        assert_eq!(encode(4.5), 0x0480_0000);
        assert_eq!(decode(0x0300_0000), 3.0);
    }

    #[test]
    fn negatives_are_twos_complement_of_magnitude() {
        assert_eq!(encode(-1.0), 0xFF00_0000);
        assert_eq!(encode(-1.5), 0x0180_0000u32.wrapping_neg());
        assert_eq!(decode(0xFF00_0000), -1.0);
        assert_eq!(decode(SIGN_BIT), -128.0);
    }

    #[test]
    fn round_trip_within_one_step() {
        let samples = [
            1e-9, 3e-8, 0.1, 0.333_333_333, 1.0 / 3.0, 2.718_281_828, -3.141_592_653_5,
            42.424_242, -99.999_999, 127.5, -127.999_99, 1e-3,
        ];
        for value in samples {
            let back = decode(encode(value));
            assert!(
                (back - value).abs() <= QUANTIZATION_STEP,
                "{value} came back as {back}"
            );
        }
    }

    #[test]
    fn round_trip_sweep_stays_within_half_a_step() {
        let mut state: u64 = 0x5eed_f00d_cafe_0001;
        let mut worst = 0.0f64;
        for _ in 0..200_000 {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            let value = -MAX_MAGNITUDE + unit * 2.0 * MAX_MAGNITUDE;
            let back = decode(encode(value));
            worst = worst.max((back - value).abs());
        }
        assert!(
            worst <= QUANTIZATION_STEP / 2.0 + f64::EPSILON * 128.0,
            "worst round-trip error {worst}"
        );
    }

    #[test]
    fn rounds_to_nearest_step() {
        // Just under half a step truncates, exactly half rounds up.
        assert_eq!(encode(QUANTIZATION_STEP * 0.49), 0);
        assert_eq!(encode(QUANTIZATION_STEP * 0.5), 1);
        assert_eq!(encode(QUANTIZATION_STEP * 1.51), 2);
    }

    #[test]
    fn saturates_out_of_range() {
        assert_eq!(encode(1000.0), MAX_CODE);
        assert_eq!(encode(f64::INFINITY), MAX_CODE);
        assert_eq!(encode(-1000.0), SIGN_BIT);
        assert_eq!(encode(f64::NAN), 0);
    }

    #[test]
    fn checked_encode_rejects_unrepresentable() {
        assert_eq!(checked_encode(2.0), Some(0x0200_0000));
        assert_eq!(checked_encode(128.0), None);
        assert_eq!(checked_encode(f64::NAN), None);
        assert_eq!(checked_encode(f64::NEG_INFINITY), None);
        assert!(checked_encode(-MAX_MAGNITUDE).is_some());
        assert_eq!(checked_encode(MIN_VALUE), Some(SIGN_BIT));
        assert_eq!(checked_encode(MIN_VALUE - QUANTIZATION_STEP), None);
    }

    #[test]
    fn fixed_mul_matches_float_products() {
        assert_eq!(decode(fixed_mul(encode(2.0), encode(2.0))), 4.0);
        assert_eq!(decode(fixed_mul(encode(3.0), encode(1.5))), 4.5);
        assert_eq!(decode(fixed_mul(encode(-2.0), encode(3.0))), -6.0);
        assert_eq!(decode(fixed_mul(encode(-0.5), encode(-0.5))), 0.25);

        let product = decode(fixed_mul(encode(1.1), encode(2.2)));
        assert!((product - 2.42).abs() < 4.0 * QUANTIZATION_STEP);
    }

    #[test]
    fn fixed_mul_saturates() {
        assert_eq!(fixed_mul(encode(100.0), encode(100.0)), MAX_CODE);
        assert_eq!(fixed_mul(encode(-100.0), encode(100.0)), SIGN_BIT);
    }
}
