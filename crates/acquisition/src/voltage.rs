//! Raw code to engineering-unit conversion.
//!
//! Runs in the streaming task only; the acquisition worker never touches
//! floating point.

use crate::config::{Channel, ChannelRuntime, ChannelWiring};
use crate::sample::Sample;

/// Width of an AD7609 result.
pub const AD7609_CODE_BITS: u32 = 18;

/// Largest positive AD7609 code (2^17 - 1).
pub const AD7609_FULL_SCALE: f64 = 131_071.0;

/// Sign-extend an 18-bit two's complement code.
#[allow(clippy::cast_possible_wrap)] // Safety: shifted into the top bits on purpose
pub const fn sign_extend_18(raw: u32) -> i32 {
    const SHIFT: u32 = 32 - AD7609_CODE_BITS;
    ((raw << SHIFT) as i32) >> SHIFT
}

/// Convert one sample to volts:
/// `(range * internal_scale * cal_m * code) / full_scale + cal_b`.
///
/// The on-chip converter is unipolar with a per-channel resolution; the
/// AD7609 is bipolar with a fixed 17-bit magnitude.
pub fn convert_to_voltage(channel: &Channel, runtime: &ChannelRuntime, sample: &Sample) -> f64 {
    let (internal_scale, code, full_scale) = match channel.wiring {
        ChannelWiring::Mc12b(wiring) => (
            wiring.internal_scale,
            f64::from(sample.raw),
            f64::from(wiring.resolution.max(1)),
        ),
        ChannelWiring::Ad7609(_) => (1.0, f64::from(sign_extend_18(sample.raw)), AD7609_FULL_SCALE),
    };
    (runtime.range * internal_scale * runtime.cal_m * code) / full_scale + runtime.cal_b
}

/// Volts to whole millivolts, truncating toward zero (saturates, NaN is 0).
#[allow(clippy::cast_possible_truncation)] // float-to-int `as` saturates
pub fn to_millivolts(volts: f64) -> i32 {
    (volts * 1000.0) as i32
}
