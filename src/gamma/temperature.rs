//! Colour temperature to gamma ramps and back
//!
//! Channel factors follow Tanner Helland's blackbody fit, divided by the
//! fit at 6500 K so that 6500 K is the identity ramp.

pub const MIN_TEMP: i32 = 1000;
pub const MAX_TEMP: i32 = 10000;
pub const NEUTRAL_TEMP: i32 = 6500;

/// Granularity of [`temperature_of`]
const SEARCH_STEP: usize = 10;

/// Un-normalised blackbody colour in `0.0..=1.0` per channel
fn blackbody(temp: i32) -> [f64; 3] {
    let t = f64::from(temp) / 100.0;

    let red = if t <= 66.0 {
        255.0
    } else {
        329.698727446 * (t - 60.0).powf(-0.1332047592)
    };
    let green = if t <= 66.0 {
        99.4708025861 * t.ln() - 161.1195681661
    } else {
        288.1221695283 * (t - 60.0).powf(-0.0755148492)
    };
    let blue = if t >= 66.0 {
        255.0
    } else if t <= 19.0 {
        0.0
    } else {
        138.5177312231 * (t - 10.0).ln() - 305.0447927307
    };

    [red, green, blue].map(|c| c.clamp(0.0, 255.0) / 255.0)
}

/// Per-channel ramp factors for `temp`, `1.0` meaning unchanged
pub fn factors(temp: i32) -> [f64; 3] {
    let color = blackbody(temp);
    let neutral = blackbody(NEUTRAL_TEMP);
    std::array::from_fn(|i| (color[i] / neutral[i]).min(1.0))
}

/// Linear ramp of `size` entries scaled by `factor`
pub fn ramp(size: usize, factor: f64) -> Vec<u16> {
    let last = size.saturating_sub(1).max(1) as f64;
    (0..size)
        .map(|i| (i as f64 / last * 65535.0 * factor).round().clamp(0.0, 65535.0) as u16)
        .collect()
}

/// The three ramps for `temp`, `[red, green, blue]`
pub fn ramps(size: usize, temp: i32) -> [Vec<u16>; 3] {
    factors(temp).map(|f| ramp(size, f))
}

/// Factor a ramp was built with, read from its top entry
pub fn factor_of(ramp: &[u16]) -> f64 {
    ramp.iter()
        .copied()
        .max()
        .map_or(1.0, |top| f64::from(top) / 65535.0)
}

/// Temperature whose factors are closest to `observed`
///
/// The search runs in 10 K steps over the supported range. Several
/// temperatures map to the identity ramp; among equal matches the one
/// nearest 6500 K wins.
pub fn temperature_of(observed: [f64; 3]) -> i32 {
    let mut best = NEUTRAL_TEMP;
    let mut best_error = f64::INFINITY;
    for temp in (MIN_TEMP..=MAX_TEMP).step_by(SEARCH_STEP) {
        let candidate = factors(temp);
        let error: f64 = (0..3).map(|i| (candidate[i] - observed[i]).powi(2)).sum();
        let closer = (temp - NEUTRAL_TEMP).abs() < (best - NEUTRAL_TEMP).abs();
        if error < best_error - 1e-12 || ((error - best_error).abs() <= 1e-12 && closer) {
            best = temp;
            best_error = error;
        }
    }
    best
}

/// Temperature of a set of `[red, green, blue]` ramps
pub fn temperature_of_ramps(ramps: &[Vec<u16>; 3]) -> i32 {
    temperature_of([
        factor_of(&ramps[0]),
        factor_of(&ramps[1]),
        factor_of(&ramps[2]),
    ])
}
