//! Closed-form cycle-time formulas and samplers. Everything here is pure, apart from the
//! breakdown model which draws from injected distributions.

pub mod breakdown;
pub mod fuel;
pub mod shovel;
pub mod truck;
pub mod trucks_needed;
pub mod unload;

/// Truncates a duration in seconds to whole seconds, treating negatives and NaN as zero.
pub fn whole_seconds(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0. {
        secs as u64
    } else {
        0
    }
}
