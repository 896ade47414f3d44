// 🧮 Usage Calculator - energy and cost from wattage, duration and rate
//
// Pure functions only. Inputs are validated by the caller (see `validation`)
// before they get here.

use serde::{Deserialize, Serialize};

/// Energy and cost of running one device for a while.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageEstimate {
    pub kwh: f64,
    pub cost: f64,
}

/// `kwh = watts * (minutes / 60) / 1000`, `cost = kwh * rate`.
pub fn compute(watt_per_hour: f64, duration_minutes: f64, rate: f64) -> UsageEstimate {
    let hours = duration_minutes / 60.0;
    let kwh = watt_per_hour * hours / 1000.0;
    UsageEstimate {
        kwh,
        cost: kwh * rate,
    }
}

/// Hours and minutes fields summed into minutes.
pub fn duration_minutes(hours: f64, minutes: f64) -> f64 {
    hours * 60.0 + minutes
}

/// Round half away from zero to two decimals, for display.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
