// ✅ Input Validation - raw form/CLI strings into checked numbers
//
// Everything here runs before storage is touched. Failures are
// `KilluaError::Validation` with a message meant for the user.

use crate::error::{KilluaError, Result};

fn parse_number(field: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        KilluaError::validation(format!("{} must be a number, got '{}'", field, raw.trim()))
    })?;
    if !value.is_finite() {
        return Err(KilluaError::validation(format!("{} must be a finite number", field)));
    }
    Ok(value)
}

/// Number strictly greater than zero (wattage, rate).
pub fn parse_positive(field: &str, raw: &str) -> Result<f64> {
    let value = parse_number(field, raw)?;
    if value <= 0.0 {
        return Err(KilluaError::validation(format!("{} must be greater than 0", field)));
    }
    Ok(value)
}

/// Number greater than or equal to zero. An empty field counts as 0.
pub fn parse_non_negative(field: &str, raw: &str) -> Result<f64> {
    if raw.trim().is_empty() {
        return Ok(0.0);
    }
    let value = parse_number(field, raw)?;
    if value < 0.0 {
        return Err(KilluaError::validation(format!("{} must not be negative", field)));
    }
    Ok(value)
}

/// Check an hours + minutes pair and return the total in minutes.
///
/// Either part may be zero, but not both.
pub fn validate_duration(hours: f64, minutes: f64) -> Result<f64> {
    if !hours.is_finite() || !minutes.is_finite() {
        return Err(KilluaError::validation("duration must be a finite number"));
    }
    if hours < 0.0 || minutes < 0.0 {
        return Err(KilluaError::validation("duration must not be negative"));
    }
    let total = crate::calculator::duration_minutes(hours, minutes);
    if total <= 0.0 {
        return Err(KilluaError::validation(
            "duration must be greater than 0 (set hours or minutes)",
        ));
    }
    Ok(total)
}

/// One usage entry as typed on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySpec {
    pub device: String,
    pub hours: f64,
    pub minutes: f64,
}

/// Parse `NAME:H:M` (or `NAME:M`, minutes only).
///
/// The device name may itself contain ':'; only the trailing numeric
/// fields are split off.
pub fn parse_entry_spec(raw: &str) -> Result<EntrySpec> {
    let bad = || {
        KilluaError::validation(format!(
            "entry '{}' must look like DEVICE:HOURS:MINUTES or DEVICE:MINUTES",
            raw
        ))
    };

    let (head, last) = raw.rsplit_once(':').ok_or_else(bad)?;

    // NAME:H:M when the middle field is numeric, else NAME:M
    let (device, hours, minutes) = match head.rsplit_once(':') {
        Some((name, middle)) if middle.trim().parse::<f64>().is_ok() || middle.trim().is_empty() => {
            (name, parse_non_negative("hours", middle)?, parse_non_negative("minutes", last)?)
        }
        _ => (head, 0.0, parse_non_negative("minutes", last)?),
    };

    let device = device.trim();
    if device.is_empty() {
        return Err(bad());
    }
    validate_duration(hours, minutes)?;

    Ok(EntrySpec {
        device: device.to_string(),
        hours,
        minutes,
    })
}

/// `YYYY-MM` month prefix used by monthly reporting.
pub fn validate_month(raw: &str) -> Result<String> {
    let month = raw.trim();
    let parsed = chrono::NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d");
    if month.len() != 7 || parsed.is_err() {
        return Err(KilluaError::validation(format!(
            "month must be YYYY-MM, got '{}'",
            month
        )));
    }
    Ok(month.to_string())
}
