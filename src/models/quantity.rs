use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Matches `<number><unit>` with optional whitespace, e.g. `1.2mJy`, `230.5 GHz`, `3e-4Jy`.
static QUANTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*([A-Za-z]*)\s*$")
        .expect("Invalid quantity regex")
});

/// Errors raised while reading physical quantities from configuration or heuristics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuantityError {
    #[error("Cannot parse quantity '{0}'")]
    Malformed(String),

    #[error("Unit '{unit}' is not a {kind} unit in '{text}'")]
    WrongUnit {
        text: String,
        unit: String,
        kind: &'static str,
    },
}

fn split_quantity(text: &str) -> Result<(f64, String), QuantityError> {
    let caps = QUANTITY_PATTERN
        .captures(text)
        .ok_or_else(|| QuantityError::Malformed(text.to_string()))?;
    let value: f64 = caps[1]
        .parse()
        .map_err(|_| QuantityError::Malformed(text.to_string()))?;
    Ok((value, caps[2].to_string()))
}

fn scale(text: &str, unit: &str, kind: &'static str, table: &[(&str, f64)]) -> Result<f64, QuantityError> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(unit))
        .map(|(_, factor)| *factor)
        .ok_or_else(|| QuantityError::WrongUnit {
            text: text.to_string(),
            unit: unit.to_string(),
            kind,
        })
}

/// Parse a frequency such as `2MHz` or `230.1GHz` into Hz.
pub fn parse_frequency_hz(text: &str) -> Result<f64, QuantityError> {
    let (value, unit) = split_quantity(text)?;
    let factor = scale(
        text,
        &unit,
        "frequency",
        &[("Hz", 1.0), ("kHz", 1e3), ("MHz", 1e6), ("GHz", 1e9)],
    )?;
    Ok(value * factor)
}

/// Parse an angle such as `0.1arcsec` into arcseconds.
pub fn parse_angle_arcsec(text: &str) -> Result<f64, QuantityError> {
    let (value, unit) = split_quantity(text)?;
    let factor = scale(
        text,
        &unit,
        "angle",
        &[
            ("arcsec", 1.0),
            ("arcmin", 60.0),
            ("deg", 3600.0),
            ("rad", 206_264.806_247_096_36),
        ],
    )?;
    Ok(value * factor)
}

/// Format a number the way C's `%.3g` does: three significant digits,
/// trailing zeros removed, scientific notation outside `[1e-4, 1e3)`.
pub fn format_sig3(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }

    let exponent = value.abs().log10().floor() as i32;
    if !(-4..3).contains(&exponent) {
        let formatted = format!("{:.2e}", value);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = trim_fraction(mantissa);
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (2 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// A cleaning threshold: a flux density that always travels as `value+unit` text.
///
/// The text given by the user (`"2.0mJy"`) is preserved verbatim so it can be
/// handed back to the imaging engine unchanged; comparisons use the value in Jy.
#[derive(Debug, Clone)]
pub struct Threshold {
    jy: f64,
    text: String,
}

impl Threshold {
    /// Parse a threshold such as `1.2mJy`, `0.0mJy` or `3e-4Jy`.
    pub fn parse(text: &str) -> Result<Self, QuantityError> {
        let (value, unit) = split_quantity(text)?;
        let factor = scale(
            text,
            &unit,
            "flux density",
            &[("Jy", 1.0), ("mJy", 1e-3), ("uJy", 1e-6), ("nJy", 1e-9)],
        )?;
        Ok(Self {
            jy: value * factor,
            text: text.trim().to_string(),
        })
    }

    /// Build a threshold from a value in Jy, formatted as `%.3gJy`.
    pub fn from_jy(jy: f64) -> Self {
        Self {
            jy,
            text: format!("{}Jy", format_sig3(jy)),
        }
    }

    /// The threshold used for the dirty image pass.
    pub fn zero() -> Self {
        Self {
            jy: 0.0,
            text: "0.0mJy".to_string(),
        }
    }

    pub fn jy(&self) -> f64 {
        self.jy
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The larger of two thresholds; ties keep `self`.
    pub fn max(self, other: Threshold) -> Threshold {
        if other.jy > self.jy { other } else { self }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Threshold {
    fn eq(&self, other: &Self) -> bool {
        self.jy == other.jy
    }
}

impl PartialOrd for Threshold {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.jy.partial_cmp(&other.jy)
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Threshold::parse(&text).map_err(serde::de::Error::custom)
    }
}
