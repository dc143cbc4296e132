//! Platform resource quantities (`"250m"`, `"1.5"`, `"512Mi"`, `"1e3"`).
//!
//! Only the shape of a quantity is checked and its magnitude computed; the author's spelling is
//! kept for output so a manifest round-trips unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$', got '{0}'"
)]
pub struct QuantityError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    text: String,
    value: f64,
}

impl Quantity {
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let text = input.trim();
        let err = || QuantityError(input.to_string());
        if text.is_empty() {
            return Err(err());
        }

        let (sign, unsigned) = match text.as_bytes()[0] {
            b'+' => (1.0, &text[1..]),
            b'-' => (-1.0, &text[1..]),
            _ => (1.0, text),
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);
        if !number.bytes().any(|b| b.is_ascii_digit()) || number.matches('.').count() > 1 {
            return Err(err());
        }
        let magnitude: f64 = number.parse().map_err(|_| err())?;
        let multiplier = suffix_multiplier(suffix).ok_or_else(err)?;

        Ok(Self {
            text: text.to_string(),
            value: sign * magnitude * multiplier,
        })
    }

    /// Whole millicores, the unit CPU recommendations are rendered in.
    pub fn from_millis(millis: u64) -> Self {
        Self {
            text: format!("{millis}m"),
            value: millis as f64 / 1_000.0,
        }
    }

    /// Whole mebibytes, the unit memory recommendations are rendered in.
    pub fn from_mebibytes(mebibytes: u64) -> Self {
        Self {
            text: format!("{mebibytes}Mi"),
            value: mebibytes as f64 * 1_048_576.0,
        }
    }

    pub fn zero() -> Self {
        Self {
            text: "0".to_string(),
            value: 0.0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    /// Magnitude in base units (cores, bytes).
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// True when `text` is empty or parses to a zero quantity. Unparseable text is not "missing".
pub fn is_missing(text: &str) -> bool {
    if text.trim().is_empty() {
        return true;
    }
    Quantity::parse(text).map(|q| q.is_zero()).unwrap_or(false)
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let binary = |power: i32| Some(1024f64.powi(power));
    let decimal = |power: i32| Some(10f64.powi(power));
    match suffix {
        "" => decimal(0),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        _ => {
            let exponent = suffix.strip_prefix(['e', 'E'])?;
            let digits = exponent.trim_start_matches(['+', '-']);
            if digits.is_empty()
                || exponent.len() - digits.len() > 1
                || !digits.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            decimal(exponent.parse().ok()?)
        }
    }
}
