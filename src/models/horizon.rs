use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Look-back duration used by momentum and range metrics
///
/// The label is kept verbatim because it becomes the column suffix
/// (`move_1h`, `range_60m`), so "60m" and "1h" are distinct horizons even
/// though they span the same number of minutes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Horizon {
    pub label: String,
    pub minutes: u32,
}

impl Horizon {
    /// Parse a label like "15m", "2h" or "1d"
    pub fn parse(label: &str) -> Result<Self, AppError> {
        let label = label.trim();
        let invalid = || {
            AppError::InvalidHorizon(format!(
                "'{}' (expected <count><m|h|d>, e.g. 15m, 2h, 1d)",
                label
            ))
        };

        if label.len() < 2 || !label.is_ascii() {
            return Err(invalid());
        }

        let (count, unit) = label.split_at(label.len() - 1);
        // u32::from_str accepts a leading '+', which is not a valid column suffix
        if !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let count: u32 = count.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }

        let per_unit = match unit {
            "m" => 1,
            "h" => 60,
            "d" => 1440,
            _ => return Err(invalid()),
        };

        let minutes = count.checked_mul(per_unit).ok_or_else(invalid)?;
        Ok(Self {
            label: label.to_string(),
            minutes,
        })
    }

    /// Parse a comma-separated list, rejecting duplicate labels
    pub fn parse_list(s: &str) -> Result<Vec<Self>, AppError> {
        let mut horizons: Vec<Horizon> = Vec::new();
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            let horizon = Self::parse(part)?;
            if horizons.iter().any(|h| h.label == horizon.label) {
                return Err(AppError::InvalidHorizon(format!(
                    "duplicate horizon '{}'",
                    horizon.label
                )));
            }
            horizons.push(horizon);
        }
        Ok(horizons)
    }

    /// Default momentum horizons: 1h, 2h, 1d
    pub fn default_movement() -> Vec<Self> {
        Self::from_table(&[("1h", 60), ("2h", 120), ("1d", 1440)])
    }

    /// Default range horizons: 15m, 60m, 2h, 1d
    pub fn default_range() -> Vec<Self> {
        Self::from_table(&[("15m", 15), ("60m", 60), ("2h", 120), ("1d", 1440)])
    }

    fn from_table(table: &[(&str, u32)]) -> Vec<Self> {
        table
            .iter()
            .map(|(label, minutes)| Self {
                label: label.to_string(),
                minutes: *minutes,
            })
            .collect()
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}
