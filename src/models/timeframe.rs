use serde::{Deserialize, Serialize};
use std::fmt;

/// Bar resolution of a candle table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1-minute candles
    Minute1,
    /// 5-minute candles
    Minute5,
    /// 15-minute candles
    Minute15,
    /// 1-hour candles
    Hour1,
    /// 4-hour candles
    Hour4,
    /// Daily candles (baseline source)
    Day1,
}

impl Timeframe {
    /// Table-name suffix ("M1", "M5", "M15", "H1", "H4", "D1")
    pub fn suffix(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "M1",
            Timeframe::Minute5 => "M5",
            Timeframe::Minute15 => "M15",
            Timeframe::Hour1 => "H1",
            Timeframe::Hour4 => "H4",
            Timeframe::Day1 => "D1",
        }
    }

    /// Bar duration in minutes
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute5 => 5,
            Timeframe::Minute15 => 15,
            Timeframe::Hour1 => 60,
            Timeframe::Hour4 => 240,
            Timeframe::Day1 => 1440,
        }
    }

    /// Parse a table-name suffix (case-insensitive)
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "M1" => Some(Timeframe::Minute1),
            "M5" => Some(Timeframe::Minute5),
            "M15" => Some(Timeframe::Minute15),
            "H1" => Some(Timeframe::Hour1),
            "H4" => Some(Timeframe::Hour4),
            "D1" => Some(Timeframe::Day1),
            _ => None,
        }
    }

    pub fn is_daily(&self) -> bool {
        matches!(self, Timeframe::Day1)
    }

    /// Get all available timeframes
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Minute1,
            Timeframe::Minute5,
            Timeframe::Minute15,
            Timeframe::Hour1,
            Timeframe::Hour4,
            Timeframe::Day1,
        ]
    }

    /// Parse multiple timeframes from comma-separated string or "all"
    pub fn parse_list(s: &str) -> Result<Vec<Self>, String> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }

        s.split(',')
            .map(|part| {
                Self::from_suffix(part.trim()).ok_or_else(|| {
                    format!(
                        "Invalid timeframe: {}. Valid options: M1, M5, M15, H1, H4, D1",
                        part.trim()
                    )
                })
            })
            .collect()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}
