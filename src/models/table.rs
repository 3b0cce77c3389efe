use super::Timeframe;
use crate::constants::TABLE_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One candle table: a single symbol at a single timeframe
///
/// Tables are named `candles_{SYMBOL}_{TF}`, e.g. `candles_EURUSD_M15`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl TableId {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// Parse a table name; returns None for tables outside the naming scheme
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(TABLE_PREFIX)?;
        let (symbol, suffix) = rest.rsplit_once('_')?;
        let timeframe = Timeframe::from_suffix(suffix)?;

        if symbol.is_empty() || !is_identifier(symbol) {
            return None;
        }

        Some(Self::new(symbol, timeframe))
    }

    /// Full table name
    pub fn name(&self) -> String {
        format!("{}{}_{}", TABLE_PREFIX, self.symbol, self.timeframe.suffix())
    }

    /// The D1 table the intraday table inherits its baseline from
    pub fn daily_sibling(&self) -> TableId {
        Self::new(self.symbol.clone(), Timeframe::Day1)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// True when `s` is safe to splice into SQL as a quoted identifier
pub fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_name() {
        let table = TableId::parse("candles_EURUSD_M15").unwrap();
        assert_eq!(table.symbol, "EURUSD");
        assert_eq!(table.timeframe, Timeframe::Minute15);
        assert_eq!(table.name(), "candles_EURUSD_M15");
    }

    #[test]
    fn test_parse_symbol_with_underscore() {
        let table = TableId::parse("candles_BTC_USD_H4").unwrap();
        assert_eq!(table.symbol, "BTC_USD");
        assert_eq!(table.timeframe, Timeframe::Hour4);
    }

    #[test]
    fn test_parse_rejects_foreign_tables() {
        assert!(TableId::parse("trades").is_none());
        assert!(TableId::parse("candles_EURUSD_W1").is_none());
        assert!(TableId::parse("candles__D1").is_none());
        assert!(TableId::parse("candles_EUR-USD_D1").is_none());
    }

    #[test]
    fn test_daily_sibling() {
        let table = TableId::new("GBPJPY", Timeframe::Minute5);
        assert_eq!(table.daily_sibling().name(), "candles_GBPJPY_D1");
    }
}
