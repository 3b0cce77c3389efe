use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One OHLCV bar plus whatever derived columns were loaded with it
///
/// OHLCV fields are immutable once ingestion has written them; the engine
/// only ever rewrites the derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Epoch seconds, unique within a table
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    /// Derived metric columns present on the row (None = SQL NULL)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub derived: BTreeMap<String, Option<f64>>,
}

impl Candle {
    /// Create a bare OHLCV candle
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            derived: BTreeMap::new(),
        }
    }

    /// Stored value of a derived column, None when absent or NULL
    pub fn metric(&self, column: &str) -> Option<f64> {
        self.derived.get(column).copied().flatten()
    }
}

/// Column-major block of computed metrics aligned with a candle slice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricFrame {
    columns: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
    len: usize,
}

impl MetricFrame {
    pub fn new(len: usize) -> Self {
        Self {
            columns: Vec::new(),
            values: Vec::new(),
            len,
        }
    }

    /// Append a column; its length must match the frame
    pub fn push(&mut self, column: impl Into<String>, values: Vec<Option<f64>>) {
        debug_assert_eq!(values.len(), self.len, "metric column length mismatch");
        self.columns.push(column.into());
        self.values.push(values);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
    }

    /// Values of every column at row `index`, in column order
    pub fn row(&self, index: usize) -> Vec<Option<f64>> {
        self.values.iter().map(|col| col[index]).collect()
    }
}

/// Values to write for one row, aligned with the batch's column list
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub timestamp: i64,
    pub values: Vec<Option<f64>>,
}
