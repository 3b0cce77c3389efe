use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_DATABASE_PATH, DEFAULT_WORKERS};
use std::path::PathBuf;

/// Get database path from environment variable or use default
pub fn get_database_path() -> PathBuf {
    std::env::var("OHLCV_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH))
}

/// Get worker pool size from environment variable or use default
pub fn get_worker_count() -> usize {
    parse_positive_env("ENRICH_WORKERS").unwrap_or(DEFAULT_WORKERS)
}

/// Get batch size (rows per transaction) from environment variable or use default
pub fn get_batch_size() -> usize {
    parse_positive_env("ENRICH_BATCH_SIZE").unwrap_or(DEFAULT_BATCH_SIZE)
}

fn parse_positive_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

/// Format a count with thousands separators
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, c);
    }
    result
}
