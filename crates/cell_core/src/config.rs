use crate::juice::{Juice, DEFAULT_LIMIT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings. Every field has a default, so partial JSON is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub juice_limit: Juice,
    pub max_depth: usize,
    pub resolve_timeout_ms: u64,
    pub signature_cache_entries: usize,
    /// Most cells a single preload may materialize.
    pub preload_cell_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            juice_limit: DEFAULT_LIMIT,
            max_depth: 256,
            resolve_timeout_ms: 5_000,
            signature_cache_entries: 10_000,
            preload_cell_limit: 100_000,
        }
    }
}

fn parsed_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl CoreConfig {
    /// Read `CELL_*` variables; unset or unparsable values keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`CoreConfig::from_env`] with variables supplied by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            juice_limit: parsed_or(lookup("CELL_JUICE_LIMIT"), d.juice_limit),
            max_depth: parsed_or(lookup("CELL_MAX_DEPTH"), d.max_depth),
            resolve_timeout_ms: parsed_or(lookup("CELL_RESOLVE_TIMEOUT_MS"), d.resolve_timeout_ms),
            signature_cache_entries: parsed_or(
                lookup("CELL_SIG_CACHE_ENTRIES"),
                d.signature_cache_entries,
            ),
            preload_cell_limit: parsed_or(lookup("CELL_PRELOAD_CELL_LIMIT"), d.preload_cell_limit),
        }
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}
