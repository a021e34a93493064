use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read from `SPOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Prometheus exporter port; no exporter when unset.
    pub metrics_port: Option<u16>,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            var(key).and_then(|s| s.parse().ok())
        }
        Self {
            bind: var("SPOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&var, "SPOTBOOK_PORT").unwrap_or(8000),
            data_dir: var("SPOTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            metrics_port: parsed(&var, "SPOTBOOK_METRICS_PORT"),
            compact_threshold: parsed(&var, "SPOTBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            compact_interval: Duration::from_secs(parsed(&var, "SPOTBOOK_COMPACT_INTERVAL_SECS").unwrap_or(30)),
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".into()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("catalog.wal")
    }
}
