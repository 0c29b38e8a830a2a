use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from `spyglass.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// TTL applied to every stored record and index key, in seconds.
    #[serde(default = "default_record_ttl_s")]
    pub record_ttl_s: u64,
    /// Ceiling on distinct metric-name identities; new names are dropped once hit.
    #[serde(default = "default_cardinality")]
    pub max_metric_name_cardinality: usize,
    /// Records whose msgpack form is larger than this are zstd-compressed.
    #[serde(default = "default_compression_min_bytes")]
    pub compression_min_bytes: usize,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
    /// TTL of the cached service graph / service catalog, in seconds.
    #[serde(default = "default_graph_cache_ttl_s")]
    pub service_graph_cache_ttl_s: u64,
    /// Server-enforced cap on per-request limits.
    #[serde(default = "default_query_max_limit")]
    pub query_max_limit: u64,
    /// Per-service latency reservoir size (Algorithm R).
    #[serde(default = "default_reservoir_size")]
    pub reservoir_size: usize,
    /// How often the TTL supervisor samples keys, in seconds.
    #[serde(default = "default_ttl_check_interval_s")]
    pub ttl_check_interval_s: u64,
    /// How many random keys each supervisor pass inspects.
    #[serde(default = "default_ttl_check_sample_size")]
    pub ttl_check_sample_size: usize,
    /// Upper bound on index entries one read may scan before returning a
    /// partial page with `has_more=true`.
    #[serde(default = "default_scan_budget")]
    pub scan_budget: usize,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for CoreConfig {
    fn default() -> Self {
        // serde fills every field from its default fn on an empty document
        toml::from_str("").expect("empty config must deserialize")
    }
}

fn default_record_ttl_s() -> u64 {
    1800
}

fn default_cardinality() -> usize {
    1000
}

fn default_compression_min_bytes() -> usize {
    512
}

fn default_zstd_level() -> i32 {
    3
}

fn default_graph_cache_ttl_s() -> u64 {
    5
}

fn default_query_max_limit() -> u64 {
    1000
}

fn default_reservoir_size() -> usize {
    2048
}

fn default_ttl_check_interval_s() -> u64 {
    60
}

fn default_ttl_check_sample_size() -> usize {
    64
}

fn default_scan_budget() -> usize {
    50_000
}

fn default_listen_port() -> u16 {
    4318
}

impl CoreConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: CoreConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Cardinality warning level for UI consumption: 70% yellow, 90% red.
    /// Exposed, never enforced here.
    pub fn cardinality_warn_level(&self, known: usize) -> &'static str {
        let ratio = known as f64 / self.max_metric_name_cardinality.max(1) as f64;
        if ratio >= 0.9 {
            "red"
        } else if ratio >= 0.7 {
            "yellow"
        } else {
            "ok"
        }
    }
}
