pub mod cardinality;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod flow;
pub mod graph;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod retention;
pub mod scan;
pub mod serializer;
pub mod stats;
pub mod store;

#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

use cardinality::CardinalityGuard;
use config::CoreConfig;
use serializer::Serializer;
use stats::ProcessStats;
use store::kv::Kv;
use store::IndexStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<IndexStore>,
    pub kv: Arc<Kv>,
    pub guard: Arc<CardinalityGuard>,
    pub config: Arc<CoreConfig>,
    pub process: Arc<ProcessStats>,
}

impl AppState {
    pub fn new(config: CoreConfig) -> Self {
        let kv = Arc::new(Kv::new());
        let ser = Serializer::new(config.compression_min_bytes, config.zstd_level);
        let store = Arc::new(IndexStore::new(kv.clone(), ser, config.record_ttl_s));
        let guard = Arc::new(CardinalityGuard::new(
            kv.clone(),
            config.max_metric_name_cardinality,
            config.record_ttl_s,
        ));
        Self {
            store,
            kv,
            guard,
            config: Arc::new(config),
            process: Arc::new(ProcessStats::new()),
        }
    }
}
