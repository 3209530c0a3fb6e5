mod indexer;

pub use indexer::{ConfigError, IndexerConfig};
