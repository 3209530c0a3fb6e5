use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::executor::{RetryPolicy, ShutdownMode};
use crate::exporters::ConflictPolicy;
use crate::types::DomainKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown domain kind '{0}' in required_output_types")]
    UnknownKind(String),

    #[error("unknown domain kind '{0}' in export conflict policy")]
    UnknownExportKind(String),

    #[error("provider_uri must not be empty")]
    EmptyProviderUri,
}

fn default_batch_size() -> usize {
    100
}

fn default_debug_batch_size() -> usize {
    1
}

fn default_max_workers() -> usize {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_mode() -> ShutdownMode {
    ShutdownMode::Graceful
}

fn default_blocks_per_cycle() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// Comma-separated JSON-RPC endpoint list; later entries are failover.
    pub provider_uri: String,
    /// Endpoint for debug/trace methods. Falls back to `provider_uri`.
    pub debug_provider_uri: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Trace endpoints tolerate far smaller batches than standard ones.
    #[serde(default = "default_debug_batch_size")]
    pub debug_batch_size: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_shutdown_mode")]
    pub shutdown_mode: ShutdownMode,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How many blocks one scheduling cycle covers.
    #[serde(default = "default_blocks_per_cycle")]
    pub blocks_per_cycle: u64,
    /// Domain kinds handed to the export sink at the end of each cycle.
    pub required_output_types: Vec<String>,
    /// Per-job user-defined options, keyed by job name.
    #[serde(default)]
    pub jobs: HashMap<String, serde_json::Value>,
    /// Per-kind conflict policy for the export sink.
    #[serde(default)]
    pub export_conflict_policy: HashMap<String, ConflictPolicy>,
}

impl IndexerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        let config: IndexerConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed configuration before any RPC traffic is issued.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_uri.trim().is_empty() {
            return Err(ConfigError::EmptyProviderUri);
        }
        self.required_kinds()?;
        for kind in self.export_conflict_policy.keys() {
            kind.parse::<DomainKind>()
                .map_err(|_| ConfigError::UnknownExportKind(kind.clone()))?;
        }
        Ok(())
    }

    pub fn required_kinds(&self) -> Result<Vec<DomainKind>, ConfigError> {
        self.required_output_types
            .iter()
            .map(|name| {
                name.parse::<DomainKind>()
                    .map_err(|_| ConfigError::UnknownKind(name.clone()))
            })
            .collect()
    }

    pub fn conflict_policies(&self) -> HashMap<DomainKind, ConflictPolicy> {
        self.export_conflict_policy
            .iter()
            .filter_map(|(name, policy)| {
                name.parse::<DomainKind>().ok().map(|kind| (kind, *policy))
            })
            .collect()
    }

    pub fn job_options(&self, job_name: &str) -> serde_json::Value {
        self.jobs
            .get(job_name)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn debug_provider_uri(&self) -> &str {
        self.debug_provider_uri
            .as_deref()
            .unwrap_or(&self.provider_uri)
    }
}
