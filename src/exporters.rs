//! Export sink boundary.
//!
//! The pipeline hands each cycle's sorted records to one or more sinks. A
//! sink must be idempotent under primary-key conflict; the per-kind
//! `ConflictPolicy` says whether a conflicting row is ignored or updated.
//! Reorg-flagged records always supersede their originals.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{DomainKind, DomainRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the first row seen for an identity; ignore conflicts.
    DoNothing,
    /// Overwrite the stored row on conflict.
    Update,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export sink failure: {0}")]
    Sink(String),
}

#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn export(&self, records: &[DomainRecord]) -> Result<(), ExportError>;
}

/// Logs per-kind counts and each record as one JSON line. The default sink,
/// useful for dry runs and local debugging.
pub struct ConsoleExporter;

#[async_trait]
impl ExportSink for ConsoleExporter {
    async fn export(&self, records: &[DomainRecord]) -> Result<(), ExportError> {
        let mut counts: HashMap<DomainKind, usize> = HashMap::new();
        for record in records {
            *counts.entry(record.kind()).or_default() += 1;
        }
        let mut summary: Vec<(DomainKind, usize)> = counts.into_iter().collect();
        summary.sort();
        for (kind, count) in summary {
            tracing::info!(kind = %kind, count, "exporting records");
        }
        for record in records {
            match serde_json::to_string(record) {
                Ok(line) => tracing::info!(target: "export", "{line}"),
                Err(e) => return Err(ExportError::Sink(e.to_string())),
            }
        }
        Ok(())
    }
}

/// In-memory sink with real upsert semantics, for tests and replay
/// inspection.
pub struct MemoryExporter {
    policies: HashMap<DomainKind, ConflictPolicy>,
    rows: Mutex<HashMap<String, DomainRecord>>,
}

impl MemoryExporter {
    pub fn new(policies: HashMap<DomainKind, ConflictPolicy>) -> Self {
        Self {
            policies,
            rows: Mutex::new(HashMap::new()),
        }
    }

    fn policy_for(&self, kind: DomainKind) -> ConflictPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or(ConflictPolicy::DoNothing)
    }

    pub fn records(&self) -> Vec<DomainRecord> {
        let mut rows: Vec<(String, DomainRecord)> = self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, record)| record).collect()
    }

    pub fn records_of(&self, kind: DomainKind) -> Vec<DomainRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.kind() == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryExporter {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl ExportSink for MemoryExporter {
    async fn export(&self, records: &[DomainRecord]) -> Result<(), ExportError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            let key = record.identity();
            match rows.get(&key) {
                None => {
                    rows.insert(key, record.clone());
                }
                // Reorg supersession always wins, regardless of policy.
                Some(existing) if record.reorg() && !existing.reorg() => {
                    rows.insert(key, record.clone());
                }
                Some(_) => {
                    if self.policy_for(record.kind()) == ConflictPolicy::Update {
                        rows.insert(key, record.clone());
                    }
                }
            }
        }
        Ok(())
    }
}
