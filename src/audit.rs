//! Append-only audit trail for mutating operations and face searches.
//!
//! Entries land in `audit.csv` under the data directory. Recording is
//! best-effort: a failed audit write is logged and swallowed, it must never
//! fail the operation being audited.

use crate::eid::Eid;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const AUDIT_FILE: &str = "audit.csv";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Eid,
    /// Dotted action name, e.g. `person.create`, `person.search_by_face`
    pub action: String,
    pub entity: String,
    // no skip_serializing_if: CSV rows need a fixed column set
    pub entity_id: Option<u64>,
    pub user_id: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub user_id: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(base_path: &str) -> Self {
        Self {
            path: PathBuf::from(base_path).join(AUDIT_FILE),
        }
    }

    /// Record one entry. Errors are logged, never returned.
    pub fn record(&self, action: &str, entity: &str, entity_id: Option<u64>, user_id: u64) {
        let entry = AuditEntry {
            id: Eid::new(),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id,
            user_id,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        if let Err(err) = self.append(&entry) {
            log::error!("failed to record audit entry {action}: {err}");
        }
    }

    fn append(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let write_headers = !self.path.exists();

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_headers)
            .from_writer(file);

        writer.serialize(entry)?;
        writer.flush()?;

        Ok(())
    }

    /// Entries newest first, optionally filtered by action and/or user.
    pub fn list(&self, query: AuditQuery) -> anyhow::Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut entries = Vec::new();
        for record in reader.deserialize::<AuditEntry>() {
            match record {
                Ok(entry) => entries.push(entry),
                Err(err) => log::warn!("skipping malformed audit row: {err}"),
            }
        }

        if let Some(action) = &query.action {
            entries.retain(|e| &e.action == action);
        }
        if let Some(user_id) = query.user_id {
            entries.retain(|e| e.user_id == user_id);
        }

        entries.reverse();

        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }
}
