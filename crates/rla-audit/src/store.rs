// store.rs — SnapshotStore: persistence for audit sessions.
//
// Each audit is stored as `<store_dir>/<audit_id>.json`, overwritten after
// every step. A snapshot carries everything needed to resume: config,
// contests, every card with its sample number, and the full round history
// including each assertion's risk state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rla_core::Mvr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::card::Card;
use crate::config::AuditConfig;
use crate::contest::ContestUnderAudit;
use crate::error::AuditError;
use crate::round::AuditRound;
use crate::session::AuditPhase;

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    pub version: u32,
    pub audit_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    pub phase: AuditPhase,
    pub config: AuditConfig,
    pub contests: Vec<ContestUnderAudit>,
    pub cards: Vec<Card>,
    pub rounds: Vec<AuditRound>,
    /// Hand records received so far, by card id.
    #[serde(default)]
    pub mvrs: BTreeMap<String, Mvr>,
}

/// One JSON file per audit.
pub struct SnapshotStore {
    store_dir: PathBuf,
}

impl SnapshotStore {
    /// Open a store, creating the directory if needed.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        fs::create_dir_all(&store_dir).map_err(|source| AuditError::IoError {
            path: store_dir.clone(),
            source,
        })?;
        Ok(Self { store_dir })
    }

    pub fn save(&self, snapshot: &AuditSnapshot) -> Result<(), AuditError> {
        let path = self.snapshot_file(snapshot.audit_id);
        let json = serde_json::to_string_pretty(snapshot)?;
        // Write then rename so a crash never leaves a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| AuditError::IoError {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| AuditError::IoError {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(audit_id = %snapshot.audit_id, path = %path.display(), "saved snapshot");
        Ok(())
    }

    pub fn get(&self, audit_id: Uuid) -> Result<Option<AuditSnapshot>, AuditError> {
        let path = self.snapshot_file(audit_id);
        if !path.exists() {
            return Ok(None);
        }
        read_snapshot(&path).map(Some)
    }

    /// Like `get`, but a missing audit is an error.
    pub fn load(&self, audit_id: Uuid) -> Result<AuditSnapshot, AuditError> {
        self.get(audit_id)?.ok_or(AuditError::NotFound(audit_id))
    }

    /// All snapshots, most recently saved first.
    pub fn list(&self) -> Result<Vec<AuditSnapshot>, AuditError> {
        let entries = fs::read_dir(&self.store_dir).map_err(|source| AuditError::IoError {
            path: self.store_dir.clone(),
            source,
        })?;
        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                snapshots.push(read_snapshot(&path)?);
            }
        }
        snapshots.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(snapshots)
    }

    /// Returns true if the audit existed.
    pub fn delete(&self, audit_id: Uuid) -> Result<bool, AuditError> {
        let path = self.snapshot_file(audit_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| AuditError::IoError { path, source })?;
        Ok(true)
    }

    pub fn dir(&self) -> &Path {
        &self.store_dir
    }

    fn snapshot_file(&self, audit_id: Uuid) -> PathBuf {
        self.store_dir.join(format!("{}.json", audit_id))
    }
}

fn read_snapshot(path: &Path) -> Result<AuditSnapshot, AuditError> {
    let json = fs::read_to_string(path).map_err(|source| AuditError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    // Check the version before the layout, so an old file reports why it
    // cannot be read instead of a field error.
    let value: serde_json::Value = serde_json::from_str(&json)?;
    let found = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;
    if found != SNAPSHOT_VERSION {
        return Err(AuditError::SnapshotVersion {
            found,
            supported: SNAPSHOT_VERSION,
        });
    }
    Ok(serde_json::from_value(value)?)
}
