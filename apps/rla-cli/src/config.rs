// config.rs — On-disk layout of the CLI's data directory.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Where the CLI keeps its state.
///
/// ```text
/// <data_dir>/
///   audits/<audit_id>.json      snapshot, rewritten after every step
///   journals/<audit_id>.jsonl   hash-chained round journal
/// ```
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub audits_dir: PathBuf,
    pub journals_dir: PathBuf,
}

impl CliConfig {
    pub fn for_dir(data_dir: impl AsRef<Path>) -> Self {
        let root = data_dir.as_ref().to_path_buf();
        Self {
            audits_dir: root.join("audits"),
            journals_dir: root.join("journals"),
            data_dir: root,
        }
    }

    pub fn journal_path(&self, audit_id: Uuid) -> PathBuf {
        self.journals_dir.join(format!("{}.jsonl", audit_id))
    }
}
