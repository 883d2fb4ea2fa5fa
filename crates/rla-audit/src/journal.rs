// journal.rs — Append-only, hash-chained record of audit rounds.
//
// One JSON object per line. Each entry stores the SHA-256 of the previous
// line in `previous_hash`, so inserting, deleting or editing an entry breaks
// the chain and `verify_chain` reports the first bad line. Observers can
// replay the audit's public steps (seed, cutoffs, selected cards, outcomes)
// from the journal alone.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuditError;
use crate::prn;
use crate::round::ContestDecision;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    AuditCreated {
        seed: String,
        ncards: usize,
        nphantoms: usize,
        contests: Vec<u32>,
    },
    RoundStarted {
        round_idx: u32,
        cutoff_prn: Option<u64>,
        new_units: Vec<String>,
    },
    RoundAudited {
        round_idx: u32,
        decisions: Vec<(u32, ContestDecision)>,
        not_found: usize,
    },
    AuditFinalized {
        rounds: u32,
        decisions: Vec<(u32, ContestDecision)>,
    },
}

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub audit_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
    /// Hash of the previous line, `None` for the first.
    pub previous_hash: Option<String>,
}

impl JournalEntry {
    pub fn new(audit_id: Uuid, event: JournalEvent) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            audit_id,
            timestamp: Utc::now(),
            event,
            previous_hash: None,
        }
    }
}

/// Writer for one audit's journal file.
///
/// Writes go through a `BufWriter` and are flushed after every entry, so a
/// crash loses at most the entry being written.
pub struct RoundJournal {
    writer: BufWriter<File>,
    path: PathBuf,
    last_hash: Option<String>,
}

impl RoundJournal {
    /// Open or create a journal, picking up the chain where it left off.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let last_hash = if path.exists() {
            read_last_hash(&path)?
        } else {
            None
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::IoError {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            last_hash,
        })
    }

    pub fn append(&mut self, entry: &mut JournalEntry) -> Result<(), AuditError> {
        entry.previous_hash = self.last_hash.clone();
        let json = serde_json::to_string(entry)?;
        // Hash the exact bytes written; re-serializing could reorder fields.
        self.last_hash = Some(prn::hash_str(&json));
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn record(&mut self, audit_id: Uuid, event: JournalEvent) -> Result<(), AuditError> {
        self.append(&mut JournalEntry::new(audit_id, event))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.last_hash.is_none()
    }

    /// All entries, oldest first.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>, AuditError> {
        lines(path.as_ref())?
            .into_iter()
            .map(|(_, line)| Ok(serde_json::from_str(&line)?))
            .collect()
    }

    /// Check every link of the hash chain. Returns the number of entries.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let mut previous: Option<String> = None;
        let mut count = 0;
        for (line_num, line) in lines(path.as_ref())? {
            let entry: JournalEntry = serde_json::from_str(&line)?;
            if entry.previous_hash != previous {
                return Err(AuditError::IntegrityViolation {
                    line: line_num,
                    expected: previous.unwrap_or_else(|| "None".to_string()),
                    actual: entry.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }
            previous = Some(prn::hash_str(&line));
            count += 1;
        }
        Ok(count)
    }
}

/// Non-blank lines with their 1-based line numbers.
fn lines(path: &Path) -> Result<Vec<(usize, String)>, AuditError> {
    let file = File::open(path).map_err(|source| AuditError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            out.push((i + 1, line));
        }
    }
    Ok(out)
}

fn read_last_hash(path: &Path) -> Result<Option<String>, AuditError> {
    Ok(lines(path)?.last().map(|(_, line)| prn::hash_str(line)))
}
