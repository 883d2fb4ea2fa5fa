pub mod init;
pub mod journal;
pub mod report;
pub mod round;

use std::fs;

use rla_audit::{AuditSession, ContestDecision, RoundJournal, SnapshotStore};
use uuid::Uuid;

use crate::config::CliConfig;

pub(crate) fn open_store(config: &CliConfig) -> anyhow::Result<SnapshotStore> {
    Ok(SnapshotStore::new(&config.audits_dir)?)
}

/// Attach the audit's journal, creating the journal directory if needed.
pub(crate) fn attach_journal(config: &CliConfig, session: &mut AuditSession) -> anyhow::Result<()> {
    fs::create_dir_all(&config.journals_dir)?;
    let journal = RoundJournal::open(config.journal_path(session.id()))?;
    session.attach_journal(journal)?;
    Ok(())
}

/// Load an audit from its snapshot with its journal attached.
pub(crate) fn load_session(
    config: &CliConfig,
    id: &str,
) -> anyhow::Result<(SnapshotStore, AuditSession)> {
    let audit_id = Uuid::parse_str(id)?;
    let store = open_store(config)?;
    let mut session = AuditSession::from_snapshot(store.load(audit_id)?)?;
    attach_journal(config, &mut session)?;
    Ok((store, session))
}

pub(crate) fn describe(decision: ContestDecision) -> String {
    match decision {
        ContestDecision::Confirmed => "confirmed".to_string(),
        ContestDecision::Continue { next_target } => format!("continue ({} more)", next_target),
        ContestDecision::LimitExceeded => "full hand count".to_string(),
    }
}
