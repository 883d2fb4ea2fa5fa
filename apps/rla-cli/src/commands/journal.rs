// journal.rs — Journal subcommands: verify, tail.

use clap::Subcommand;
use rla_audit::{AuditError, JournalEvent, RoundJournal};
use uuid::Uuid;

use crate::commands::describe;
use crate::config::CliConfig;

#[derive(Subcommand)]
pub enum JournalCommands {
    /// Verify the journal's hash chain.
    Verify {
        /// Audit ID.
        id: String,
    },
    /// Show the most recent journal entries.
    Tail {
        /// Audit ID.
        id: String,
        /// Number of entries to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
}

pub fn execute(cmd: &JournalCommands, config: &CliConfig) -> anyhow::Result<()> {
    match cmd {
        JournalCommands::Verify { id } => {
            let path = config.journal_path(Uuid::parse_str(id)?);
            if !path.exists() {
                println!("No journal found at {}", path.display());
                return Ok(());
            }

            match RoundJournal::verify_chain(&path) {
                Ok(count) => {
                    println!("Journal verified: {} entry(ies), hash chain intact.", count);
                }
                Err(AuditError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {}:", line);
                    println!("  Expected previous_hash: {}", expected);
                    println!("  Actual previous_hash:   {}", actual);
                    println!();
                    println!("The journal may have been tampered with.");
                    anyhow::bail!("Journal integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        JournalCommands::Tail { id, n } => {
            let path = config.journal_path(Uuid::parse_str(id)?);
            if !path.exists() {
                println!("No journal found at {}", path.display());
                return Ok(());
            }

            let entries = RoundJournal::read_all(&path)?;
            let start = entries.len().saturating_sub(*n);
            let recent = &entries[start..];
            if recent.is_empty() {
                println!("No journal entries.");
                return Ok(());
            }

            println!("{:<20} {:<16} DETAIL", "TIMESTAMP", "EVENT");
            println!("{}", "-".repeat(80));
            for entry in recent {
                let (event, detail) = summarize(&entry.event);
                println!(
                    "{:<20} {:<16} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event,
                    detail
                );
            }
        }
    }

    Ok(())
}

fn summarize(event: &JournalEvent) -> (&'static str, String) {
    match event {
        JournalEvent::AuditCreated {
            seed,
            ncards,
            nphantoms,
            contests,
        } => (
            "created",
            format!(
                "seed {}, {} cards ({} phantom), {} contest(s)",
                seed,
                ncards,
                nphantoms,
                contests.len()
            ),
        ),
        JournalEvent::RoundStarted {
            round_idx,
            cutoff_prn,
            new_units,
        } => (
            "round_started",
            format!(
                "round {}, {} new card(s), cutoff {}",
                round_idx,
                new_units.len(),
                cutoff_prn.map_or_else(|| "-".to_string(), |p| p.to_string())
            ),
        ),
        JournalEvent::RoundAudited {
            round_idx,
            decisions,
            not_found,
        } => (
            "round_audited",
            format!(
                "round {}, {} not found, {}",
                round_idx,
                not_found,
                decision_list(decisions)
            ),
        ),
        JournalEvent::AuditFinalized { rounds, decisions } => (
            "finalized",
            format!("{} round(s), {}", rounds, decision_list(decisions)),
        ),
    }
}

fn decision_list(decisions: &[(u32, rla_audit::ContestDecision)]) -> String {
    decisions
        .iter()
        .map(|(id, d)| format!("{}: {}", id, describe(*d)))
        .collect::<Vec<_>>()
        .join("; ")
}
