// init.rs — Create an audit from its published inputs.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use rla_audit::{AuditConfig, AuditSession, ContestInput, JsonLinesCvrSource};

use crate::commands::{attach_journal, open_store};
use crate::config::CliConfig;

#[derive(Args)]
pub struct InitArgs {
    /// Audit config (TOML).
    #[arg(long)]
    pub config: PathBuf,
    /// Reported contest results (JSON array).
    #[arg(long)]
    pub contests: PathBuf,
    /// Cast vote records, one JSON object per line.
    #[arg(long)]
    pub cvrs: PathBuf,
}

pub fn execute(args: &InitArgs, config: &CliConfig) -> anyhow::Result<()> {
    let session = create(args, config)?;
    let audit_id = session.id();

    println!("Audit created: {}", audit_id);
    println!(
        "Cards:   {} ({} phantom)",
        session.registry().len(),
        session.registry().nphantoms()
    );
    println!();
    println!("{:<6} {:<28} {:<10} STATUS", "ID", "CONTEST", "MARGIN");
    println!("{}", "-".repeat(64));
    for contest in session.contests() {
        let margin = contest
            .min_margin()
            .map(|m| format!("{:.4}", m))
            .unwrap_or_else(|| "-".to_string());
        let status = if contest.is_audited() {
            "audited".to_string()
        } else {
            format!("not audited ({})", contest.pre_audit)
        };
        println!(
            "{:<6} {:<28} {:<10} {}",
            contest.id(),
            truncate(contest.contest.name(), 28),
            margin,
            status
        );
    }
    println!();
    println!("Next: rla round start {}", audit_id);
    Ok(())
}

/// Build, journal and save a new audit.
pub(crate) fn create(args: &InitArgs, config: &CliConfig) -> anyhow::Result<AuditSession> {
    let audit_config = AuditConfig::load(&args.config)?;
    let contests: Vec<ContestInput> = serde_json::from_str(&fs::read_to_string(&args.contests)?)?;
    let source = JsonLinesCvrSource::new(args.cvrs.clone());

    let mut session = AuditSession::create(audit_config, &contests, &source)?;
    attach_journal(config, &mut session)?;
    open_store(config)?.save(&session.snapshot())?;
    Ok(session)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 3).collect();
        format!("{}...", cut)
    }
}
