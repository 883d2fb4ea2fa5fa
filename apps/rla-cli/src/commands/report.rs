// report.rs — Audit-level commands: status, list, finalize.

use rla_audit::AuditSession;

use crate::commands::{describe, load_session, open_store};
use crate::config::CliConfig;

pub fn status(config: &CliConfig, id: &str, json: bool) -> anyhow::Result<()> {
    let (_, session) = load_session(config, id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
        return Ok(());
    }

    let audit = session.config();
    println!("Audit:    {}", session.id());
    println!("Type:     {:?}", audit.audit_type);
    println!("Seed:     {}", audit.seed);
    println!("Risk:     {}", audit.risk_limit);
    println!("Phase:    {}", session.phase());
    println!("Created:  {}", session.created_at().to_rfc3339());
    println!("Rounds:   {}", session.rounds().len());
    println!(
        "Sampled:  {} card(s), {} hand record(s), {} pending",
        session.sampled_count(),
        session.mvr_count(),
        session.pending_units().len()
    );
    println!();
    print_decisions(&session);
    Ok(())
}

pub fn list(config: &CliConfig) -> anyhow::Result<()> {
    let snapshots = open_store(config)?.list()?;
    if snapshots.is_empty() {
        println!("No audits found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<10} {:>6} {:>8} SAVED",
        "ID", "PHASE", "ROUNDS", "CARDS"
    );
    println!("{}", "-".repeat(86));
    for s in &snapshots {
        println!(
            "{:<38} {:<10} {:>6} {:>8} {}",
            s.audit_id,
            s.phase.to_string(),
            s.rounds.len(),
            s.cards.len(),
            s.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} audit(s) total.", snapshots.len());
    Ok(())
}

pub fn finalize(config: &CliConfig, id: &str) -> anyhow::Result<()> {
    let (store, mut session) = load_session(config, id)?;
    let summary = session.finalize()?;
    store.save(&session.snapshot())?;

    println!("Audit finalized: {}", summary.audit_id);
    println!(
        "Rounds: {}, cards sampled: {}",
        summary.rounds, summary.total_sampled
    );
    println!();
    println!("{:<6} {:<24} {:>8} {:<20} DECISION", "ID", "CONTEST", "SAMPLES", "STATUS");
    println!("{}", "-".repeat(80));
    for outcome in &summary.contests {
        println!(
            "{:<6} {:<24} {:>8} {:<20} {}",
            outcome.contest_id,
            outcome.name,
            outcome.samples,
            outcome.test_status.to_string(),
            describe(outcome.decision)
        );
    }
    let hand_counts: Vec<String> = summary
        .hand_counts()
        .map(|c| c.contest_id.to_string())
        .collect();
    if !hand_counts.is_empty() {
        println!();
        println!("Full hand count required for contest(s): {}", hand_counts.join(", "));
    }
    Ok(())
}

fn print_decisions(session: &AuditSession) {
    let Some(round) = session.current_round() else {
        println!("No rounds yet. Next: rla round start {}", session.id());
        return;
    };
    println!("Round {}:", round.round_idx);
    println!("{:<6} {:<24} {:>8} {:<20} DECISION", "ID", "CONTEST", "SAMPLES", "STATUS");
    println!("{}", "-".repeat(80));
    for (contest_id, decision) in session.decisions() {
        let Some(cr) = session.contest_round(contest_id) else {
            continue;
        };
        println!(
            "{:<6} {:<24} {:>8} {:<20} {}",
            contest_id,
            cr.name,
            cr.sample_total,
            cr.test_status.to_string(),
            describe(decision)
        );
    }
}
