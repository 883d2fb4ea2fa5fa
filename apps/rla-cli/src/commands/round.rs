// round.rs — Round subcommands: start, pending, run.

use std::fs;
use std::path::PathBuf;

use clap::Subcommand;
use rla_audit::{read_json_lines, AuditRound, MapMvrCollector};

use crate::commands::{describe, load_session};
use crate::config::CliConfig;

#[derive(Subcommand)]
pub enum RoundCommands {
    /// Estimate sample sizes and draw the next round's cards.
    Start {
        /// Audit ID.
        id: String,
        /// Also write the card IDs to pull, one per line.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List sampled cards that still need a hand record.
    Pending {
        /// Audit ID.
        id: String,
    },
    /// Audit the current round against hand records.
    Run {
        /// Audit ID.
        id: String,
        /// Hand records, one JSON object per line, keyed by card ID.
        #[arg(long)]
        mvrs: PathBuf,
    },
}

pub fn execute(cmd: &RoundCommands, config: &CliConfig) -> anyhow::Result<()> {
    match cmd {
        RoundCommands::Start { id, out } => {
            let (store, mut session) = load_session(config, id)?;
            let round = session.start_round()?;
            print_estimates(round);
            store.save(&session.snapshot())?;

            let pending = session.pending_units();
            println!();
            println!(
                "Round {}: {} card(s) to pull, {} sampled in total.",
                session.rounds().len(),
                pending.len(),
                session.sampled_count()
            );
            if let Some(path) = out {
                let mut lines = pending.join("\n");
                lines.push('\n');
                fs::write(path, lines)?;
                println!("Card list written to {}", path.display());
            }
        }

        RoundCommands::Pending { id } => {
            let (_, session) = load_session(config, id)?;
            let pending = session.pending_units();
            if pending.is_empty() {
                println!("No cards pending.");
                return Ok(());
            }
            for card in pending {
                println!("{}", card);
            }
        }

        RoundCommands::Run { id, mvrs } => {
            let (store, mut session) = load_session(config, id)?;
            let mut collector = MapMvrCollector::new(read_json_lines(mvrs)?);
            tracing::info!(records = collector.len(), path = %mvrs.display(), "loaded hand records");
            let round = session.run_round(&mut collector)?;
            print_results(round);
            let complete = session.is_complete();
            store.save(&session.snapshot())?;

            println!();
            if complete {
                println!("Every contest has a decision. Next: rla finalize {}", id);
            } else {
                println!("Next: rla round start {}", id);
            }
        }
    }

    Ok(())
}

fn print_estimates(round: &AuditRound) {
    println!("{:<6} {:<24} {:>10} {:>10}", "ID", "CONTEST", "ESTIMATE", "MAX");
    println!("{}", "-".repeat(54));
    for cr in &round.contest_rounds {
        if cr.done() {
            continue;
        }
        println!(
            "{:<6} {:<24} {:>10} {:>10}",
            cr.contest_id, cr.name, cr.est_new_samples, cr.max_samples
        );
    }
}

fn print_results(round: &AuditRound) {
    println!("{:<6} {:<24} {:>8} {:<20} DECISION", "ID", "CONTEST", "SAMPLES", "STATUS");
    println!("{}", "-".repeat(80));
    for cr in &round.contest_rounds {
        println!(
            "{:<6} {:<24} {:>8} {:<20} {}",
            cr.contest_id,
            cr.name,
            cr.sample_total,
            cr.test_status.to_string(),
            describe(cr.decision())
        );
        for ar in &cr.assertions {
            if let Some(result) = &ar.result {
                println!(
                    "         {:<40} p={:.4} errors: {}",
                    ar.label, result.plast, result.errors
                );
            }
        }
    }
    let diagnostics = &round.diagnostics;
    if !diagnostics.not_found.is_empty() {
        println!();
        println!(
            "{} card(s) had no hand record and will be requested again:",
            diagnostics.not_found.len()
        );
        for card in &diagnostics.not_found {
            println!("  {}", card);
        }
    }
    if !diagnostics.missing_contest.is_empty() {
        println!();
        println!("Hand records missing a contest the card should hold:");
        for card in &diagnostics.missing_contest {
            println!("  {}", card);
        }
    }
}
