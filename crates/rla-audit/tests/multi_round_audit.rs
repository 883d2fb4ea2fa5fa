// multi_round_audit.rs — End-to-end audits through persisted snapshots.
//
// Each step reloads the session from its snapshot, the way the command-line
// driver does between invocations:
//
//   1. Create the audit, save it, open the journal
//   2. Start a round: estimate, select cards, save
//   3. Reload, collect hand records (some missing in round 1), run, save
//   4. Repeat until every contest has a decision, then finalize
//
// VERIFY:
//   - every round's sample contains the previous one
//   - missing hand records are reported and picked up later
//   - confirmed and escalated contests are reported correctly
//   - the journal hash chain is intact and has one entry per step
//   - hand records load from a JSON-lines file

use std::collections::HashSet;

use rla_audit::{
    read_json_lines, AuditConfig, AuditSession, AuditType, ContestDecision, ContestInput,
    Estimator, JournalEvent, MapMvrCollector, RoundJournal, SnapshotStore, VecCvrSource,
};
use rla_core::{ContestInfo, Cvr, SocialChoice, TestStatus};
use tempfile::tempdir;

/// 3000 cards. Contest 1 (plurality) on every card, contest 2
/// (supermajority, two thirds) on the first 2000, contest 3 (a near tie) on
/// every card.
fn election() -> (Vec<ContestInput>, Vec<Cvr>) {
    let cvrs = (0..3000)
        .map(|i| {
            let cvr = Cvr::new(format!("b-{:05}", i))
                .with_votes(1, vec![if i % 5 < 3 { 0 } else { 1 }])
                .with_votes(3, vec![if i < 1510 { 7 } else { 8 }]);
            if i < 2000 {
                cvr.with_votes(2, vec![if i % 20 < 17 { 5 } else { 6 }])
            } else {
                cvr
            }
        })
        .collect();
    let contests = vec![
        ContestInput {
            info: ContestInfo::new(1, "Governor", vec![0, 1], SocialChoice::Plurality),
            votes: [(0, 1800), (1, 1200)].into_iter().collect(),
            nc: 3000,
            ncast: 3000,
            winners: None,
            assertions: Vec::new(),
        },
        ContestInput {
            info: ContestInfo::new(2, "Bond measure", vec![5, 6], SocialChoice::Supermajority)
                .with_min_fraction(2.0 / 3.0),
            votes: [(5, 1700), (6, 300)].into_iter().collect(),
            nc: 2000,
            ncast: 2000,
            winners: None,
            assertions: Vec::new(),
        },
        ContestInput {
            info: ContestInfo::new(3, "Dog catcher", vec![7, 8], SocialChoice::Plurality),
            votes: [(7, 1510), (8, 1490)].into_iter().collect(),
            nc: 3000,
            ncast: 3000,
            winners: None,
            assertions: Vec::new(),
        },
    ];
    (contests, cvrs)
}

fn sampled_ids(session: &AuditSession) -> HashSet<String> {
    session
        .registry()
        .sorted()
        .iter()
        .filter(|c| session.is_sampled(c.id()))
        .map(|c| c.id().to_string())
        .collect()
}

#[test]
fn polling_audit_across_restarts() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("audits")).unwrap();
    let journal_path = dir.path().join("journal.jsonl");

    let (contests, cvrs) = election();
    // The near tie is left out here; see `close_contest_escalates`.
    let contests: Vec<ContestInput> = contests.into_iter().filter(|c| c.info.id != 3).collect();
    let mut config = AuditConfig::new(AuditType::Polling, "3141592653589793");
    config.ntrials = 30;
    config.workers = 3;

    // =========================================================
    // SETUP
    // =========================================================
    let mut session =
        AuditSession::create(config, &contests, &VecCvrSource::new(cvrs.clone())).unwrap();
    session.attach_journal(RoundJournal::open(&journal_path).unwrap()).unwrap();
    let audit_id = session.id();
    store.save(&session.snapshot()).unwrap();
    drop(session);

    let mut previous_sample: HashSet<String> = HashSet::new();
    let mut rounds = 0;
    let mut withheld = None;

    loop {
        rounds += 1;
        assert!(rounds <= 8, "audit did not finish");

        // ── start round ──
        let mut session = AuditSession::from_snapshot(store.load(audit_id).unwrap()).unwrap();
        session.attach_journal(RoundJournal::open(&journal_path).unwrap()).unwrap();
        session.start_round().unwrap();
        let sample = sampled_ids(&session);
        assert!(sample.is_superset(&previous_sample), "round {} dropped cards", rounds);
        previous_sample = sample;
        store.save(&session.snapshot()).unwrap();
        drop(session);

        // ── collect hand records and run ──
        let mut session = AuditSession::from_snapshot(store.load(audit_id).unwrap()).unwrap();
        session.attach_journal(RoundJournal::open(&journal_path).unwrap()).unwrap();
        let pending = session.pending_units();
        if rounds == 1 {
            withheld = Some(pending[9].clone());
        }
        let mut collector = MapMvrCollector::new(
            cvrs.iter()
                .filter(|c| rounds > 1 || Some(&c.id) != withheld.as_ref())
                .cloned(),
        );
        let round = session.run_round(&mut collector).unwrap();
        if rounds == 1 {
            assert_eq!(round.diagnostics.not_found, vec![withheld.clone().unwrap()]);
            assert!(!round.is_complete());
        } else {
            assert!(round.diagnostics.not_found.is_empty());
        }
        store.save(&session.snapshot()).unwrap();
        if session.is_complete() {
            break;
        }
    }
    assert!(rounds >= 2);

    // =========================================================
    // FINALIZE
    // =========================================================
    let mut session = AuditSession::from_snapshot(store.load(audit_id).unwrap()).unwrap();
    session.attach_journal(RoundJournal::open(&journal_path).unwrap()).unwrap();
    let summary = session.finalize().unwrap();
    store.save(&session.snapshot()).unwrap();

    assert_eq!(summary.rounds, rounds);
    assert_eq!(summary.hand_counts().count(), 0);
    for outcome in &summary.contests {
        assert_eq!(outcome.decision, ContestDecision::Confirmed, "{:?}", outcome);
        assert!(outcome.test_status.is_success());
        assert!(outcome.samples > 0);
    }
    // The withheld card was audited once it turned up.
    let withheld = withheld.unwrap();
    assert!(session.pending_units().iter().all(|id| *id != withheld));

    // =========================================================
    // JOURNAL
    // =========================================================
    let entries = RoundJournal::read_all(&journal_path).unwrap();
    assert_eq!(entries.len(), 2 + 2 * rounds as usize);
    assert!(matches!(entries[0].event, JournalEvent::AuditCreated { .. }));
    assert!(matches!(entries[1].event, JournalEvent::RoundStarted { round_idx: 1, .. }));
    assert!(entries.iter().all(|e| e.audit_id == audit_id));
    assert_eq!(RoundJournal::verify_chain(&journal_path).unwrap(), entries.len());

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].audit_id, audit_id);
}

#[test]
fn close_contest_escalates() {
    let (mut contests, cvrs) = election();
    // A tied contest is excluded before sampling.
    contests.push(ContestInput {
        info: ContestInfo::new(4, "Tied", vec![20, 21], SocialChoice::Plurality),
        votes: [(20, 0), (21, 0)].into_iter().collect(),
        nc: 3000,
        ncast: 3000,
        winners: None,
        assertions: Vec::new(),
    });
    let cvrs: Vec<Cvr> = cvrs
        .into_iter()
        .map(|c| c.with_votes(4, Vec::new()))
        .collect();

    let mut config = AuditConfig::new(AuditType::Clca, "2718281828");
    config.max_samples = Some(250);
    config.ntrials = 20;
    config.workers = 2;
    let mut session =
        AuditSession::create(config, &contests, &VecCvrSource::new(cvrs.clone())).unwrap();
    let tied = session.contests().iter().find(|c| c.id() == 4).unwrap();
    assert!(!tied.is_audited());

    let mut collector = MapMvrCollector::new(cvrs);
    for _ in 0..6 {
        if session.is_complete() {
            break;
        }
        session.start_round().unwrap();
        session.run_round(&mut collector).unwrap();
    }
    assert!(session.is_complete());

    let close = session.contest_round(3).unwrap();
    assert!(close.sample_total <= 250);
    assert_eq!(close.decision(), ContestDecision::LimitExceeded);

    let summary = session.finalize().unwrap();
    let escalated: Vec<u32> = summary.hand_counts().map(|c| c.contest_id).collect();
    assert_eq!(escalated, vec![3, 4]);
    let tied = summary.contests.iter().find(|c| c.contest_id == 4).unwrap();
    assert!(matches!(tied.test_status, TestStatus::NoWinners | TestStatus::MinMargin));
    for id in [1, 2] {
        let c = summary.contests.iter().find(|c| c.contest_id == id).unwrap();
        assert_eq!(c.decision, ContestDecision::Confirmed);
    }
}

#[test]
fn closed_form_estimates_drive_comparison_rounds() {
    let (contests, cvrs) = election();
    let contests: Vec<ContestInput> = contests.into_iter().filter(|c| c.info.id == 1).collect();
    // Drop 30 CVRs so 30 phantoms stand in for them.
    let cvrs: Vec<Cvr> = cvrs.into_iter().skip(30).collect();

    let mut config = AuditConfig::new(AuditType::Clca, "1618033988");
    config.betting.estimator = Estimator::Corla;
    config.workers = 2;
    let mut session =
        AuditSession::create(config, &contests, &VecCvrSource::new(cvrs.clone())).unwrap();
    assert_eq!(session.registry().nphantoms(), 30);

    let mut collector = MapMvrCollector::new(cvrs);
    for _ in 0..5 {
        if session.is_complete() {
            break;
        }
        session.start_round().unwrap();
        session.run_round(&mut collector).unwrap();
    }
    let cr = session.contest_round(1).unwrap();
    assert_eq!(cr.decision(), ContestDecision::Confirmed);
    let first = &session.rounds()[0].contest_rounds[0];
    assert!(first.est_new_samples > 0);
}

#[test]
fn hand_records_from_json_lines() {
    let (contests, cvrs) = election();
    let contests: Vec<ContestInput> = contests.into_iter().filter(|c| c.info.id == 1).collect();

    let dir = tempdir().unwrap();
    let mvr_path = dir.path().join("mvrs.jsonl");
    let mut lines = String::new();
    for cvr in &cvrs {
        lines.push_str(&serde_json::to_string(cvr).unwrap());
        lines.push_str("\n\n");
    }
    std::fs::write(&mvr_path, lines).unwrap();

    let mvrs = read_json_lines(&mvr_path).unwrap();
    assert_eq!(mvrs, cvrs);

    let mut config = AuditConfig::new(AuditType::Clca, "5772156649");
    config.ntrials = 20;
    config.workers = 2;
    let mut session = AuditSession::create(config, &contests, &VecCvrSource::new(cvrs)).unwrap();
    let mut collector = MapMvrCollector::new(mvrs);
    for _ in 0..5 {
        if session.is_complete() {
            break;
        }
        session.start_round().unwrap();
        let round = session.run_round(&mut collector).unwrap();
        assert!(round.diagnostics.not_found.is_empty());
    }
    assert_eq!(session.contest_round(1).unwrap().decision(), ContestDecision::Confirmed);

    assert!(read_json_lines(&dir.path().join("missing.jsonl")).is_err());
}
