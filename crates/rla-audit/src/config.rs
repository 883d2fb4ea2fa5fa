// config.rs — Audit configuration.
//
// Loaded from TOML. Every field except `audit_type` and `seed` has a
// default, so a minimal config is two lines:
//
//   audit_type = "clca"
//   seed = "95738209385729037514"
//
// `validate()` runs when a session is created; an invalid config never
// starts an audit.

use std::path::Path;

use rla_core::{BettingStrategy, ClampPolicy, ErrorRates};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// Which kind of audit to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditType {
    /// Ballot polling: hand records only, no CVR comparison.
    Polling,
    /// Card-level comparison of hand records against CVRs.
    Clca,
}

/// How each round's sample size is estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    #[default]
    MonteCarlo,
    /// Closed-form Kaplan-Markov bound. Comparison audits only.
    Corla,
    /// Kelly-optimal bet with no further errors. Comparison audits only.
    Kelly,
}

/// Betting and estimation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BettingConfig {
    /// Strategy for the risk test. `None` picks the default for the audit
    /// type (adaptive Kelly for CLCA, shrinkage for polling).
    #[serde(default)]
    pub strategy: Option<BettingStrategy>,

    /// Largest fraction of the statistic a single draw may lose.
    #[serde(default = "default_max_risk")]
    pub max_risk: f64,

    /// CORLA error inflation factor.
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Discrepancy rates assumed when sizing a round before any have been
    /// observed.
    #[serde(default)]
    pub simulated_rates: ErrorRates,

    #[serde(default)]
    pub estimator: Estimator,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            max_risk: default_max_risk(),
            gamma: default_gamma(),
            simulated_rates: ErrorRates::default(),
            estimator: Estimator::default(),
        }
    }
}

/// Top-level audit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub audit_type: AuditType,

    /// Published random seed. Determines every card's sample number.
    pub seed: String,

    #[serde(default = "default_risk_limit")]
    pub risk_limit: f64,

    /// Whether card style information says which contests each card holds.
    #[serde(default = "default_true")]
    pub has_styles: bool,

    /// Quantile of simulated sample sizes used as the round target.
    #[serde(default = "default_quantile")]
    pub quantile: f64,

    #[serde(default = "default_ntrials")]
    pub ntrials: usize,

    /// Most cards any one contest may draw before it is declared over
    /// budget. `None` means the contest's whole population.
    #[serde(default)]
    pub max_samples: Option<u64>,

    /// Contests whose reported recount margin is at or below this are not
    /// audited.
    #[serde(default = "default_min_recount_margin")]
    pub min_recount_margin: f64,

    /// Exclude contests whose margin cannot survive their phantom rate.
    #[serde(default)]
    pub remove_too_many_phantoms: bool,

    #[serde(default)]
    pub betting: BettingConfig,

    #[serde(default)]
    pub clamp_policy: ClampPolicy,

    /// Worker threads for estimation and sampling.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock limit for one assertion's Monte Carlo estimate.
    #[serde(default)]
    pub estimate_deadline_ms: Option<u64>,
}

fn default_risk_limit() -> f64 {
    0.05
}

fn default_true() -> bool {
    true
}

fn default_quantile() -> f64 {
    0.8
}

fn default_ntrials() -> usize {
    100
}

fn default_min_recount_margin() -> f64 {
    0.005
}

fn default_max_risk() -> f64 {
    0.9
}

fn default_gamma() -> f64 {
    1.03905
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl AuditConfig {
    /// Config with every default filled in.
    pub fn new(audit_type: AuditType, seed: impl Into<String>) -> Self {
        Self {
            audit_type,
            seed: seed.into(),
            risk_limit: default_risk_limit(),
            has_styles: true,
            quantile: default_quantile(),
            ntrials: default_ntrials(),
            max_samples: None,
            min_recount_margin: default_min_recount_margin(),
            remove_too_many_phantoms: false,
            betting: BettingConfig::default(),
            clamp_policy: ClampPolicy::default(),
            workers: default_workers(),
            estimate_deadline_ms: None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, AuditError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, AuditError> {
        let content = std::fs::read_to_string(path).map_err(|source| AuditError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// The betting strategy for risk tests, after applying defaults.
    pub fn strategy(&self) -> BettingStrategy {
        self.betting
            .strategy
            .clone()
            .unwrap_or_else(|| match self.audit_type {
                AuditType::Clca => BettingStrategy::comparison_default(),
                AuditType::Polling => BettingStrategy::polling_default(),
            })
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        fn bad(msg: String) -> Result<(), AuditError> {
            Err(AuditError::InvalidConfig(msg))
        }

        if !(self.risk_limit > 0.0 && self.risk_limit < 1.0) {
            return bad(format!("risk_limit {} not in (0, 1)", self.risk_limit));
        }
        if self.seed.trim().is_empty() {
            return bad("seed must not be empty".into());
        }
        if !(self.quantile > 0.0 && self.quantile < 1.0) {
            return bad(format!("quantile {} not in (0, 1)", self.quantile));
        }
        if self.ntrials == 0 {
            return bad("ntrials must be at least 1".into());
        }
        if self.max_samples == Some(0) {
            return bad("max_samples must be positive".into());
        }
        if !(0.0..1.0).contains(&self.min_recount_margin) {
            return bad(format!(
                "min_recount_margin {} not in [0, 1)",
                self.min_recount_margin
            ));
        }
        if self.workers == 0 {
            return bad("workers must be at least 1".into());
        }
        if !(self.betting.max_risk > 0.0 && self.betting.max_risk < 1.0) {
            return bad(format!("max_risk {} not in (0, 1)", self.betting.max_risk));
        }
        if !(self.betting.gamma > 1.0) {
            return bad(format!("gamma {} must exceed 1", self.betting.gamma));
        }
        let rates = &self.betting.simulated_rates;
        if [rates.p2o, rates.p1o, rates.p1u, rates.p2u]
            .iter()
            .any(|p| !(0.0..1.0).contains(p))
            || rates.total() >= 1.0
        {
            return bad(format!("simulated_rates {:?} are not probabilities", rates));
        }
        if self.audit_type == AuditType::Polling && self.betting.estimator != Estimator::MonteCarlo
        {
            return bad(format!(
                "{:?} estimator needs a comparison audit",
                self.betting.estimator
            ));
        }
        match self.strategy() {
            BettingStrategy::Fixed { lambda } if !(lambda >= 0.0) => {
                bad(format!("fixed bet {} must be non-negative", lambda))
            }
            BettingStrategy::KellyOracle { .. } | BettingStrategy::KellyAdaptive { .. }
                if self.audit_type == AuditType::Polling =>
            {
                bad("kelly betting needs a comparison audit".into())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = AuditConfig::from_toml_str(
            r#"
            audit_type = "clca"
            seed = "12345678901234567890"
            "#,
        )
        .unwrap();
        assert_eq!(config.risk_limit, 0.05);
        assert!(config.has_styles);
        assert_eq!(config.quantile, 0.8);
        assert_eq!(config.betting.max_risk, 0.9);
        assert_eq!(config.betting.estimator, Estimator::MonteCarlo);
        assert_eq!(config.clamp_policy, ClampPolicy::Floor);
        assert!(config.workers >= 1);
        assert_eq!(config.strategy().name(), "kelly_adaptive");
    }

    #[test]
    fn polling_defaults_to_shrinkage() {
        let config = AuditConfig::new(AuditType::Polling, "seed");
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy().name(), "shrinkage");
    }

    #[test]
    fn nested_betting_tables_parse() {
        let config = AuditConfig::from_toml_str(
            r#"
            audit_type = "clca"
            seed = "abc"
            risk_limit = 0.1
            clamp_policy = "skip"

            [betting]
            max_risk = 0.8
            estimator = "kelly"

            [betting.strategy]
            strategy = "kelly_adaptive"
            d = 50

            [betting.strategy.apriori]
            p2o = 0.0001
            p1o = 0.001
            p1u = 0.0
            p2u = 0.0
            "#,
        )
        .unwrap();
        assert_eq!(config.clamp_policy, ClampPolicy::Skip);
        assert_eq!(config.betting.estimator, Estimator::Kelly);
        match config.strategy() {
            BettingStrategy::KellyAdaptive { d, apriori } => {
                assert_eq!(d, 50);
                assert_eq!(apriori.p1o, 0.001);
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = AuditConfig::new(AuditType::Clca, "seed");
        config.risk_limit = 1.5;
        assert!(matches!(config.validate(), Err(AuditError::InvalidConfig(_))));

        let mut config = AuditConfig::new(AuditType::Clca, "  ");
        config.workers = 2;
        assert!(config.validate().is_err());

        let mut config = AuditConfig::new(AuditType::Clca, "seed");
        config.betting.gamma = 1.0;
        assert!(config.validate().is_err());

        let mut config = AuditConfig::new(AuditType::Polling, "seed");
        config.betting.estimator = Estimator::Corla;
        assert!(config.validate().is_err());

        let mut config = AuditConfig::new(AuditType::Polling, "seed");
        config.betting.strategy = Some(BettingStrategy::comparison_default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_seed_fails_to_parse() {
        let err = AuditConfig::from_toml_str(r#"audit_type = "polling""#).unwrap_err();
        assert!(matches!(err, AuditError::ConfigParse(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.toml");
        std::fs::write(&path, "audit_type = \"polling\"\nseed = \"s\"\nntrials = 20\n").unwrap();
        let config = AuditConfig::load(&path).unwrap();
        assert_eq!(config.ntrials, 20);
        assert_eq!(config.audit_type, AuditType::Polling);

        let missing = AuditConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, AuditError::IoError { .. }));
    }
}
