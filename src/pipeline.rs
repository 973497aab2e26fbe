//! Curation Pipeline
//!
//! Runs the stages in their fixed order:
//!
//! ```text
//! purge -> repair -> standardize -> balance -> filter
//! ```
//!
//! Every stage is a full pass over the corpus. The pipeline is not atomic
//! across stages, but each stage is safe to re-run, so an interrupted run can
//! be resumed with [`CurationPipeline::start_at`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CurationConfig;
use crate::corpus::walker::ensure_dir;
use crate::corpus::{
    balance_corpus, purge_non_images, repair_corpus, standardize_corpus, BalanceReport,
    IntegrityReport, PurgeReport, StandardizeReport,
};
use crate::semantic::{filter_outliers, OutlierReport, SemanticScorer};
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Purge,
    Repair,
    Standardize,
    Balance,
    Filter,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Purge,
        Stage::Repair,
        Stage::Standardize,
        Stage::Balance,
        Stage::Filter,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Purge => "purge",
            Stage::Repair => "repair",
            Stage::Standardize => "standardize",
            Stage::Balance => "balance",
            Stage::Filter => "filter",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown stage '{}', expected one of: purge, repair, standardize, balance, filter",
                    s
                )
            })
    }
}

/// Structured result of a pipeline run; stages that did not run are `None`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationReport {
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages_run: Vec<Stage>,
    pub purge: Option<PurgeReport>,
    pub integrity: Option<IntegrityReport>,
    pub standardize: Option<StandardizeReport>,
    pub balance: Option<BalanceReport>,
    pub outliers: Option<OutlierReport>,
}

impl CurationReport {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Per-file problems recorded across all stages
    pub fn problem_count(&self) -> usize {
        self.purge.as_ref().map_or(0, |r| r.failures.len())
            + self.integrity.as_ref().map_or(0, |r| r.problems.len())
            + self.standardize.as_ref().map_or(0, |r| r.problems.len())
            + self
                .balance
                .as_ref()
                .map_or(0, |r| r.classes.iter().map(|c| c.failures.len()).sum())
            + self.outliers.as_ref().map_or(0, |r| {
                r.failed + r.classes.iter().map(|c| c.stray_copies.len()).sum::<usize>()
            })
    }
}

/// Sequences the curation stages over one corpus
pub struct CurationPipeline<'a> {
    config: CurationConfig,
    filter: Option<(&'a dyn SemanticScorer, PathBuf)>,
    start_at: Stage,
}

impl<'a> CurationPipeline<'a> {
    pub fn new(config: CurationConfig) -> Self {
        Self {
            config,
            filter: None,
            start_at: Stage::Purge,
        }
    }

    /// Enable the outlier filter; without it the run stops after balancing
    pub fn with_filter(mut self, scorer: &'a dyn SemanticScorer, quarantine_root: &Path) -> Self {
        self.filter = Some((scorer, quarantine_root.to_path_buf()));
        self
    }

    /// Skip the stages before `stage`
    pub fn start_at(mut self, stage: Stage) -> Self {
        self.start_at = stage;
        self
    }

    pub fn config(&self) -> &CurationConfig {
        &self.config
    }

    fn runs(&self, stage: Stage) -> bool {
        stage >= self.start_at
    }

    pub fn run<R: Rng + ?Sized>(&self, root: &Path, rng: &mut R) -> Result<CurationReport> {
        self.config.validate()?;
        let root = ensure_dir(root)?;
        let started_at = Utc::now();
        info!("Curating corpus at {:?} (starting at {})", root, self.start_at);

        let config = &self.config;
        let mut stages_run = Vec::new();

        let purge = if self.runs(Stage::Purge) && config.purge_non_images {
            stages_run.push(Stage::Purge);
            Some(purge_non_images(&root, &config.allowed_extensions)?)
        } else {
            None
        };

        let integrity = if self.runs(Stage::Repair) {
            stages_run.push(Stage::Repair);
            Some(repair_corpus(&root, config)?)
        } else {
            None
        };

        let standardize = if self.runs(Stage::Standardize) {
            stages_run.push(Stage::Standardize);
            Some(standardize_corpus(&root, config)?)
        } else {
            None
        };

        let balance = if self.runs(Stage::Balance) {
            stages_run.push(Stage::Balance);
            Some(balance_corpus(&root, config, rng)?)
        } else {
            None
        };

        let outliers = match &self.filter {
            Some((scorer, quarantine_root)) if self.runs(Stage::Filter) => {
                stages_run.push(Stage::Filter);
                Some(filter_outliers(&root, quarantine_root, *scorer, config)?)
            }
            _ => {
                info!("Outlier filter not configured, skipping");
                None
            }
        };

        let report = CurationReport {
            root,
            started_at,
            finished_at: Utc::now(),
            stages_run,
            purge,
            integrity,
            standardize,
            balance,
            outliers,
        };

        info!(
            "Curation finished in {:.1}s with {} recorded problems",
            report.duration_secs(),
            report.problem_count()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::codec::test_support::write_jpeg;
    use crate::semantic::ScoringInput;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::fs;
    use tempfile::TempDir;

    struct ConstantScorer(f32);

    impl SemanticScorer for ConstantScorer {
        fn score(&self, _input: &ScoringInput<'_>, _prompt: &str) -> Result<f32> {
            Ok(self.0)
        }
    }

    fn small_config() -> CurationConfig {
        let mut config = CurationConfig::default();
        config.balance.target_per_class = 3;
        config
    }

    #[test]
    fn test_stage_parsing_and_order() {
        assert_eq!("Balance".parse::<Stage>().unwrap(), Stage::Balance);
        assert!("train".parse::<Stage>().is_err());
        assert!(Stage::Repair < Stage::Standardize);
        assert_eq!(Stage::Filter.to_string(), "filter");
    }

    #[test]
    fn test_run_without_filter() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("corpus");
        write_jpeg(&root.join("국/a.jpg"));
        fs::write(root.join("국/readme.txt"), b"x").unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let report = CurationPipeline::new(small_config())
            .run(&root, &mut rng)
            .unwrap();

        assert_eq!(
            report.stages_run,
            vec![Stage::Purge, Stage::Repair, Stage::Standardize, Stage::Balance]
        );
        assert_eq!(report.purge.as_ref().unwrap().removed.len(), 1);
        assert_eq!(report.balance.as_ref().unwrap().total_created, 2);
        assert!(report.outliers.is_none());
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_resume_from_balance() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("corpus");
        let quarantine = temp_dir.path().join("quarantine");
        write_jpeg(&root.join("국/a.jpg"));
        fs::write(root.join("국/readme.txt"), b"x").unwrap();

        let scorer = ConstantScorer(0.9);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let report = CurationPipeline::new(small_config())
            .with_filter(&scorer, &quarantine)
            .start_at(Stage::Balance)
            .run(&root, &mut rng)
            .unwrap();

        assert_eq!(report.stages_run, vec![Stage::Balance, Stage::Filter]);
        assert!(report.purge.is_none());
        // Purge did not run, so the text file survives
        assert!(root.join("국/readme.txt").exists());
        assert_eq!(report.outliers.as_ref().unwrap().retained, 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = small_config();
        config.jpeg_quality = 0;

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let result = CurationPipeline::new(config).run(temp_dir.path(), &mut rng);
        assert!(result.is_err());
    }
}
