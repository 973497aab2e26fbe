//! Class Balancer
//!
//! Tops up under-populated classes with augmented copies of their original
//! images. Synthetic files carry the `aug_` prefix, are never used as sources,
//! and count towards the target so an interrupted run can simply be repeated.

use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CurationConfig;
use crate::corpus::codec::{self, WriteMode};
use crate::corpus::walker::{class_directories, image_files, is_synthetic};
use crate::corpus::{CANONICAL_EXTENSION, SYNTHETIC_PREFIX};
use crate::utils::error::{CurationError, FileProblem, Result};
use crate::utils::logging::StageProgress;

/// Create the balancer RNG: pinned when a seed is given, entropy otherwise
pub fn rng_from_seed(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    /// Class has no original images to augment from
    NoSources,
    /// Class already holds at least the target number of originals
    AlreadySufficient,
    /// Class reached the target
    Balanced,
    /// Synthesis stopped early; see `shortfall`
    Shortfall,
}

/// Balancing outcome for one class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassBalance {
    pub label: String,
    /// Original (non-synthetic) images found
    pub originals: usize,
    /// Synthetic images already present before this run
    pub existing_synthetic: usize,
    /// Synthetic images this run set out to create
    pub requested: usize,
    pub created: usize,
    /// Images still missing to reach the target
    pub shortfall: usize,
    pub status: BalanceStatus,
    pub failures: Vec<FileProblem>,
}

impl ClassBalance {
    fn empty(label: &str, status: BalanceStatus) -> Self {
        Self {
            label: label.to_string(),
            originals: 0,
            existing_synthetic: 0,
            requested: 0,
            created: 0,
            shortfall: 0,
            status,
            failures: Vec::new(),
        }
    }
}

/// Pick a free `aug_{stem}_{xxxx}.jpg` name next to `source`
fn synthetic_target<R: Rng + ?Sized>(
    dir: &Path,
    source: &Path,
    rng: &mut R,
    max_attempts: usize,
) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    for _ in 0..max_attempts {
        let tag: u16 = rng.gen();
        let candidate = dir.join(format!(
            "{}{}_{:04x}.{}",
            SYNTHETIC_PREFIX, stem, tag, CANONICAL_EXTENSION
        ));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(CurationError::CollisionUnresolved(
        dir.join(format!("{}{}", SYNTHETIC_PREFIX, stem)),
        max_attempts,
    ))
}

fn synthesize_one<R: Rng + ?Sized>(
    dir: &Path,
    source: &Path,
    config: &CurationConfig,
    rng: &mut R,
) -> Result<PathBuf> {
    let loaded = codec::load_image(source)?;
    let rgb = codec::to_canonical(loaded.image);
    let augmented = config.balance.policy.apply(&rgb, rng);

    let target = synthetic_target(dir, source, rng, config.max_collision_attempts)?;
    codec::write_canonical(&augmented, &target, config.jpeg_quality, WriteMode::CreateNew)?;
    Ok(target)
}

/// Balance one class directory up to `config.balance.target_per_class`
///
/// Sources are drawn uniformly with replacement. A source that fails to decode
/// is dropped from the pool; synthesis stops with a shortfall once the pool is
/// empty or more than `max_synthesis_failures` attempts have failed. A budget
/// of zero stops at the first failure.
pub fn balance_class<R: Rng + ?Sized>(
    label: &str,
    dir: &Path,
    config: &CurationConfig,
    rng: &mut R,
) -> Result<ClassBalance> {
    let target = config.balance.target_per_class;
    let files = image_files(dir, &config.allowed_extensions)?;
    let (synthetic, mut pool): (Vec<PathBuf>, Vec<PathBuf>) =
        files.into_iter().partition(|path| is_synthetic(path));

    let originals = pool.len();
    if originals == 0 {
        warn!("{}: no source images, cannot balance", label);
        return Ok(ClassBalance::empty(label, BalanceStatus::NoSources));
    }

    let mut balance = ClassBalance {
        originals,
        existing_synthetic: synthetic.len(),
        ..ClassBalance::empty(label, BalanceStatus::AlreadySufficient)
    };
    if originals >= target {
        debug!("{}: {} originals, nothing to do", label, originals);
        return Ok(balance);
    }

    balance.requested = target.saturating_sub(originals + synthetic.len());
    let progress = StageProgress::new("balance", balance.requested, config.show_progress);

    while balance.created < balance.requested && !pool.is_empty() {
        let index = rng.gen_range(0..pool.len());
        let source = pool[index].clone();

        match synthesize_one(dir, &source, config, rng) {
            Ok(path) => {
                debug!("Created {:?} from {:?}", path, source);
                balance.created += 1;
                progress.inc();
            }
            Err(err) => {
                if matches!(
                    err,
                    CurationError::Decode(..) | CurationError::TooLarge(..) | CurationError::Io(_)
                ) {
                    pool.swap_remove(index);
                }
                balance.failures.push(FileProblem::from_error(&source, &err));
                if balance.failures.len() > config.balance.max_synthesis_failures {
                    break;
                }
            }
        }
    }
    progress.finish();

    balance.shortfall = balance.requested - balance.created;
    balance.status = if balance.shortfall == 0 {
        BalanceStatus::Balanced
    } else {
        warn!(
            "{}: stopped {} short of the target ({} failures, {} sources left)",
            label,
            balance.shortfall,
            balance.failures.len(),
            pool.len()
        );
        BalanceStatus::Shortfall
    };

    Ok(balance)
}

/// Outcome of balancing the whole corpus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceReport {
    pub target: usize,
    pub classes: Vec<ClassBalance>,
    pub total_created: usize,
    pub total_shortfall: usize,
}

/// Balance every class directory under `root`
pub fn balance_corpus<R: Rng + ?Sized>(
    root: &Path,
    config: &CurationConfig,
    rng: &mut R,
) -> Result<BalanceReport> {
    let target = config.balance.target_per_class;
    info!("Balancing classes under {:?} to {} images", root, target);

    let mut report = BalanceReport {
        target,
        ..BalanceReport::default()
    };

    for class in class_directories(root)? {
        let balance = balance_class(&class.label, &class.path, config, rng)?;
        info!(
            "  {}: {} originals, {} existing synthetic, {} created ({:?})",
            balance.label, balance.originals, balance.existing_synthetic, balance.created, balance.status
        );

        report.total_created += balance.created;
        report.total_shortfall += balance.shortfall;
        report.classes.push(balance);
    }

    info!(
        "Balancing complete: {} synthetic images created, {} short",
        report.total_created, report.total_shortfall
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::codec::test_support::write_jpeg;
    use image::ColorType;
    use std::fs;
    use tempfile::TempDir;

    fn config(target: usize) -> CurationConfig {
        let mut config = CurationConfig::default();
        config.balance.target_per_class = target;
        config.balance.seed = Some(42);
        config
    }

    fn synthetic_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(SYNTHETIC_PREFIX))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_balances_to_target() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            write_jpeg(&dir.join(name));
        }
        let before = fs::read(dir.join("a.jpg")).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let balance = balance_class("국", &dir, &config(10), &mut rng).unwrap();

        assert_eq!(balance.status, BalanceStatus::Balanced);
        assert_eq!(balance.originals, 3);
        assert_eq!(balance.created, 7);
        assert_eq!(balance.shortfall, 0);
        assert!(balance.failures.is_empty());

        let synthetic = synthetic_names(&dir);
        assert_eq!(synthetic.len(), 7);
        for name in &synthetic {
            assert!(name.ends_with(".jpg"));
            let loaded = codec::load_image(&dir.join(name)).unwrap();
            assert_eq!(loaded.image.color(), ColorType::Rgb8);
        }
        assert_eq!(fs::read(dir.join("a.jpg")).unwrap(), before);
    }

    #[test]
    fn test_already_sufficient() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        for name in ["a.jpg", "b.jpg"] {
            write_jpeg(&dir.join(name));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let balance = balance_class("국", &dir, &config(2), &mut rng).unwrap();

        assert_eq!(balance.status, BalanceStatus::AlreadySufficient);
        assert_eq!(balance.created, 0);
        assert!(synthetic_names(&dir).is_empty());
    }

    #[test]
    fn test_no_sources() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("빈");
        fs::create_dir_all(&dir).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let balance = balance_class("빈", &dir, &config(5), &mut rng).unwrap();

        assert_eq!(balance.status, BalanceStatus::NoSources);
        assert_eq!(balance.created, 0);
    }

    #[test]
    fn test_rerun_tops_up_instead_of_overshooting() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            write_jpeg(&dir.join(name));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let first = balance_class("국", &dir, &config(6), &mut rng).unwrap();
        assert_eq!(first.created, 3);

        let second = balance_class("국", &dir, &config(8), &mut rng).unwrap();
        assert_eq!(second.existing_synthetic, 3);
        assert_eq!(second.requested, 2);
        assert_eq!(second.created, 2);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 8);
    }

    #[test]
    fn test_undecodable_source_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        write_jpeg(&dir.join("good.jpg"));
        fs::write(dir.join("bad.jpg"), b"garbage").unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let balance = balance_class("국", &dir, &config(6), &mut rng).unwrap();

        assert_eq!(balance.status, BalanceStatus::Balanced);
        assert_eq!(balance.created, 4);
        assert!(balance.failures.len() <= 1);
        assert!(synthetic_names(&dir)
            .iter()
            .all(|name| name.starts_with("aug_good_")));
    }

    #[test]
    fn test_shortfall_when_pool_empties() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad.jpg"), b"garbage").unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let balance = balance_class("국", &dir, &config(4), &mut rng).unwrap();

        assert_eq!(balance.status, BalanceStatus::Shortfall);
        assert_eq!(balance.created, 0);
        assert_eq!(balance.shortfall, 3);
        assert_eq!(balance.failures.len(), 1);
    }

    #[test]
    fn test_zero_failure_budget_still_synthesizes() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            write_jpeg(&dir.join(name));
        }
        let mut config = config(10);
        config.balance.max_synthesis_failures = 0;
        config.validate().unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let balance = balance_class("국", &dir, &config, &mut rng).unwrap();

        assert_eq!(balance.status, BalanceStatus::Balanced);
        assert_eq!(balance.created, 7);
        assert!(balance.failures.is_empty());
    }

    #[test]
    fn test_zero_failure_budget_stops_at_first_failure() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad1.jpg"), b"garbage").unwrap();
        fs::write(dir.join("bad2.jpg"), b"more garbage").unwrap();

        let mut config = config(5);
        config.balance.max_synthesis_failures = 0;
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let balance = balance_class("국", &dir, &config, &mut rng).unwrap();

        assert_eq!(balance.status, BalanceStatus::Shortfall);
        assert_eq!(balance.failures.len(), 1);
        assert_eq!(balance.shortfall, 3);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path();
            write_jpeg(&root.join("국/a.jpg"));
            write_jpeg(&root.join("밥/b.jpg"));
            write_jpeg(&root.join("밥/c.jpg"));

            let config = config(4);
            let mut rng = rng_from_seed(config.balance.seed);
            let report = balance_corpus(root, &config, &mut rng).unwrap();

            assert_eq!(report.total_created, 5);
            assert_eq!(report.total_shortfall, 0);
            runs.push((synthetic_names(&root.join("국")), synthetic_names(&root.join("밥"))));
        }

        assert_eq!(runs[0], runs[1]);
    }
}
