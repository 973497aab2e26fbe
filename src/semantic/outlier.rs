//! Semantic Outlier Filter
//!
//! Scores every image against a prompt built from its class label and moves
//! the ones below the confidence threshold into a quarantine tree that mirrors
//! the corpus layout. Pixels are never touched, and nothing is deleted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CurationConfig;
use crate::corpus::codec;
use crate::corpus::walker::{class_directories, ensure_dir, image_files};
use crate::semantic::scorer::{ScoringInput, SemanticScorer};
use crate::utils::error::{CurationError, FileProblem, Result, ResultExt};
use crate::utils::logging::StageProgress;

/// A file moved into quarantine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quarantined {
    pub from: PathBuf,
    pub to: PathBuf,
    pub score: f32,
}

/// Filter results for one class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassFilterSummary {
    pub label: String,
    pub processed: usize,
    pub quarantined: Vec<Quarantined>,
    pub retained: usize,
    /// Files that could not be scored or moved; they stay in place
    pub failures: Vec<FileProblem>,
    /// Quarantine copies left behind by a failed move (the original stayed)
    #[serde(default)]
    pub stray_copies: Vec<FileProblem>,
}

impl ClassFilterSummary {
    /// `quarantined + retained + failed == processed`
    pub fn is_consistent(&self) -> bool {
        self.quarantined.len() + self.retained + self.failures.len() == self.processed
    }
}

/// Outcome of a filter pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutlierReport {
    pub threshold: f32,
    pub quarantine_root: PathBuf,
    pub classes: Vec<ClassFilterSummary>,
    pub processed: usize,
    pub quarantined: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Absolute path with symlinks resolved as far as the path exists
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = fs::canonicalize(existing)?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Move a file, copying then deleting when a plain rename is not possible
///
/// A copy that cannot be cleaned up after a failed move is pushed to `strays`.
fn move_file(from: &Path, to: &Path, strays: &mut Vec<FileProblem>) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Err(rename_err) = fs::rename(from, to) {
        debug!("rename {:?} failed ({}), copying instead", from, rename_err);
        fs::copy(from, to).map_err(|e| CurationError::Write(to.to_path_buf(), e.to_string()))?;
        if let Err(err) = fs::remove_file(from) {
            strays.extend(codec::discard_copy(to));
            return Err(CurationError::Write(
                from.to_path_buf(),
                format!("copied to quarantine but could not remove original: {}", err),
            ));
        }
    }
    Ok(())
}

fn filter_class(
    root: &Path,
    quarantine_root: &Path,
    label: &str,
    dir: &Path,
    scorer: &dyn SemanticScorer,
    config: &CurationConfig,
) -> Result<ClassFilterSummary> {
    let threshold = config.filter.threshold;
    let prompt = config.filter.prompt_template.render(label);
    let files = image_files(dir, &config.allowed_extensions)?;

    let progress = StageProgress::new("filter", files.len(), config.show_progress);
    let mut summary = ClassFilterSummary {
        label: label.to_string(),
        ..ClassFilterSummary::default()
    };

    for path in files {
        summary.processed += 1;
        progress.inc();

        let relative = match path.strip_prefix(root).context("file outside corpus root") {
            Ok(relative) => relative.to_path_buf(),
            Err(err) => {
                summary.failures.push(FileProblem::from_error(&path, &err));
                continue;
            }
        };

        let score = codec::load_image(&path).and_then(|loaded| {
            let input = ScoringInput {
                path: &path,
                relative: &relative,
                image: &loaded.image,
            };
            scorer.score(&input, &prompt)
        });

        let score = match score {
            Ok(score) if score.is_nan() => {
                let err = CurationError::Scoring(path.clone(), "score is NaN".to_string());
                summary.failures.push(FileProblem::from_error(&path, &err));
                continue;
            }
            Ok(score) => score,
            Err(err) => {
                summary.failures.push(FileProblem::from_error(&path, &err));
                continue;
            }
        };

        if score >= threshold {
            summary.retained += 1;
            continue;
        }

        let moved = codec::resolve_collision(
            &quarantine_root.join(&relative),
            None,
            config.max_collision_attempts,
        )
        .and_then(|target| {
            move_file(&path, &target, &mut summary.stray_copies).map(|()| target)
        });

        match moved {
            Ok(target) => {
                progress.println(format!("  quarantined ({:.3}): {}", score, relative.display()));
                debug!("Quarantined {:?} -> {:?} (score {:.3})", path, target, score);
                summary.quarantined.push(Quarantined {
                    from: path,
                    to: target,
                    score,
                });
            }
            Err(err) => summary.failures.push(FileProblem::from_error(&path, &err)),
        }
    }

    progress.finish();
    Ok(summary)
}

/// Quarantine every image scoring strictly below `config.filter.threshold`
///
/// The quarantine root is created if needed and must not lie inside the
/// corpus root.
pub fn filter_outliers(
    root: &Path,
    quarantine_root: &Path,
    scorer: &dyn SemanticScorer,
    config: &CurationConfig,
) -> Result<OutlierReport> {
    let root = ensure_dir(root)?;
    let quarantine_root = std::path::absolute(quarantine_root)?;

    let resolved_quarantine = resolve(&quarantine_root)?;
    if resolved_quarantine.starts_with(resolve(&root)?) {
        return Err(CurationError::Config(format!(
            "quarantine root {:?} must not be inside the corpus root {:?}",
            quarantine_root, root
        )));
    }
    fs::create_dir_all(&quarantine_root)?;

    let threshold = config.filter.threshold;
    info!(
        "Filtering outliers under {:?} (threshold {:.2}, prompt '{}')",
        root,
        threshold,
        config.filter.prompt_template.as_str()
    );

    let mut report = OutlierReport {
        threshold,
        quarantine_root: quarantine_root.clone(),
        ..OutlierReport::default()
    };

    for class in class_directories(&root)? {
        let summary = filter_class(
            &root,
            &quarantine_root,
            &class.label,
            &class.path,
            scorer,
            config,
        )?;

        if summary.quarantined.is_empty() {
            info!("  {}: all {} images above threshold", summary.label, summary.retained);
        } else {
            info!(
                "  {}: quarantined {} of {} images",
                summary.label,
                summary.quarantined.len(),
                summary.processed
            );
        }
        if !summary.failures.is_empty() {
            warn!("  {}: {} images could not be scored", summary.label, summary.failures.len());
        }

        report.processed += summary.processed;
        report.quarantined += summary.quarantined.len();
        report.retained += summary.retained;
        report.failed += summary.failures.len();
        report.classes.push(summary);
    }

    info!(
        "Filtering complete: {} processed, {} quarantined, {} retained, {} failed",
        report.processed, report.quarantined, report.retained, report.failed
    );

    Ok(report)
}
