//! Format Standardizer
//!
//! Brings every image to the canonical container, color mode and extension
//! (JPEG, RGB8, `.jpg`). A file is rewritten only when something differs, so a
//! second pass over a standardized corpus changes nothing.

use std::fs;
use std::path::{Path, PathBuf};

use image::{ColorType, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CurationConfig;
use crate::corpus::codec::{self, WriteMode};
use crate::corpus::walker::image_files;
use crate::corpus::{CANONICAL_COLOR, CANONICAL_EXTENSION, CANONICAL_FORMAT};
use crate::utils::error::{CurationError, FileProblem, ProblemKind, Result};
use crate::utils::logging::StageProgress;

/// A file rewritten into canonical form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Color mode was not RGB8
    pub recolored: bool,
    /// Container or extension was not canonical
    pub reformatted: bool,
}

/// Result of standardizing a single file
#[derive(Debug, Clone)]
pub enum StandardizeOutcome {
    /// Already canonical
    Unchanged,
    Converted(Conversion),
    /// Decode or save failed and the file was deleted
    Removed(FileProblem),
    /// Left untouched (too large to decode, collision unresolved, or cleanup
    /// failed). A converted copy that could not be removed adds a second problem.
    Failed(Vec<FileProblem>),
}

fn delete_after_failure(path: &Path, err: &CurationError) -> StandardizeOutcome {
    let problem = FileProblem::from_error(path, err);
    match fs::remove_file(path) {
        Ok(()) => StandardizeOutcome::Removed(problem),
        Err(remove_err) => StandardizeOutcome::Failed(vec![FileProblem::new(
            path,
            ProblemKind::Delete,
            format!("{}; delete also failed: {}", problem.reason, remove_err),
        )]),
    }
}

/// Standardize one file
///
/// The target is the same directory and stem with the canonical extension. An
/// occupied target gets a `_N` suffix, searched up to `max_attempts`.
pub fn standardize_file(path: &Path, quality: u8, max_attempts: usize) -> StandardizeOutcome {
    let loaded = match codec::load_image(path) {
        Ok(loaded) => loaded,
        Err(err @ CurationError::TooLarge(..)) => {
            return StandardizeOutcome::Failed(vec![FileProblem::from_error(path, &err)])
        }
        Err(err) => return delete_after_failure(path, &err),
    };

    let recolored = loaded.image.color() != CANONICAL_COLOR;
    let reformatted = loaded.format != CANONICAL_FORMAT || !codec::has_canonical_extension(path);

    if !recolored && !reformatted {
        return StandardizeOutcome::Unchanged;
    }

    let candidate = path.with_extension(CANONICAL_EXTENSION);
    let target = match codec::resolve_collision(&candidate, Some(path), max_attempts) {
        Ok(target) => target,
        Err(err) => return StandardizeOutcome::Failed(vec![FileProblem::from_error(path, &err)]),
    };
    let in_place = target == path || codec::same_file(&target, path);

    let rgb = codec::to_canonical(loaded.image);
    let mode = if in_place {
        WriteMode::Replace
    } else {
        WriteMode::CreateNew
    };
    if let Err(err) = codec::write_canonical(&rgb, &target, quality, mode) {
        return delete_after_failure(path, &err);
    }

    if !in_place {
        if let Err(err) = fs::remove_file(path) {
            warn!("Failed to remove original {:?}: {}", path, err);
            // Exactly one file per record: drop the copy we just made
            let mut problems = vec![FileProblem::new(path, ProblemKind::Delete, err.to_string())];
            problems.extend(codec::discard_copy(&target));
            return StandardizeOutcome::Failed(problems);
        }
    }

    debug!(
        "Standardized {:?} -> {:?} (recolored: {}, reformatted: {})",
        path, target, recolored, reformatted
    );

    StandardizeOutcome::Converted(Conversion {
        from: path.to_path_buf(),
        to: target,
        recolored,
        reformatted,
    })
}

/// Outcome of a standardization pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardizeReport {
    pub scanned: usize,
    pub unchanged: usize,
    pub converted: Vec<Conversion>,
    /// Conversions that included a color mode change
    pub recolored: usize,
    /// Files deleted because they could not be decoded or saved
    pub removed: Vec<PathBuf>,
    pub problems: Vec<FileProblem>,
}

/// Standardize every image candidate under `root`
pub fn standardize_corpus(root: &Path, config: &CurationConfig) -> Result<StandardizeReport> {
    info!("Standardizing images under {:?}", root);

    let files = image_files(root, &config.allowed_extensions)?;
    let progress = StageProgress::new("standardize", files.len(), config.show_progress);
    let mut report = StandardizeReport::default();

    for path in files {
        report.scanned += 1;
        progress.inc();

        match standardize_file(&path, config.jpeg_quality, config.max_collision_attempts) {
            StandardizeOutcome::Unchanged => report.unchanged += 1,
            StandardizeOutcome::Converted(conversion) => {
                if conversion.recolored {
                    report.recolored += 1;
                }
                report.converted.push(conversion);
            }
            StandardizeOutcome::Removed(problem) => {
                progress.println(format!("  removed: {}", path.display()));
                report.removed.push(path);
                report.problems.push(problem);
            }
            StandardizeOutcome::Failed(problems) => report.problems.extend(problems),
        }
    }

    progress.finish();
    info!(
        "Standardization complete: {} scanned, {} unchanged, {} converted ({} recolored), {} removed",
        report.scanned,
        report.unchanged,
        report.converted.len(),
        report.recolored,
        report.removed.len()
    );

    Ok(report)
}

/// Whether a decoded image already has the canonical layout
pub fn is_canonical(format: ImageFormat, color: ColorType, path: &Path) -> bool {
    format == CANONICAL_FORMAT && color == CANONICAL_COLOR && codec::has_canonical_extension(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::codec::test_support::{gradient, write_jpeg, write_png_rgba};
    use tempfile::TempDir;

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_png_rgba_is_converted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("국/a.png");
        write_png_rgba(&path);

        let conversion = match standardize_file(&path, 95, 10) {
            StandardizeOutcome::Converted(conversion) => conversion,
            other => panic!("expected conversion, got {:?}", other),
        };

        assert!(conversion.recolored);
        assert!(conversion.reformatted);
        assert_eq!(conversion.to, temp_dir.path().join("국/a.jpg"));
        assert!(!path.exists());

        let loaded = codec::load_image(&conversion.to).unwrap();
        assert!(is_canonical(loaded.format, loaded.image.color(), &conversion.to));
    }

    #[test]
    fn test_uppercase_canonical_extension_is_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("A.JPG");
        write_jpeg(&path);

        assert!(matches!(
            standardize_file(&path, 95, 10),
            StandardizeOutcome::Unchanged
        ));
        assert!(path.exists());
    }

    #[test]
    fn test_jpeg_extension_is_renamed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("photo.jpeg");
        write_jpeg(&path);

        let outcome = standardize_file(&path, 95, 10);
        assert!(matches!(
            outcome,
            StandardizeOutcome::Converted(Conversion {
                recolored: false,
                reformatted: true,
                ..
            })
        ));
        assert_eq!(names_in(temp_dir.path()), vec!["photo.jpg"]);
    }

    #[test]
    fn test_collision_gets_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_jpeg(&dir.join("a.jpg"));
        write_png_rgba(&dir.join("a.png"));
        let original = fs::read(dir.join("a.jpg")).unwrap();

        let report = standardize_corpus(dir, &CurationConfig::default()).unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.converted.len(), 1);
        assert_eq!(names_in(dir), vec!["a.jpg", "a_1.jpg"]);
        assert_eq!(fs::read(dir.join("a.jpg")).unwrap(), original);
    }

    #[test]
    fn test_unresolved_collision_leaves_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_jpeg(&dir.join("a.jpg"));
        write_jpeg(&dir.join("a_1.jpg"));
        let png = dir.join("a.png");
        write_png_rgba(&png);

        let problems = match standardize_file(&png, 95, 1) {
            StandardizeOutcome::Failed(problems) => problems,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind, ProblemKind::CollisionUnresolved);
        assert!(png.exists());
    }

    #[test]
    fn test_undecodable_file_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let broken = dir.join("broken.png");
        fs::write(&broken, b"not a png").unwrap();
        write_jpeg(&dir.join("ok.jpg"));

        let report = standardize_corpus(dir, &CurationConfig::default()).unwrap();

        assert_eq!(report.removed, vec![broken.clone()]);
        assert_eq!(report.problems.len(), 1);
        assert_eq!(report.problems[0].kind, ProblemKind::Decode);
        assert!(!broken.exists());
    }

    #[test]
    fn test_second_pass_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_png_rgba(&root.join("국/a.png"));
        write_jpeg(&root.join("국/b.jpeg"));
        write_jpeg(&root.join("밥/c.jpg"));
        gradient(8, 8)
            .save_with_format(root.join("밥/d.bmp"), ImageFormat::Bmp)
            .unwrap();

        let config = CurationConfig::default();
        let first = standardize_corpus(root, &config).unwrap();
        assert_eq!(first.converted.len(), 3);
        assert_eq!(first.recolored, 1);

        let second = standardize_corpus(root, &config).unwrap();
        assert!(second.converted.is_empty());
        assert_eq!(second.unchanged, 4);
        assert_eq!(names_in(&root.join("국")), vec!["a.jpg", "b.jpg"]);
        assert_eq!(names_in(&root.join("밥")), vec!["c.jpg", "d.jpg"]);
    }
}
