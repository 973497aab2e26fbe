//! Integrity Validator/Repairer
//!
//! Fully decodes every image candidate and sorts it into one of four outcomes:
//!
//! | Outcome        | Action                                          |
//! |----------------|-------------------------------------------------|
//! | `Ok`           | none                                            |
//! | `SoftCorrupt`  | re-encode as canonical JPEG in place, re-verify |
//! | `HardCorrupt`  | delete                                          |
//! | `NotAnImage`   | skip (left for the non-image purge)             |
//!
//! A repair that fails at any point deletes the file, so no file is ever left
//! half-written.

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CurationConfig;
use crate::corpus::codec::{self, WriteMode};
use crate::corpus::inspect::{self, DecodeWarning};
use crate::corpus::walker::image_files;
use crate::utils::error::{CurationError, FileProblem, ProblemKind, Result};
use crate::utils::logging::StageProgress;

/// Integrity classification of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum Integrity {
    Ok,
    /// Decodes, but the container carries anomalies
    SoftCorrupt(Vec<DecodeWarning>),
    /// Recognized as an image, but decoding fails
    HardCorrupt(String),
    /// Neither content nor extension identify an image format
    NotAnImage,
}

impl Integrity {
    pub fn is_ok(&self) -> bool {
        matches!(self, Integrity::Ok)
    }
}

struct Examined {
    integrity: Integrity,
    image: Option<DynamicImage>,
}

fn examine(path: &Path) -> Result<Examined> {
    let bytes = fs::read(path)?;

    let Some(format) = codec::detect_format(path, &bytes) else {
        return Ok(Examined {
            integrity: Integrity::NotAnImage,
            image: None,
        });
    };

    let image = match codec::decode_bytes(path, &bytes) {
        Ok(loaded) => loaded.image,
        Err(CurationError::Decode(_, reason)) => {
            return Ok(Examined {
                integrity: Integrity::HardCorrupt(reason),
                image: None,
            })
        }
        Err(err) => return Err(err),
    };

    let warnings = inspect::inspect(&bytes, format);
    let integrity = if warnings.is_empty() {
        Integrity::Ok
    } else {
        Integrity::SoftCorrupt(warnings)
    };

    Ok(Examined {
        integrity,
        image: Some(image),
    })
}

/// Classify a file without modifying it
///
/// Errors when the file cannot be read at all, or when it is too large to
/// decode within the allocation limits. Neither case says the file is corrupt.
pub fn classify_file(path: &Path) -> Result<Integrity> {
    examine(path).map(|examined| examined.integrity)
}

/// Outcome of a repair pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Image candidates examined
    pub scanned: usize,
    /// Files that decoded cleanly
    pub ok: usize,
    /// Softly corrupt files re-encoded in place
    pub repaired: Vec<PathBuf>,
    /// Files deleted as unrecoverable
    pub removed: Vec<PathBuf>,
    /// Files with an image extension but no recognizable format
    pub skipped_non_images: Vec<PathBuf>,
    /// Every file that was not `Ok`, with the reason
    pub problems: Vec<FileProblem>,
}

fn remove_unrecoverable(path: &Path, report: &mut IntegrityReport) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted unrecoverable file {:?}", path);
            report.removed.push(path.to_path_buf());
        }
        Err(err) => {
            warn!("Failed to delete {:?}: {}", path, err);
            report
                .problems
                .push(FileProblem::new(path, ProblemKind::Delete, err.to_string()));
        }
    }
}

fn repair_in_place(path: &Path, image: DynamicImage, quality: u8) -> Result<()> {
    let rgb = codec::to_canonical(image);
    codec::write_canonical(&rgb, path, quality, WriteMode::Replace)?;

    match classify_file(path)? {
        Integrity::Ok => Ok(()),
        other => Err(CurationError::SoftCorruption(
            path.to_path_buf(),
            format!("still {:?} after re-encoding", other),
        )),
    }
}

/// Validate every image candidate under `root`, repairing or deleting as needed
pub fn repair_corpus(root: &Path, config: &CurationConfig) -> Result<IntegrityReport> {
    info!("Checking image integrity under {:?}", root);

    let files = image_files(root, &config.allowed_extensions)?;
    let progress = StageProgress::new("repair", files.len(), config.show_progress);
    let mut report = IntegrityReport::default();

    for path in files {
        report.scanned += 1;
        progress.inc();

        let examined = match examine(&path) {
            Ok(examined) => examined,
            Err(err) => {
                report.problems.push(FileProblem::from_error(&path, &err));
                continue;
            }
        };

        match examined.integrity {
            Integrity::Ok => report.ok += 1,
            Integrity::NotAnImage => {
                report.problems.push(FileProblem::new(
                    &path,
                    ProblemKind::NotAnImage,
                    "no image format recognized",
                ));
                report.skipped_non_images.push(path);
            }
            Integrity::HardCorrupt(reason) => {
                progress.println(format!("  corrupt: {}", path.display()));
                report
                    .problems
                    .push(FileProblem::new(&path, ProblemKind::Decode, reason));
                remove_unrecoverable(&path, &mut report);
            }
            Integrity::SoftCorrupt(warnings) => {
                let reason = warnings
                    .iter()
                    .map(|w| w.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                report.problems.push(FileProblem::new(
                    &path,
                    ProblemKind::SoftCorruption,
                    reason,
                ));

                let Some(image) = examined.image else {
                    remove_unrecoverable(&path, &mut report);
                    continue;
                };

                match repair_in_place(&path, image, config.jpeg_quality) {
                    Ok(()) => {
                        debug!("Repaired {:?}", path);
                        report.repaired.push(path);
                    }
                    Err(err) => {
                        report.problems.push(FileProblem::from_error(&path, &err));
                        remove_unrecoverable(&path, &mut report);
                    }
                }
            }
        }
    }

    progress.finish();
    info!(
        "Integrity check complete: {} scanned, {} ok, {} repaired, {} removed, {} skipped",
        report.scanned,
        report.ok,
        report.repaired.len(),
        report.removed.len(),
        report.skipped_non_images.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::codec::test_support::{gradient, jpeg_bytes, write_jpeg, write_oversized_png};
    use image::{ColorType, ImageFormat};
    use tempfile::TempDir;

    #[test]
    fn test_classify_clean_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("국/a.jpg");
        write_jpeg(&path);

        assert_eq!(classify_file(&path).unwrap(), Integrity::Ok);
    }

    #[test]
    fn test_classify_outcomes() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let garbage = dir.join("garbage.jpg");
        fs::write(&garbage, b"not an image at all").unwrap();
        assert!(matches!(
            classify_file(&garbage).unwrap(),
            Integrity::HardCorrupt(_)
        ));

        let unknown = dir.join("mystery.xyz");
        fs::write(&unknown, b"???").unwrap();
        assert_eq!(classify_file(&unknown).unwrap(), Integrity::NotAnImage);

        let trailing = dir.join("trailing.jpg");
        let mut bytes = jpeg_bytes();
        bytes.extend_from_slice(b"extra");
        fs::write(&trailing, bytes).unwrap();
        assert!(matches!(
            classify_file(&trailing).unwrap(),
            Integrity::SoftCorrupt(_)
        ));
    }

    #[test]
    fn test_repair_corpus() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write_jpeg(&root.join("국/good.jpg"));

        let soft = root.join("국/soft.jpg");
        let mut bytes = jpeg_bytes();
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(&soft, bytes).unwrap();

        let hard = root.join("밥/hard.png");
        fs::create_dir_all(hard.parent().unwrap()).unwrap();
        fs::write(&hard, b"\x89PNG\r\n\x1a\nbroken").unwrap();

        let report = repair_corpus(root, &CurationConfig::default()).unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.ok, 1);
        assert_eq!(report.repaired, vec![soft.clone()]);
        assert_eq!(report.removed, vec![hard.clone()]);
        assert_eq!(report.problems.len(), 2);

        assert!(!hard.exists());
        assert_eq!(classify_file(&soft).unwrap(), Integrity::Ok);
        let repaired = codec::load_image(&soft).unwrap();
        assert_eq!(repaired.image.color(), ColorType::Rgb8);
    }

    #[test]
    fn test_repair_is_noop_on_clean_corpus() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let path = root.join("국/a.jpg");
        write_jpeg(&path);
        let before = fs::read(&path).unwrap();

        let report = repair_corpus(root, &CurationConfig::default()).unwrap();

        assert_eq!(report.ok, 1);
        assert!(report.problems.is_empty());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_failed_repair_deletes_without_leftovers() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("국");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wide.png");

        // Decodes fine, but JPEG cannot hold a width above 65535
        let mut bytes = Vec::new();
        gradient(70_000, 1)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes.extend_from_slice(b"after iend");
        fs::write(&path, bytes).unwrap();
        assert!(matches!(classify_file(&path).unwrap(), Integrity::SoftCorrupt(_)));

        let report = repair_corpus(temp_dir.path(), &CurationConfig::default()).unwrap();

        assert!(report.repaired.is_empty());
        assert_eq!(report.removed, vec![path.clone()]);
        assert!(!path.exists());
        assert!(report.problems.iter().any(|p| p.kind == ProblemKind::Write));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_oversized_image_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("국/huge.png");
        write_oversized_png(&path);

        let report = repair_corpus(temp_dir.path(), &CurationConfig::default()).unwrap();

        assert!(path.exists());
        assert!(report.removed.is_empty());
        assert_eq!(report.problems.len(), 1);
        assert_eq!(report.problems[0].kind, ProblemKind::TooLarge);
    }

    #[test]
    fn test_missing_root() {
        let result = repair_corpus(Path::new("/no/such/corpus"), &CurationConfig::default());
        assert!(matches!(result, Err(CurationError::PathNotFound(_))));
    }
}
