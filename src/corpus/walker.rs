//! Corpus Walker
//!
//! Lazy enumeration of the files under a corpus root, plus the class directory
//! listing and the non-image purge.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::corpus::SYNTHETIC_PREFIX;
use crate::utils::error::{CurationError, FileProblem, ProblemKind, Result};

/// A class directory directly under the corpus root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDir {
    /// Class label (the directory name)
    pub label: String,
    /// Absolute path of the directory
    pub path: PathBuf,
}

/// Outcome of a non-image purge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Files visited
    pub scanned: usize,
    /// Files deleted because their extension is not allowed
    pub removed: Vec<PathBuf>,
    /// Deletions that failed
    pub failures: Vec<FileProblem>,
}

/// Fail with `PathNotFound` unless `root` is a directory, returning its absolute form
pub fn ensure_dir(root: &Path) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(CurationError::PathNotFound(root.to_path_buf()));
    }
    Ok(std::path::absolute(root)?)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Walk every regular, non-hidden file under `root`
///
/// Hidden directories are pruned entirely and symlinks are not followed.
/// Entries that cannot be read are logged and skipped.
pub fn walk_files(root: &Path) -> Result<impl Iterator<Item = PathBuf>> {
    let root = ensure_dir(root)?;

    let iter = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path);

    Ok(iter)
}

/// Lowercased extension without the dot, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check whether `path` carries one of the allowed extensions (case-insensitive)
pub fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    match extension_of(path) {
        Some(ext) => allowed
            .iter()
            .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

/// Whether the file was produced by the balancer
pub fn is_synthetic(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(SYNTHETIC_PREFIX))
        .unwrap_or(false)
}

/// Image candidates under `dir`, sorted so passes are deterministic
pub fn image_files(dir: &Path, allowed: &[String]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = walk_files(dir)?
        .filter(|path| has_allowed_extension(path, allowed))
        .collect();
    files.sort();
    Ok(files)
}

/// List class directories under the corpus root, sorted by label
pub fn class_directories(root: &Path) -> Result<Vec<ClassDir>> {
    let root = ensure_dir(root)?;

    let mut classes = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let label = entry.file_name().to_string_lossy().to_string();
        if label.starts_with('.') {
            continue;
        }

        classes.push(ClassDir {
            label,
            path: entry.path(),
        });
    }

    classes.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(classes)
}

/// Class label of a file: the first path component below the root
pub fn class_label(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    // A file sitting directly in the root belongs to no class
    components.next()?;
    Some(first.as_os_str().to_string_lossy().to_string())
}

/// Delete every walked file whose extension is not in `allowed`
///
/// Deletion is best-effort per file: failures are recorded and the walk continues.
pub fn purge_non_images(root: &Path, allowed: &[String]) -> Result<PurgeReport> {
    info!("Purging non-image files under {:?}", root);

    let mut report = PurgeReport::default();

    for path in walk_files(root)? {
        report.scanned += 1;

        if has_allowed_extension(&path, allowed) {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed non-image file {:?}", path);
                report.removed.push(path);
            }
            Err(err) => {
                warn!("Failed to remove {:?}: {}", path, err);
                report
                    .failures
                    .push(FileProblem::new(&path, ProblemKind::Delete, err.to_string()));
            }
        }
    }

    info!(
        "Purge complete: {} scanned, {} removed, {} failures",
        report.scanned,
        report.removed.len(),
        report.failures.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::DEFAULT_IMAGE_EXTENSIONS;
    use tempfile::TempDir;

    fn allowed() -> Vec<String> {
        DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_walk_skips_hidden_entries() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        touch(&root.join("국/a.jpg"));
        touch(&root.join("국/.DS_Store"));
        touch(&root.join(".cache/b.jpg"));
        touch(&root.join("밥/nested/c.png"));

        let mut names: Vec<String> = walk_files(root)
            .unwrap()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();

        assert_eq!(names, vec!["a.jpg", "c.png"]);
    }

    #[test]
    fn test_walk_yields_absolute_paths() {
        let temp_dir = TempDir::new().unwrap();
        touch(&temp_dir.path().join("국/a.jpg"));

        for path in walk_files(temp_dir.path()).unwrap() {
            assert!(path.is_absolute());
        }
    }

    #[test]
    fn test_missing_root() {
        let result = walk_files(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(CurationError::PathNotFound(_))));
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        let allowed = allowed();
        assert!(has_allowed_extension(Path::new("a.JPG"), &allowed));
        assert!(has_allowed_extension(Path::new("a.WebP"), &allowed));
        assert!(!has_allowed_extension(Path::new("a.txt"), &allowed));
        assert!(!has_allowed_extension(Path::new("README"), &allowed));
        assert!(has_allowed_extension(Path::new("a.png"), &[".png".to_string()]));
    }

    #[test]
    fn test_purge_non_images() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        touch(&root.join("국/a.jpg"));
        touch(&root.join("국/notes.txt"));
        touch(&root.join("국/thumbs.db"));
        touch(&root.join("밥/b.PNG"));
        touch(&root.join("밥/noext"));

        let report = purge_non_images(root, &allowed()).unwrap();

        assert_eq!(report.scanned, 5);
        assert_eq!(report.removed.len(), 3);
        assert!(report.failures.is_empty());
        assert!(root.join("국/a.jpg").exists());
        assert!(root.join("밥/b.PNG").exists());
        assert!(!root.join("국/notes.txt").exists());
        assert!(!root.join("밥/noext").exists());
    }

    #[test]
    fn test_class_directories_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("밥")).unwrap();
        fs::create_dir_all(root.join("국")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        touch(&root.join("labels.txt"));

        let labels: Vec<String> = class_directories(root)
            .unwrap()
            .into_iter()
            .map(|c| c.label)
            .collect();

        assert_eq!(labels, vec!["국".to_string(), "밥".to_string()]);
    }

    #[test]
    fn test_class_label_and_synthetic_marker() {
        let root = Path::new("/corpus");
        assert_eq!(
            class_label(root, Path::new("/corpus/국/sub/a.jpg")),
            Some("국".to_string())
        );
        assert_eq!(class_label(root, Path::new("/corpus/a.jpg")), None);

        assert!(is_synthetic(Path::new("/corpus/국/aug_a_12ab.jpg")));
        assert!(!is_synthetic(Path::new("/corpus/aug_dir/a.jpg")));
    }
}
