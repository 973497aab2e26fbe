//! Corpus Survey
//!
//! Read-only census of a corpus: extension counts, images per class, and how
//! many files are synthetic, not yet canonical, carry extra channels or fail
//! to decode. Useful before and after a curation run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::codec;
use crate::corpus::standardize::is_canonical;
use crate::corpus::walker::{
    class_directories, ensure_dir, extension_of, has_allowed_extension, is_synthetic, walk_files,
};
use crate::utils::error::Result;

/// Per-class counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassSurvey {
    pub label: String,
    /// All regular files in the class directory
    pub files: usize,
    /// Files with an allowed image extension
    pub images: usize,
    pub synthetic: usize,
    /// Decodable images not in canonical form
    pub non_canonical: usize,
    /// Images with at least the requested channel count
    pub multi_channel: Vec<PathBuf>,
    pub unreadable: Vec<PathBuf>,
}

/// Census of a whole corpus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusSurvey {
    pub root: PathBuf,
    /// Lowercased extension (empty for none) to file count, over the whole tree
    pub extensions: BTreeMap<String, usize>,
    pub classes: Vec<ClassSurvey>,
}

impl CorpusSurvey {
    pub fn total_images(&self) -> usize {
        self.classes.iter().map(|c| c.images).sum()
    }

    /// Smallest and largest class sizes, if there are classes
    pub fn class_size_range(&self) -> Option<(usize, usize)> {
        let min = self.classes.iter().map(|c| c.images).min()?;
        let max = self.classes.iter().map(|c| c.images).max()?;
        Some((min, max))
    }
}

/// Survey the corpus without modifying it
///
/// `min_channels` selects which images are listed as multi-channel (4 finds
/// images with alpha).
pub fn survey_corpus(
    root: &Path,
    allowed: &[String],
    min_channels: u8,
) -> Result<CorpusSurvey> {
    let root = ensure_dir(root)?;
    info!("Surveying corpus at {:?}", root);

    let mut survey = CorpusSurvey {
        root: root.clone(),
        ..CorpusSurvey::default()
    };

    for path in walk_files(&root)? {
        let ext = extension_of(&path).unwrap_or_default();
        *survey.extensions.entry(ext).or_insert(0) += 1;
    }

    for class in class_directories(&root)? {
        let mut class_survey = ClassSurvey {
            label: class.label.clone(),
            ..ClassSurvey::default()
        };

        let mut files: Vec<PathBuf> = walk_files(&class.path)?.collect();
        files.sort();

        for path in files {
            class_survey.files += 1;
            if !has_allowed_extension(&path, allowed) {
                continue;
            }
            class_survey.images += 1;
            if is_synthetic(&path) {
                class_survey.synthetic += 1;
            }

            match codec::load_image(&path) {
                Ok(loaded) => {
                    let color = loaded.image.color();
                    if !is_canonical(loaded.format, color, &path) {
                        class_survey.non_canonical += 1;
                    }
                    if color.channel_count() >= min_channels {
                        class_survey.multi_channel.push(path);
                    }
                }
                Err(_) => class_survey.unreadable.push(path),
            }
        }

        survey.classes.push(class_survey);
    }

    info!(
        "Survey complete: {} classes, {} images",
        survey.classes.len(),
        survey.total_images()
    );

    Ok(survey)
}
