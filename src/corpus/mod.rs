//! Corpus module: the in-place curation stages
//!
//! A corpus is a root directory with one subdirectory per class label:
//!
//! ```text
//! root/
//! ├── 국/
//! │   ├── 0001.jpg
//! │   └── aug_0001_3f2a.jpg   (synthetic, made by the balancer)
//! ├── 밥/
//! │   └── ...
//! └── ...
//! ```
//!
//! Stages run as full passes in a fixed order:
//! 1. **Purge**: delete files whose extension is not an image extension
//! 2. **Repair**: delete undecodable files, re-encode softly corrupt ones
//! 3. **Standardize**: convert everything to RGB JPEG with a `.jpg` extension
//! 4. **Balance**: synthesize augmented copies until each class reaches its target
//!
//! Semantic outlier filtering runs last and lives in [`crate::semantic`].

pub mod augmentation;
pub mod balance;
pub mod codec;
pub mod inspect;
pub mod integrity;
pub mod standardize;
pub mod survey;
pub mod walker;

use image::{ColorType, ImageFormat};

pub use augmentation::AugmentationPolicy;
pub use balance::{
    balance_class, balance_corpus, rng_from_seed, BalanceReport, BalanceStatus, ClassBalance,
};
pub use integrity::{classify_file, repair_corpus, Integrity, IntegrityReport};
pub use standardize::{
    standardize_corpus, standardize_file, Conversion, StandardizeOutcome, StandardizeReport,
};
pub use survey::{survey_corpus, ClassSurvey, CorpusSurvey};
pub use walker::{class_directories, purge_non_images, walk_files, ClassDir, PurgeReport};

/// Container format every artifact written by the pipeline uses
pub const CANONICAL_FORMAT: ImageFormat = ImageFormat::Jpeg;

/// Color mode every artifact written by the pipeline uses
pub const CANONICAL_COLOR: ColorType = ColorType::Rgb8;

/// File extension for canonical images
pub const CANONICAL_EXTENSION: &str = "jpg";

/// JPEG quality used for repairs, conversions and synthetic images
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Filename prefix marking balancer output
pub const SYNTHETIC_PREFIX: &str = "aug_";

/// Extensions treated as image candidates unless configured otherwise
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

/// Default collision-suffix search bound (`name_1.jpg` .. `name_N.jpg`)
pub const DEFAULT_MAX_COLLISION_ATTEMPTS: usize = 10_000;
