//! # Corpus Curator
//!
//! Curation pipeline for labeled image corpora laid out as one directory per
//! class. It gets a scraped corpus ready for classifier training.
//!
//! ## Stages
//!
//! 1. **Purge**: delete non-image files
//! 2. **Repair**: delete undecodable images, re-encode softly corrupt ones
//! 3. **Standardize**: RGB JPEG with a `.jpg` extension everywhere
//! 4. **Balance**: augmented `aug_` copies until every class reaches its target
//! 5. **Filter**: quarantine images whose content does not match their label
//!
//! ## Modules
//!
//! - `corpus`: walker, codec, integrity, standardizer, augmentation, balancer, survey
//! - `semantic`: scorer boundary and the outlier filter
//! - `pipeline`: stage orchestration and the run report
//! - `config`: serde-backed configuration
//! - `utils`: logging and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use corpus_curator::{CurationConfig, CurationPipeline, PrecomputedScores};
//! use corpus_curator::corpus::rng_from_seed;
//!
//! let config = CurationConfig::from_file("curation.json".as_ref())?;
//! let scores = PrecomputedScores::from_file("scores.json".as_ref())?;
//! let mut rng = rng_from_seed(config.balance.seed);
//!
//! let report = CurationPipeline::new(config)
//!     .with_filter(&scores, "data/quarantine".as_ref())
//!     .run("data/kfood".as_ref(), &mut rng)?;
//! ```

pub mod config;
pub mod corpus;
pub mod pipeline;
pub mod semantic;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{BalanceConfig, CurationConfig, FilterConfig};
pub use corpus::{AugmentationPolicy, Integrity};
pub use pipeline::{CurationPipeline, CurationReport, Stage};
pub use semantic::{
    EmbeddingModel, EmbeddingScorer, OutlierReport, PrecomputedScores, PromptTemplate,
    SemanticScorer,
};
pub use utils::error::{CurationError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
