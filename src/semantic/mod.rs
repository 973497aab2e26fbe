//! Semantic module: label-consistency filtering
//!
//! Images whose content does not match their class label (screenshots, menus,
//! the wrong dish) are scored against a text prompt derived from the label and
//! quarantined when the score falls below a fixed threshold.

pub mod outlier;
pub mod scorer;

pub use outlier::{filter_outliers, ClassFilterSummary, OutlierReport, Quarantined};
pub use scorer::{
    cosine_similarity, EmbeddingModel, EmbeddingScorer, PrecomputedScores, PromptTemplate,
    ScoringInput, SemanticScorer,
};
