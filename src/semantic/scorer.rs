//! Semantic Scorer
//!
//! The boundary to the image-text embedding model. The outlier filter only sees
//! [`SemanticScorer`]; concrete adapters live here:
//!
//! - [`EmbeddingScorer`]: wraps any [`EmbeddingModel`] and scores by cosine
//!   similarity of the image and prompt embeddings
//! - [`PrecomputedScores`]: a JSON table of scores produced by an external run

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PROMPT_TEMPLATE;
use crate::utils::error::{CurationError, Result};

/// Text prompt with a `{}` placeholder for the class label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn has_placeholder(&self) -> bool {
        self.0.contains("{}")
    }

    /// Substitute the label for the first placeholder
    pub fn render(&self, label: &str) -> String {
        self.0.replacen("{}", label, 1)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_TEMPLATE)
    }
}

/// One file handed to a scorer
pub struct ScoringInput<'a> {
    /// Absolute path of the file
    pub path: &'a Path,
    /// Path relative to the corpus root (`label/.../name.jpg`)
    pub relative: &'a Path,
    pub image: &'a DynamicImage,
}

/// Image-text agreement score; higher means the image matches the prompt better
pub trait SemanticScorer {
    fn score(&self, input: &ScoringInput<'_>, prompt: &str) -> Result<f32>;
}

/// Joint image-text embedding model (CLIP-style)
pub trait EmbeddingModel {
    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity, `None` for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

/// Scores with an in-process embedding model
///
/// Prompt embeddings are cached for the lifetime of the scorer, since the
/// filter asks for the same prompt once per file of a class.
pub struct EmbeddingScorer<M> {
    model: M,
    text_cache: RefCell<HashMap<String, Vec<f32>>>,
}

impl<M: EmbeddingModel> EmbeddingScorer<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            text_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn text_embedding(&self, prompt: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.text_cache.borrow().get(prompt) {
            return Ok(cached.clone());
        }
        let embedding = self.model.embed_text(prompt)?;
        self.text_cache
            .borrow_mut()
            .insert(prompt.to_string(), embedding.clone());
        Ok(embedding)
    }
}

impl<M: EmbeddingModel> SemanticScorer for EmbeddingScorer<M> {
    fn score(&self, input: &ScoringInput<'_>, prompt: &str) -> Result<f32> {
        let scoring_err = |reason: String| CurationError::Scoring(input.path.to_path_buf(), reason);

        let text = self
            .text_embedding(prompt)
            .map_err(|e| scoring_err(format!("text embedding failed: {}", e)))?;
        let image = self
            .model
            .embed_image(input.image)
            .map_err(|e| scoring_err(format!("image embedding failed: {}", e)))?;

        cosine_similarity(&image, &text).ok_or_else(|| {
            scoring_err(format!(
                "incompatible embeddings ({} vs {} dimensions)",
                image.len(),
                text.len()
            ))
        })
    }
}

/// Scores computed ahead of time, keyed by corpus-relative path
///
/// ```json
/// { "밥/0001.jpg": 0.31, "밥/0002.jpg": 0.15 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrecomputedScores {
    scores: HashMap<String, f32>,
}

/// `/`-joined key for a relative path, independent of the platform separator
fn score_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl PrecomputedScores {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: HashMap<String, f32> = serde_json::from_str(json)?;
        let scores = raw
            .into_iter()
            .map(|(key, score)| (score_key(Path::new(&key)), score))
            .collect();
        Ok(Self { scores })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CurationError::PathNotFound(path.to_path_buf()));
        }
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn insert(&mut self, relative: &Path, score: f32) {
        self.scores.insert(score_key(relative), score);
    }

    pub fn get(&self, relative: &Path) -> Option<f32> {
        self.scores.get(&score_key(relative)).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl SemanticScorer for PrecomputedScores {
    fn score(&self, input: &ScoringInput<'_>, _prompt: &str) -> Result<f32> {
        self.get(input.relative).ok_or_else(|| {
            CurationError::Scoring(
                input.path.to_path_buf(),
                format!("no precomputed score for '{}'", score_key(input.relative)),
            )
        })
    }
}
