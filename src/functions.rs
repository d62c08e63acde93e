//! Building function resolution.
//!
//! Turns a free-text hint ("Schulen", "Bürogebäude") into a ranked list of
//! function catalog codes. The resolver tries a similarity search over
//! precomputed description embeddings first and falls back to a fixed
//! keyword table.

mod keywords;
mod policy;
mod resolver;

use serde::{Deserialize, Serialize};

pub use keywords::{KEYWORD_CODES, keyword_codes};
pub use policy::SelectionPolicy;
pub use resolver::{FunctionResolution, FunctionResolver, ResolutionSource, ResolveError};

/// One entry of the building function catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub code: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Similarity to the hint; `1.0` for keyword matches, absent for lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
}

/// Which precomputed description embedding to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingVariant {
    Small,
    Large,
}

impl EmbeddingVariant {
    /// Picks the variant matching an embedding model name.
    ///
    /// Names containing `large` use the large embeddings, everything else the
    /// small ones.
    pub fn for_model(model: &str) -> Self {
        if model.to_lowercase().contains("large") {
            Self::Large
        } else {
            Self::Small
        }
    }

    /// Catalog column holding this variant's embeddings.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Small => "description_embedding_small",
            Self::Large => "description_embedding_large",
        }
    }

    /// Vector index over this variant's embeddings.
    pub fn index_name(&self) -> &'static str {
        match self {
            Self::Small => "function_embeddings_small",
            Self::Large => "function_embeddings_large",
        }
    }
}

impl std::fmt::Display for EmbeddingVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Large => write!(f, "large"),
        }
    }
}
