//! Hint to function-code resolution with keyword fallback.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{EmbeddingVariant, FunctionEntry, SelectionPolicy, keyword_codes};
use crate::config::Settings;
use crate::oracle::{OracleClientTrait, OracleError};
use crate::store::{RecordStore, StoreError};

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Embedding,
    Keyword,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Keyword => write!(f, "keyword matching"),
        }
    }
}

/// Outcome of a resolution that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionResolution {
    /// At least one function matched. Entries are ranked, codes are unique.
    Resolved {
        entries: Vec<FunctionEntry>,
        source: ResolutionSource,
    },
    /// Nothing matched: proceed without a function filter.
    NoMatch,
}

/// The similarity search could not run and no keyword matched either.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] OracleError),

    #[error("Similarity search failed: {0}")]
    Search(#[from] StoreError),
}

impl ResolveError {
    /// Missing index or missing embedding support: the keyword path is the
    /// normal route, not a failure.
    fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Search(StoreError::IndexNotFound(_)) | Self::Embedding(OracleError::Unsupported(_))
        )
    }
}

/// Resolves free-text hints to building function codes.
pub struct FunctionResolver {
    oracle: Arc<dyn OracleClientTrait>,
    store: Arc<dyn RecordStore>,
    embedding_model: String,
    policy: SelectionPolicy,
    candidates: usize,
}

impl FunctionResolver {
    pub fn new(oracle: Arc<dyn OracleClientTrait>, store: Arc<dyn RecordStore>, settings: &Settings) -> Self {
        Self {
            oracle,
            store,
            embedding_model: settings.embedding_model.clone(),
            policy: settings.function_policy,
            candidates: settings.function_candidates.max(1),
        }
    }

    /// Resolves `hint` to ranked catalog entries.
    ///
    /// Runs the similarity search and applies the selection policy; when that
    /// fails or leaves nothing, falls back to the keyword table with a score
    /// of `1.0` per match.
    ///
    /// # Errors
    ///
    /// Returns the search error only when the search failed unexpectedly and
    /// the keyword table matched nothing either.
    pub fn resolve(&self, hint: &str) -> Result<FunctionResolution, ResolveError> {
        let search_error = match self.search_embeddings(hint) {
            Ok(entries) if !entries.is_empty() => {
                info!(count = entries.len(), "functions resolved via embedding");
                return Ok(FunctionResolution::Resolved {
                    entries,
                    source: ResolutionSource::Embedding,
                });
            }
            Ok(_) => {
                debug!("similarity search left no candidates");
                None
            }
            Err(e) if e.is_expected() => {
                debug!(error = %e, "similarity search unavailable");
                None
            }
            Err(e) => {
                warn!(error = %e, "similarity search failed, trying keywords");
                Some(e)
            }
        };

        let entries = self.match_keywords(hint);
        if !entries.is_empty() {
            info!(count = entries.len(), "functions resolved via keyword matching");
            return Ok(FunctionResolution::Resolved {
                entries,
                source: ResolutionSource::Keyword,
            });
        }

        match search_error {
            Some(e) => Err(e),
            None => Ok(FunctionResolution::NoMatch),
        }
    }

    fn search_embeddings(&self, hint: &str) -> Result<Vec<FunctionEntry>, ResolveError> {
        let embedding = self.oracle.embed(&self.embedding_model, hint)?;
        let variant = EmbeddingVariant::for_model(&self.embedding_model);

        let mut ranked = self
            .store
            .similarity_search(&embedding, variant, self.candidates)?;
        ranked.sort_by(|a, b| {
            b.similarity_score
                .unwrap_or(f64::MIN)
                .total_cmp(&a.similarity_score.unwrap_or(f64::MIN))
        });
        dedup_codes(&mut ranked);

        Ok(self.policy.select(ranked))
    }

    /// Keyword matches, named from the catalog when it is reachable.
    ///
    /// With a reachable catalog, codes it does not know are dropped. Without
    /// one, the matched keyword stands in for the name.
    fn match_keywords(&self, hint: &str) -> Vec<FunctionEntry> {
        let matches = keyword_codes(hint);
        if matches.is_empty() {
            return Vec::new();
        }

        let codes: Vec<i64> = matches.iter().map(|(_, code)| *code).collect();
        let entries = match self.store.lookup_functions(&codes) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "function lookup failed, using keywords as names");
                matches
                    .iter()
                    .map(|(keyword, code)| FunctionEntry {
                        code: *code,
                        name: (*keyword).to_string(),
                        description: String::new(),
                        similarity_score: None,
                    })
                    .collect()
            }
        };

        entries
            .into_iter()
            .map(|entry| FunctionEntry {
                similarity_score: Some(1.0),
                ..entry
            })
            .collect()
    }
}

fn dedup_codes(entries: &mut Vec<FunctionEntry>) {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert(e.code));
}
