//! Semantic search engine for bookmark similarity search.
//!
//! - Lazily loads the embedding backend, retrying after failed loads
//! - Reuses embeddings cached on bookmarks, computes and persists missing ones
//! - Ranks by cosine similarity, degrading to lexical matching on failure
//! - Thread-safe with interior mutability for lazy initialization

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::bookmarks::{Bookmark, EnhancedMetadata};
use crate::semantic::embeddings::{BackendProvider, EmbedOptions, EmbeddingBackend, EmbeddingError};
use crate::semantic::lexical;
use crate::semantic::preprocess::search_text;
use crate::semantic::similarity::{self, SimilarityError};
use crate::semantic::Embedding;
use crate::storage::{cache_key, MetadataCache};

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("Semantic search model not available")]
    ModelUnavailable,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Similarity error: {0}")]
    Similarity(#[from] SimilarityError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which algorithm produced a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Semantic,
    Lexical,
}

/// Why a bookmark is part of a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "score")]
pub enum Relevance {
    /// Cosine similarity to the query.
    Similarity(f32),
    /// Embedding the bookmark failed; ranked after every scored bookmark.
    Unscored,
    /// Substring match from the lexical fallback.
    Matched,
}

impl Relevance {
    pub fn similarity(&self) -> Option<f32> {
        match self {
            Relevance::Similarity(score) => Some(*score),
            _ => None,
        }
    }

    fn rank_order(&self, other: &Self) -> Ordering {
        match (self.similarity(), other.similarity()) {
            (Some(a), Some(b)) => similarity::descending(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub bookmark: Bookmark,
    pub relevance: Relevance,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub strategy: SearchStrategy,
    pub hits: Vec<SearchHit>,
}

impl SearchOutcome {
    pub fn into_bookmarks(self) -> Vec<Bookmark> {
        self.hits.into_iter().map(|hit| hit.bookmark).collect()
    }
}

/// A freshly computed embedding, as returned by batch precomputation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedBookmark {
    pub id: String,
    pub embedding: Embedding,
}

/// Engine performing semantic search over bookmarks.
///
/// Without a provider the engine permanently runs in lexical mode. With one,
/// the backend is loaded on first use; a failed load is retried on the next
/// call.
pub struct SemanticSearch {
    provider: Option<Box<dyn BackendProvider>>,
    cache: Arc<dyn MetadataCache>,
    options: EmbedOptions,
    /// Lazily-loaded backend. Uses Mutex<Option<_>> instead of OnceLock
    /// because get_or_try_init is unstable.
    backend: Mutex<Option<Box<dyn EmbeddingBackend>>>,
    /// Embeddings computed during this session, by bookmark id.
    computed: Mutex<HashMap<String, Embedding>>,
}

impl SemanticSearch {
    pub fn new(provider: Option<Box<dyn BackendProvider>>, cache: Arc<dyn MetadataCache>) -> Self {
        Self {
            provider,
            cache,
            options: EmbedOptions::default(),
            backend: Mutex::new(None),
            computed: Mutex::new(HashMap::new()),
        }
    }

    /// Engine without an embedding backend; every search is lexical.
    pub fn lexical_only(cache: Arc<dyn MetadataCache>) -> Self {
        Self::new(None, cache)
    }

    /// Check if the backend has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.backend
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Load the embedding backend if it is not loaded yet.
    ///
    /// Returns whether a usable backend is active. Failures are logged and
    /// not remembered, so a later call tries again.
    pub fn initialize(&self) -> bool {
        let Some(provider) = self.provider.as_ref() else {
            log::debug!("no embedding backend configured");
            return false;
        };

        let mut guard = match self.backend.lock() {
            Ok(guard) => guard,
            Err(err) => {
                log::error!("semantic search state lock poisoned: {err}");
                return false;
            }
        };

        if guard.is_some() {
            return true;
        }

        log::info!("Initializing semantic search...");
        match provider.load() {
            Ok(backend) => {
                *guard = Some(backend);
                log::info!("Semantic search initialized successfully");
                true
            }
            Err(err) => {
                log::error!("Error initializing semantic search: {err}");
                false
            }
        }
    }

    /// Strategy the next search will use.
    pub fn strategy(&self) -> SearchStrategy {
        if self.initialize() {
            SearchStrategy::Semantic
        } else {
            SearchStrategy::Lexical
        }
    }

    /// Generate a unit-length embedding for `text`.
    pub fn embed(&self, text: &str) -> Result<Embedding, SemanticSearchError> {
        if !self.initialize() {
            return Err(SemanticSearchError::ModelUnavailable);
        }

        let guard = self
            .backend
            .lock()
            .map_err(|e| SemanticSearchError::Internal(format!("Lock poisoned: {}", e)))?;

        let backend = guard.as_ref().ok_or(SemanticSearchError::ModelUnavailable)?;

        Ok(backend.embed(text, &self.options)?)
    }

    pub fn cosine_similarity(&self, a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
        similarity::cosine_similarity(a, b)
    }

    pub fn fallback_search(&self, query: &str, bookmarks: &[Bookmark], top_k: usize) -> Vec<Bookmark> {
        lexical::fallback_search(query, bookmarks, top_k)
    }

    /// Up to `top_k` bookmarks most similar to `query`, best first.
    ///
    /// Never fails: without a working backend the result comes from
    /// [`Self::fallback_search`].
    pub fn search(&self, query: &str, bookmarks: &[Bookmark], top_k: usize) -> Vec<Bookmark> {
        self.search_hits(query, bookmarks, top_k).into_bookmarks()
    }

    /// Same as `search()` but keeps scores and the strategy used.
    pub fn search_hits(&self, query: &str, bookmarks: &[Bookmark], top_k: usize) -> SearchOutcome {
        if self.strategy() == SearchStrategy::Lexical {
            return Self::lexical_outcome(query, bookmarks, top_k);
        }

        match self.rank(query, bookmarks, top_k) {
            Ok(hits) => SearchOutcome {
                strategy: SearchStrategy::Semantic,
                hits,
            },
            Err(err) => {
                log::error!("Error in semantic search, using lexical matching: {err}");
                Self::lexical_outcome(query, bookmarks, top_k)
            }
        }
    }

    /// Embed every bookmark, caching the results.
    ///
    /// Failed bookmarks are logged and left out of the returned list.
    pub fn batch_embed(&self, bookmarks: &[Bookmark]) -> Vec<EmbeddedBookmark> {
        self.batch_embed_with_progress(bookmarks, |_, _| {})
    }

    /// Like `batch_embed()`, calling `progress(processed, total)` after
    /// every bookmark whether or not it succeeded.
    pub fn batch_embed_with_progress<F>(
        &self,
        bookmarks: &[Bookmark],
        mut progress: F,
    ) -> Vec<EmbeddedBookmark>
    where
        F: FnMut(usize, usize),
    {
        let total = bookmarks.len();
        let mut results = Vec::with_capacity(total);

        for (idx, bmark) in bookmarks.iter().enumerate() {
            match self.embed(&search_text(bmark)) {
                Ok(embedding) => {
                    self.remember(bmark, &embedding);
                    results.push(EmbeddedBookmark {
                        id: bmark.id.clone(),
                        embedding,
                    });
                }
                Err(err) => log::error!("Error embedding bookmark {}: {err}", bmark.id),
            }

            progress(idx + 1, total);
        }

        log::info!("embedded {} of {} bookmarks", results.len(), total);

        results
    }

    fn lexical_outcome(query: &str, bookmarks: &[Bookmark], top_k: usize) -> SearchOutcome {
        let hits = lexical::matching_indices(query, bookmarks, top_k)
            .into_iter()
            .map(|idx| SearchHit {
                bookmark: bookmarks[idx].clone(),
                relevance: Relevance::Matched,
            })
            .collect();

        SearchOutcome {
            strategy: SearchStrategy::Lexical,
            hits,
        }
    }

    fn rank(
        &self,
        query: &str,
        bookmarks: &[Bookmark],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SemanticSearchError> {
        let query_embedding = self.embed(query)?;

        let mut scored = Vec::with_capacity(bookmarks.len());
        for (idx, bmark) in bookmarks.iter().enumerate() {
            let relevance = match self.bookmark_embedding(bmark) {
                Ok(embedding) => Relevance::Similarity(similarity::cosine_similarity(
                    &query_embedding,
                    &embedding,
                )?),
                Err(err) => {
                    log::warn!("Error embedding bookmark {}: {err}", bmark.id);
                    Relevance::Unscored
                }
            };
            scored.push((idx, relevance));
        }

        // stable: equal scores keep input order
        scored.sort_by(|(_, a), (_, b)| a.rank_order(b));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(idx, relevance)| SearchHit {
                bookmark: bookmarks[idx].clone(),
                relevance,
            })
            .collect())
    }

    /// Cached embedding of `bmark`, computing and persisting it if missing.
    fn bookmark_embedding<'a>(
        &self,
        bmark: &'a Bookmark,
    ) -> Result<Cow<'a, [f32]>, SemanticSearchError> {
        if let Some(embedding) = bmark.cached_embedding() {
            return Ok(Cow::Borrowed(embedding.as_slice()));
        }

        if let Some(embedding) = self.computed_embedding(&bmark.id) {
            return Ok(Cow::Owned(embedding));
        }

        let embedding = self.embed(&search_text(bmark))?;
        self.remember(bmark, &embedding);

        Ok(Cow::Owned(embedding))
    }

    fn computed_embedding(&self, id: &str) -> Option<Embedding> {
        self.computed
            .lock()
            .ok()
            .and_then(|computed| computed.get(id).cloned())
    }

    /// Keep `embedding` for this session and write it to the cache.
    /// Cache failures are logged only.
    fn remember(&self, bmark: &Bookmark, embedding: &Embedding) {
        if let Ok(mut computed) = self.computed.lock() {
            computed.insert(bmark.id.clone(), embedding.clone());
        }

        let record = bmark
            .enhanced
            .clone()
            .unwrap_or_else(|| EnhancedMetadata::for_bookmark(bmark))
            .with_embedding(embedding.clone());

        if let Err(err) = self.cache.set(&cache_key(&bmark.id), &record) {
            log::warn!("failed to cache embedding for bookmark {}: {err}", bmark.id);
        }
    }
}
