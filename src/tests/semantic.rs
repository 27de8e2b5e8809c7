//! Engine behaviour against a deterministic in-process backend.
//!
//! The real model is covered by the `#[ignore]`d tests at the bottom.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::bookmarks::{Bookmark, EnhancedMetadata};
use crate::semantic::{
    fallback_search, search_text, BackendProvider, EmbedOptions, Embedding, EmbeddingBackend,
    EmbeddingError, Relevance, SearchStrategy, SemanticSearch, SemanticSearchError,
};
use crate::storage::{cache_key, CacheError, MemoryCache, MetadataCache};

const VOCABULARY: [&str; 5] = ["rust", "python", "cooking", "music", "travel"];

/// Bag-of-words over a tiny vocabulary. Texts containing "poison" fail.
struct KeywordBackend {
    calls: Arc<AtomicUsize>,
    seen_options: Arc<Mutex<Vec<EmbedOptions>>>,
}

impl EmbeddingBackend for KeywordBackend {
    fn embed(&self, text: &str, options: &EmbedOptions) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_options.lock().unwrap().push(*options);

        let text = text.to_lowercase();
        if text.contains("poison") {
            return Err(EmbeddingError::EmbeddingFailed("poisoned input".to_string()));
        }

        let mut v: Vec<f32> = VOCABULARY
            .iter()
            .map(|word| text.matches(*word).count() as f32)
            .collect();
        v.push(0.1);

        if options.normalize {
            crate::semantic::embeddings::l2_normalize(&mut v);
        }

        Ok(v)
    }
}

struct Harness {
    engine: SemanticSearch,
    cache: Arc<MemoryCache>,
    calls: Arc<AtomicUsize>,
    loads: Arc<AtomicUsize>,
    seen_options: Arc<Mutex<Vec<EmbedOptions>>>,
}

impl Harness {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

/// Engine whose provider fails the first `failing_loads` loads.
fn harness_with(failing_loads: usize) -> Harness {
    let cache = Arc::new(MemoryCache::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let loads = Arc::new(AtomicUsize::new(0));
    let seen_options = Arc::new(Mutex::new(vec![]));

    let provider = {
        let calls = calls.clone();
        let loads = loads.clone();
        let seen_options = seen_options.clone();
        move || -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
            let attempt = loads.fetch_add(1, Ordering::SeqCst);
            if attempt < failing_loads {
                return Err(EmbeddingError::InitFailed("not yet".to_string()));
            }
            Ok(Box::new(KeywordBackend {
                calls: calls.clone(),
                seen_options: seen_options.clone(),
            }))
        }
    };

    let provider: Box<dyn BackendProvider> = Box::new(provider);
    let engine = SemanticSearch::new(Some(provider), cache.clone());

    Harness {
        engine,
        cache,
        calls,
        loads,
        seen_options,
    }
}

fn harness() -> Harness {
    harness_with(0)
}

fn described(id: &str, url: &str, title: &str, description: &str) -> Bookmark {
    Bookmark::new(id, url, title).with_enhanced(EnhancedMetadata {
        id: id.to_string(),
        url: url.to_string(),
        title: title.to_string(),
        description: Some(description.to_string()),
        ..Default::default()
    })
}

fn sample() -> Vec<Bookmark> {
    vec![
        described("1", "https://example.com/a", "Weekend plans", "travel guide to Lisbon"),
        described("2", "https://example.com/b", "Rust book", "learn rust the rust way"),
        Bookmark::new("3", "https://example.com/c", "Python cooking recipes"),
        described("4", "https://example.com/d", "Systems", "rust and python bindings"),
        Bookmark::new("5", "https://example.com/e", "Music theory"),
    ]
}

fn ids(bookmarks: &[Bookmark]) -> Vec<&str> {
    bookmarks.iter().map(|b| b.id.as_str()).collect()
}

#[test]
fn test_no_backend_is_lexical() {
    let engine = SemanticSearch::lexical_only(Arc::new(MemoryCache::new()));
    let bookmarks = sample();

    assert!(!engine.initialize());
    assert_eq!(engine.strategy(), SearchStrategy::Lexical);

    for (query, top_k) in [("rust", 10), ("RUST", 1), ("example.com", 3), ("nothing", 10)] {
        assert_eq!(
            ids(&engine.search(query, &bookmarks, top_k)),
            ids(&fallback_search(query, &bookmarks, top_k)),
            "query {query:?} top_k {top_k}"
        );
    }

    let outcome = engine.search_hits("rust", &bookmarks, 10);
    assert_eq!(outcome.strategy, SearchStrategy::Lexical);
    assert!(outcome.hits.iter().all(|h| h.relevance == Relevance::Matched));
}

#[test]
fn test_embed_without_backend() {
    let engine = SemanticSearch::lexical_only(Arc::new(MemoryCache::new()));
    assert!(matches!(
        engine.embed("anything"),
        Err(SemanticSearchError::ModelUnavailable)
    ));
}

#[test]
fn test_initialize_is_idempotent() {
    let h = harness();

    assert!(!h.engine.is_initialized());
    assert!(h.engine.initialize());
    assert!(h.engine.initialize());
    h.engine.search("rust", &sample(), 3);
    h.engine.embed("rust").unwrap();

    assert!(h.engine.is_initialized());
    assert_eq!(h.loads(), 1);
}

#[test]
fn test_failed_initialization_is_retried() {
    let h = harness_with(2);

    assert!(!h.engine.initialize());
    assert!(!h.engine.is_initialized());
    assert_eq!(h.engine.strategy(), SearchStrategy::Lexical);
    assert!(h.engine.initialize());
    assert_eq!(h.loads(), 3);

    assert_eq!(h.engine.strategy(), SearchStrategy::Semantic);
    assert_eq!(h.loads(), 3);
}

#[test]
fn test_embed_uses_mean_pooling_and_normalization() {
    let h = harness();
    let embedding = h.engine.embed("rust rust python").unwrap();

    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
    assert_eq!(
        h.seen_options.lock().unwrap().as_slice(),
        &[EmbedOptions::default()]
    );
}

#[test]
fn test_embed_propagates_backend_errors() {
    let h = harness();
    assert!(matches!(
        h.engine.embed("poison"),
        Err(SemanticSearchError::Embedding(EmbeddingError::EmbeddingFailed(_)))
    ));
}

#[test]
fn test_search_ranks_by_similarity() {
    let h = harness();
    let bookmarks = sample();

    let outcome = h.engine.search_hits("rust", &bookmarks, 10);
    assert_eq!(outcome.strategy, SearchStrategy::Semantic);
    assert_eq!(outcome.hits.len(), bookmarks.len());
    assert_eq!(outcome.hits[0].bookmark.id, "2");
    assert_eq!(outcome.hits[1].bookmark.id, "4");

    let scores: Vec<f32> = outcome
        .hits
        .iter()
        .map(|h| h.relevance.similarity().unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");
}

#[test]
fn test_search_top_k() {
    let h = harness();
    let bookmarks = sample();

    assert_eq!(h.engine.search("python", &bookmarks, 2).len(), 2);
    assert_eq!(h.engine.search("python", &bookmarks, 100).len(), bookmarks.len());
    assert!(h.engine.search("python", &bookmarks, 0).is_empty());
    assert!(h.engine.search("python", &[], 10).is_empty());
}

#[test]
fn test_equal_scores_keep_input_order() {
    let h = harness();
    let bookmarks: Vec<Bookmark> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| Bookmark::new(id, "", "music"))
        .collect();

    for _ in 0..3 {
        assert_eq!(
            ids(&h.engine.search("music", &bookmarks, 10)),
            vec!["a", "b", "c", "d"]
        );
    }

    // a better match jumps ahead, the tied rest keep their order
    let mut bookmarks = bookmarks;
    bookmarks.push(Bookmark::new("e", "", "music music"));
    assert_eq!(
        ids(&h.engine.search("music music", &bookmarks, 10)),
        vec!["e", "a", "b", "c", "d"]
    );
}

#[test]
fn test_search_caches_embeddings() {
    let h = harness();
    let bookmarks = sample();

    let first = h.engine.search("rust", &bookmarks, 3);
    assert_eq!(h.calls(), bookmarks.len() + 1);
    assert_eq!(h.cache.len(), bookmarks.len());

    for bmark in &bookmarks {
        let cached = h.cache.get(&cache_key(&bmark.id)).unwrap().unwrap();
        assert_eq!(cached.id, bmark.id);
        let expected = h.engine.embed(&search_text(bmark)).unwrap();
        assert_eq!(cached.embedding, Some(expected));
    }

    let calls = h.calls();
    let second = h.engine.search("rust", &bookmarks, 3);
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(h.calls(), calls + 1, "only the query is embedded again");

    // caller data is untouched
    assert!(bookmarks.iter().all(|b| b.cached_embedding().is_none()));
}

#[test]
fn test_cached_record_keeps_enrichment() {
    let h = harness();
    let bookmarks = sample();

    h.engine.search("travel", &bookmarks, 1);

    let cached = h.cache.get("bookmark_1").unwrap().unwrap();
    assert_eq!(cached.description.as_deref(), Some("travel guide to Lisbon"));
    assert!(cached.embedding.is_some());

    // bookmarks without enrichment get a fresh record
    let cached = h.cache.get("bookmark_3").unwrap().unwrap();
    assert_eq!(cached.title, "Python cooking recipes");
    assert_eq!(cached.url, "https://example.com/c");
    assert!(cached.description.is_none());
}

#[test]
fn test_search_reuses_embedding_on_bookmark() {
    let h = harness();
    let precomputed = Bookmark::new("x", "https://example.com/x", "unrelated title").with_enhanced(
        EnhancedMetadata {
            id: "x".to_string(),
            // points straight at "cooking"
            embedding: Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            ..Default::default()
        },
    );
    let bookmarks = vec![Bookmark::new("y", "", "rust"), precomputed];

    let results = h.engine.search("cooking", &bookmarks, 10);

    assert_eq!(ids(&results), vec!["x", "y"]);
    assert_eq!(h.calls(), 2, "query and the uncached bookmark only");
    assert!(h.cache.get("bookmark_x").unwrap().is_none());
}

#[test]
fn test_failed_bookmark_is_ranked_last() {
    let h = harness();
    let bookmarks = vec![
        Bookmark::new("bad", "", "poison ivy rust"),
        Bookmark::new("1", "", "python"),
        Bookmark::new("2", "", "rust"),
    ];

    let outcome = h.engine.search_hits("rust", &bookmarks, 10);

    assert_eq!(outcome.strategy, SearchStrategy::Semantic);
    let got: Vec<&str> = outcome.hits.iter().map(|h| h.bookmark.id.as_str()).collect();
    assert_eq!(got, vec!["2", "1", "bad"]);
    assert_eq!(outcome.hits[2].relevance, Relevance::Unscored);
    assert!(h.cache.get("bookmark_bad").unwrap().is_none());
}

#[test]
fn test_query_failure_falls_back() {
    let h = harness();
    let bookmarks = vec![
        Bookmark::new("1", "", "Poison dart frogs"),
        Bookmark::new("2", "", "rust"),
    ];

    let outcome = h.engine.search_hits("poison", &bookmarks, 10);
    assert_eq!(outcome.strategy, SearchStrategy::Lexical);
    assert_eq!(
        ids(&outcome.into_bookmarks()),
        ids(&fallback_search("poison", &bookmarks, 10))
    );
}

#[test]
fn test_dimension_mismatch_falls_back() {
    let h = harness();
    let corrupt = Bookmark::new("1", "https://rust-lang.org", "Rust").with_enhanced(
        EnhancedMetadata {
            id: "1".to_string(),
            embedding: Some(vec![1.0, 0.0]),
            ..Default::default()
        },
    );
    let bookmarks = vec![Bookmark::new("2", "", "python"), corrupt];

    let outcome = h.engine.search_hits("rust", &bookmarks, 10);
    assert_eq!(outcome.strategy, SearchStrategy::Lexical);
    assert_eq!(ids(&outcome.into_bookmarks()), vec!["1"]);
}

struct BrokenCache;

impl MetadataCache for BrokenCache {
    fn set(&self, _: &str, _: &EnhancedMetadata) -> Result<(), CacheError> {
        Err(CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )))
    }

    fn get(&self, _: &str) -> Result<Option<EnhancedMetadata>, CacheError> {
        Ok(None)
    }
}

#[test]
fn test_cache_failures_do_not_abort_search() {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = {
        let calls = calls.clone();
        move || -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
            Ok(Box::new(KeywordBackend {
                calls: calls.clone(),
                seen_options: Arc::new(Mutex::new(vec![])),
            }))
        }
    };
    let engine = SemanticSearch::new(Some(Box::new(provider)), Arc::new(BrokenCache));
    let bookmarks = sample();

    let outcome = engine.search_hits("rust", &bookmarks, 10);
    assert_eq!(outcome.strategy, SearchStrategy::Semantic);
    assert_eq!(outcome.hits.len(), bookmarks.len());

    let embedded = engine.batch_embed(&bookmarks);
    assert_eq!(embedded.len(), bookmarks.len());
}

#[test]
fn test_batch_embed_reports_every_item() {
    let h = harness();
    let bookmarks = vec![
        Bookmark::new("1", "", "rust"),
        Bookmark::new("2", "", "poison"),
        Bookmark::new("3", "", "music"),
    ];

    let mut progress = vec![];
    let embedded = h
        .engine
        .batch_embed_with_progress(&bookmarks, |done, total| progress.push((done, total)));

    assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);

    let got: Vec<&str> = embedded.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(got, vec!["1", "3"]);
    assert_eq!(
        embedded[0].embedding,
        h.engine.embed(&search_text(&bookmarks[0])).unwrap()
    );

    assert!(h.cache.get("bookmark_1").unwrap().unwrap().embedding.is_some());
    assert!(h.cache.get("bookmark_2").unwrap().is_none());
}

#[test]
fn test_batch_embed_without_backend() {
    let engine = SemanticSearch::lexical_only(Arc::new(MemoryCache::new()));
    let bookmarks = sample();

    let mut calls = 0;
    let embedded = engine.batch_embed_with_progress(&bookmarks, |done, total| {
        calls += 1;
        assert_eq!(done, calls);
        assert_eq!(total, bookmarks.len());
    });

    assert!(embedded.is_empty());
    assert_eq!(calls, bookmarks.len());
}

#[test]
fn test_search_after_batch_embed_does_not_recompute() {
    let h = harness();
    let bookmarks = sample();

    h.engine.batch_embed(&bookmarks);
    assert_eq!(h.calls(), bookmarks.len());

    h.engine.search("music", &bookmarks, 3);
    assert_eq!(h.calls(), bookmarks.len() + 1);
}

#[test]
fn test_engine_cosine_similarity() {
    let engine = SemanticSearch::lexical_only(Arc::new(MemoryCache::new()));
    assert!((engine.cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
    assert!(engine.cosine_similarity(&[1.0, 0.0], &[1.0]).is_err());
}

// Integration tests require model download
#[test]
#[ignore = "requires model download (~90MB)"]
fn test_fastembed_search_integration() {
    use crate::semantic::FastembedProvider;
    use std::time::Duration;

    let tmp = tempfile::tempdir().unwrap();
    let provider = FastembedProvider::new(
        "all-MiniLM-L6-v2",
        tmp.path().to_path_buf(),
        Duration::from_secs(300),
    );
    let engine = SemanticSearch::new(Some(Box::new(provider)), Arc::new(MemoryCache::new()));

    let bookmarks = vec![
        described("1", "https://ml.example.com", "Machine Learning Tutorial", "neural networks and training"),
        described("2", "https://food.example.com", "Cooking Recipes", "pasta and sauces"),
        described("3", "https://dl.example.com", "Deep Learning", "transformers and attention"),
    ];

    let results = engine.search("artificial intelligence", &bookmarks, 2);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|b| b.id != "2"));
}
