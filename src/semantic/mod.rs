//! Semantic search over bookmarks.
//!
//! Embeds queries and bookmarks with a local model, ranks bookmarks by
//! cosine similarity and falls back to substring matching whenever no
//! embedding backend can be used.
//!
//! # Architecture
//!
//! - `embeddings`: Backend capability traits and the fastembed implementation
//! - `similarity`: Cosine similarity
//! - `preprocess`: Text embedded for each bookmark
//! - `lexical`: Substring fallback search
//! - `service`: The search engine tying the above together

pub mod embeddings;
mod lexical;
mod preprocess;
mod service;
mod similarity;

pub use embeddings::{
    BackendProvider, EmbedOptions, EmbeddingBackend, EmbeddingError, FastembedProvider, Pooling,
};
pub use lexical::fallback_search;
pub use preprocess::search_text;
pub use service::{
    EmbeddedBookmark, Relevance, SearchHit, SearchOutcome, SearchStrategy, SemanticSearch,
    SemanticSearchError,
};
pub use similarity::{cosine_similarity, SimilarityError};

/// An embedding vector. Only vectors from the same model are comparable.
pub type Embedding = Vec<f32>;

/// Default embedding model
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Default number of search results
pub const DEFAULT_TOP_K: usize = 10;
