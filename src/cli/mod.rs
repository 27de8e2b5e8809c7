use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory (config.yaml, cache/, models/).
    /// Defaults to $MARKLENS_BASE_PATH or ~/.local/share/marklens
    #[clap(long, global = true)]
    pub base_path: Option<PathBuf>,

    /// Bookmark export to search (.json or .csv).
    /// Defaults to bookmarks.json in the data directory
    #[clap(short, long, global = true)]
    pub bookmarks: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search bookmarks by meaning, or by substring when no model is available
    Search {
        /// Free-text query
        query: String,

        /// Number of results (defaults to semantic_search.top_k)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Skip the embedding model and match substrings only
        #[clap(long, default_value = "false")]
        lexical: bool,

        /// Include relevance scores and the strategy used
        #[clap(long, default_value = "false")]
        scores: bool,
    },

    /// Precompute embeddings for every bookmark
    Embed {
        /// Recompute embeddings that are already cached
        #[clap(short, long, default_value = "false")]
        force: bool,
    },

    /// Print the cosine similarity of two texts
    Similarity { a: String, b: String },

    /// Load (and download if needed) the embedding model
    Init {},
}
