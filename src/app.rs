use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::bookmarks::{self, Bookmark};
use crate::config::Config;
use crate::semantic::{BackendProvider, FastembedProvider, SemanticSearch};
use crate::storage::{LocalCache, MetadataCache};

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub bookmarks_path: PathBuf,
    pub cache_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: PathBuf, bookmarks_path: Option<PathBuf>) -> Self {
        Self {
            bookmarks_path: bookmarks_path.unwrap_or_else(|| base_path.join("bookmarks.json")),
            cache_path: base_path.join("cache"),
            base_path,
        }
    }

    /// Resolve paths from CLI overrides, `MARKLENS_BASE_PATH` or the home directory.
    pub fn resolve(base_path: Option<PathBuf>, bookmarks_path: Option<PathBuf>) -> Result<Self> {
        let base_path = match base_path {
            Some(path) => path,
            None => Self::default_base_path()?,
        };

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(Self::new(base_path, bookmarks_path))
    }

    fn default_base_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("MARKLENS_BASE_PATH") {
            return Ok(PathBuf::from(path));
        }

        let home = my_home()
            .ok()
            .flatten()
            .context("Could not determine home directory")?;

        Ok(home.join(".local/share/marklens"))
    }
}

/// Everything a command needs: config, cache and the search engine.
pub struct App {
    pub config: Config,
    pub paths: AppPaths,
    pub cache: Arc<dyn MetadataCache>,
    pub engine: SemanticSearch,
}

impl App {
    pub fn new(paths: AppPaths) -> Result<Self> {
        let config = Config::load_with(&paths.base_path)?;
        Self::with_config(config, paths)
    }

    pub fn with_config(config: Config, paths: AppPaths) -> Result<Self> {
        let cache: Arc<dyn MetadataCache> = Arc::new(
            LocalCache::new(&paths.cache_path).context("Failed to create metadata cache")?,
        );

        let provider = Self::provider(&config, &paths.base_path);
        let engine = SemanticSearch::new(provider, cache.clone());

        Ok(Self {
            config,
            paths,
            cache,
            engine,
        })
    }

    fn provider(config: &Config, base_path: &Path) -> Option<Box<dyn BackendProvider>> {
        let sem = &config.semantic_search;
        if !sem.enabled {
            log::info!("semantic search disabled, using lexical matching only");
            return None;
        }

        let provider = FastembedProvider::new(
            &sem.model,
            base_path.to_path_buf(),
            Duration::from_secs(sem.download_timeout_secs),
        )
        .with_download_progress(sem.show_download_progress);

        Some(Box::new(provider))
    }

    /// Bookmarks from the configured export, hydrated from the metadata cache.
    pub fn load_bookmarks(&self) -> Result<Vec<Bookmark>> {
        let mut bmarks = bookmarks::load_bookmarks(&self.paths.bookmarks_path)?;
        bookmarks::hydrate(&mut bmarks, self.cache.as_ref());
        Ok(bmarks)
    }
}
