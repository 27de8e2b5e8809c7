use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::{hash::Hash, path::Path};

use crate::semantic::Embedding;
use crate::storage::{cache_key, MetadataCache};

/// A bookmark as handed over by the bookmark store, optionally carrying
/// its enrichment record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced: Option<EnhancedMetadata>,
}

impl Hash for Bookmark {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for Bookmark {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Bookmark {}

impl Bookmark {
    pub fn new(id: &str, url: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            enhanced: None,
        }
    }

    pub fn with_enhanced(mut self, enhanced: EnhancedMetadata) -> Self {
        self.enhanced = Some(enhanced);
        self
    }

    /// Enrichment description, empty when absent.
    pub fn description(&self) -> &str {
        self.enhanced
            .as_ref()
            .and_then(|e| e.description.as_deref())
            .unwrap_or_default()
    }

    /// Embedding cached on the enrichment record, if any.
    pub fn cached_embedding(&self) -> Option<&Embedding> {
        self.enhanced.as_ref().and_then(|e| e.embedding.as_ref())
    }
}

/// Enrichment data stored per bookmark in the metadata cache.
///
/// Field names follow the camelCase form the browser extension persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMetadata {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date_added: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    #[serde(default)]
    pub last_processed: i64,
}

impl EnhancedMetadata {
    /// Fresh enrichment record for a bookmark that has none yet.
    pub fn for_bookmark(bookmark: &Bookmark) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: bookmark.id.clone(),
            url: bookmark.url.clone(),
            title: bookmark.title.clone(),
            date_added: now,
            last_processed: now,
            ..Default::default()
        }
    }

    /// Copy of this record carrying `embedding`, replacing any previous one.
    pub fn with_embedding(&self, embedding: Embedding) -> Self {
        Self {
            embedding: Some(embedding),
            last_processed: chrono::Utc::now().timestamp_millis(),
            ..self.clone()
        }
    }
}

const CSV_HEADERS: [&str; 3] = ["id", "url", "title"];

#[derive(Debug, Deserialize)]
struct CsvRecord {
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
}

/// Load a bookmark export. `.csv` files need `id,url,title` headers,
/// anything else is parsed as a JSON array.
pub fn load_bookmarks(path: &Path) -> anyhow::Result<Vec<Bookmark>> {
    let is_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let bookmarks = if is_csv {
        load_csv(path)?
    } else {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read bookmarks from {}", path.display()))?;
        serde_json::from_slice::<Vec<Bookmark>>(&data)
            .with_context(|| format!("{} is not a valid bookmark export", path.display()))?
    };

    log::info!("loaded {} bookmarks from {}", bookmarks.len(), path.display());

    Ok(bookmarks)
}

fn load_csv(path: &Path) -> anyhow::Result<Vec<Bookmark>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = rdr.headers()?.clone();
    for required in CSV_HEADERS {
        if !headers.iter().any(|h| h == required) {
            bail!("{} is missing the '{required}' column", path.display());
        }
    }

    let mut bookmarks = vec![];
    for record in rdr.deserialize::<CsvRecord>() {
        let record = record?;
        bookmarks.push(Bookmark::new(&record.id, &record.url, &record.title));
    }

    Ok(bookmarks)
}

/// Fill in cached enrichment for bookmarks that lack an embedding.
///
/// A bookmark without a record takes the cached one whole. A bookmark with
/// its own record keeps it and only picks up the cached embedding.
/// Unreadable cache entries are logged and left out.
pub fn hydrate(bookmarks: &mut [Bookmark], cache: &dyn MetadataCache) {
    for bmark in bookmarks.iter_mut().filter(|b| b.cached_embedding().is_none()) {
        let cached: Option<EnhancedMetadata> = match cache.get(&cache_key(&bmark.id)) {
            Ok(cached) => cached,
            Err(err) => {
                log::warn!("skipping cached metadata for bookmark {}: {err}", bmark.id);
                continue;
            }
        };

        let Some(cached) = cached else {
            continue;
        };

        match bmark.enhanced.as_mut() {
            Some(own) => {
                if cached.embedding.is_some() {
                    own.embedding = cached.embedding;
                }
            }
            None => bmark.enhanced = Some(cached),
        }
    }
}
