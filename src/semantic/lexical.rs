//! Lexical fallback used when no embedding backend is available.
//!
//! Plain case-insensitive substring matching over title, URL and
//! enrichment description. No ranking: matches keep their input order.

use crate::bookmarks::Bookmark;

/// Whether `bookmark` contains the already lower-cased `needle`.
fn matches(bookmark: &Bookmark, needle: &str) -> bool {
    [
        bookmark.title.as_str(),
        bookmark.url.as_str(),
        bookmark.description(),
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(needle))
}

/// Indices of the first `top_k` bookmarks matching `query`.
pub(crate) fn matching_indices(query: &str, bookmarks: &[Bookmark], top_k: usize) -> Vec<usize> {
    let needle = query.to_lowercase();

    bookmarks
        .iter()
        .enumerate()
        .filter(|(_, bmark)| matches(bmark, &needle))
        .map(|(idx, _)| idx)
        .take(top_k)
        .collect()
}

/// Keep the first `top_k` bookmarks whose title, URL or description
/// contains `query`, ignoring case.
pub fn fallback_search(query: &str, bookmarks: &[Bookmark], top_k: usize) -> Vec<Bookmark> {
    matching_indices(query, bookmarks, top_k)
        .into_iter()
        .map(|idx| bookmarks[idx].clone())
        .collect()
}
