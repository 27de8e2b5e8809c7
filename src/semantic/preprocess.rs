//! Embedding input for a bookmark.
//!
//! Title, enrichment description and URL joined by single spaces. Missing
//! fields contribute an empty string, so the separators are always there.

use crate::bookmarks::Bookmark;

/// Composite text embedded for `bookmark`.
pub fn search_text(bookmark: &Bookmark) -> String {
    [
        bookmark.title.as_str(),
        bookmark.description(),
        bookmark.url.as_str(),
    ]
    .join(" ")
}
