use anyhow::Result;
use quarry_core::{GlobMatcher, Snippet};
use quarry_store::SnippetStore;
use std::sync::Arc;

/// BM25 search over documentation snippets, independent of the main ranker.
pub struct SnippetSearch {
    store: Arc<SnippetStore>,
    glob: GlobMatcher,
}

impl SnippetSearch {
    pub fn new(store: Arc<SnippetStore>) -> Self {
        Self {
            store,
            glob: GlobMatcher::new(),
        }
    }

    pub fn search_info_snippets(
        &self,
        query: &str,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Result<Vec<(Snippet, f32)>> {
        // Over-fetch when a filter may drop rows.
        let fetch = if path_filter.is_some() {
            limit.saturating_mul(3)
        } else {
            limit
        };
        let mut hits = self.store.search_fts(query, fetch)?;
        if let Some(pattern) = path_filter {
            hits.retain(|(snippet, _)| self.glob.matches(pattern, &snippet.path));
        }
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::SnippetKind;

    fn snippet(id: &str, path: &str, content: &str) -> Snippet {
        Snippet {
            id: id.to_string(),
            path: path.to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 2,
            breadcrumb: None,
            language: "markdown".to_string(),
            chunk_id: "parent".to_string(),
            kind: SnippetKind::MarkdownSection,
            file_hash: "9999aaaabbbbcccc".to_string(),
        }
    }

    #[test]
    fn path_filter_narrows_snippet_hits() {
        let store = Arc::new(SnippetStore::open_in_memory().expect("store"));
        store
            .upsert_batch(&[
                snippet("s1", "docs/setup.md", "indexing quickstart"),
                snippet("s2", "notes/setup.md", "indexing quickstart"),
            ])
            .expect("insert");

        let search = SnippetSearch::new(store);
        let all = search
            .search_info_snippets("indexing", 10, None)
            .expect("search");
        assert_eq!(all.len(), 2);

        let filtered = search
            .search_info_snippets("indexing", 10, Some("docs/**"))
            .expect("search");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0.path, "docs/setup.md");
    }
}
