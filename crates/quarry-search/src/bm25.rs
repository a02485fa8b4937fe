use anyhow::Result;
use quarry_store::ChunkStore;
use std::sync::Arc;

/// Thin lexical adapter over the chunk store's full-text index.
pub struct Bm25Search {
    chunks: Arc<ChunkStore>,
}

impl Bm25Search {
    pub fn new(chunks: Arc<ChunkStore>) -> Self {
        Self { chunks }
    }

    /// BM25 hits for `query`, best first, no further transformation.
    pub fn search_raw(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        self.chunks.search_fts(query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{Chunk, ChunkKind};
    use std::collections::BTreeSet;

    #[test]
    fn raw_search_passes_store_scores_through() {
        let store = Arc::new(ChunkStore::open_in_memory().expect("store"));
        store
            .upsert(&Chunk {
                id: "c1".into(),
                path: "src/A.swift".into(),
                content: "func resolveTarget() {}".into(),
                start_line: 1,
                end_line: 1,
                kind: ChunkKind::Function,
                symbols: vec!["resolveTarget".into()],
                references: BTreeSet::new(),
                conformances: BTreeSet::new(),
                file_hash: "00ff00ff00ff00ff".into(),
                doc_comment: None,
                signature: None,
                breadcrumb: None,
                language: "swift".into(),
            })
            .expect("upsert");

        let search = Bm25Search::new(store);
        let hits = search.search_raw("resolveTarget", 5).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "c1");
        assert!(hits[0].1 > 0.0);
    }
}
