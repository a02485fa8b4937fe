use crate::{ChunkStore, FileHashRecords, SnippetStore, VectorStore};
use anyhow::Result;
use quarry_core::{Chunk, IndexStatistics, Snippet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Single serialization point over the chunk, vector and snippet stores.
///
/// Owns all three; search engines borrow them read-only through the `Arc`
/// accessors and never mutate. Every mutation path goes through here so the
/// chunk and vector stores cannot drift apart: after any `index` or
/// `delete_by_path` call, the two stores hold exactly the same id set.
pub struct IndexManager {
    index_dir: PathBuf,
    chunks: Arc<ChunkStore>,
    snippets: Arc<SnippetStore>,
    vectors: Arc<VectorStore>,
    file_hashes: FileHashRecords,
}

impl IndexManager {
    /// Open (or create) the index rooted at `index_dir` for embeddings of
    /// the given dimension.
    pub fn open(index_dir: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;
        let db_path = index_dir.join("chunks.db");
        Ok(Self {
            index_dir: index_dir.to_path_buf(),
            chunks: Arc::new(ChunkStore::open(&db_path)?),
            snippets: Arc::new(SnippetStore::open(&db_path)?),
            vectors: Arc::new(VectorStore::open(index_dir, dimension)?),
            file_hashes: FileHashRecords::load(&index_dir.join("file-hashes"))?,
        })
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn chunk_store(&self) -> Arc<ChunkStore> {
        Arc::clone(&self.chunks)
    }

    pub fn snippet_store(&self) -> Arc<SnippetStore> {
        Arc::clone(&self.snippets)
    }

    pub fn vector_store(&self) -> Arc<VectorStore> {
        Arc::clone(&self.vectors)
    }

    /// Upsert a chunk and its embedding together. If the vector cannot be
    /// stored, the chunk row is rolled back so neither side persists.
    pub fn index(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let existed = self.chunks.get(&chunk.id)?.is_some();
        self.chunks.upsert(chunk)?;
        if let Err(err) = self.vectors.add(&chunk.id, vector) {
            if !existed {
                self.chunks.delete(&chunk.id)?;
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn index_batch(&self, entries: &[(Chunk, Vec<f32>)]) -> Result<()> {
        for (chunk, vector) in entries {
            self.index(chunk, vector)?;
        }
        Ok(())
    }

    pub fn insert_snippets(&self, snippets: &[Snippet]) -> Result<()> {
        self.snippets.upsert_batch(snippets)
    }

    /// Remove every chunk, vector and snippet stored under `path`.
    pub fn delete_by_path(&self, path: &str) -> Result<()> {
        let ids = self.chunks.ids_for_path(path)?;
        self.chunks.delete_by_path(path)?;
        for id in &ids {
            self.vectors.delete(id);
        }
        self.snippets.delete_by_path(path)?;
        Ok(())
    }

    /// Whether no indexed file currently carries `file_hash`.
    pub fn needs_indexing(&self, file_hash: &str) -> bool {
        !self.file_hashes.contains_hash(file_hash)
    }

    /// Remember that `path` has been fully indexed at `file_hash`.
    pub fn record_indexed(&self, file_hash: &str, path: &str) -> Result<()> {
        self.file_hashes.record(path, file_hash)
    }

    pub fn recorded_hash(&self, path: &str) -> Option<String> {
        self.file_hashes.hash_for(path)
    }

    pub fn remove_file_record(&self, path: &str) -> Result<()> {
        self.file_hashes.remove(path)
    }

    pub fn statistics(&self) -> Result<IndexStatistics> {
        let chunk_count = self.chunks.count()?;
        let vector_count = self.vectors.count();
        Ok(IndexStatistics {
            chunk_count,
            vector_count,
            file_count: self.file_hashes.len(),
            is_consistent: chunk_count == vector_count,
        })
    }

    /// Durably flush the vector index and file-hash records. Chunk and
    /// snippet rows are written through on every call already.
    pub fn save(&self) -> Result<()> {
        self.vectors.save()?;
        self.file_hashes.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::ChunkKind;
    use std::collections::BTreeSet;

    const DIM: usize = 4;

    fn chunk(id: &str, path: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            path: path.to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 2,
            kind: ChunkKind::Function,
            symbols: vec![format!("sym_{id}")],
            references: BTreeSet::new(),
            conformances: BTreeSet::new(),
            file_hash: "feedbeef00000000".to_string(),
            doc_comment: None,
            signature: None,
            breadcrumb: None,
            language: "swift".to_string(),
        }
    }

    #[test]
    fn index_round_trips_both_stores() {
        let tmp = tempfile::tempdir().expect("tmp");
        let manager = IndexManager::open(tmp.path(), DIM).expect("open");
        let c = chunk("c1", "src/A.swift", "func a() {}");
        manager.index(&c, &[1.0, 0.0, 0.0, 0.0]).expect("index");

        assert_eq!(manager.chunk_store().get("c1").expect("get").expect("row"), c);
        assert!(manager.vector_store().contains("c1"));

        manager.delete_by_path("src/A.swift").expect("delete");
        assert!(manager.chunk_store().get("c1").expect("get").is_none());
        assert!(!manager.vector_store().contains("c1"));
    }

    #[test]
    fn counts_stay_consistent_across_mutations() {
        let tmp = tempfile::tempdir().expect("tmp");
        let manager = IndexManager::open(tmp.path(), DIM).expect("open");
        for i in 0..3 {
            let c = chunk(&format!("c{i}"), "src/A.swift", "func a() {}");
            manager.index(&c, &[0.1, 0.2, 0.3, 0.4]).expect("index");
        }
        manager
            .index(&chunk("d1", "src/B.swift", "func b() {}"), &[
                0.4, 0.3, 0.2, 0.1,
            ])
            .expect("index");

        let stats = manager.statistics().expect("stats");
        assert_eq!(stats.chunk_count, 4);
        assert_eq!(stats.vector_count, 4);
        assert!(stats.is_consistent);

        manager.delete_by_path("src/A.swift").expect("delete");
        let stats = manager.statistics().expect("stats");
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.vector_count, 1);
        assert!(stats.is_consistent);
    }

    #[test]
    fn failed_vector_write_rolls_back_the_chunk() {
        let tmp = tempfile::tempdir().expect("tmp");
        let manager = IndexManager::open(tmp.path(), DIM).expect("open");
        let c = chunk("c1", "src/A.swift", "func a() {}");
        let err = manager.index(&c, &[1.0, 2.0]).expect_err("wrong dim");
        assert!(err.to_string().contains("dimension mismatch"));
        assert!(manager.chunk_store().get("c1").expect("get").is_none());
        let stats = manager.statistics().expect("stats");
        assert!(stats.is_consistent);
    }

    #[test]
    fn file_hash_records_drive_needs_indexing() {
        let tmp = tempfile::tempdir().expect("tmp");
        let manager = IndexManager::open(tmp.path(), DIM).expect("open");
        assert!(manager.needs_indexing("aaaa111122223333"));
        manager
            .record_indexed("aaaa111122223333", "src/A.swift")
            .expect("record");
        assert!(!manager.needs_indexing("aaaa111122223333"));
        manager.remove_file_record("src/A.swift").expect("remove");
        assert!(manager.needs_indexing("aaaa111122223333"));
    }

    #[test]
    fn save_persists_vectors_across_reopen() {
        let tmp = tempfile::tempdir().expect("tmp");
        {
            let manager = IndexManager::open(tmp.path(), DIM).expect("open");
            manager
                .index(&chunk("c1", "src/A.swift", "func a() {}"), &[
                    0.0, 1.0, 0.0, 0.0,
                ])
                .expect("index");
            manager.save().expect("save");
        }
        let manager = IndexManager::open(tmp.path(), DIM).expect("reopen");
        let stats = manager.statistics().expect("stats");
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.vector_count, 1);
        assert!(stats.is_consistent);
    }
}
