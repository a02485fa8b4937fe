use anyhow::Result;
use ignore::WalkBuilder;
use quarry_core::{Chunk, GlobMatcher, hash16, is_binary_content};
use quarry_parser::{ParserConfig, parse_source};
use quarry_providers::EmbeddingProvider;
use quarry_store::IndexManager;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

mod watcher;

pub use watcher::FileWatcher;

/// A debounced file-system change delivered to the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Created(path) | FileEvent::Modified(path) | FileEvent::Deleted(path) => path,
        }
    }
}

/// Filtering and debouncing knobs for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Extensions (without dot) the indexer ingests.
    pub include_extensions: BTreeSet<String>,
    /// Glob patterns for paths to skip.
    pub exclude_patterns: Vec<String>,
    pub watch_debounce_ms: u64,
    pub parser: ParserConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let include_extensions = [
            "swift", "c", "h", "cpp", "cc", "cxx", "hpp", "m", "mm", "java", "js", "jsx", "ts",
            "tsx", "go", "cs", "kt", "json", "yaml", "yml", "md", "markdown", "txt",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self {
            include_extensions,
            exclude_patterns: vec![
                "**/.build/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
            ],
            watch_debounce_ms: 500,
            parser: ParserConfig::default(),
        }
    }
}

/// Running totals for one indexer instance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexerStats {
    pub files_created: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub chunks_added: usize,
    pub snippets_added: usize,
    pub errors: usize,
}

/// Consumes file events and drives the parse → embed → persist pipeline.
///
/// All store mutation goes through the owned `IndexManager`. A failure on one
/// file is logged and counted, never aborting the event loop.
pub struct IncrementalIndexer {
    manager: Arc<IndexManager>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: IndexerConfig,
    glob: GlobMatcher,
    stats: Mutex<IndexerStats>,
}

impl IncrementalIndexer {
    pub fn new(
        manager: Arc<IndexManager>,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            manager,
            embeddings,
            config,
            glob: GlobMatcher::new(),
            stats: Mutex::new(IndexerStats::default()),
        }
    }

    pub fn manager(&self) -> Arc<IndexManager> {
        Arc::clone(&self.manager)
    }

    pub fn stats(&self) -> IndexerStats {
        self.stats.lock().expect("indexer stats poisoned").clone()
    }

    /// Drain the event channel until it disconnects.
    pub fn run(&self, events: std::sync::mpsc::Receiver<FileEvent>) {
        for event in events {
            self.handle_event(&event);
        }
    }

    /// Apply one event. Create ingests, modify replaces wholesale
    /// (delete-then-insert), delete removes every trace of the path.
    pub fn handle_event(&self, event: &FileEvent) {
        if !self.should_process(event.path()) {
            return;
        }
        let path_str = event.path().to_string_lossy().to_string();
        let outcome = match event {
            FileEvent::Created(path) => self.ingest(path, false).map(|counts| (counts, "created")),
            FileEvent::Modified(path) => self.ingest(path, true).map(|counts| (counts, "modified")),
            FileEvent::Deleted(_) => self
                .remove(&path_str)
                .map(|_| ((0, 0), "deleted")),
        };
        match outcome {
            Ok(((chunks, snippets), action)) => {
                let mut stats = self.stats.lock().expect("indexer stats poisoned");
                match action {
                    "created" => stats.files_created += 1,
                    "modified" => stats.files_modified += 1,
                    _ => stats.files_deleted += 1,
                }
                stats.chunks_added += chunks;
                stats.snippets_added += snippets;
            }
            Err(err) => {
                tracing::warn!(path = %path_str, %err, "indexing failed, continuing");
                self.stats.lock().expect("indexer stats poisoned").errors += 1;
            }
        }
    }

    /// Walk `root` and ingest every file passing the filters. Unchanged
    /// files (same content hash) are skipped. Parsing fans out across cores;
    /// store writes stay serialized through the manager.
    pub fn index_directory(&self, root: &Path) -> Result<IndexerStats> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in WalkBuilder::new(root).require_git(false).build() {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if self.should_process(entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }

        struct ParsedFile {
            path: String,
            file_hash: String,
            chunks: Vec<Chunk>,
            snippets: Vec<quarry_core::Snippet>,
        }

        let parsed: Vec<Result<Option<ParsedFile>, String>> = files
            .par_iter()
            .map(|path| {
                let path_str = path.to_string_lossy().to_string();
                let content = std::fs::read_to_string(path)
                    .map_err(|err| format!("{path_str}: {err}"))?;
                if is_binary_content(&content) {
                    return Ok(None);
                }
                let file_hash = hash16(&content);
                if self.manager.recorded_hash(&path_str).as_deref() == Some(file_hash.as_str()) {
                    return Ok(None);
                }
                let result = parse_source(&path_str, &content, &self.config.parser);
                if let Some(err) = result.failure() {
                    return Err(format!("{path_str}: {err}"));
                }
                let (chunks, snippets) = result.into_parts();
                Ok(Some(ParsedFile {
                    path: path_str,
                    file_hash,
                    chunks,
                    snippets,
                }))
            })
            .collect();

        for item in parsed {
            match item {
                Ok(None) => {}
                Ok(Some(file)) => match self.persist(&file.path, &file.file_hash, file.chunks, file.snippets) {
                    Ok((chunks, snippets)) => {
                        let mut stats = self.stats.lock().expect("indexer stats poisoned");
                        stats.files_created += 1;
                        stats.chunks_added += chunks;
                        stats.snippets_added += snippets;
                    }
                    Err(err) => {
                        tracing::warn!(%err, "persisting parsed file failed");
                        self.stats.lock().expect("indexer stats poisoned").errors += 1;
                    }
                },
                Err(err) => {
                    tracing::warn!(%err, "parsing failed");
                    self.stats.lock().expect("indexer stats poisoned").errors += 1;
                }
            }
        }

        self.manager.save()?;
        Ok(self.stats())
    }

    fn should_process(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        if !self
            .config
            .include_extensions
            .contains(&ext.to_ascii_lowercase())
        {
            return false;
        }
        let path_str = path.to_string_lossy();
        !self
            .config
            .exclude_patterns
            .iter()
            .any(|pattern| self.glob.matches(pattern, &path_str))
    }

    fn ingest(&self, path: &Path, replace: bool) -> Result<(usize, usize)> {
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path)?;
        if is_binary_content(&content) {
            return Ok((0, 0));
        }
        let file_hash = hash16(&content);
        if !replace
            && !self.manager.needs_indexing(&file_hash)
            && self.manager.recorded_hash(&path_str).as_deref() == Some(file_hash.as_str())
        {
            return Ok((0, 0));
        }
        if replace {
            self.manager.delete_by_path(&path_str)?;
        }

        let result = parse_source(&path_str, &content, &self.config.parser);
        if let Some(err) = result.failure() {
            return Err(anyhow::Error::new(err.clone()));
        }
        let (chunks, snippets) = result.into_parts();
        self.persist(&path_str, &file_hash, chunks, snippets)
    }

    fn persist(
        &self,
        path: &str,
        file_hash: &str,
        chunks: Vec<Chunk>,
        snippets: Vec<quarry_core::Snippet>,
    ) -> Result<(usize, usize)> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = self.embeddings.embed_batch(&texts)?;
        let entries: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
        self.manager.index_batch(&entries)?;
        self.manager.insert_snippets(&snippets)?;
        self.manager.record_indexed(file_hash, path)?;
        Ok((entries.len(), snippets.len()))
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.manager.delete_by_path(path)?;
        self.manager.remove_file_record(path)?;
        Ok(())
    }
}
