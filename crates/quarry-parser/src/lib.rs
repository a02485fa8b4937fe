use quarry_core::{Chunk, ChunkKind, ParseError, Snippet, chunk_id, detect_language, hash16};
use std::collections::BTreeSet;
use std::path::Path;

mod markdown;
mod pattern;
mod swift;
mod text;

/// Tuning for the plain-text fallback chunker.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Maximum characters per text chunk.
    pub max_chunk_size: usize,
    /// Characters of overlap carried from the tail of the previous chunk.
    pub overlap_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1500,
            overlap_size: 200,
        }
    }
}

/// Outcome of parsing one source file.
#[derive(Debug)]
pub enum ParseResult {
    Chunks(Vec<Chunk>),
    ChunksWithSnippets(Vec<Chunk>, Vec<Snippet>),
    Failure(ParseError),
}

impl ParseResult {
    pub fn chunks(&self) -> &[Chunk] {
        match self {
            ParseResult::Chunks(chunks) => chunks,
            ParseResult::ChunksWithSnippets(chunks, _) => chunks,
            ParseResult::Failure(_) => &[],
        }
    }

    pub fn snippets(&self) -> &[Snippet] {
        match self {
            ParseResult::ChunksWithSnippets(_, snippets) => snippets,
            _ => &[],
        }
    }

    pub fn failure(&self) -> Option<&ParseError> {
        match self {
            ParseResult::Failure(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_parts(self) -> (Vec<Chunk>, Vec<Snippet>) {
        match self {
            ParseResult::Chunks(chunks) => (chunks, Vec::new()),
            ParseResult::ChunksWithSnippets(chunks, snippets) => (chunks, snippets),
            ParseResult::Failure(_) => (Vec::new(), Vec::new()),
        }
    }
}

/// Break one source file into chunks, routing by extension: Swift goes
/// through the tree-sitter extractor, C-family and config formats through the
/// pattern extractor, markdown through the sectioner, everything else through
/// plain-text windowing.
pub fn parse_source(path: &str, content: &str, config: &ParserConfig) -> ParseResult {
    if content.is_empty() {
        return ParseResult::Failure(ParseError::EmptyContent {
            path: path.to_string(),
        });
    }

    let file_hash = hash16(content);
    let language = detect_language(Path::new(path));

    match language.as_str() {
        "swift" => match swift::parse(path, content, &file_hash) {
            Ok(chunks) => ParseResult::Chunks(chunks),
            Err(err) => {
                tracing::warn!(path, %err, "swift parse degraded to whole-file chunk");
                ParseResult::Chunks(vec![document_chunk(path, content, &file_hash, &language)])
            }
        },
        "c" | "cpp" | "objc" | "java" | "javascript" | "typescript" | "go" | "csharp"
        | "kotlin" => ParseResult::Chunks(pattern::parse_code(path, content, &file_hash, &language)),
        "json" | "yaml" => {
            ParseResult::Chunks(pattern::parse_config(path, content, &file_hash, &language))
        }
        "markdown" => {
            let (chunks, snippets) = markdown::parse(path, content, &file_hash);
            ParseResult::ChunksWithSnippets(chunks, snippets)
        }
        _ => ParseResult::Chunks(text::chunk_text(path, content, &file_hash, &language, config)),
    }
}

/// Whole-file fallback chunk for inputs nothing structural could be read from.
fn document_chunk(path: &str, content: &str, file_hash: &str, language: &str) -> Chunk {
    let name = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string();
    let end_line = content.lines().count().max(1);
    Chunk {
        id: chunk_id(path, &name, ChunkKind::Document, 1),
        path: path.to_string(),
        content: content.to_string(),
        start_line: 1,
        end_line,
        kind: ChunkKind::Document,
        symbols: vec![name],
        references: BTreeSet::new(),
        conformances: BTreeSet::new(),
        file_hash: file_hash.to_string(),
        doc_comment: None,
        signature: None,
        breadcrumb: None,
        language: language.to_string(),
    }
}
