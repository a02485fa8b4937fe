use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;

pub mod error;
pub mod glob;

pub use error::{ParseError, ProviderError, StoreError};
pub use glob::GlobMatcher;

pub type Result<T> = anyhow::Result<T>;

/// Semantic tag for a chunk, derived from the declaration that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Protocol,
    Extension,
    Actor,
    Macro,
    Initializer,
    Deinitializer,
    Subscript,
    Typealias,
    Variable,
    Constant,
    Namespace,
    Interface,
    Document,
    Section,
    Unknown,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Struct => "struct",
            ChunkKind::Enum => "enum",
            ChunkKind::Protocol => "protocol",
            ChunkKind::Extension => "extension",
            ChunkKind::Actor => "actor",
            ChunkKind::Macro => "macro",
            ChunkKind::Initializer => "initializer",
            ChunkKind::Deinitializer => "deinitializer",
            ChunkKind::Subscript => "subscript",
            ChunkKind::Typealias => "typealias",
            ChunkKind::Variable => "variable",
            ChunkKind::Constant => "constant",
            ChunkKind::Namespace => "namespace",
            ChunkKind::Interface => "interface",
            ChunkKind::Document => "document",
            ChunkKind::Section => "section",
            ChunkKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> ChunkKind {
        match s {
            "function" => ChunkKind::Function,
            "method" => ChunkKind::Method,
            "class" => ChunkKind::Class,
            "struct" => ChunkKind::Struct,
            "enum" => ChunkKind::Enum,
            "protocol" => ChunkKind::Protocol,
            "extension" => ChunkKind::Extension,
            "actor" => ChunkKind::Actor,
            "macro" => ChunkKind::Macro,
            "initializer" => ChunkKind::Initializer,
            "deinitializer" => ChunkKind::Deinitializer,
            "subscript" => ChunkKind::Subscript,
            "typealias" => ChunkKind::Typealias,
            "variable" => ChunkKind::Variable,
            "constant" => ChunkKind::Constant,
            "namespace" => ChunkKind::Namespace,
            "interface" => ChunkKind::Interface,
            "document" => ChunkKind::Document,
            "section" => ChunkKind::Section,
            _ => ChunkKind::Unknown,
        }
    }
}

/// The unit of retrieval: a syntactically bounded fragment of a source file
/// plus the metadata the ranker depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, derived from path, qualified name, kind and start line.
    pub id: String,
    pub path: String,
    pub content: String,
    /// 1-based inclusive line range within the source file.
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    /// Names declared by this chunk. `symbols[0]` is the qualified name
    /// (`A.B.m` when nested); `symbols[1]` is the short name when they differ.
    pub symbols: Vec<String>,
    /// Names referenced from the body of this chunk.
    pub references: BTreeSet<String>,
    /// Protocol / superclass names declared in the inheritance clause.
    pub conformances: BTreeSet<String>,
    /// 16-hex-char content hash of the whole source file at parse time.
    pub file_hash: String,
    pub doc_comment: Option<String>,
    pub signature: Option<String>,
    /// `A > B > name` hierarchy path for nested declarations.
    pub breadcrumb: Option<String>,
    pub language: String,
}

impl Chunk {
    /// Short name of the chunk (last symbol component).
    pub fn name(&self) -> &str {
        self.symbols
            .last()
            .map(|s| s.rsplit('.').next().unwrap_or(s))
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnippetKind {
    MarkdownSection,
    Documentation,
}

impl SnippetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnippetKind::MarkdownSection => "markdownSection",
            SnippetKind::Documentation => "documentation",
        }
    }

    pub fn parse(s: &str) -> SnippetKind {
        match s {
            "documentation" => SnippetKind::Documentation,
            _ => SnippetKind::MarkdownSection,
        }
    }
}

/// A documentation fragment, independently searchable from the main chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    pub path: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub breadcrumb: Option<String>,
    pub language: String,
    /// Id of the chunk this snippet was extracted alongside.
    pub chunk_id: String,
    pub kind: SnippetKind,
    pub file_hash: String,
}

/// Options controlling a single hybrid search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Weight of the semantic leg in fusion; the lexical leg gets `1 - semantic_weight`.
    pub semantic_weight: f32,
    /// Glob pattern every result path must match.
    pub path_filter: Option<String>,
    /// File extensions (without dot) every result path must carry.
    pub extension_filter: Option<BTreeSet<String>>,
    /// Reciprocal-rank-fusion smoothing constant.
    pub rrf_k: usize,
    pub multi_hop: bool,
    pub multi_hop_depth: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            semantic_weight: 0.5,
            path_filter: None,
            extension_filter: None,
            rrf_k: 60,
            multi_hop: false,
            multi_hop_depth: 1,
        }
    }
}

/// A ranked retrieval result with per-leg diagnostics.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
    pub bm25_score: Option<f32>,
    pub semantic_score: Option<f32>,
    pub bm25_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
    pub is_multi_hop: bool,
    pub hop_depth: usize,
    pub exact_symbol_match: bool,
}

impl SearchResult {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk,
            score,
            bm25_score: None,
            semantic_score: None,
            bm25_rank: None,
            semantic_rank: None,
            is_multi_hop: false,
            hop_depth: 0,
            exact_symbol_match: false,
        }
    }
}

/// Multiplicative boost constants applied by the hybrid ranker.
///
/// The source-tree factors differ between historical engine variants, so all
/// of them are configurable rather than hardcoded at the call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Query term matches a declared symbol and is rare in the corpus.
    pub exact_symbol_boost: f32,
    /// Rare CamelCase query term appears verbatim in the chunk content.
    pub rare_camel_content_boost: f32,
    pub sources_boost: f32,
    pub tests_penalty: f32,
    pub archive_penalty: f32,
    pub docs_penalty: f32,
    /// Signature starts with `public `.
    pub public_api_boost: f32,
    /// Conceptual query hitting a standard-protocol extension.
    pub standard_extension_penalty: f32,
    /// Query carries CamelCase terms but the chunk has no exact match anywhere.
    pub missing_camel_penalty: f32,
    /// Document-frequency ceiling below which a term counts as rare.
    pub rare_term_threshold: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            exact_symbol_boost: 2.5,
            rare_camel_content_boost: 2.0,
            sources_boost: 1.25,
            tests_penalty: 0.8,
            archive_penalty: 0.5,
            docs_penalty: 0.9,
            public_api_boost: 1.1,
            standard_extension_penalty: 0.5,
            missing_camel_penalty: 0.3,
            rare_term_threshold: 10,
        }
    }
}

/// Counts reported by the index manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub chunk_count: usize,
    pub vector_count: usize,
    pub file_count: usize,
    pub is_consistent: bool,
}

// ── Hashing and id derivation ──

/// First 16 hex chars of the SHA-256 digest of `input`.
pub fn hash16(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

/// Stable id for an AST-derived chunk.
pub fn chunk_id(path: &str, qualified_name: &str, kind: ChunkKind, start_line: usize) -> String {
    hash16(&format!(
        "{path}:{qualified_name}:{}:{start_line}",
        kind.as_str()
    ))
}

/// Stable id for a text-window chunk, fingerprinted by its leading content.
pub fn text_chunk_id(path: &str, start_line: usize, content: &str) -> String {
    let fingerprint: String = content.chars().take(64).collect();
    hash16(&format!("{path}:{start_line}:{fingerprint}"))
}

// ── Language detection ──

/// Map a file extension to its language tag.
pub fn detect_language(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "swift" => "swift",
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "cpp",
        "m" | "mm" => "objc",
        "cs" => "csharp",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "sh" | "bash" | "zsh" => "shell",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" | "markdown" => "markdown",
        "txt" | "" => "text",
        _ => "unknown",
    }
    .to_string()
}

/// Extension (without dot, lowercased) of a path string, if any.
pub fn path_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Check if content appears to be binary (contains null bytes).
pub fn is_binary_content(content: &str) -> bool {
    content.as_bytes().iter().take(8192).any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash16_is_stable_and_16_chars() {
        let a = hash16("src/lib.rs:Foo:class:1");
        let b = hash16("src/lib.rs:Foo:class:1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn chunk_ids_differ_by_every_component() {
        let base = chunk_id("a.swift", "Foo.bar", ChunkKind::Method, 10);
        assert_ne!(base, chunk_id("b.swift", "Foo.bar", ChunkKind::Method, 10));
        assert_ne!(base, chunk_id("a.swift", "Foo.baz", ChunkKind::Method, 10));
        assert_ne!(base, chunk_id("a.swift", "Foo.bar", ChunkKind::Function, 10));
        assert_ne!(base, chunk_id("a.swift", "Foo.bar", ChunkKind::Method, 11));
    }

    #[test]
    fn text_chunk_id_uses_content_fingerprint() {
        let a = text_chunk_id("notes.txt", 1, "alpha beta gamma");
        let b = text_chunk_id("notes.txt", 1, "different content entirely");
        assert_ne!(a, b);
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            ChunkKind::Function,
            ChunkKind::Method,
            ChunkKind::Class,
            ChunkKind::Struct,
            ChunkKind::Enum,
            ChunkKind::Protocol,
            ChunkKind::Extension,
            ChunkKind::Actor,
            ChunkKind::Macro,
            ChunkKind::Initializer,
            ChunkKind::Deinitializer,
            ChunkKind::Subscript,
            ChunkKind::Typealias,
            ChunkKind::Variable,
            ChunkKind::Constant,
            ChunkKind::Namespace,
            ChunkKind::Interface,
            ChunkKind::Document,
            ChunkKind::Section,
            ChunkKind::Unknown,
        ] {
            assert_eq!(ChunkKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn detect_language_covers_routed_extensions() {
        assert_eq!(detect_language(Path::new("a/b/File.swift")), "swift");
        assert_eq!(detect_language(Path::new("x.ts")), "typescript");
        assert_eq!(detect_language(Path::new("x.yml")), "yaml");
        assert_eq!(detect_language(Path::new("README.md")), "markdown");
        assert_eq!(detect_language(Path::new("x.weird")), "unknown");
    }

    #[test]
    fn chunk_name_strips_qualification() {
        let chunk = Chunk {
            id: "x".into(),
            path: "a.swift".into(),
            content: "func m() {}".into(),
            start_line: 1,
            end_line: 1,
            kind: ChunkKind::Method,
            symbols: vec!["A.B.m".into(), "m".into()],
            references: BTreeSet::new(),
            conformances: BTreeSet::new(),
            file_hash: "0".repeat(16),
            doc_comment: None,
            signature: None,
            breadcrumb: Some("A > B > m".into()),
            language: "swift".into(),
        };
        assert_eq!(chunk.name(), "m");
    }

    #[test]
    fn binary_detection_triggers_on_null_bytes() {
        assert!(is_binary_content("abc\0def"));
        assert!(!is_binary_content("plain text"));
    }
}
