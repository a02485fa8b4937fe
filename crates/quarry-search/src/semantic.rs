use anyhow::Result;
use quarry_core::{Chunk, ChunkKind};
use quarry_providers::EmbeddingProvider;
use quarry_store::{ChunkStore, VectorStore};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Phrases that signal the user is asking who implements something.
const IMPLEMENTATION_PHRASES: &[&str] = &[
    "implement",
    "implements",
    "implementing",
    "conforms to",
    "conforming to",
    "inherits",
    "inheriting",
    "extends",
    "subclass of",
    "child of",
];

/// Query shapes whose following token names the type being asked about.
static TARGET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)what\s+implements\s+(\w+)",
        r"(?i)which\s+implements\s+(\w+)",
        r"(?i)find\s+implementations\s+of\s+(\w+)",
        r"(?i)classes\s+that\s+implement\s+(\w+)",
        r"(?i)structs\s+that\s+implement\s+(\w+)",
        r"(?i)types\s+that\s+implement\s+(\w+)",
        r"(?i)conforms\s+to\s+(\w+)",
        r"(?i)inherits\s+from\s+(\w+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("target pattern"))
    .collect()
});

static PASCAL_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-zA-Z0-9]+\b").expect("pascal pattern"));

/// What a raw query reveals about the user's intent; drives the metadata
/// rerank of semantic candidates.
#[derive(Debug, Clone, Default)]
pub struct QueryIntent {
    pub asks_about_implementation: bool,
    pub target_types: Vec<String>,
    pub mentions_protocol: bool,
    pub preferred_kinds: Vec<ChunkKind>,
}

impl QueryIntent {
    pub fn needs_reranking(&self) -> bool {
        self.asks_about_implementation
            || !self.target_types.is_empty()
            || self.mentions_protocol
            || !self.preferred_kinds.is_empty()
    }
}

pub fn analyze_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();

    let asks_about_implementation = IMPLEMENTATION_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase));

    let mut target_types: Vec<String> = Vec::new();
    for pattern in TARGET_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(query) {
            let target = capitalize_first(&captures[1]);
            if !target_types.contains(&target) {
                target_types.push(target);
            }
        }
    }
    for token in PASCAL_CASE.find_iter(query) {
        let token = token.as_str().to_string();
        if !target_types.contains(&token) {
            target_types.push(token);
        }
    }

    let mentions_protocol = lower.contains("protocol");

    let mut preferred_kinds = Vec::new();
    for (needle, kind) in [
        ("protocol", ChunkKind::Protocol),
        ("class", ChunkKind::Class),
        ("struct", ChunkKind::Struct),
        ("actor", ChunkKind::Actor),
    ] {
        if lower.contains(needle) {
            preferred_kinds.push(kind);
        }
    }

    QueryIntent {
        asks_about_implementation,
        target_types,
        mentions_protocol,
        preferred_kinds,
    }
}

fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Semantic leg: embed the query, over-fetch nearest neighbors, and rerank
/// them by declaration metadata when the query shape calls for it.
pub struct SemanticSearch {
    chunks: Arc<ChunkStore>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl SemanticSearch {
    pub fn new(
        chunks: Arc<ChunkStore>,
        vectors: Arc<VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            chunks,
            vectors,
            embeddings,
        }
    }

    pub fn search_raw(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let vector = self.embeddings.embed(query)?;
        let candidates = self.vectors.search(&vector, limit.saturating_mul(2))?;

        let intent = analyze_intent(query);
        if !intent.needs_reranking() {
            return Ok(candidates.into_iter().take(limit).collect());
        }

        let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
        let chunk_map: HashMap<String, Chunk> = self
            .chunks
            .get_by_ids(&ids)?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut adjusted: Vec<(String, f32)> = candidates
            .into_iter()
            .map(|(id, similarity)| {
                let boost = chunk_map
                    .get(&id)
                    .map(|chunk| intent_boost(chunk, &intent))
                    .unwrap_or(1.0);
                (id, similarity * boost)
            })
            .collect();
        adjusted.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        adjusted.truncate(limit);
        Ok(adjusted)
    }
}

/// Multiplicative adjustment for one candidate under the analyzed intent.
fn intent_boost(chunk: &Chunk, intent: &QueryIntent) -> f32 {
    let mut boost = 1.0f32;

    for target in &intent.target_types {
        let target_lower = target.to_lowercase();
        if chunk
            .conformances
            .iter()
            .any(|c| c.to_lowercase().contains(&target_lower))
        {
            boost *= 1.5;
        } else if chunk.symbols.iter().any(|s| s.contains(target.as_str())) {
            boost *= 1.2;
        }
    }
    if intent.preferred_kinds.contains(&chunk.kind) {
        boost *= 1.3;
    }
    if intent.mentions_protocol && chunk.kind == ChunkKind::Protocol {
        boost *= 1.3;
    }
    if intent.asks_about_implementation
        && chunk.kind != ChunkKind::Protocol
        && !chunk.conformances.is_empty()
    {
        boost *= 1.2;
    }
    boost
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_providers::MockEmbeddings;
    use std::collections::BTreeSet;

    fn chunk(id: &str, kind: ChunkKind, symbols: &[&str], conformances: &[&str]) -> Chunk {
        Chunk {
            id: id.to_string(),
            path: format!("src/{id}.swift"),
            content: format!("declaration body of {id}"),
            start_line: 1,
            end_line: 3,
            kind,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            references: BTreeSet::new(),
            conformances: conformances.iter().map(|s| s.to_string()).collect(),
            file_hash: "1234abcd1234abcd".to_string(),
            doc_comment: None,
            signature: None,
            breadcrumb: None,
            language: "swift".to_string(),
        }
    }

    #[test]
    fn intent_detects_implementation_questions() {
        let intent = analyze_intent("what implements ChunkStore");
        assert!(intent.asks_about_implementation);
        assert!(intent.target_types.contains(&"ChunkStore".to_string()));
        assert!(intent.needs_reranking());
    }

    #[test]
    fn intent_capitalizes_pattern_targets() {
        let intent = analyze_intent("which types conforms to cache");
        assert!(intent.target_types.contains(&"Cache".to_string()));
    }

    #[test]
    fn intent_collects_pascal_case_tokens() {
        let intent = analyze_intent("where is VectorStore saved");
        assert!(intent.target_types.contains(&"VectorStore".to_string()));
    }

    #[test]
    fn intent_prefers_named_kinds() {
        let intent = analyze_intent("protocol for storage classes");
        assert!(intent.mentions_protocol);
        assert!(intent.preferred_kinds.contains(&ChunkKind::Protocol));
        assert!(intent.preferred_kinds.contains(&ChunkKind::Class));
    }

    #[test]
    fn plain_queries_skip_reranking() {
        let intent = analyze_intent("read configuration file");
        assert!(!intent.needs_reranking());
    }

    #[test]
    fn conforming_candidates_outrank_others_for_implementation_queries() {
        let chunks = Arc::new(ChunkStore::open_in_memory().expect("store"));
        let tmp = tempfile::tempdir().expect("tmp");
        let vectors = Arc::new(VectorStore::open(tmp.path(), 32).expect("vectors"));
        let embeddings = Arc::new(MockEmbeddings::new(32));

        // Identical content pins both cosine similarities to 1.0, leaving
        // the metadata rerank as the only discriminator.
        let mut conforming = chunk("impl", ChunkKind::Class, &["DiskCache"], &["Cache"]);
        let mut unrelated = chunk("other", ChunkKind::Class, &["Totally"], &[]);
        conforming.content = "what implements Cache".to_string();
        unrelated.content = "what implements Cache".to_string();
        chunks.upsert(&conforming).expect("upsert");
        chunks.upsert(&unrelated).expect("upsert");
        vectors
            .add("impl", &embeddings.embed(&conforming.content).expect("embed"))
            .expect("add");
        vectors
            .add("other", &embeddings.embed(&unrelated.content).expect("embed"))
            .expect("add");

        let search = SemanticSearch::new(chunks, vectors, embeddings);
        let hits = search.search_raw("what implements Cache", 2).expect("search");
        assert_eq!(hits[0].0, "impl");
    }

    #[test]
    fn intent_boost_multiplies_metadata_signals() {
        let intent = analyze_intent("what protocol classes implement Cache");
        let conforming = chunk("a", ChunkKind::Class, &["DiskCache"], &["Cache"]);
        let protocol = chunk("b", ChunkKind::Protocol, &["Cache"], &[]);
        let plain = chunk("c", ChunkKind::Function, &["helper"], &[]);
        assert!(intent_boost(&conforming, &intent) > intent_boost(&plain, &intent));
        assert!(intent_boost(&protocol, &intent) > 1.0);
    }
}
