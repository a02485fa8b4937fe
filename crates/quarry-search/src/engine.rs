use crate::bm25::Bm25Search;
use crate::fusion::reciprocal_rank_fusion;
use crate::semantic::SemanticSearch;
use anyhow::{Result, anyhow};
use quarry_core::{
    Chunk, ChunkKind, GlobMatcher, RankingConfig, SearchOptions, SearchResult, path_extension,
};
use quarry_providers::EmbeddingProvider;
use quarry_store::{ChunkStore, VectorStore};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

/// Fusion weight of the conformance track relative to the lexical and
/// semantic legs.
const CONFORMANCE_WEIGHT: f32 = 3.0;
/// Seed results expanded per multi-hop level.
const MAX_HOP_SEEDS: usize = 5;
/// Lexical hits fetched per followed reference.
const HOP_FETCH: usize = 3;
/// Score decay per hop level.
const HOP_DECAY: f32 = 0.7;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "what", "how", "where", "when", "why", "which",
    "who", "that", "this", "to", "for", "of", "in", "on", "at", "by", "with", "from", "implements",
    "conforms", "types", "type", "class", "struct", "actor", "enum", "protocol", "extension",
];

const CONCEPTUAL_MARKERS: &[&str] = &["how ", "what ", "where ", "why ", "which "];
const CONCEPTUAL_PHRASES: &[&str] = &[
    "nearest neighbor",
    "vector search",
    "similarity search",
    "semantic search",
    "k-nearest",
    "knn",
    "embedding search",
];

/// Swift standard-library protocols whose extensions get demoted on
/// conceptual queries.
const STANDARD_PROTOCOLS: &[&str] = &[
    "Comparable",
    "Equatable",
    "Hashable",
    "Codable",
    "Sendable",
    "CustomStringConvertible",
    "CustomDebugStringConvertible",
    "Encodable",
    "Decodable",
    "Identifiable",
    "CaseIterable",
];

static CONFORMANCE_PROBES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bwhat\s+implements\s+(\w+)",
        r"(?i)\bwhich\s+implements\s+(\w+)",
        r"(?i)\bimplementations?\s+of\s+(\w+)",
        r"(?i)\bimplements\s+(\w+)",
        r"(?i)\bconforms?\s+to\s+(\w+)",
        r"(?i)\bconforming\s+to\s+(\w+)",
        r"(?i)\binherits?\s+from\s+(\w+)",
        r"(?i)\bsubclass(?:es)?\s+of\s+(\w+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("conformance probe pattern"))
    .collect()
});

/// The chunk + vector stores a pipeline run reads from.
#[derive(Clone)]
pub struct SearchStores {
    pub chunks: Arc<ChunkStore>,
    pub vectors: Arc<VectorStore>,
}

/// The ranking core: fuses lexical, semantic and conformance signals, applies
/// metadata boosts, optionally expands references multi-hop, and merges an
/// optional remote overlay. Holds no per-request state.
pub struct HybridSearchEngine {
    local: SearchStores,
    remote: Option<SearchStores>,
    embeddings: Arc<dyn EmbeddingProvider>,
    glob: GlobMatcher,
    ranking: RankingConfig,
}

impl HybridSearchEngine {
    pub fn new(
        chunks: Arc<ChunkStore>,
        vectors: Arc<VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            local: SearchStores { chunks, vectors },
            remote: None,
            embeddings,
            glob: GlobMatcher::new(),
            ranking: RankingConfig::default(),
        }
    }

    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    /// Attach a read-only remote overlay searched alongside the local index.
    pub fn with_remote(mut self, chunks: Arc<ChunkStore>, vectors: Arc<VectorStore>) -> Self {
        self.remote = Some(SearchStores { chunks, vectors });
        self
    }

    /// Run the full ranking pipeline for `query`.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let mut results = self.run_pipeline(&self.local, query, options)?;

        if let Some(remote) = &self.remote {
            let remote_results = self.run_pipeline(remote, query, options)?;
            results = merge_overlay(results, remote_results, options.rrf_k);
        }

        sort_results(&mut results);
        results.truncate(options.limit);
        Ok(results)
    }

    /// Search with LLM query expansion; a failed expansion silently falls
    /// back to the raw query.
    pub fn search_with_expansion(
        &self,
        query: &str,
        options: &SearchOptions,
        expander: &crate::assist::QueryExpander,
    ) -> Result<Vec<SearchResult>> {
        match expander.expand(query) {
            Ok(expanded) => self.search(&expanded.combined_query, options),
            Err(err) => {
                tracing::warn!(query, %err, "query expansion failed, searching unexpanded");
                self.search(query, options)
            }
        }
    }

    fn run_pipeline(
        &self,
        stores: &SearchStores,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let fetch_limit = options
            .limit
            .saturating_mul(5)
            .max(options.limit.saturating_mul(2))
            .max(1);

        // Conformance track: a query naming a protocol contributes a third,
        // strongly weighted ranked list.
        let conformance_hits: Vec<(String, f32)> = match conformance_target(query) {
            Some(target) => stores
                .chunks
                .find_conforming_types(&target, fetch_limit)?
                .into_iter()
                .enumerate()
                .map(|(rank, chunk)| (chunk.id, (fetch_limit.saturating_sub(rank)) as f32))
                .collect(),
            None => Vec::new(),
        };

        // Lexical and semantic legs run concurrently.
        let bm25 = Bm25Search::new(Arc::clone(&stores.chunks));
        let semantic = SemanticSearch::new(
            Arc::clone(&stores.chunks),
            Arc::clone(&stores.vectors),
            Arc::clone(&self.embeddings),
        );
        let (lexical_joined, semantic_result) = std::thread::scope(|scope| {
            let lexical = scope.spawn(|| bm25.search_raw(query, fetch_limit));
            let semantic_result = semantic.search_raw(query, fetch_limit);
            (lexical.join(), semantic_result)
        });
        let bm25_hits: Vec<(String, f32)> =
            lexical_joined.map_err(|_| anyhow!("lexical search thread panicked"))??;
        let semantic_hits: Vec<(String, f32)> = semantic_result?;

        // Weighted fusion.
        let bm25_weight = 1.0 - options.semantic_weight;
        let mut lists: Vec<(&[(String, f32)], f32)> = vec![
            (bm25_hits.as_slice(), bm25_weight),
            (semantic_hits.as_slice(), options.semantic_weight),
        ];
        if !conformance_hits.is_empty() {
            lists.push((conformance_hits.as_slice(), CONFORMANCE_WEIGHT));
        }
        let fused = reciprocal_rank_fusion(&lists, options.rrf_k);

        // Candidate assembly and filtering.
        let ids: Vec<String> = fused.iter().map(|hit| hit.id.clone()).collect();
        let chunk_map: HashMap<String, Chunk> = stores
            .chunks
            .get_by_ids(&ids)?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let bm25_scores: HashMap<&str, (usize, f32)> = bm25_hits
            .iter()
            .enumerate()
            .map(|(i, (id, score))| (id.as_str(), (i + 1, *score)))
            .collect();
        let semantic_scores: HashMap<&str, (usize, f32)> = semantic_hits
            .iter()
            .enumerate()
            .map(|(i, (id, score))| (id.as_str(), (i + 1, *score)))
            .collect();

        let mut results: Vec<SearchResult> = Vec::new();
        for hit in &fused {
            let Some(chunk) = chunk_map.get(&hit.id) else {
                continue;
            };
            if !self.passes_filters(&chunk.path, options) {
                continue;
            }
            let mut result = SearchResult::new(chunk.clone(), hit.score);
            if let Some((rank, score)) = bm25_scores.get(hit.id.as_str()) {
                result.bm25_rank = Some(*rank);
                result.bm25_score = Some(*score);
            }
            if let Some((rank, score)) = semantic_scores.get(hit.id.as_str()) {
                result.semantic_rank = Some(*rank);
                result.semantic_score = Some(*score);
            }
            results.push(result);
        }

        self.apply_ranking_boosts(query, &mut results, &stores.chunks)?;
        sort_results(&mut results);

        if options.multi_hop && options.multi_hop_depth > 0 {
            self.expand_references(stores, options, &mut results)?;
        }

        Ok(results)
    }

    /// Metadata boosts, applied in a fixed order on top of fused scores.
    fn apply_ranking_boosts(
        &self,
        query: &str,
        results: &mut [SearchResult],
        chunks: &ChunkStore,
    ) -> Result<()> {
        let cfg = &self.ranking;
        let terms = query_terms(query);
        let camel_terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| is_camel_case(t))
            .map(|t| t.to_string())
            .collect();
        let conceptual = is_conceptual_query(query);

        for result in results.iter_mut() {
            let chunk = &result.chunk;
            let mut score = result.score;

            let mut exact_boosted = false;
            for term in &terms {
                if symbol_matches(&chunk.symbols, term)
                    && chunks.term_frequency(term)? < cfg.rare_term_threshold
                {
                    score *= cfg.exact_symbol_boost;
                    result.exact_symbol_match = true;
                    exact_boosted = true;
                    break;
                }
            }
            if !exact_boosted {
                for term in &camel_terms {
                    if chunk.content.contains(term.as_str())
                        && chunks.term_frequency(term)? < cfg.rare_term_threshold
                    {
                        score *= cfg.rare_camel_content_boost;
                        result.exact_symbol_match = true;
                        break;
                    }
                }
            }

            let path = chunk.path.as_str();
            if path.contains("/Sources/") {
                score *= cfg.sources_boost;
            } else if path.contains("/Tests/") {
                score *= cfg.tests_penalty;
            } else if path.contains("/benchmarks/") || path.contains("/archive/") {
                score *= cfg.archive_penalty;
            } else if path.contains("/docs/") || path.contains("/openspec/") {
                score *= cfg.docs_penalty;
            }

            if chunk
                .signature
                .as_deref()
                .is_some_and(|s| s.starts_with("public "))
            {
                score *= cfg.public_api_boost;
            }

            if conceptual
                && chunk.kind == ChunkKind::Extension
                && chunk
                    .conformances
                    .iter()
                    .any(|c| STANDARD_PROTOCOLS.contains(&c.as_str()))
            {
                score *= cfg.standard_extension_penalty;
            }

            if !camel_terms.is_empty() {
                let has_exact_camel = camel_terms.iter().any(|term| {
                    chunk.symbols.iter().any(|s| s.contains(term.as_str()))
                        || chunk.content.contains(term.as_str())
                        || chunk.references.iter().any(|r| r.contains(term.as_str()))
                });
                if !has_exact_camel {
                    score *= cfg.missing_camel_penalty;
                }
            }

            result.score = score;
        }
        Ok(())
    }

    /// Follow the references of the top seed results through fresh lexical
    /// queries, level by level, decaying scores per hop.
    fn expand_references(
        &self,
        stores: &SearchStores,
        options: &SearchOptions,
        results: &mut Vec<SearchResult>,
    ) -> Result<()> {
        let bm25 = Bm25Search::new(Arc::clone(&stores.chunks));
        let mut seen: HashSet<String> = results.iter().map(|r| r.chunk.id.clone()).collect();
        let mut seeds: Vec<Chunk> = results
            .iter()
            .take(MAX_HOP_SEEDS)
            .map(|r| r.chunk.clone())
            .collect();

        for depth in 1..=options.multi_hop_depth {
            let decay = HOP_DECAY.powi(depth as i32);
            let mut next_seeds: Vec<Chunk> = Vec::new();
            for seed in seeds.iter().take(MAX_HOP_SEEDS) {
                for reference in &seed.references {
                    for (id, bm25_score) in bm25.search_raw(reference, HOP_FETCH)? {
                        if !seen.insert(id.clone()) {
                            continue;
                        }
                        let Some(chunk) = stores.chunks.get(&id)? else {
                            continue;
                        };
                        if !self.passes_filters(&chunk.path, options) {
                            continue;
                        }
                        let mut result = SearchResult::new(chunk.clone(), bm25_score * decay);
                        result.bm25_score = Some(bm25_score);
                        result.is_multi_hop = true;
                        result.hop_depth = depth;
                        results.push(result);
                        next_seeds.push(chunk);
                    }
                }
            }
            if next_seeds.is_empty() {
                break;
            }
            seeds = next_seeds;
        }
        Ok(())
    }

    fn passes_filters(&self, path: &str, options: &SearchOptions) -> bool {
        if let Some(pattern) = &options.path_filter
            && !self.glob.matches(pattern, path)
        {
            return false;
        }
        if let Some(extensions) = &options.extension_filter {
            let Some(ext) = path_extension(path) else {
                return false;
            };
            if !extensions.contains(&ext) {
                return false;
            }
        }
        true
    }
}

/// Fuse local and overlay results with equal weight, dropping overlay hits
/// whose path already exists locally (the local variant wins).
fn merge_overlay(
    local: Vec<SearchResult>,
    remote: Vec<SearchResult>,
    rrf_k: usize,
) -> Vec<SearchResult> {
    let local_paths: HashSet<String> = local.iter().map(|r| r.chunk.path.clone()).collect();
    let remote: Vec<SearchResult> = remote
        .into_iter()
        .filter(|r| !local_paths.contains(&r.chunk.path))
        .collect();
    if remote.is_empty() {
        return local;
    }

    let local_list: Vec<(String, f32)> = local
        .iter()
        .map(|r| (r.chunk.id.clone(), r.score))
        .collect();
    let remote_list: Vec<(String, f32)> = remote
        .iter()
        .map(|r| (r.chunk.id.clone(), r.score))
        .collect();
    let fused = reciprocal_rank_fusion(&[(local_list.as_slice(), 1.0), (remote_list.as_slice(), 1.0)], rrf_k);

    let mut by_id: HashMap<String, SearchResult> = HashMap::new();
    for result in remote {
        by_id.insert(result.chunk.id.clone(), result);
    }
    for result in local {
        by_id.insert(result.chunk.id.clone(), result);
    }

    fused
        .into_iter()
        .filter_map(|hit| {
            by_id.remove(&hit.id).map(|mut result| {
                result.score = hit.score;
                result
            })
        })
        .collect()
}

fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Target type of a conformance-shaped query, capitalized.
pub fn conformance_target(query: &str) -> Option<String> {
    for pattern in CONFORMANCE_PROBES.iter() {
        if let Some(captures) = pattern.captures(query) {
            let raw = &captures[1];
            let mut chars = raw.chars();
            let first = chars.next()?;
            return Some(first.to_uppercase().collect::<String>() + chars.as_str());
        }
    }
    None
}

/// Query split on non-alphanumerics, short tokens and stop words removed.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .filter(|t| !STOP_WORDS.contains(&t.to_lowercase().as_str()))
        .map(|t| t.to_string())
        .collect()
}

/// Identifier-shaped mixed-case token.
pub fn is_camel_case(term: &str) -> bool {
    term.len() >= 3
        && term.chars().next().is_some_and(|c| c.is_alphabetic())
        && !term.contains(' ')
        && term.chars().any(|c| c.is_uppercase())
        && term.chars().any(|c| c.is_lowercase())
}

fn is_conceptual_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    CONCEPTUAL_MARKERS.iter().any(|m| lower.contains(m))
        || CONCEPTUAL_PHRASES.iter().any(|p| lower.contains(p))
}

fn symbol_matches(symbols: &[String], term: &str) -> bool {
    symbols
        .iter()
        .any(|s| s == term || s.rsplit('.').next() == Some(term))
}
