use quarry_core::{ProviderError, SearchResult};
use quarry_providers::{COMPLETION_TIMEOUT, ChatMessage, EXPANSION_TIMEOUT, LlmChain};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A query enriched with model-suggested synonyms, concepts and rephrasings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub original: String,
    pub synonyms: Vec<String>,
    pub concepts: Vec<String>,
    pub variations: Vec<String>,
    pub all_terms: Vec<String>,
    pub combined_query: String,
}

#[derive(Default, Deserialize)]
struct ExpansionPayload {
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    concepts: Vec<String>,
    #[serde(default)]
    variations: Vec<String>,
}

/// LLM-backed query expansion with a per-query result cache. Callers treat a
/// failed expansion as a soft miss and search with the raw query.
pub struct QueryExpander {
    llm: LlmChain,
    timeout: Duration,
    cache: Mutex<HashMap<String, ExpandedQuery>>,
}

impl QueryExpander {
    pub fn new(llm: LlmChain) -> Self {
        Self {
            llm,
            timeout: EXPANSION_TIMEOUT,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn expand(&self, query: &str) -> Result<ExpandedQuery, ProviderError> {
        if let Some(cached) = self.cache.lock().expect("expansion cache").get(query) {
            return Ok(cached.clone());
        }

        let messages = [
            ChatMessage::system(
                "You expand code-search queries. Reply with a JSON object holding \
                 string arrays \"synonyms\", \"concepts\" and \"variations\". No prose.",
            ),
            ChatMessage::user(format!("Expand this code search query: {query}")),
        ];
        let reply = self.llm.complete(&messages, None, self.timeout)?;
        let expanded = build_expansion(query, &reply);
        self.cache
            .lock()
            .expect("expansion cache")
            .insert(query.to_string(), expanded.clone());
        Ok(expanded)
    }
}

fn build_expansion(original: &str, reply: &str) -> ExpandedQuery {
    let payload = extract_json_object(reply)
        .and_then(|json| serde_json::from_str::<ExpansionPayload>(&json).ok())
        .unwrap_or_default();

    let mut all_terms: Vec<String> = Vec::new();
    for term in original
        .split_whitespace()
        .map(str::to_string)
        .chain(payload.synonyms.iter().cloned())
        .chain(payload.variations.iter().cloned())
    {
        let term = term.trim().to_string();
        if !term.is_empty() && !all_terms.contains(&term) {
            all_terms.push(term);
        }
    }
    let combined_query = all_terms.join(" ");

    ExpandedQuery {
        original: original.to_string(),
        synonyms: payload.synonyms,
        concepts: payload.concepts,
        variations: payload.variations,
        all_terms,
        combined_query,
    }
}

/// First balanced-looking JSON object in an LLM reply.
fn extract_json_object(reply: &str) -> Option<String> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| reply[start..=end].to_string())
}

/// Renders retrieved chunks into an answer via the LLM chain.
pub struct ResultSynthesizer {
    llm: LlmChain,
    timeout: Duration,
}

impl ResultSynthesizer {
    pub fn new(llm: LlmChain) -> Self {
        Self {
            llm,
            timeout: COMPLETION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn synthesize(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<String, ProviderError> {
        let context = render_context(results, 5);
        let messages = [
            ChatMessage::system(
                "You answer questions about a codebase from retrieved chunks. \
                 Cite paths and line ranges. Say when the chunks do not answer the question.",
            ),
            ChatMessage::user(format!("Question: {query}\n\nRetrieved chunks:\n{context}")),
        ];
        self.llm.complete(&messages, None, self.timeout)
    }

    /// Short list of follow-up queries the user might ask next.
    pub fn suggest_followups(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<Vec<String>, ProviderError> {
        let context = render_context(results, 3);
        let messages = [
            ChatMessage::system(
                "Given a code-search query and its top results, propose up to three \
                 follow-up search queries, one per line, nothing else.",
            ),
            ChatMessage::user(format!("Query: {query}\n\nResults:\n{context}")),
        ];
        let reply = self.llm.complete(&messages, None, self.timeout)?;
        Ok(reply
            .lines()
            .map(|line| line.trim().trim_start_matches(['-', '*', ' ']).to_string())
            .filter(|line| !line.is_empty())
            .take(3)
            .collect())
    }
}

fn render_context(results: &[SearchResult], take: usize) -> String {
    results
        .iter()
        .take(take)
        .map(|result| {
            let chunk = &result.chunk;
            let mut body: String = chunk.content.chars().take(600).collect();
            if body.len() < chunk.content.len() {
                body.push('…');
            }
            format!(
                "- {}:{}-{} ({})\n{}",
                chunk.path,
                chunk.start_line,
                chunk.end_line,
                chunk.kind.as_str(),
                body
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
