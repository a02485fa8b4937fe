mod assist;
mod bm25;
mod engine;
mod fusion;
mod semantic;
mod snippets;

pub use assist::{ExpandedQuery, QueryExpander, ResultSynthesizer};
pub use bm25::Bm25Search;
pub use engine::{HybridSearchEngine, SearchStores, conformance_target, is_camel_case, query_terms};
pub use fusion::{FusedHit, reciprocal_rank_fusion};
pub use semantic::{QueryIntent, SemanticSearch, analyze_intent};
pub use snippets::SnippetSearch;
