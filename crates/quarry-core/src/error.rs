use thiserror::Error;

/// Parse-stage failures. Recovered at the indexing boundary: the pipeline
/// logs the offending path and continues with the next file.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("invalid syntax in {path}: {detail}")]
    InvalidSyntax { path: String, detail: String },
    #[error("unsupported extension: {path}")]
    UnsupportedExtension { path: String },
    #[error("empty content: {path}")]
    EmptyContent { path: String },
    #[error("parsing failed for {path}: {detail}")]
    ParsingFailed { path: String, detail: String },
}

/// Embedding / LLM provider failures. Recovered inside the provider chain;
/// only `AllProvidersFailed` escapes to the caller.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider {id} is not available")]
    NotAvailable { id: String },
    #[error("invalid input for provider {id}: {detail}")]
    InvalidInput { id: String, detail: String },
    #[error("provider {id} returned {code}: {message}")]
    Api { id: String, code: u16, message: String },
    #[error("network error from provider {id}: {detail}")]
    Network { id: String, detail: String },
    #[error("provider {id} rate limited")]
    RateLimited {
        id: String,
        retry_after_secs: Option<u64>,
    },
    #[error("provider {id} timed out after {seconds}s")]
    Timeout { id: String, seconds: u64 },
    #[error("all providers failed: {summary}")]
    AllProvidersFailed { summary: String },
}

/// Store failures surface to the caller. A dimension mismatch is a
/// programmer error rather than an environmental one.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("index corruption: {detail}")]
    Corruption { detail: String },
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
