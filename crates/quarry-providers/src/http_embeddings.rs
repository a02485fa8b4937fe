use crate::EmbeddingProvider;
use quarry_core::ProviderError;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Embeddings served by an OpenAI-compatible HTTP endpoint.
pub struct HttpEmbeddingProvider {
    id: String,
    name: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    timeout: Duration,
    client: Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        id: &str,
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Network {
                id: id.to_string(),
                detail: err.to_string(),
            })?;
        Ok(Self {
            id: id.to_string(),
            name: format!("{model} via {endpoint}"),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
            dimension,
            timeout,
            client,
        })
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let payload = json!({
            "model": self.model,
            "input": texts,
        });
        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                ProviderError::Timeout {
                    id: self.id.clone(),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                ProviderError::Network {
                    id: self.id.clone(),
                    detail: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited {
                id: self.id.clone(),
                retry_after_secs,
            });
        }
        let body = response.text().map_err(|err| ProviderError::Network {
            id: self.id.clone(),
            detail: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                id: self.id.clone(),
                code: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        let parsed: EmbeddingResponse =
            serde_json::from_str(&body).map_err(|err| ProviderError::Api {
                id: self.id.clone(),
                code: status.as_u16(),
                message: format!("unparsable embedding payload: {err}"),
            })?;
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|row| row.embedding).collect();
        if vectors.len() != texts.len() {
            return Err(ProviderError::InvalidInput {
                id: self.id.clone(),
                detail: format!("asked for {} embeddings, got {}", texts.len(), vectors.len()),
            });
        }
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(ProviderError::InvalidInput {
                    id: self.id.clone(),
                    detail: format!(
                        "embedding dimension {} does not match configured {}",
                        vector.len(),
                        self.dimension
                    ),
                });
            }
        }
        Ok(vectors)
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        !self.endpoint.is_empty()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidInput {
                id: self.id.clone(),
                detail: "cannot embed empty text".to_string(),
            });
        }
        let mut vectors = self.request(&[text])?;
        Ok(vectors.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_is_unavailable() {
        let provider = HttpEmbeddingProvider::new(
            "emb",
            "",
            "text-embedding-3-small",
            None,
            384,
            Duration::from_secs(5),
        )
        .expect("provider");
        assert!(!provider.is_available());
        assert_eq!(provider.dimension(), 384);
    }

    #[test]
    fn empty_text_is_rejected_before_any_request() {
        let provider = HttpEmbeddingProvider::new(
            "emb",
            "http://127.0.0.1:1/v1/embeddings",
            "m",
            None,
            8,
            Duration::from_secs(1),
        )
        .expect("provider");
        let err = provider.embed("   ").expect_err("must fail");
        assert!(matches!(err, ProviderError::InvalidInput { .. }));
    }
}
