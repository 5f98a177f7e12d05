use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use futures_util::StreamExt;
use log::debug;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;

/// Ordered text fragments ending with normal termination or one error item.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("stream went quiet for {0}s")]
    IdleTimeout(u64),

    #[error("invalid utf-8 in stream chunk")]
    InvalidUtf8,
}

/// The upstream text-generation collaborator: give it a prompt, get back a
/// lazy fragment stream. Granularity of the fragments is the generator's
/// business.
#[async_trait]
pub trait AnswerSource: Send + Sync {
    async fn open(&self, prompt: &str) -> Result<FragmentStream, UpstreamError>;
}

/// Reference implementation: POSTs the prompt to a generation backend and
/// relays the chunked response body as UTF-8 text fragments.
#[derive(Clone)]
pub struct HttpAnswerSource {
    http: Client,
    url: String,
}

impl HttpAnswerSource {
    pub fn new(url: String) -> Self {
        Self {
            http: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AnswerSource for HttpAnswerSource {
    async fn open(&self, prompt: &str) -> Result<FragmentStream, UpstreamError> {
        debug!("opening answer stream against {}", self.url);
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "message": prompt }))
            .send()
            .await?
            .error_for_status()?;

        let fragments = response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => {
                String::from_utf8(bytes.to_vec()).map_err(|_| UpstreamError::InvalidUtf8)
            }
            Err(err) => Err(UpstreamError::Request(err)),
        });
        Ok(Box::pin(fragments))
    }
}
