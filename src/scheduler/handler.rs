//! Payload processing contract.
//!
//! Workers know nothing about what a payload means. They hand it to a
//! `PayloadHandler` and only care whether the call succeeded.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Longest slice of a response body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Processes one job payload. `Err` marks the attempt as failed.
///
/// Handlers may be called more than once for the same payload (retries,
/// reclaimed leases), so they must be idempotent.
#[async_trait]
pub trait PayloadHandler: Send + Sync + 'static {
    async fn process(&self, payload: Value) -> anyhow::Result<()>;
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps an async closure as a `PayloadHandler`.
///
/// ```rust,ignore
/// let handler = handler_fn(|payload| async move {
///     tracing::info!(?payload, "processing");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> PayloadHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process(&self, payload: Value) -> anyhow::Result<()> {
        (self.f)(payload).await
    }
}

/// Forwards each payload as a JSON `POST` to one configured endpoint.
///
/// Any 2xx response is success. Other statuses and transport errors fail
/// the attempt.
#[derive(Debug, Clone)]
pub struct HttpPayloadHandler {
    client: Client,
    url: String,
}

impl HttpPayloadHandler {
    /// Creates a handler for `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint receiving the payloads
    /// * `request_timeout` - Per-request timeout; keep it close to the job
    ///   timeout so abandoned calls end on their own
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("hookline/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Get the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PayloadHandler for HttpPayloadHandler {
    async fn process(&self, payload: Value) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "handler endpoint returned {}: {}",
                status,
                truncate(&body, MAX_ERROR_BODY_CHARS)
            );
        }

        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
