//! Batched HTTP JSON-RPC client.
//!
//! One client per endpoint role (standard vs debug). A batch is one HTTP POST
//! of a request array; responses are re-associated by id, never by position.
//! Retry/backoff lives in the batch work executor; this layer only
//! classifies failures as retriable or fatal.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use url::Url;

use super::envelope::{match_batch, JsonRpcRequest, JsonRpcResponse, RpcCallResult, RpcError};

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Comma-separated list of endpoint URIs; later entries are failover
    /// targets rotated to after transport-level failures.
    pub provider_uri: String,
    pub timeout: Duration,
    /// When false every call goes out as its own HTTP request.
    pub batching_enabled: bool,
}

impl RpcClientConfig {
    pub fn new(provider_uri: impl Into<String>) -> Self {
        Self {
            provider_uri: provider_uri.into(),
            timeout: Duration::from_secs(30),
            batching_enabled: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.batching_enabled = enabled;
        self
    }
}

pub struct RpcClient {
    http: reqwest::Client,
    endpoints: Vec<Url>,
    active: AtomicUsize,
    next_id: AtomicU64,
    batching_enabled: bool,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcError> {
        let endpoints: Vec<Url> = config
            .provider_uri
            .split(',')
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .map(|uri| Url::parse(uri).map_err(|e| RpcError::InvalidUrl(format!("{uri}: {e}"))))
            .collect::<Result<_, _>>()?;
        if endpoints.is_empty() {
            return Err(RpcError::InvalidUrl("empty provider URI".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoints,
            active: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            batching_enabled: config.batching_enabled,
        })
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn request(&self, method: impl Into<String>, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id(), method, params)
    }

    fn endpoint(&self) -> &Url {
        &self.endpoints[self.active.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    /// Rotate to the next endpoint after a transport fault, so the retry
    /// lands on a different node when more than one is configured.
    fn rotate_endpoint(&self) {
        if self.endpoints.len() > 1 {
            let idx = self.active.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                from = %self.endpoints[idx % self.endpoints.len()],
                to = %self.endpoints[(idx + 1) % self.endpoints.len()],
                "rotating RPC endpoint after transport failure"
            );
        }
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> RpcError {
        self.rotate_endpoint();
        if e.is_timeout() {
            RpcError::Timeout(e.to_string())
        } else {
            RpcError::Transport(e.to_string())
        }
    }

    /// Issue the calls and return one classified result per request, in
    /// request order. Sent as a single POSTed array when batching is enabled
    /// and there is more than one call; serially otherwise.
    pub async fn batch_call(
        &self,
        requests: Vec<JsonRpcRequest>,
    ) -> Result<Vec<RpcCallResult>, RpcError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let responses = if self.batching_enabled && requests.len() > 1 {
            self.post_batch(&requests).await?
        } else {
            let mut out = Vec::with_capacity(requests.len());
            for request in &requests {
                out.push(self.post_single(request).await?);
            }
            out
        };

        match_batch(&requests, responses)
    }

    /// Single-call convenience over `batch_call`.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Value,
    ) -> Result<RpcCallResult, RpcError> {
        let request = self.request(method, params);
        let mut results = self.batch_call(vec![request]).await?;
        Ok(results.remove(0))
    }

    async fn post_batch(
        &self,
        requests: &[JsonRpcRequest],
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let url = self.endpoint().clone();
        let response = self
            .http
            .post(url)
            .json(requests)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let response = self.check_status(response).await?;
        response
            .json::<Vec<JsonRpcResponse>>()
            .await
            .map_err(|e| RpcError::Serialization(e.to_string()))
    }

    async fn post_single(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let url = self.endpoint().clone();
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let response = self.check_status(response).await?;
        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| RpcError::Serialization(e.to_string()))
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RpcError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        self.rotate_endpoint();
        Err(RpcError::Transport(format!("HTTP {status}: {body}")))
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoints", &self.endpoints)
            .field("batching_enabled", &self.batching_enabled)
            .finish()
    }
}
