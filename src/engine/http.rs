//! HTTP translation engine adapter.
//! Connection pooling via reqwest, per-call timeout, simple token-bucket
//! rate limiting, and a small retry envelope for 429/5xx. Timeouts surface
//! immediately so the worker can fall back or error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{EngineError, EngineReply, EngineRequest, TranslationEngine};
use crate::config::TierConfig;
use crate::task::TierName;

/// Translation API client. Clones share the connection pool and rate
/// limiter, so a pool of cloned handles behaves as one client with
/// per-handle call exclusivity.
#[derive(Clone)]
pub struct HttpEngine {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    models: HashMap<TierName, String>,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    /// Minimum interval between requests.
    min_interval: Duration,
}

impl HttpEngine {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        tiers: &[TierConfig],
        call_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(call_timeout)
            .build()
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            models: tiers
                .iter()
                .map(|t| (t.name, t.model.clone()))
                .collect(),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(100), // 10 req/s
        })
    }

    /// Readiness probe for one tier's model, used by startup loading.
    pub async fn probe_tier(&self, config: &TierConfig) -> Result<(), EngineError> {
        let url = format!("{}/v1/models/{}", self.base_url, config.model);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EngineError::Http {
                status: status.as_u16(),
                body: truncated_body(response).await,
            })
        }
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Send with a small retry envelope.
    /// 429: Retry-After or 1s/2s (max 2). 5xx: one retry after 500ms.
    /// Timeouts are never retried here; the worker owns fallback.
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, EngineError> {
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 2;
        let mut retried_5xx = false;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let result = self
                .http
                .post(format!("{}/v1/translate", self.base_url))
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    if attempt >= max_429_retries {
                        return Err(EngineError::RateLimited {
                            retry_after_ms: retry_after.map(|d| d.as_millis() as u64).unwrap_or(0),
                        });
                    }
                    let wait = retry_after.unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 from engine, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() && !retried_5xx => {
                    retried_5xx = true;
                    warn!(status = resp.status().as_u16(), "5xx from engine, retrying once");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    }
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    return Err(EngineError::Http {
                        status,
                        body: truncated_body(resp).await,
                    });
                }
                Err(e) => return Err(classify_transport_error(e)),
            }
        }
    }
}

#[async_trait]
impl TranslationEngine for HttpEngine {
    async fn translate(
        &mut self,
        request: EngineRequest,
        cancel: &CancellationToken,
    ) -> Result<EngineReply, EngineError> {
        self.rate_limit_wait().await;

        let model = self
            .models
            .get(&request.tier)
            .ok_or_else(|| EngineError::Malformed(format!("no model for tier {}", request.tier)))?;

        let mut body = serde_json::json!({
            "model": model,
            "text": request.text,
            "target": request.target_lang,
        });
        if request.source_lang != crate::detect::AUTO {
            body["source"] = serde_json::Value::String(request.source_lang.clone());
        }

        let response = tokio::select! {
            r = self.send_with_retry(&body, cancel) => r?,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Malformed(e.to_string()))?;

        Ok(EngineReply {
            text: parsed.translation,
            confidence: parsed.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout
    } else if e.is_connect() {
        EngineError::Connect(e.to_string())
    } else {
        EngineError::Malformed(e.to_string())
    }
}

async fn truncated_body(resp: reqwest::Response) -> String {
    resp.text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect()
}

#[derive(Deserialize)]
struct TranslateResponse {
    translation: String,
    confidence: Option<f32>,
}
