//! HTTP plumbing shared by every remote source.
//!
//! [`ApiClient`] wraps a `reqwest::Client` with a per-call timeout,
//! authentication, and a bounded retry loop:
//!
//! - network errors (timeouts, connection resets) retry
//! - HTTP 429 and 5xx retry, honouring `Retry-After` when it is shorter
//!   than the backoff cap
//! - any other status fails immediately
//!
//! Backoff is exponential: `base`, `2 * base`, `4 * base`, ... capped at
//! `32 * base`.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::SyncConfig;
use crate::error::SourceError;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl HttpError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            HttpError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }

    pub fn is_gone(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::NOT_FOUND) | Some(StatusCode::GONE)
        )
    }

    /// Whether another attempt may succeed: network failures, HTTP 429
    /// and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            HttpError::Transport { .. } => true,
            HttpError::Decode { .. } => false,
        }
    }

    /// Map a failure of a credential check or a listing page.
    pub fn into_listing(self, name: &str) -> SourceError {
        if self.is_auth() {
            SourceError::credential(name, self)
        } else {
            SourceError::unavailable(name, self)
        }
    }

    /// Map a failure while fetching one item.
    pub fn into_fetch(self, remote_id: &str) -> SourceError {
        if self.is_gone() {
            SourceError::not_found(remote_id)
        } else {
            SourceError::fetch(remote_id, self)
        }
    }
}

/// Retry schedule for one request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * (1u32 << (attempt.saturating_sub(1)).min(5))
    }

    pub fn cap(&self) -> Duration {
        self.base * 32
    }
}

/// Network settings derived from `[sync]`.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl HttpSettings {
    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs),
            retry: RetryPolicy {
                max_retries: cfg.max_retries,
                base: Duration::from_millis(cfg.backoff_base_ms),
            },
            user_agent: cfg.user_agent.clone(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// How a source authenticates its requests.
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// Credential passed as a query parameter, e.g. `api_key=<token>`.
    Query(&'static str, String),
}

pub struct ApiClient {
    client: reqwest::Client,
    retry: RetryPolicy,
    auth: Auth,
}

impl ApiClient {
    pub fn new(settings: &HttpSettings, auth: Auth) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SourceError::config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            retry: settings.retry,
            auth,
        })
    }

    /// GET with retries. Non-success statuses come back as
    /// [`HttpError::Status`].
    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, HttpError> {
        let mut last_err = None;
        let mut retry_after_hint = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = retry_after_hint
                    .take()
                    .unwrap_or_else(|| self.retry.delay(attempt));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.get(url).query(query);
            request = match &self.auth {
                Auth::None => request,
                Auth::Bearer(token) => request.bearer_auth(token),
                Auth::Query(key, value) => request.query(&[(*key, value.as_str())]),
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let hint = retry_after(response.headers()).filter(|d| *d <= self.retry.cap());
                    let body = response.text().await.unwrap_or_default();
                    let err = HttpError::Status {
                        status,
                        url: url.to_string(),
                        body: truncate_body(body),
                    };

                    if err.is_transient() {
                        tracing::warn!(url, attempt, status = status.as_u16(), "transient HTTP error");
                        retry_after_hint = hint;
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    let err = HttpError::Transport {
                        url: url.to_string(),
                        message: e.to_string(),
                    };
                    if e.is_builder() {
                        return Err(err);
                    }
                    tracing::warn!(url, attempt, error = %e, "network error");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| HttpError::Transport {
            url: url.to_string(),
            message: "request failed after retries".to_string(),
        }))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let response = self.get(url, query).await?;
        decode_json(url, response).await
    }

    pub async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, HttpError> {
        let response = self.get(url, query).await?;
        response.text().await.map_err(|e| HttpError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get_bytes(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, HttpError> {
        let response = self.get(url, query).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| HttpError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

pub async fn decode_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, HttpError> {
    response.json::<T>().await.map_err(|e| HttpError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate_body(mut body: String) -> String {
    const MAX: usize = 512;
    if body.len() > MAX {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(6), Duration::from_millis(3200));
        assert_eq!(policy.delay(9), Duration::from_millis(3200));
    }

    #[test]
    fn status_errors_map_by_scope() {
        let err = |code: u16| HttpError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            url: "http://x".into(),
            body: String::new(),
        };
        assert!(err(404).into_fetch("id").is_not_found());
        assert!(err(410).into_fetch("id").is_not_found());
        assert!(matches!(err(500).into_fetch("id"), SourceError::Fetch { .. }));
        assert!(matches!(err(401).into_listing("s"), SourceError::Credential { .. }));
        assert!(matches!(err(502).into_listing("s"), SourceError::Unavailable { .. }));
        assert!(matches!(err(403).into_listing("s"), SourceError::Credential { .. }));
    }

    #[test]
    fn only_rate_limits_and_server_errors_are_transient() {
        let err = |code: u16| HttpError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            url: "http://x".into(),
            body: String::new(),
        };
        assert!(err(429).is_transient());
        assert!(err(503).is_transient());
        assert!(!err(401).is_transient());
        assert!(!err(404).is_transient());
        assert!(HttpError::Transport { url: "u".into(), message: "timeout".into() }.is_transient());
        assert!(!HttpError::Decode { url: "u".into(), message: "eof".into() }.is_transient());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = truncate_body("é".repeat(400));
        assert!(body.ends_with("..."));
        assert!(body.len() <= 515);
    }
}
