use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Error as ReqwestError, Method, Response, StatusCode};
use serde_json::{json, Value};

use crate::session::NetworkContext;

#[derive(Debug)]
pub enum NetworkError {
    Reqwest(ReqwestError),
    ApiError { status: StatusCode, message: String },
    UrlParseError(url::ParseError),
    SerdeJsonError(serde_json::Error),
}

impl From<ReqwestError> for NetworkError {
    fn from(err: ReqwestError) -> NetworkError {
        NetworkError::Reqwest(err)
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> NetworkError {
        NetworkError::UrlParseError(err)
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> NetworkError {
        NetworkError::SerdeJsonError(err)
    }
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::Reqwest(e) => write!(f, "HTTP request error: {}", e),
            NetworkError::ApiError { status, message } => write!(f, "API error ({}): {}", status, message),
            NetworkError::UrlParseError(e) => write!(f, "URL parsing error: {}", e),
            NetworkError::SerdeJsonError(e) => write!(f, "JSON deserialization error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkError::Reqwest(e) => Some(e),
            NetworkError::ApiError { .. } => None,
            NetworkError::UrlParseError(e) => Some(e),
            NetworkError::SerdeJsonError(e) => Some(e),
        }
    }
}

/// Every deliberate wait in the bot goes through here: retry backoff, game pacing,
/// inter-account pacing and the idle countdown.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, duration: Duration);
}

pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// One logical call against the platform.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::GET, path: path.into(), body: None }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self { method: Method::POST, path: path.into(), body: Some(body) }
    }

    /// POST with an empty JSON object, which is what the platform expects for bodiless actions.
    pub fn post_empty(path: impl Into<String>) -> Self {
        Self::post(path, json!({}))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Calls allowed to fail with 5xx or a transport error before giving up.
    pub max_attempts: u32,
    pub server_error_backoff: Duration,
    pub rate_limit_backoff: Duration,
    /// 429 waits do not count against `max_attempts`; this caps them separately.
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            server_error_backoff: Duration::from_secs(5),
            rate_limit_backoff: Duration::from_secs(60),
            max_rate_limit_waits: 10,
        }
    }
}

#[derive(Debug)]
pub enum RetryOutcome {
    Success(Value),
    Retryable,
    RateLimited,
    /// 409: the server considers the action already done.
    Terminal,
    Exhausted,
    Fatal(NetworkError),
}

impl RetryOutcome {
    /// Collapses the outcome for callers: payload on success, `None` for the
    /// non-fatal empty results, `Err` only for fatal client errors.
    pub fn into_payload(self) -> Result<Option<Value>, NetworkError> {
        match self {
            RetryOutcome::Success(value) => Ok(Some(value)),
            RetryOutcome::Fatal(err) => Err(err),
            RetryOutcome::Retryable | RetryOutcome::RateLimited | RetryOutcome::Terminal | RetryOutcome::Exhausted => {
                Ok(None)
            }
        }
    }
}

/// Maps a status code onto the outcome of a single attempt. `Success` carries no payload yet.
pub fn classify(status: StatusCode) -> RetryOutcome {
    if status.is_success() {
        RetryOutcome::Success(Value::Null)
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        RetryOutcome::RateLimited
    } else if status == StatusCode::CONFLICT {
        RetryOutcome::Terminal
    } else if status.is_server_error() {
        RetryOutcome::Retryable
    } else {
        RetryOutcome::Fatal(NetworkError::ApiError {
            status,
            message: String::new(),
        })
    }
}

/// Resilient request executor shared by every component that talks to the platform.
pub struct Executor {
    policy: RetryPolicy,
    pacer: Arc<dyn Pacer>,
}

impl Executor {
    pub fn new(policy: RetryPolicy, pacer: Arc<dyn Pacer>) -> Self {
        Self { policy, pacer }
    }

    pub fn pacer(&self) -> &Arc<dyn Pacer> {
        &self.pacer
    }

    /// Issues `spec` until it succeeds or its failure is classified as final.
    /// Never mutates caller state; the only side effects are logging and waits.
    pub async fn execute(&self, ctx: &NetworkContext, spec: &RequestSpec) -> RetryOutcome {
        let url = match ctx.endpoint(&spec.path) {
            Ok(url) => url,
            Err(e) => {
                error!("[{}] Cannot build URL for {}: {}", ctx.account(), spec.path, e);
                return RetryOutcome::Fatal(NetworkError::from(e));
            }
        };

        let mut failures: u32 = 0;
        let mut rate_limit_waits: u32 = 0;
        loop {
            let attempt = failures + rate_limit_waits + 1;
            debug!("[API] [{}] {} {} (attempt {})", ctx.account(), spec.method, spec.path, attempt);

            let start_time = Instant::now();
            let response_result = self.send(ctx, spec, url.clone()).await;
            let duration = start_time.elapsed();
            debug!("[TIMING] [{}] {} {} took {:.2?}", ctx.account(), spec.method, spec.path, duration);

            let failure_reason = match response_result {
                Ok(response) => {
                    let status = response.status();
                    match classify(status) {
                        RetryOutcome::Success(_) => match decode_body(response).await {
                            Ok(payload) => return RetryOutcome::Success(payload),
                            Err(e) => format!("failed to read response body: {}", e),
                        },
                        RetryOutcome::RateLimited => {
                            if rate_limit_waits >= self.policy.max_rate_limit_waits {
                                warn!(
                                    "[{}] {} {} still rate limited after {} waits, giving up",
                                    ctx.account(),
                                    spec.method,
                                    spec.path,
                                    rate_limit_waits
                                );
                                return RetryOutcome::Exhausted;
                            }
                            rate_limit_waits += 1;
                            warn!(
                                "[{}] {} {} -> 429 (attempt {}), waiting {:?} before retrying",
                                ctx.account(),
                                spec.method,
                                spec.path,
                                attempt,
                                self.policy.rate_limit_backoff
                            );
                            self.pacer.pause(self.policy.rate_limit_backoff).await;
                            continue;
                        }
                        RetryOutcome::Terminal => {
                            let message = read_message(response).await;
                            info!(
                                "[{}] {} {} -> 409, already done: {}",
                                ctx.account(),
                                spec.method,
                                spec.path,
                                message
                            );
                            return RetryOutcome::Terminal;
                        }
                        RetryOutcome::Fatal(_) => {
                            let message = read_message(response).await;
                            error!(
                                "[{}] {} {} -> {} (attempt {}): {}",
                                ctx.account(),
                                spec.method,
                                spec.path,
                                status,
                                attempt,
                                message
                            );
                            return RetryOutcome::Fatal(NetworkError::ApiError { status, message });
                        }
                        RetryOutcome::Retryable | RetryOutcome::Exhausted => format!("server error {}", status),
                    }
                }
                Err(e) => format!("network failure: {}", e),
            };

            failures += 1;
            if failures >= self.policy.max_attempts {
                warn!(
                    "[{}] {} {} failed {} times ({}), giving up with an empty result",
                    ctx.account(),
                    spec.method,
                    spec.path,
                    failures,
                    failure_reason
                );
                return RetryOutcome::Exhausted;
            }
            warn!(
                "[{}] {} {} {} (attempt {}/{}), retrying in {:?}",
                ctx.account(),
                spec.method,
                spec.path,
                failure_reason,
                failures,
                self.policy.max_attempts,
                self.policy.server_error_backoff
            );
            self.pacer.pause(self.policy.server_error_backoff).await;
        }
    }

    async fn send(&self, ctx: &NetworkContext, spec: &RequestSpec, url: url::Url) -> Result<Response, NetworkError> {
        let mut request = ctx.client().request(spec.method.clone(), url);
        if let Some(body) = &spec.body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

/// Empty bodies decode to `Null`; bodies that are not JSON are kept as a string so
/// callers can still tell they did not get the shape they wanted.
async fn decode_body(response: Response) -> Result<Value, NetworkError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

async fn read_message(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(text) => serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text),
        Err(e) => format!("Failed to read error body (detail: {}). Original status: {}", e, status),
    }
}
