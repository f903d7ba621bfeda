//! Per-bucket request worker
//!
//! One handler owns the FIFO queue for one rate-limit bucket; at most one
//! HTTP call is in flight per handler. The worker applies the
//! coordinator's wait decisions, drives the 429/5xx retry loops, and
//! handles captcha and second-factor challenges inline.

use crate::error::{ApiError, HttpError, RateLimitError, RestError};
use crate::events::{RateLimitInfo, RestEvent, RestEvents};
use crate::limits::{
    backoff_429, backoff_5xx, compute_reset_at, now_ms, GlobalState, InvalidRequestTracker,
    RateLimitHeaders,
};
use crate::manager::RejectPolicy;
use crate::request::{build_request, AttemptState, RequestOptions, ResponseBody};
use crate::routes::Route;
use crate::solver::{CaptchaChallenge, CaptchaSolver};
use chat_client_common::ClientConfig;
use reqwest::Method;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Error code demanding a second factor
const MFA_REQUIRED_CODE: u64 = 60_003;

/// Handlers idle this long with an empty queue are swept
const INACTIVE_AFTER_MS: i64 = 5 * 60 * 1_000;

/// Everything one attempt needs from the manager
pub(crate) struct PipelineContext<'a> {
    pub http: &'a reqwest::Client,
    pub config: &'a ClientConfig,
    pub global: &'a GlobalState,
    pub events: &'a RestEvents,
    pub auth_token: String,
    pub super_properties: String,
    pub captcha_solver: Option<&'a dyn CaptchaSolver>,
    pub reject_policy: Option<&'a RejectPolicy>,
    /// Invoked when a response reveals the bucket hash for this route
    pub on_bucket_discovered: &'a dyn Fn(&str),
}

#[derive(Debug)]
struct BucketLimits {
    limit: u32,
    remaining: i64,
    reset_at_ms: i64,
}

/// Serialized queue and cached limits for one bucket
pub struct RequestHandler {
    /// Bucket hash once discovered, otherwise the pre-discovery route key
    id: String,
    /// FIFO gate: tokio mutexes queue waiters fairly
    serial: tokio::sync::Mutex<()>,
    limits: Mutex<BucketLimits>,
    last_used_ms: AtomicI64,
}

impl RequestHandler {
    /// Create a handler for the given bucket key
    #[must_use]
    pub fn new(id: String) -> Self {
        Self {
            id,
            serial: tokio::sync::Mutex::new(()),
            limits: Mutex::new(BucketLimits {
                limit: u32::MAX,
                remaining: 1,
                reset_at_ms: 0,
            }),
            last_used_ms: AtomicI64::new(now_ms()),
        }
    }

    /// The handler's bucket key
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The most recent bucket limit the server reported
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limits.lock().expect("bucket limits poisoned").limit
    }

    /// Remaining budget and reset as last reported
    #[must_use]
    pub fn snapshot(&self) -> (i64, i64) {
        let limits = self.limits.lock().expect("bucket limits poisoned");
        (limits.remaining, limits.reset_at_ms)
    }

    /// Milliseconds this bucket must still wait, if exhausted
    fn active_wait_ms(&self, now_ms: i64) -> Option<i64> {
        let limits = self.limits.lock().expect("bucket limits poisoned");
        (limits.remaining <= 0 && now_ms < limits.reset_at_ms)
            .then(|| limits.reset_at_ms - now_ms)
    }

    /// Fold one response's headers into the bucket state
    pub(crate) fn apply_headers(
        &self,
        headers: &RateLimitHeaders,
        now_ms: i64,
        route_has_reactions: bool,
    ) {
        let mut limits = self.limits.lock().expect("bucket limits poisoned");
        if let Some(limit) = headers.limit {
            limits.limit = limit;
        }
        if let Some(remaining) = headers.remaining {
            limits.remaining = i64::from(remaining);
        }
        if let Some(reset_at) = compute_reset_at(headers, now_ms, route_has_reactions) {
            limits.reset_at_ms = reset_at;
        }
    }

    /// Whether the sweeper may drop this handler
    #[must_use]
    pub fn is_inactive(&self, now_ms: i64) -> bool {
        self.serial.try_lock().is_ok()
            && now_ms - self.last_used_ms.load(Ordering::SeqCst) > INACTIVE_AFTER_MS
    }

    /// Run one request through the pipeline
    pub(crate) async fn execute(
        &self,
        ctx: PipelineContext<'_>,
        method: Method,
        route: &Route,
        options: &RequestOptions,
    ) -> Result<ResponseBody, RestError> {
        // Strict FIFO per bucket; at most one request in flight.
        let _serial = self.serial.lock().await;
        self.last_used_ms.store(now_ms(), Ordering::SeqCst);

        let mut retries: u32 = 0;
        let mut captcha_retries: u32 = 0;
        let mut mfa_retried = false;
        let mut attempt = AttemptState::default();
        let mut sublimit_ms: Option<i64> = None;
        let offset = ctx.config.rest.time_offset_ms as i64;

        loop {
            // Wait out any active rate limit, global first.
            loop {
                let now = now_ms();
                let global_wait = if options.webhook {
                    None
                } else {
                    ctx.global.active_wait_ms(now)
                };
                let (wait_ms, is_global) = match global_wait {
                    Some(wait) => (wait, true),
                    None => match self.active_wait_ms(now) {
                        Some(wait) => (wait, false),
                        None => break,
                    },
                };

                let timeout_ms = wait_ms + offset;
                let info = RateLimitInfo {
                    timeout_ms,
                    limit: if is_global {
                        ctx.global.limit()
                    } else {
                        self.limit()
                    },
                    method: method.to_string(),
                    path: route.path().to_string(),
                    route: route.bucket().to_string(),
                    global: is_global,
                };
                ctx.events.emit(RestEvent::RateLimit(info.clone()));

                if ctx.reject_policy.is_some_and(|p| p.matches(&info)) {
                    return Err(RestError::RateLimited(Box::new(RateLimitError {
                        timeout_ms: info.timeout_ms,
                        limit: info.limit,
                        method: info.method,
                        path: info.path,
                        route: info.route,
                        global: info.global,
                    })));
                }

                let wait = Duration::from_millis(timeout_ms.max(0) as u64);
                if is_global {
                    // Coalesced: concurrent waiters share one timer.
                    ctx.global.wait(wait).await;
                } else {
                    tokio::time::sleep(wait).await;
                }
            }

            // Sublimit sleep mandated by a previous 429 on this request.
            if let Some(ms) = sublimit_ms.take() {
                tokio::time::sleep(Duration::from_millis(ms.max(0) as u64)).await;
            }

            // Account against the one-second global window.
            if !options.webhook {
                ctx.global.mark_used(now_ms());
            }

            if ctx.events.has_subscribers() {
                ctx.events.emit(RestEvent::ApiRequest {
                    method: method.to_string(),
                    path: route.path().to_string(),
                    route: route.bucket().to_string(),
                    retries,
                });
            }

            let request = build_request(
                ctx.http,
                ctx.config,
                &method,
                route,
                options,
                &ctx.auth_token,
                &ctx.super_properties,
                &attempt,
            )?;

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    if retries < ctx.config.rest.retry_limit {
                        retries += 1;
                        continue;
                    }
                    return Err(RestError::Http(HttpError {
                        message: e.to_string(),
                        status: None,
                        method: method.to_string(),
                        path: route.path().to_string(),
                        source: Some(e),
                    }));
                }
            };

            let status = response.status();
            let code = status.as_u16();
            if ctx.events.has_subscribers() {
                ctx.events.emit(RestEvent::ApiResponse {
                    method: method.to_string(),
                    path: route.path().to_string(),
                    route: route.bucket().to_string(),
                    status: code,
                });
            }

            // Response-driven bucket bookkeeping.
            let headers = RateLimitHeaders::parse(response.headers());
            let now = now_ms();
            self.apply_headers(&headers, now, route.has_reactions());
            if let Some(hash) = &headers.bucket {
                (ctx.on_bucket_discovered)(hash);
            }

            // Invalid-request circuit breaker; shared 429s are exempt.
            if code == 401 || code == 403 || (code == 429 && !headers.is_shared()) {
                let tracker = InvalidRequestTracker::global();
                let count = tracker.record(now);
                let interval = u64::from(ctx.config.rest.invalid_request_warning_interval);
                if interval > 0 && count % interval == 0 {
                    ctx.events.emit(RestEvent::InvalidRequestWarning {
                        count,
                        remaining_ms: tracker.remaining_ms(now),
                    });
                }
                if let Some(cooldown) = InvalidRequestTracker::cooldown(count) {
                    tokio::time::sleep(cooldown).await;
                }
            }

            if status.is_success() || status.is_redirection() {
                return parse_body(response, &method, route).await;
            }

            if code == 429 {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let retry_after_ms = resolve_retry_after(&headers, &body);
                let is_global = headers.is_global()
                    || body.get("global").and_then(Value::as_bool).unwrap_or(false);
                tracing::warn!(
                    route = %route.bucket(),
                    retry_after_ms,
                    is_global,
                    shared = headers.is_shared(),
                    "Rate limited"
                );

                if is_global {
                    ctx.global.set_limited_until(now_ms() + retry_after_ms);
                } else {
                    // Shared and sublimit 429s sleep locally; the
                    // route-wide state stays whatever the headers said.
                    sublimit_ms = Some(if retry_after_ms > 0 {
                        retry_after_ms
                    } else {
                        backoff_429(retries).as_millis() as i64
                    });
                }
                retries += 1;
                continue;
            }

            if status.is_client_error() {
                let body: Value = response.json().await.unwrap_or(Value::Null);

                if let Some(challenge) = CaptchaChallenge::from_body(&body) {
                    if let Some(solver) = ctx.captcha_solver {
                        if captcha_retries < ctx.config.rest.captcha_retry_limit
                            && challenge.is_solvable()
                        {
                            let user_agent = &ctx.config.properties.browser_user_agent;
                            match solver.solve(&challenge, user_agent).await {
                                Ok(solution) => {
                                    attempt.captcha = Some(solution);
                                    captcha_retries += 1;
                                    continue;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Captcha solver failed");
                                }
                            }
                        }
                    }
                }

                if body.get("code").and_then(Value::as_u64) == Some(MFA_REQUIRED_CODE)
                    && options.auth
                    && !mfa_retried
                {
                    if let Some(token) = second_factor_token(&ctx, &body).await {
                        attempt.mfa_authorization = Some(token);
                        mfa_retried = true;
                        continue;
                    }
                }

                return Err(RestError::Api(ApiError::from_body(
                    body,
                    code,
                    method.as_str(),
                    route.path(),
                )));
            }

            if status.is_server_error() {
                if retries < ctx.config.rest.retry_limit {
                    retries += 1;
                    tokio::time::sleep(backoff_5xx(retries)).await;
                    continue;
                }
                return Err(RestError::Http(HttpError {
                    message: format!("Server error {code}"),
                    status: Some(code),
                    method: method.to_string(),
                    path: route.path().to_string(),
                    source: None,
                }));
            }

            return Err(RestError::Http(HttpError {
                message: format!("Unexpected status {code}"),
                status: Some(code),
                method: method.to_string(),
                path: route.path().to_string(),
                source: None,
            }));
        }
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let limits = self.limits.lock().expect("bucket limits poisoned");
        f.debug_struct("RequestHandler")
            .field("id", &self.id)
            .field("limit", &limits.limit)
            .field("remaining", &limits.remaining)
            .finish()
    }
}

/// Retry delay for a 429, with the body as fallback when the header is
/// missing or zero
fn resolve_retry_after(headers: &RateLimitHeaders, body: &Value) -> i64 {
    let from_header = headers.retry_after.unwrap_or(0.0);
    let seconds = if from_header > 0.0 {
        from_header
    } else {
        body.get("retry_after").and_then(Value::as_f64).unwrap_or(0.0)
    };
    (seconds * 1000.0) as i64
}

/// Complete the second-factor dance: generate a TOTP code, finish the
/// ticket, return the MFA token to attach
async fn second_factor_token(ctx: &PipelineContext<'_>, body: &Value) -> Option<String> {
    let totp_key = ctx.config.rest.totp_key.as_deref()?;
    let mfa = body.get("mfa")?;
    let ticket = mfa.get("ticket").and_then(Value::as_str)?;
    let offers_totp = mfa
        .get("methods")
        .and_then(Value::as_array)?
        .iter()
        .any(|m| m.get("type").and_then(Value::as_str) == Some("totp"));
    if !offers_totp {
        return None;
    }

    let code = generate_totp(totp_key)?;
    let base = ctx.config.rest.api_url.trim_end_matches('/');
    let url = match ctx.config.rest.version {
        Some(version) => format!("{base}/v{version}/mfa/finish"),
        None => format!("{base}/mfa/finish"),
    };

    let response = ctx
        .http
        .post(url)
        .header("Authorization", &ctx.auth_token)
        .json(&serde_json::json!({
            "ticket": ticket,
            "mfa_type": "totp",
            "data": code,
        }))
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), "Second-factor verification rejected");
        return None;
    }
    let value: Value = response.json().await.ok()?;
    value
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Generate the current TOTP code from a base32 secret
fn generate_totp(key: &str) -> Option<String> {
    let normalized = key.replace(' ', "").to_ascii_uppercase();
    let secret = totp_rs::Secret::Encoded(normalized).to_bytes().ok()?;
    let totp = totp_rs::TOTP::new_unchecked(totp_rs::Algorithm::SHA1, 6, 1, 30, secret);
    totp.generate_current().ok()
}

/// Decode the response body: JSON when declared, bytes otherwise
async fn parse_body(
    response: reqwest::Response,
    method: &Method,
    route: &Route,
) -> Result<ResponseBody, RestError> {
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    let to_http_error = |e: reqwest::Error| {
        RestError::Http(HttpError {
            message: format!("Failed to read body: {e}"),
            status: None,
            method: method.to_string(),
            path: route.path().to_string(),
            source: Some(e),
        })
    };

    if is_json {
        Ok(ResponseBody::Json(
            response.json().await.map_err(to_http_error)?,
        ))
    } else {
        let bytes = response.bytes().await.map_err(to_http_error)?;
        if bytes.is_empty() {
            Ok(ResponseBody::Empty)
        } else {
            Ok(ResponseBody::Bytes(bytes.to_vec()))
        }
    }
}
