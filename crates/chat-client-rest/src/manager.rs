//! REST manager
//!
//! Owns the handler registry and the process-global REST state: bucket
//! discovery, the global rate-limit counters, the auth/super-properties
//! caches, the shared cookie jar, and the periodic sweeper for inactive
//! handlers and orphan bucket bindings.

use crate::error::RestError;
use crate::events::{RateLimitInfo, RestEvent, RestEvents};
use crate::handler::{PipelineContext, RequestHandler};
use crate::limits::{now_ms, GlobalState};
use crate::request::{RequestOptions, ResponseBody};
use crate::routes::Route;
use crate::solver::CaptchaSolver;
use chat_client_common::ClientConfig;
use dashmap::DashMap;
use reqwest::Method;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// When to fail fast instead of waiting out a rate limit
#[derive(Clone)]
pub enum RejectPolicy {
    /// Reject when the path or bucket route starts with any prefix
    RoutePrefixes(Vec<String>),
    /// Reject when the predicate matches the rate-limit details
    Predicate(Arc<dyn Fn(&RateLimitInfo) -> bool + Send + Sync>),
}

impl RejectPolicy {
    /// Whether this rate limit should be surfaced as an error
    #[must_use]
    pub fn matches(&self, info: &RateLimitInfo) -> bool {
        match self {
            Self::RoutePrefixes(prefixes) => prefixes
                .iter()
                .any(|p| info.path.starts_with(p.as_str()) || info.route.starts_with(p.as_str())),
            Self::Predicate(predicate) => predicate(info),
        }
    }
}

impl std::fmt::Debug for RejectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoutePrefixes(prefixes) => {
                f.debug_tuple("RoutePrefixes").field(prefixes).finish()
            }
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Debug, Clone)]
struct AuthCache {
    raw: String,
    resolved: String,
}

#[derive(Debug, Clone)]
struct SuperPropertiesCache {
    key: String,
    value: String,
}

struct ManagerInner {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
    /// Handlers by pre-discovery route key or `{hash}:{major}` key
    handlers: DashMap<String, Arc<RequestHandler>>,
    /// `METHOD:bucket-route` to server-revealed bucket hash
    buckets: DashMap<String, String>,
    global: GlobalState,
    events: RestEvents,
    token_override: RwLock<Option<String>>,
    auth_cache: Mutex<Option<AuthCache>>,
    super_properties_cache: Mutex<Option<SuperPropertiesCache>>,
    captcha_solver: RwLock<Option<Arc<dyn CaptchaSolver>>>,
    reject_policy: RwLock<Option<RejectPolicy>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().expect("sweeper poisoned").take() {
            handle.abort();
        }
    }
}

/// The REST entry point
///
/// Cheap to clone; all clones share one registry, one cookie jar, and
/// one set of global counters.
#[derive(Clone)]
pub struct RestManager {
    inner: Arc<ManagerInner>,
}

impl RestManager {
    /// Create a manager and start its sweeper
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed (bad
    /// proxy specification, TLS backend failure).
    pub fn new(config: Arc<ClientConfig>) -> Result<Self, RestError> {
        let mut builder = reqwest::Client::builder().cookie_store(true);
        if let Some(proxy) = &config.rest.proxy {
            let mut proxy_config = reqwest::Proxy::all(&proxy.uri)
                .map_err(|e| RestError::Build(format!("invalid proxy {}: {e}", proxy.uri)))?;
            if let Some(auth) = proxy.headers.get("Proxy-Authorization") {
                let value = auth
                    .parse()
                    .map_err(|_| RestError::Build("invalid proxy authorization".to_string()))?;
                proxy_config = proxy_config.custom_http_auth(value);
            }
            builder = builder.proxy(proxy_config);
        }
        let http = builder
            .build()
            .map_err(|e| RestError::Build(format!("failed to build HTTP client: {e}")))?;

        let global = GlobalState::new(config.rest.global_rate_limit);
        let inner = Arc::new(ManagerInner {
            config,
            http,
            handlers: DashMap::new(),
            buckets: DashMap::new(),
            global,
            events: RestEvents::new(),
            token_override: RwLock::new(None),
            auth_cache: Mutex::new(None),
            super_properties_cache: Mutex::new(None),
            captcha_solver: RwLock::new(None),
            reject_policy: RwLock::new(None),
            sweeper: Mutex::new(None),
        });

        let manager = Self { inner };
        manager.spawn_sweeper();
        Ok(manager)
    }

    fn spawn_sweeper(&self) {
        let weak = Arc::downgrade(&self.inner);
        let interval_ms = self.inner.config.rest.sweep_interval_ms.max(1_000);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.sweep(now_ms());
            }
        });
        *self.inner.sweeper.lock().expect("sweeper poisoned") = Some(handle);
    }

    /// Subscribe to REST events
    #[must_use]
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<RestEvent> {
        self.inner.events.subscribe()
    }

    /// Install a captcha solver
    pub fn set_captcha_solver(&self, solver: Arc<dyn CaptchaSolver>) {
        *self
            .inner
            .captcha_solver
            .write()
            .expect("solver lock poisoned") = Some(solver);
    }

    /// Install a rate-limit reject policy
    pub fn set_reject_policy(&self, policy: RejectPolicy) {
        *self
            .inner
            .reject_policy
            .write()
            .expect("policy lock poisoned") = Some(policy);
    }

    /// Replace the token, invalidating the auth cache
    pub fn set_token(&self, token: impl Into<String>) {
        *self
            .inner
            .token_override
            .write()
            .expect("token lock poisoned") = Some(token.into());
    }

    /// Issue a request through the per-bucket pipeline
    pub async fn request(
        &self,
        method: Method,
        route: Route,
        options: RequestOptions,
    ) -> Result<ResponseBody, RestError> {
        let inner = &self.inner;
        let route_key = route.handler_key(&method);
        let handler_id = match inner.buckets.get(&route_key) {
            Some(hash) => format!("{}:{}", hash.value(), route.major_parameter()),
            None => route_key.clone(),
        };
        let handler = inner
            .handlers
            .entry(handler_id.clone())
            .or_insert_with(|| Arc::new(RequestHandler::new(handler_id)))
            .value()
            .clone();

        let solver = inner
            .captcha_solver
            .read()
            .expect("solver lock poisoned")
            .clone();
        let reject_policy = inner
            .reject_policy
            .read()
            .expect("policy lock poisoned")
            .clone();

        let on_bucket = |hash: &str| inner.bind_bucket(&route_key, hash, &route, &handler);

        let ctx = PipelineContext {
            http: &inner.http,
            config: &inner.config,
            global: &inner.global,
            events: &inner.events,
            auth_token: inner.resolved_auth(),
            super_properties: inner.super_properties()?,
            captcha_solver: solver.as_deref(),
            reject_policy: reject_policy.as_ref(),
            on_bucket_discovered: &on_bucket,
        };

        handler.execute(ctx, method, &route, &options).await
    }

    /// GET convenience wrapper
    pub async fn get(
        &self,
        route: Route,
        options: RequestOptions,
    ) -> Result<ResponseBody, RestError> {
        self.request(Method::GET, route, options).await
    }

    /// POST convenience wrapper
    pub async fn post(
        &self,
        route: Route,
        options: RequestOptions,
    ) -> Result<ResponseBody, RestError> {
        self.request(Method::POST, route, options).await
    }

    /// PUT convenience wrapper
    pub async fn put(
        &self,
        route: Route,
        options: RequestOptions,
    ) -> Result<ResponseBody, RestError> {
        self.request(Method::PUT, route, options).await
    }

    /// PATCH convenience wrapper
    pub async fn patch(
        &self,
        route: Route,
        options: RequestOptions,
    ) -> Result<ResponseBody, RestError> {
        self.request(Method::PATCH, route, options).await
    }

    /// DELETE convenience wrapper
    pub async fn delete(
        &self,
        route: Route,
        options: RequestOptions,
    ) -> Result<ResponseBody, RestError> {
        self.request(Method::DELETE, route, options).await
    }

    /// Bucket hash discovered for a route key, if any
    #[must_use]
    pub fn bucket_hash(&self, route_key: &str) -> Option<String> {
        self.inner.buckets.get(route_key).map(|h| h.value().clone())
    }

    /// Number of live handlers
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Look up a live handler by its registry key
    #[must_use]
    pub fn handler_for(&self, key: &str) -> Option<Arc<RequestHandler>> {
        self.inner.handlers.get(key).map(|h| h.value().clone())
    }

    /// Sweep inactive handlers and orphan bucket bindings immediately
    pub fn sweep_now(&self) {
        self.inner.sweep(now_ms());
    }
}

impl std::fmt::Debug for RestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestManager")
            .field("handlers", &self.inner.handlers.len())
            .field("buckets", &self.inner.buckets.len())
            .field("global", &self.inner.global)
            .finish()
    }
}

impl ManagerInner {
    /// Resolve the auth header value, caching per raw token
    fn resolved_auth(&self) -> String {
        let raw = self
            .token_override
            .read()
            .expect("token lock poisoned")
            .clone()
            .unwrap_or_else(|| self.config.token.clone());

        let mut cache = self.auth_cache.lock().expect("auth cache poisoned");
        if let Some(cached) = cache.as_ref() {
            if cached.raw == raw {
                return cached.resolved.clone();
            }
        }
        let resolved = raw.strip_prefix("Bot ").unwrap_or(&raw).to_string();
        *cache = Some(AuthCache {
            raw,
            resolved: resolved.clone(),
        });
        resolved
    }

    /// Build (or reuse) the base64 super-properties header
    fn super_properties(&self) -> Result<String, RestError> {
        let key = serde_json::to_string(&self.config.properties)
            .map_err(|e| RestError::Build(format!("properties serialization failed: {e}")))?;

        let mut cache = self
            .super_properties_cache
            .lock()
            .expect("super properties cache poisoned");
        if let Some(cached) = cache.as_ref() {
            if cached.key == key {
                return Ok(cached.value.clone());
            }
        }
        let value = self
            .config
            .properties
            .to_super_properties()
            .map_err(|e| RestError::Build(format!("properties encoding failed: {e}")))?;
        *cache = Some(SuperPropertiesCache {
            key,
            value: value.clone(),
        });
        Ok(value)
    }

    /// Bind a discovered bucket hash to its route and re-key the handler
    fn bind_bucket(&self, route_key: &str, hash: &str, route: &Route, handler: &Arc<RequestHandler>) {
        let previous = self.buckets.insert(route_key.to_string(), hash.to_string());
        let hash_key = format!("{}:{}", hash, route.major_parameter());

        if previous.as_deref() != Some(hash) || !self.handlers.contains_key(&hash_key) {
            tracing::debug!(route_key, hash, "Bucket hash discovered");
            self.handlers.insert(hash_key.clone(), handler.clone());
        }
        // The handler now lives under its hash key; the pre-discovery
        // entry would otherwise linger as a duplicate until both aged out.
        if route_key != hash_key {
            self.handlers.remove(route_key);
        }
    }

    /// Drop inactive handlers, then bindings whose handler is gone
    fn sweep(&self, now_ms: i64) {
        let before = self.handlers.len();
        self.handlers.retain(|_, handler| !handler.is_inactive(now_ms));
        let swept = before.saturating_sub(self.handlers.len());

        self.buckets.retain(|route_key, hash| {
            let major = route_key
                .split_once(':')
                .map(|(_, bucket)| Route::from_path(bucket).major_parameter().to_string())
                .unwrap_or_else(|| "global".to_string());
            self.handlers.contains_key(&format!("{hash}:{major}"))
        });

        if swept > 0 {
            tracing::debug!(swept, remaining = self.handlers.len(), "Swept request handlers");
        }
    }
}
