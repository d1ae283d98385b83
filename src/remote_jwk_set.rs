use std::{
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use jsonwebtoken::jwk::JwkSet;
use moka::future::Cache;
use parking_lot::Mutex;
use reqwest::Client;
use tower::{
    buffer::BufferLayer, util::BoxCloneService, BoxError, Layer, Service, ServiceBuilder,
    ServiceExt,
};
use tower_layer::layer_fn;
use url::Url;

use crate::{
    error::KeySetError,
    jwk_set::{KeyDescriptor, KeySetResolver},
};

/// Conventional location of the JWK set relative to the issuer URL.
pub const JWKS_PATH: &str = ".well-known/jwks.json";

/// Upper bound on a single JWK set request unless configured otherwise.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

struct CacheConfig {
    time_to_live: Duration,
}

struct RateLimitConfig {
    num: u64,
    per: Duration,
}

/// Builder for configuring a `RemoteJwkSet` with optional cache expiry, refresh and rate limiting.
pub struct RemoteJwkSetBuilder {
    url: Url,
    timeout: Duration,
    cache_config: Option<CacheConfig>,
    refresh_interval: Option<Duration>,
    rate_limit_config: Option<RateLimitConfig>,
}

impl RemoteJwkSetBuilder {
    /// Creates a new builder with the given JWKS URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: DEFAULT_FETCH_TIMEOUT,
            cache_config: None,
            refresh_interval: None,
            rate_limit_config: None,
        }
    }

    /// Creates a builder for the JWK set published at `{issuer}/.well-known/jwks.json`.
    ///
    /// The issuer URL is expected in its canonical `https://{domain}/` form, including the trailing slash.
    pub fn for_issuer(issuer_url: &Url) -> Result<Self, url::ParseError> {
        Ok(Self::new(issuer_url.join(JWKS_PATH)?))
    }

    /// Bounds each outbound fetch. Exceeding it surfaces as [`KeySetError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expires the cached JWK set after `time_to_live`, so that the next lookup re-fetches it.
    ///
    /// Without this, a successfully fetched set is kept for the lifetime of the `RemoteJwkSet`.
    pub fn with_cache(mut self, time_to_live: Duration) -> Self {
        self.cache_config = Some(CacheConfig { time_to_live });
        self
    }

    /// Re-fetches the JWK set when a token references a `kid` the cached set does not contain, e.g. after the
    /// provider rotated its keys. At most one such refresh happens per `min_interval`.
    pub fn with_refresh_on_unknown_kid(mut self, min_interval: Duration) -> Self {
        self.refresh_interval = Some(min_interval);
        self
    }

    /// Add rate limiting for outgoing JWK set requests.
    ///
    /// The limiter runs on a background task, so `build` must then be called from within a tokio runtime.
    pub fn with_rate_limit(mut self, num: u64, per: Duration) -> Self {
        self.rate_limit_config = Some(RateLimitConfig { num, per });
        self
    }

    /// Builds the `RemoteJwkSet` with the configured options.
    pub fn build(self) -> Result<RemoteJwkSet, KeySetError> {
        let http_client = Client::builder().timeout(self.timeout).build()?;
        let request_service = JwkSetRequestService {
            http_client,
            url: self.url.clone(),
        };

        let rate_limit_layer = self.rate_limit_config.map(|rate_limit_config| {
            layer_fn(move |inner| {
                let rate_limit =
                    tower::limit::RateLimitLayer::new(rate_limit_config.num, rate_limit_config.per);
                let rate_limited_service = rate_limit.layer(inner);

                // Wrap the rate limited service in another buffer service to make it `Clone`.
                let buffered_service = BufferLayer::new(1024).layer(rate_limited_service);

                // Finally, recover our own error type from the buffer's boxed one.
                buffered_service.map_err(unbox_buffer_error)
            })
        });

        let service_tower = ServiceBuilder::new()
            .option_layer(rate_limit_layer)
            .service(request_service);

        let cache = match self.cache_config {
            Some(cache_config) => Cache::builder()
                .max_capacity(1)
                .time_to_live(cache_config.time_to_live)
                .build(),
            None => Cache::builder().max_capacity(1).build(),
        };

        Ok(RemoteJwkSet {
            url: self.url,
            service_tower: Arc::new(Mutex::new(BoxCloneService::new(service_tower))),
            cache,
            refresh_interval: self.refresh_interval,
            last_refresh_attempt: Arc::new(Mutex::new(None)),
        })
    }
}

fn unbox_buffer_error(err: BoxError) -> KeySetError {
    match err.downcast::<KeySetError>() {
        Ok(err) => *err,
        Err(err) => KeySetError::RateLimit(err.to_string()),
    }
}

#[derive(Clone)]
struct CachedJwkSet {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// JWK set fetched from the identity provider and cached in memory.
///
/// Clones share the same cache. Concurrent lookups against an empty cache are coalesced into a single request; a
/// failed request is not cached, so the next lookup tries again.
#[derive(Clone)]
pub struct RemoteJwkSet {
    url: Url,
    service_tower: Arc<Mutex<BoxCloneService<(), JwkSet, KeySetError>>>,
    cache: Cache<(), CachedJwkSet>,
    refresh_interval: Option<Duration>,
    last_refresh_attempt: Arc<Mutex<Option<Instant>>>,
}

impl RemoteJwkSet {
    /// Creates a builder for configuring a `RemoteJwkSet`.
    pub fn builder(url: Url) -> RemoteJwkSetBuilder {
        RemoteJwkSetBuilder::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the current JWK set, fetching it if it is not cached.
    pub async fn jwk_set(&self) -> Result<Arc<JwkSet>, KeySetError> {
        Ok(self.cached().await?.keys)
    }

    /// Populates the cache eagerly, e.g. at startup.
    pub async fn prefetch(&self) -> Result<(), KeySetError> {
        self.cached().await.map(|_| ())
    }

    async fn cached(&self) -> Result<CachedJwkSet, KeySetError> {
        self.cache
            .try_get_with((), async {
                let keys = self.fetch().await?;
                tracing::debug!(url = %self.url, keys = keys.keys.len(), "fetched JWK set");
                Ok::<_, KeySetError>(CachedJwkSet {
                    keys: Arc::new(keys),
                    fetched_at: Instant::now(),
                })
            })
            .await
            .map_err(|err: Arc<KeySetError>| {
                Arc::try_unwrap(err).unwrap_or_else(KeySetError::Shared)
            })
    }

    async fn fetch(&self) -> Result<JwkSet, KeySetError> {
        let mut service = self.service_tower.lock().clone();
        service.ready().await?.call(()).await
    }

    async fn refresh(&self, stale: &CachedJwkSet) -> Result<CachedJwkSet, KeySetError> {
        // Skip the invalidation if another lookup already replaced the stale set.
        if let Some(current) = self.cache.get(&()).await {
            if Arc::ptr_eq(&current.keys, &stale.keys) {
                self.cache.invalidate(&()).await;
            }
        }
        self.cached().await
    }

    async fn find(&self, kid: &str) -> Result<Option<KeyDescriptor>, KeySetError> {
        let cached = self.cached().await?;
        if let Some(jwk) = cached.keys.find(kid) {
            return Ok(Some(jwk.clone()));
        }

        let Some(min_interval) = self.refresh_interval else {
            return Ok(None);
        };
        if !self.claim_refresh(&cached, min_interval) {
            tracing::debug!(kid, "unknown kid, JWK set refreshed too recently");
            return Ok(None);
        }

        tracing::debug!(kid, url = %self.url, "unknown kid, refreshing JWK set");
        match self.refresh(&cached).await {
            Ok(refreshed) => Ok(refreshed.keys.find(kid).cloned()),
            Err(err) => {
                // Keep serving the previous set unless a newer one was installed meanwhile.
                tracing::warn!(url = %self.url, error = %err, "failed to refresh JWK set");
                self.cache.entry(()).or_insert(cached).await;
                Err(err)
            }
        }
    }

    /// Records a refresh attempt unless one happened, successful or not, within `min_interval`.
    fn claim_refresh(&self, cached: &CachedJwkSet, min_interval: Duration) -> bool {
        let mut last_attempt = self.last_refresh_attempt.lock();
        let since = match *last_attempt {
            Some(attempted_at) => attempted_at.max(cached.fetched_at),
            None => cached.fetched_at,
        };
        if since.elapsed() < min_interval {
            return false;
        }
        *last_attempt = Some(Instant::now());
        true
    }
}

impl KeySetResolver for RemoteJwkSet {
    fn resolve<'a>(
        &'a self,
        kid: &'a str,
    ) -> BoxFuture<'a, Result<Option<KeyDescriptor>, KeySetError>> {
        Box::pin(self.find(kid))
    }
}

/// Helper service wrapping a `reqwest::Client` to fetch a JWK Set from a given URL.
#[derive(Clone)]
struct JwkSetRequestService {
    http_client: Client,
    url: Url,
}

impl Service<()> for JwkSetRequestService {
    type Response = JwkSet;
    type Error = KeySetError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        let http_client = self.http_client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let response = http_client
                .get(url)
                .send()
                .await
                .map_err(request_error)?;

            if !response.status().is_success() {
                return Err(KeySetError::ErrorResponse {
                    status_code: response.status(),
                });
            }

            let body = response.bytes().await.map_err(request_error)?;
            serde_json::from_slice(&body).map_err(KeySetError::InvalidDocument)
        })
    }
}

fn request_error(err: reqwest::Error) -> KeySetError {
    if err.is_timeout() {
        KeySetError::Timeout
    } else {
        KeySetError::Request(err)
    }
}
