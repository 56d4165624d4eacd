//! Cache-aware client.
//!
//! [`CachedClient::fetch`] serves a URL from the store while it is fresh and
//! otherwise goes to the network: wait on the rate limiter, take an inflight
//! slot, call the transport, give the response a lifetime with the
//! freshness heuristic, and hand cacheable results back to the store.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Semaphore;

use stashfetch_core::envelope::{self, CodecError};
use stashfetch_core::store::KeyScheme;
use stashfetch_core::{Clock, Envelope, KeyValueStore, SystemClock};

use crate::heuristic::{Heuristic, header_max_age_heuristic};
use crate::limiter::RateLimiter;
use crate::transport::{RequestOptions, Transport, TransportError};

/// Computes a caller-defined view of a response.
pub type Transform<T> = Arc<dyn Fn(&Envelope) -> T + Send + Sync>;

/// Errors from [`CachedClient::fetch`].
///
/// Store trouble never surfaces here; it degrades to a cache miss.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of looking a key up in the store.
#[derive(Debug)]
enum Lookup {
    Fresh(Envelope),
    Stale(Envelope),
    Absent,
    Corrupt(CodecError),
}

/// HTTP client fronted by a durable response cache.
///
/// Holds no lock of its own: concurrent fetches coordinate only through the
/// store's writer, the rate limiter, and the inflight gate.
pub struct CachedClient<T = ()> {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn KeyValueStore>>,
    heuristic: Heuristic<T>,
    transform: Option<Transform<T>>,
    limiter: Option<Arc<RateLimiter>>,
    inflight: Option<Arc<Semaphore>>,
    clock: Arc<dyn Clock>,
    key_scheme: KeyScheme,
}

impl CachedClient<()> {
    pub fn builder(transport: Arc<dyn Transport>) -> CachedClientBuilder<()> {
        CachedClientBuilder {
            transport,
            store: None,
            heuristic: None,
            transform: None,
            limiter: None,
            max_inflight: 0,
            clock: Arc::new(SystemClock),
            key_scheme: KeyScheme::Plain,
        }
    }
}

impl<T: Default + Send + 'static> CachedClient<T> {
    /// Fetch `url`, from the store when possible.
    ///
    /// A stored response is returned as-is while it is fresh, or whenever
    /// `allow_expired` is set. Otherwise the network is used and the result
    /// returned with `from_cache == false`; responses with status 200 and a
    /// positive lifetime are queued for storage.
    pub async fn fetch(
        &self,
        url: &str,
        allow_expired: bool,
        options: &RequestOptions,
    ) -> Result<Envelope<T>, FetchError> {
        let storage_key = self.key_scheme.storage_key(url);

        match self.lookup(url, &storage_key).await {
            Lookup::Fresh(cached) => {
                tracing::debug!(url, "cache hit");
                return Ok(self.finish(cached));
            }
            Lookup::Stale(cached) if allow_expired => {
                tracing::debug!(url, "serving expired cache entry");
                return Ok(self.finish(cached));
            }
            Lookup::Stale(_) => {
                tracing::debug!(url, "cache entry expired");
                self.discard(&storage_key).await;
            }
            Lookup::Corrupt(reason) => {
                tracing::debug!(url, %reason, "discarding unreadable cache entry");
                self.discard(&storage_key).await;
            }
            Lookup::Absent => tracing::debug!(url, "cache miss"),
        }

        let mut envelope = self.fetch_network(url, options).await?;
        let lifetime = (self.heuristic)(&envelope);
        envelope.expires_at = Some(expiry(envelope.fetched_at, lifetime));

        if let Some(store) = &self.store
            && envelope.status == 200
            && lifetime > 0
        {
            match envelope::encode(url, &envelope) {
                Ok(bytes) => {
                    if let Err(e) = store.set(&storage_key, bytes).await {
                        tracing::warn!(url, error = %e, "failed to queue cache write");
                    }
                }
                Err(e) => tracing::warn!(url, error = %e, "failed to encode response for cache"),
            }
        }

        Ok(envelope)
    }

    async fn lookup(&self, url: &str, storage_key: &str) -> Lookup {
        let Some(store) = &self.store else {
            return Lookup::Absent;
        };

        let bytes = match store.get(storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Lookup::Absent,
            Err(e) => {
                tracing::warn!(url, error = %e, "cache read failed; treating as miss");
                return Lookup::Absent;
            }
        };

        match envelope::decode(url, &bytes) {
            Ok(cached) if cached.is_fresh_at(self.clock.now()) => Lookup::Fresh(cached),
            Ok(cached) => Lookup::Stale(cached),
            Err(e) => Lookup::Corrupt(e),
        }
    }

    async fn discard(&self, storage_key: &str) {
        if let Some(store) = &self.store
            && let Err(e) = store.delete(storage_key).await
        {
            tracing::warn!(key = storage_key, error = %e, "failed to queue cache delete");
        }
    }

    async fn fetch_network(&self, url: &str, options: &RequestOptions) -> Result<Envelope<T>, FetchError> {
        if let Some(limiter) = &self.limiter {
            limiter.hit().await;
        }

        let response = {
            let _slot = match &self.inflight {
                Some(gate) => gate.acquire().await.ok(),
                None => None,
            };
            self.transport.get(url, options).await?
        };

        let raw = Envelope::new(
            self.clock.now(),
            response.status,
            response.headers,
            response.encoding.unwrap_or_else(|| "utf-8".to_string()),
            response.body,
        );
        Ok(self.finish(raw))
    }

    /// Attach the transformed view.
    fn finish(&self, raw: Envelope) -> Envelope<T> {
        let transformed = match &self.transform {
            Some(transform) => transform(&raw),
            None => T::default(),
        };
        raw.with_transformed(transformed)
    }
}

fn expiry(fetched_at: DateTime<Utc>, lifetime: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(lifetime)
        .and_then(|delta| fetched_at.checked_add_signed(delta))
        .unwrap_or(if lifetime > 0 { DateTime::<Utc>::MAX_UTC } else { fetched_at })
}

/// Builder for [`CachedClient`].
pub struct CachedClientBuilder<T> {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn KeyValueStore>>,
    heuristic: Option<Heuristic<T>>,
    transform: Option<Transform<T>>,
    limiter: Option<Arc<RateLimiter>>,
    max_inflight: usize,
    clock: Arc<dyn Clock>,
    key_scheme: KeyScheme,
}

impl<T: Default + Send + 'static> CachedClientBuilder<T> {
    /// Cache responses in `store`. Without a store every fetch hits the network.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Freshness policy. Defaults to [`header_max_age_heuristic`].
    pub fn heuristic(mut self, heuristic: Heuristic<T>) -> Self {
        self.heuristic = Some(heuristic);
        self
    }

    /// Derive a typed view from every response.
    ///
    /// Changes the view type, so any heuristic set earlier is dropped.
    pub fn transform<U, F>(self, transform: F) -> CachedClientBuilder<U>
    where
        F: Fn(&Envelope) -> U + Send + Sync + 'static,
    {
        CachedClientBuilder {
            transport: self.transport,
            store: self.store,
            heuristic: None,
            transform: Some(Arc::new(transform)),
            limiter: self.limiter,
            max_inflight: self.max_inflight,
            clock: self.clock,
            key_scheme: self.key_scheme,
        }
    }

    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Cap concurrent transport calls. 0 leaves them uncapped.
    pub fn max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn key_scheme(mut self, key_scheme: KeyScheme) -> Self {
        self.key_scheme = key_scheme;
        self
    }

    pub fn build(self) -> CachedClient<T> {
        let heuristic: Heuristic<T> = match self.heuristic {
            Some(heuristic) => heuristic,
            None => Arc::new(header_max_age_heuristic::<T>),
        };

        CachedClient {
            transport: self.transport,
            store: self.store,
            heuristic,
            transform: self.transform,
            limiter: self.limiter,
            inflight: (self.max_inflight > 0).then(|| Arc::new(Semaphore::new(self.max_inflight))),
            clock: self.clock,
            key_scheme: self.key_scheme,
        }
    }
}
