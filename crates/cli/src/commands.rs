//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use stashfetch_client::{CachedClient, RateLimiter, ReqwestTransport, RequestOptions, TransportConfig};
use stashfetch_core::config::{AppConfig, StoreBackend};
use stashfetch_core::{Envelope, FileStore, KeyValueStore, Store};

use crate::cli::GetArgs;

/// One line of `get` output.
#[derive(Debug, Serialize)]
struct FetchSummary<'a> {
    url: &'a str,
    status: u16,
    from_cache: bool,
    fetched_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    bytes: usize,
}

impl<'a> FetchSummary<'a> {
    fn new(url: &'a str, envelope: &Envelope) -> Self {
        Self {
            url,
            status: envelope.status,
            from_cache: envelope.from_cache,
            fetched_at: envelope.fetched_at,
            expires_at: envelope.expires_at,
            bytes: envelope.body.len(),
        }
    }
}

pub async fn get(config: &AppConfig, args: &GetArgs) -> Result<()> {
    let transport = ReqwestTransport::new(TransportConfig {
        user_agent: config.user_agent.clone(),
        timeout: config.timeout(),
        ..TransportConfig::default()
    })?;

    let (store, sqlite): (Arc<dyn KeyValueStore>, Option<Arc<Store>>) = match config.store_backend {
        StoreBackend::Sqlite => {
            let store = Arc::new(
                Store::open(&config.db_path, config.store_config())
                    .await
                    .with_context(|| format!("opening store at {}", config.db_path.display()))?,
            );
            let shared: Arc<dyn KeyValueStore> = store.clone();
            (shared, Some(store))
        }
        StoreBackend::Files => {
            let files: Arc<dyn KeyValueStore> =
                Arc::new(FileStore::new(&config.db_path).forever(config.files_forever));
            (files, None)
        }
    };

    let client = CachedClient::builder(Arc::new(transport))
        .store(store)
        .limiter(Arc::new(RateLimiter::from_config(&config.rate_limits)))
        .max_inflight(config.max_inflight)
        .key_scheme(config.key_scheme())
        .build();

    let options = RequestOptions::default();
    let mut failures = 0usize;
    for url in &args.urls {
        match client.fetch(url, args.allow_expired, &options).await {
            Ok(envelope) if args.text => match envelope.text() {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    failures += 1;
                    tracing::error!(url = %url, error = %e, "cannot decode body as text");
                }
            },
            Ok(envelope) => println!("{}", serde_json::to_string(&FetchSummary::new(url, &envelope))?),
            Err(e) => {
                failures += 1;
                tracing::error!(url = %url, error = %e, "fetch failed");
            }
        }
    }

    // Writes are queued; make them durable before the runtime shuts down.
    if let Some(store) = sqlite {
        store.flush().await.context("flushing store")?;
        store.close();
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} fetches failed", args.urls.len());
    }
    Ok(())
}

pub fn print_config(config: &AppConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
