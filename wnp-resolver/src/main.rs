//! wnp-resolver - "What's now playing" resolver
//!
//! Watches playback sources, resolves the playing track to canonical
//! metadata and publishes it to the configured sinks. The overlay HTTP server
//! serves the current records and an SSE event stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wnp_common::config::{default_data_dir, init_tracing, load_toml_config, resolve_config_path};
use wnp_common::events::EventBus;

use wnp_resolver::cache::CacheStore;
use wnp_resolver::config::{RegistryKind, ResolverConfig, CONFIG_ENV_VAR};
use wnp_resolver::coordinator::{Coordinator, PipelineComponents};
use wnp_resolver::extractors::LoftyTagExtractor;
use wnp_resolver::fingerprint::{self, AcoustIdClient, FingerprintCache, FingerprintResolver, TrackIdentifier};
use wnp_resolver::image_cache::ImageCache;
use wnp_resolver::registry::{self, DiscogsRegistry, MusicBrainzRegistry, RegistryCache, RegistryLookup};
use wnp_resolver::remote;
use wnp_resolver::sinks::SinkDispatcher;
use wnp_resolver::watcher::spawn_watchers;
use wnp_resolver::AppState;

/// How often caches are written to disk while running
const CACHE_PERSIST_INTERVAL: Duration = Duration::from_secs(300);

/// Track events buffered between watchers and the coordinator
const TRACK_EVENT_CAPACITY: usize = 64;

/// Command-line arguments for wnp-resolver
#[derive(Parser, Debug)]
#[command(name = "wnp-resolver")]
#[command(about = "Resolves and publishes the currently playing track")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Log level or EnvFilter directive; overrides [logging].level
    #[arg(short, long)]
    log_level: Option<String>,

    /// HTTP port; overrides [server].port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Step 1: Configuration (parse errors and invalid settings are fatal)
    let mut config: ResolverConfig = match resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR) {
        Some(path) => load_toml_config(&path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => ResolverConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging).context("Failed to initialize logging")?;
    info!("Starting wnp-resolver {}", env!("CARGO_PKG_VERSION"));

    config.apply_env_credentials();
    config.validate().context("Invalid configuration")?;

    match config.remote.contact.as_deref() {
        Some(contact) => {
            remote::set_contact(contact);
        }
        None if config.active_registries().iter().any(|r| r.kind == RegistryKind::Musicbrainz) => {
            warn!("No [remote].contact configured; MusicBrainz asks clients to identify a contact")
        }
        None => {}
    }

    let event_bus = EventBus::new(config.server.event_capacity);

    // Step 2: Caches, restored from disk when possible
    let registry_cache = Arc::new(RegistryCache::new(
        config.cache.capacity,
        config.cache.shards,
        Duration::from_secs(config.cache.ttl_secs),
    ));
    let fingerprint_cache = Arc::new(FingerprintCache::new(
        config.cache.capacity,
        config.cache.shards,
        Duration::from_secs(config.fingerprint.cache_ttl_secs),
    ));

    let store_path = config
        .cache
        .persist_path
        .clone()
        .unwrap_or_else(|| default_data_dir().join("cache.db"));
    let store = match CacheStore::open(&store_path).await {
        Ok(store) => {
            restore_caches(&store, &registry_cache, &fingerprint_cache).await;
            Some(store)
        }
        Err(e) => {
            warn!("Cache persistence disabled ({}): {}", store_path.display(), e);
            None
        }
    };

    // Step 3: Pipeline components
    let mut lookup = RegistryLookup::new(
        Arc::clone(&registry_cache),
        config.pipeline.arbitration,
        config.pipeline.high_confidence,
    );
    for registry_config in config.active_registries() {
        let timeout = Duration::from_millis(registry_config.timeout_ms);
        lookup = match registry_config.kind {
            RegistryKind::Musicbrainz => lookup.with_registry(
                Arc::new(
                    MusicBrainzRegistry::new(registry_config.endpoint.clone(), registry_config.rate_per_second, timeout)
                        .context("Failed to create MusicBrainz client")?,
                ),
                registry_config.priority,
            ),
            RegistryKind::Discogs => lookup.with_registry(
                Arc::new(
                    DiscogsRegistry::new(
                        registry_config.endpoint.clone(),
                        registry_config.token.clone().unwrap_or_default(),
                        registry_config.rate_per_second,
                        timeout,
                    )
                    .context("Failed to create Discogs client")?,
                ),
                registry_config.priority,
            ),
        };
    }
    info!(registries = ?lookup.registry_names(), "Registry lookup ready");

    let identifier: Option<Arc<dyn TrackIdentifier>> =
        match (config.fingerprint.enabled, config.fingerprint.acoustid_api_key.clone()) {
            (true, Some(api_key)) => {
                let timeout = Duration::from_millis(config.fingerprint.timeout_ms);
                let client = AcoustIdClient::new(
                    config.fingerprint.endpoint.clone(),
                    api_key,
                    config.fingerprint.rate_per_second,
                    timeout,
                    config.fingerprint.min_score,
                )
                .context("Failed to create AcoustID client")?;
                info!("Fingerprint identification enabled (AcoustID)");
                Some(Arc::new(FingerprintResolver::new(
                    Arc::new(client),
                    Arc::clone(&fingerprint_cache),
                    timeout,
                    config.fingerprint.max_seconds,
                )))
            }
            (true, None) => {
                warn!("No AcoustID API key configured; fingerprint identification disabled");
                None
            }
            (false, _) => None,
        };

    let mut dispatcher = SinkDispatcher::from_config(&config.sinks, event_bus.clone())
        .await
        .context("Failed to initialize sinks")?;

    let image_cache = if config.image_cache.enabled {
        let path = config
            .image_cache
            .path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("images.db"));
        let timeout = Duration::from_millis(config.image_cache.timeout_ms);
        match ImageCache::open(&path, config.image_cache.max_bytes, config.image_cache.workers, timeout).await {
            Ok(cache) => {
                dispatcher.register("image-cache", Arc::new(cache.clone()), timeout);
                Some(cache)
            }
            Err(e) => {
                warn!("Image cache disabled ({}): {}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    if dispatcher.is_empty() {
        warn!("No sinks configured; resolved tracks are only logged and served over HTTP");
    }

    let coordinator = Coordinator::new(
        PipelineComponents {
            extractor: Arc::new(LoftyTagExtractor::new(config.pipeline.tag_confidence)),
            identifier,
            lookup: Arc::new(lookup),
            dispatcher: Arc::new(dispatcher),
        },
        event_bus.clone(),
        config.pipeline.clone(),
    );

    // Step 4: Watchers feed the coordinator
    let cancel = CancellationToken::new();
    let (track_tx, mut track_rx) = mpsc::channel(TRACK_EVENT_CAPACITY);
    let watchers = spawn_watchers(&config.watcher.sources, &event_bus, track_tx, &cancel);
    if watchers.is_empty() {
        warn!("No sources configured; nothing will be watched");
    }

    let submitter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            while let Some(event) = track_rx.recv().await {
                // The handle is not awaited: resolutions run independently
                let _ = coordinator.submit(event);
            }
        })
    };

    let persister = store.clone().map(|store| {
        let registry_cache = Arc::clone(&registry_cache);
        let fingerprint_cache = Arc::clone(&fingerprint_cache);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_PERSIST_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => persist_caches(&store, &registry_cache, &fingerprint_cache).await,
                }
            }
        })
    });

    // Step 5: HTTP server until shutdown
    if config.server.enabled {
        let mut state = AppState::new(event_bus.clone(), coordinator.clone());
        if let Some(cache) = &image_cache {
            state = state.with_image_cache(cache.clone());
        }
        let app = wnp_resolver::build_router(state);
        let addr = format!("{}:{}", config.server.bind, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Listening on http://{}", addr);
        info!("Now playing: http://{}/now-playing", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;
    } else {
        info!("HTTP server disabled");
        shutdown_signal().await;
    }

    // Step 6: Shutdown
    cancel.cancel();
    for watcher in watchers {
        let _ = watcher.await;
    }
    let _ = submitter.await;
    if let Some(persister) = persister {
        let _ = persister.await;
    }
    if let Some(store) = store {
        persist_caches(&store, &registry_cache, &fingerprint_cache).await;
        store.close().await;
    }
    if let Some(cache) = image_cache {
        cache.close().await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn restore_caches(store: &CacheStore, registry_cache: &RegistryCache, fingerprint_cache: &FingerprintCache) {
    match store.load(registry::CACHE_NAMESPACE).await {
        Ok(entries) => {
            let restored = registry_cache.restore(entries);
            info!(restored, "Restored registry cache");
        }
        Err(e) => warn!("Failed to load registry cache: {}", e),
    }
    match store.load(fingerprint::CACHE_NAMESPACE).await {
        Ok(entries) => {
            let restored = fingerprint_cache.restore(entries);
            info!(restored, "Restored fingerprint cache");
        }
        Err(e) => warn!("Failed to load fingerprint cache: {}", e),
    }
}

async fn persist_caches(store: &CacheStore, registry_cache: &RegistryCache, fingerprint_cache: &FingerprintCache) {
    registry_cache.purge_expired();
    fingerprint_cache.purge_expired();
    if let Err(e) = store.save(registry::CACHE_NAMESPACE, &registry_cache.snapshot()).await {
        warn!("Failed to persist registry cache: {}", e);
    }
    if let Err(e) = store.save(fingerprint::CACHE_NAMESPACE, &fingerprint_cache.snapshot()).await {
        warn!("Failed to persist fingerprint cache: {}", e);
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
