pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod settings;

use crate::config::ServiceConfig;
use crate::discovery::PublicIpResolver;
use crate::error::{LimiterError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{
    admission_middleware, AdmissionState, RateLimiter, RedisWindowCounter, ThresholdRefresher,
};
use crate::settings::ConsulKv;
use axum::{middleware, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the HTTP application: `/health` plus admission-checked routes
pub fn build_app(state: AdmissionState, metrics: Option<MetricsService>) -> Router {
    let limited = Router::new()
        .route("/", get(|| async { "OK" }))
        .layer(middleware::from_fn_with_state(state, admission_middleware));

    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(limited);

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

/// Initialize the limiter service and serve until `shutdown` resolves
pub async fn run(
    config: ServiceConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    config.validate()?;

    info!("Starting iplimit");

    let metrics = if config.metrics.enabled {
        Some(MetricsService::new()?)
    } else {
        None
    };

    if config.ip_discovery.enabled {
        let resolver = PublicIpResolver::from_config(&config.ip_discovery)?;
        match resolver.my_ip().await {
            Ok(ip) => info!(ip = %ip, "Public address resolved"),
            Err(e) => warn!(error = %e, "Public address lookup failed"),
        }
    }

    let settings = Arc::new(ConsulKv::new(&config.consul)?);
    let counter = RedisWindowCounter::new(&config.redis.url, &config.redis.key_prefix)
        .await
        .map_err(|e| LimiterError::Internal(format!("Failed to connect to Redis: {}", e)))?;
    if let Err(e) = counter.ping().await {
        warn!(error = %e, "Redis ping failed, counter calls will follow the fail mode");
    }

    let limiter = Arc::new(RateLimiter::from_config(
        &config.limiter,
        settings,
        Arc::new(counter),
    ));
    info!(
        key = %limiter.threshold_key(),
        fail_mode = ?limiter.fail_mode(),
        "Rate limiter initialized"
    );

    // First tick refreshes immediately
    let refresher = ThresholdRefresher::new(
        limiter.clone(),
        Duration::from_secs(config.limiter.refresh_interval_secs),
    )
    .start();

    let app = build_app(
        AdmissionState::new(limiter, config.server.trust_forwarded_for),
        metrics,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(LimiterError::Io)?;

    info!("Listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| LimiterError::Internal(format!("Server error: {}", e)));

    refresher.stop().await;
    info!("iplimit stopped");

    served
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iplimit=debug,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
