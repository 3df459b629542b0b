use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::handlers::{
    check, default_policy, health_check, readiness_check, AppState, SharedState,
};
use crate::middleware::logging_middleware;
use crate::policy::RateLimitConfig;
use crate::rate_limiter::RateLimiter;

pub fn create_app(limiter: Arc<RateLimiter>, default: RateLimitConfig) -> Router {
    let state: SharedState = Arc::new(AppState {
        limiter,
        default_policy: default,
    });

    Router::new()
        .route("/v1/check", post(check))
        .route("/v1/policy", get(default_policy))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    config: Config,
    limiter: Arc<RateLimiter>,
    default_policy: RateLimitConfig,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(config.redis_url(), config.redis_timeout())?);
        let default_policy = config.default_policy()?;
        Ok(Self {
            config,
            limiter,
            default_policy,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let sweeper = spawn_sweeper(self.limiter.clone(), self.config.sweep_interval());

        let app = create_app(self.limiter, self.default_policy);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("limitgate listening on {}", self.config.bind_addr);
        if self.config.redis_url().is_none() {
            tracing::info!("no REDIS_URL configured, running on the in-process store only");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        sweeper.abort();
        Ok(())
    }
}

/// Periodically drop expired counters from the local store. Purely a
/// memory bound; decisions already ignore expired entries.
fn spawn_sweeper(limiter: Arc<RateLimiter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep_expired();
            if removed > 0 {
                debug!(removed, "swept expired local counters");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
