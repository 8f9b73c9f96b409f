use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use http::{HeaderName, HeaderValue};
use tower_http::{
    compression::CompressionLayer, set_header::SetResponseHeaderLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    api::handler::{
        approve_batch, approve_payout, cancel_payout, create_batch, create_payout, drain,
        execute_batch, get_batch, get_payout, get_stats, health_check, list_payouts, retry_payout,
        AppState,
    },
    config::Config,
    error::AppResult,
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
};

pub async fn create_app(state: AppState, config: &Config) -> AppResult<Router> {
    info!("⚙️ Setting up HTTP routes...");

    let limiter = Arc::new(RateLimitLayer::new(
        config.rate_limit.requests_per_second,
        config.rate_limit.burst,
    )?);

    // Ledger calls are bounded separately; leave headroom so a timed-out batch still reports
    let request_timeout = Duration::from_secs(config.ledger.timeout_secs + 15);

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Payout requests
                .route("/payouts", post(create_payout).get(list_payouts))
                .route("/payouts/:id", get(get_payout))
                .route("/payouts/:id/approve", post(approve_payout))
                .route("/payouts/:id/cancel", post(cancel_payout))
                .route("/payouts/:id/retry", post(retry_payout))
                // Draining and batches
                .route("/drain", post(drain))
                .route("/batches", post(create_batch))
                .route("/batches/:id", get(get_batch))
                .route("/batches/:id/approve", post(approve_batch))
                .route("/batches/:id/execute", post(execute_batch))
                // Reporting
                .route("/stats", get(get_stats))
                .layer(from_fn_with_state(limiter, rate_limit_middleware)),
        )
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(create_cors_layer(&config.cors_origins))
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    Ok(app)
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
