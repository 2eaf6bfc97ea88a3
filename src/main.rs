mod config;
mod contract;
mod errors;
mod history;
mod models;
mod pricing;
mod report;
mod risk;
mod server;
mod session;
mod simulation;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rainday pricer starting");

    // Load config
    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        n_simulations = cfg.simulation.n_simulations,
        method = %cfg.simulation.method,
        seed = cfg.simulation.seed,
        min_sample_parametric = cfg.fitting.min_sample_size_parametric,
        max_notional = cfg.limits.max_notional,
        "configuration loaded"
    );

    let port = cfg.server_port;
    let app_state = AppState::new(cfg);

    let app = axum::Router::new()
        .route("/", axum::routing::get(server::routes::home))
        .route("/api/health", axum::routing::get(server::routes::health))
        .route("/api/info", axum::routing::get(server::routes::info))
        .route("/api/counters", axum::routing::get(server::routes::get_counters))
        .route("/api/quote/latest", axum::routing::get(server::routes::get_latest_quote))
        .route("/api/price", axum::routing::post(server::routes::price_contract))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(app_state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
