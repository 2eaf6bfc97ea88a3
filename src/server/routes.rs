use crate::config::AppConfig;
use crate::contract::ContractRequest;
use crate::errors::{PricingError, PricingResult};
use crate::models::fitting::FitMethod;
use crate::pricing::premium::PricingParams;
use crate::report::PricingReport;
use crate::session::PricingSession;
use crate::simulation::monte_carlo::{SimulationMethod, SimulationParams};
use crate::state::{AppState, QuoteSnapshot};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use std::sync::Arc;

/// POST /api/price body
#[derive(Debug, serde::Deserialize)]
pub struct PriceRequest {
    pub contract: ContractRequest,
    pub historical_data: Vec<i64>,
    #[serde(default)]
    pub pricing: PricingOverrides,
    #[serde(default)]
    pub simulation: SimulationOverrides,
    #[serde(default)]
    pub distribution_method: Option<String>,
}

/// Per-request pricing loadings; unset fields keep the configured value.
#[derive(Debug, Default, serde::Deserialize)]
pub struct PricingOverrides {
    pub volatility_loading: Option<f64>,
    pub basis_risk_loading: Option<f64>,
    pub profit_margin: Option<f64>,
    pub operational_cost: Option<f64>,
    pub cost_of_capital: Option<f64>,
}

impl PricingOverrides {
    pub fn apply(self, base: &PricingParams) -> PricingResult<PricingParams> {
        let params = PricingParams {
            volatility_loading: self.volatility_loading.unwrap_or(base.volatility_loading),
            basis_risk_loading: self.basis_risk_loading.unwrap_or(base.basis_risk_loading),
            profit_margin: self.profit_margin.unwrap_or(base.profit_margin),
            operational_cost: self.operational_cost.unwrap_or(base.operational_cost),
            cost_of_capital: self.cost_of_capital.unwrap_or(base.cost_of_capital),
            capital_var_multiplier: base.capital_var_multiplier,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Per-request simulation settings; unset fields keep the configured value.
#[derive(Debug, Default, serde::Deserialize)]
pub struct SimulationOverrides {
    pub n_simulations: Option<usize>,
    #[serde(alias = "random_seed")]
    pub seed: Option<u64>,
    pub method: Option<String>,
    pub bootstrap_weight: Option<f64>,
}

impl SimulationOverrides {
    pub fn apply(self, base: &SimulationParams) -> PricingResult<SimulationParams> {
        let method = match self.method.as_deref() {
            Some(name) => name.parse::<SimulationMethod>()?,
            None => base.method,
        };
        let params = SimulationParams {
            n_simulations: self.n_simulations.unwrap_or(base.n_simulations),
            seed: self.seed.unwrap_or(base.seed),
            method,
            bootstrap_weight: self.bootstrap_weight.unwrap_or(base.bootstrap_weight),
        };
        params.validate()?;
        Ok(params)
    }
}

/// Resolve request overrides against the config and run a full pricing session.
/// CPU-bound; callers on the async runtime go through `spawn_blocking`.
pub fn run_pricing(config: &AppConfig, request: PriceRequest) -> PricingResult<PricingReport> {
    let method = match request.distribution_method.as_deref() {
        Some(name) => name.parse::<FitMethod>()?,
        None => FitMethod::Auto,
    };
    let pricing = request.pricing.apply(&config.pricing)?;
    let simulation = request.simulation.apply(&config.simulation)?;

    PricingSession::from_config(config).price_contract(
        &request.contract,
        &request.historical_data,
        pricing,
        simulation,
        method,
    )
}

fn error_response(state: &AppState, err: PricingError) -> (StatusCode, Json<serde_json::Value>) {
    let client = err.is_client_error();
    state.counters.record_failure(client);
    let status = if client {
        tracing::warn!(error = %err, "pricing request rejected");
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %err, "pricing request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(serde_json::json!({ "success": false, "error": err.to_string() })),
    )
}

/// GET / -- service description
pub async fn home() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "rainday pricer",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/api/health": "GET - health check",
            "/api/info": "GET - supported methods and features",
            "/api/counters": "GET - request counters",
            "/api/quote/latest": "GET - most recent successful quote",
            "/api/price": "POST - price a rainfall contract",
        }
    }))
}

/// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/info -- supported methods and active defaults
pub async fn info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cfg = &state.config;
    Json(serde_json::json!({
        "features": [
            "distribution fitting (poisson, negative binomial, empirical)",
            "chi-squared goodness of fit",
            "monte carlo payout simulation",
            "var / cvar risk metrics",
            "two-pass premium with simulated capital",
        ],
        "distribution_methods": ["auto", "poisson", "negative_binomial", "empirical"],
        "simulation_methods": ["bootstrap", "parametric", "hybrid"],
        "defaults": {
            "pricing": cfg.pricing,
            "simulation": cfg.simulation,
            "min_sample_size_parametric": cfg.fitting.min_sample_size_parametric,
            "gof_significance_level": cfg.fitting.gof_significance_level,
        }
    }))
}

/// GET /api/counters -- request counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    Json(serde_json::json!({
        "requests_received": state.counters.requests_received.load(Relaxed),
        "contracts_priced": state.counters.contracts_priced.load(Relaxed),
        "client_errors": state.counters.client_errors.load(Relaxed),
        "engine_errors": state.counters.engine_errors.load(Relaxed),
        "trials_simulated": state.counters.trials_simulated.load(Relaxed),
    }))
}

/// GET /api/quote/latest -- last successful quote (from watch channel, no lock)
pub async fn get_latest_quote(State(state): State<Arc<AppState>>) -> Json<QuoteSnapshot> {
    let snapshot = state.quote_rx.borrow().clone();
    Json(snapshot)
}

/// POST /api/price -- full pricing run on a blocking worker
pub async fn price_contract(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    use portable_atomic::Ordering::Relaxed;
    state.counters.requests_received.fetch_add(1, Relaxed);

    let request: PriceRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&state, e.into()),
    };

    let worker_state = state.clone();
    let outcome =
        tokio::task::spawn_blocking(move || run_pricing(&worker_state.config, request)).await;

    match outcome {
        Ok(Ok(report)) => {
            tracing::info!(
                run_id = %report.metadata.run_id,
                location = %report.contract.location,
                gross_premium = report.pricing.gross_premium,
                "contract priced"
            );
            state.publish(&report);
            let summary = report.summary();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "results": report,
                    "summary": summary,
                })),
            )
        }
        Ok(Err(e)) => error_response(&state, e),
        Err(e) => error_response(&state, PricingError::Internal(format!("pricing worker: {e}"))),
    }
}
