use crate::config::AppConfig;
use crate::report::PricingReport;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

// ── Latest quote (sent via watch channel) ──

/// Headline numbers of the most recent successful pricing run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QuoteSnapshot {
    pub run_id: Option<String>,
    pub pricing_date: Option<String>,
    pub location: Option<String>,
    pub distribution: Option<String>,
    pub gross_premium: f64,
    pub expected_payout: f64,
    /// Simulated 99% payout quantile
    pub var_99: f64,
    pub capital_required: f64,
}

impl From<&PricingReport> for QuoteSnapshot {
    fn from(r: &PricingReport) -> Self {
        Self {
            run_id: Some(r.metadata.run_id.to_string()),
            pricing_date: Some(r.metadata.pricing_date.clone()),
            location: Some(r.contract.location.clone()),
            distribution: Some(r.distribution.distribution_type.to_string()),
            gross_premium: r.pricing.gross_premium,
            expected_payout: r.pricing.expected_payout,
            var_99: r.simulation.var_99,
            capital_required: r.pricing.capital_required,
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub requests_received: AtomicU64,
    pub contracts_priced: AtomicU64,
    pub client_errors: AtomicU64,
    pub engine_errors: AtomicU64,
    /// Total Monte Carlo trials across all runs
    pub trials_simulated: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            contracts_priced: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            engine_errors: AtomicU64::new(0),
            trials_simulated: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_success(&self, trials: usize) {
        self.contracts_priced.fetch_add(1, Ordering::Relaxed);
        self.trials_simulated.fetch_add(trials as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self, client_error: bool) {
        if client_error {
            self.client_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.engine_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ── Application shared state (no locks) ──

pub struct AppState {
    pub config: AppConfig,

    // Pricing handler -> readers: latest quote (single producer, multi consumer)
    pub quote_tx: watch::Sender<QuoteSnapshot>,
    pub quote_rx: watch::Receiver<QuoteSnapshot>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        let (quote_tx, quote_rx) = watch::channel(QuoteSnapshot::default());
        Arc::new(Self {
            config,
            quote_tx,
            quote_rx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn publish(&self, report: &PricingReport) {
        self.counters.record_success(report.simulation.n_simulations);
        let _ = self.quote_tx.send(QuoteSnapshot::from(report));
    }
}
