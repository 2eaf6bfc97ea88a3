/// Monte Carlo payout simulation.
///
/// Draws N annual rainy-day counts, maps each through the contract payoff
///   payout = min(max(d - strike, 0), max_payout_days) · rate
/// and summarises the payout sample (moments, trigger frequency, VaR/CVaR,
/// percentile table).
///
/// Sampling methods:
///   bootstrap   uniform resampling with replacement from the historical record
///   parametric  variates from the fitted model
///   hybrid      round(N·w) bootstrap + remainder parametric, then shuffled
///
/// Every run owns its generator: `run()` seeds a ChaCha8 stream from the
/// configured seed, `run_with()` takes the caller's.
use crate::contract::ContractTerms;
use crate::errors::{PricingError, PricingResult};
use crate::models::DistributionModel;
use crate::risk::metrics::{self, CONFIDENCE_LEVELS, PERCENTILE_LEVELS};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const MIN_SIMULATIONS: usize = 1_000;
pub const MAX_SIMULATIONS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMethod {
    Bootstrap,
    Parametric,
    Hybrid,
}

impl FromStr for SimulationMethod {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bootstrap" => Ok(Self::Bootstrap),
            "parametric" => Ok(Self::Parametric),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(PricingError::UnknownMethod {
                kind: "simulation",
                name: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SimulationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Parametric => write!(f, "parametric"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationParams {
    pub n_simulations: usize,
    pub seed: u64,
    pub method: SimulationMethod,
    /// Share of hybrid draws taken by bootstrap
    pub bootstrap_weight: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            n_simulations: 10_000,
            seed: 42,
            method: SimulationMethod::Hybrid,
            bootstrap_weight: 0.5,
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> PricingResult<()> {
        if !(MIN_SIMULATIONS..=MAX_SIMULATIONS).contains(&self.n_simulations) {
            return Err(PricingError::InvalidParameters(format!(
                "n_simulations must be in [{MIN_SIMULATIONS}, {MAX_SIMULATIONS}], got {}",
                self.n_simulations
            )));
        }
        if !(0.0..=1.0).contains(&self.bootstrap_weight) {
            return Err(PricingError::InvalidParameters(format!(
                "bootstrap_weight must be in [0, 1], got {}",
                self.bootstrap_weight
            )));
        }
        Ok(())
    }

    /// (bootstrap draws, parametric draws) for the configured method.
    pub fn split(&self) -> (usize, usize) {
        let n = self.n_simulations;
        match self.method {
            SimulationMethod::Bootstrap => (n, 0),
            SimulationMethod::Parametric => (0, n),
            SimulationMethod::Hybrid => {
                let n_boot = ((n as f64) * self.bootstrap_weight).round() as usize;
                let n_boot = n_boot.min(n);
                (n_boot, n - n_boot)
            }
        }
    }
}

/// Simulated sample plus its aggregate statistics.
/// Raw per-trial arrays stay in memory and are never serialised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub n_simulations: usize,
    #[serde(skip)]
    pub simulated_rainy_days: Vec<u32>,
    #[serde(skip)]
    pub simulated_payouts: Vec<f64>,
    pub mean_payout: f64,
    pub std_payout: f64,
    pub min_payout: f64,
    pub max_payout: f64,
    pub trigger_frequency: f64,
    pub var_90: f64,
    pub var_95: f64,
    pub var_99: f64,
    pub cvar_90: f64,
    pub cvar_95: f64,
    pub cvar_99: f64,
    /// Payout percentile keyed by level in percent
    pub percentiles: BTreeMap<u32, f64>,
}

pub struct MonteCarloEngine<'a> {
    contract: &'a ContractTerms,
    model: &'a DistributionModel,
    history: &'a [u32],
    params: SimulationParams,
}

impl<'a> MonteCarloEngine<'a> {
    pub fn new(
        contract: &'a ContractTerms,
        model: &'a DistributionModel,
        history: &'a [u32],
        params: SimulationParams,
    ) -> PricingResult<Self> {
        params.validate()?;
        if history.is_empty() && params.split().0 > 0 {
            return Err(PricingError::InsufficientData(
                "bootstrap sampling needs a non-empty historical record".to_string(),
            ));
        }
        Ok(Self {
            contract,
            model,
            history,
            params,
        })
    }

    /// Run with a fresh generator seeded from the configured seed.
    pub fn run(&self) -> SimulationResult {
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        self.run_with(&mut rng)
    }

    pub fn run_with<R: Rng + ?Sized>(&self, rng: &mut R) -> SimulationResult {
        let rainy_days = self.simulate_rainy_days(rng);
        let payouts: Vec<f64> = rainy_days.iter().map(|&d| self.contract.payout(d)).collect();
        summarise(rainy_days, payouts)
    }

    pub fn simulate_rainy_days<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u32> {
        let (n_boot, n_param) = self.params.split();
        let mut draws = Vec::with_capacity(n_boot + n_param);

        for _ in 0..n_boot {
            draws.push(self.history[rng.gen_range(0..self.history.len())]);
        }
        if n_param > 0 {
            draws.extend(self.model.sample(rng, n_param));
        }
        if self.params.method == SimulationMethod::Hybrid {
            draws.shuffle(rng);
        }
        draws
    }
}

fn summarise(rainy_days: Vec<u32>, payouts: Vec<f64>) -> SimulationResult {
    let mut sorted = payouts.clone();
    sorted.sort_by(f64::total_cmp);

    let (mean, std) = metrics::mean_and_std(&payouts);
    let [var_90, var_95, var_99] = CONFIDENCE_LEVELS.map(|q| metrics::value_at_risk(&sorted, q));
    let [cvar_90, cvar_95, cvar_99] = [var_90, var_95, var_99]
        .map(|var| metrics::conditional_value_at_risk(&sorted, var));

    let percentiles = PERCENTILE_LEVELS
        .iter()
        .map(|&p| (p, metrics::percentile_sorted(&sorted, p as f64)))
        .collect();

    SimulationResult {
        n_simulations: payouts.len(),
        mean_payout: mean,
        std_payout: std,
        min_payout: sorted.first().copied().unwrap_or(0.0),
        max_payout: sorted.last().copied().unwrap_or(0.0),
        trigger_frequency: metrics::trigger_frequency(&payouts),
        var_90,
        var_95,
        var_99,
        cvar_90,
        cvar_95,
        cvar_99,
        percentiles,
        simulated_rainy_days: rainy_days,
        simulated_payouts: payouts,
    }
}
