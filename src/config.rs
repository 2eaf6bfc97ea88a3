use crate::errors::{PricingError, PricingResult};
use crate::models::fitting::FitSettings;
use crate::pricing::premium::PricingParams;
use crate::risk::limits::ContractLimits;
use crate::simulation::monte_carlo::{SimulationMethod, SimulationParams};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub pricing: PricingParams,
    pub simulation: SimulationParams,
    pub fitting: FitSettings,
    pub limits: ContractLimits,
}

impl AppConfig {
    pub fn from_env() -> PricingResult<Self> {
        dotenvy::dotenv().ok();

        let pricing = PricingParams {
            volatility_loading: env_parse("VOLATILITY_LOADING", 0.15)?,
            basis_risk_loading: env_parse("BASIS_RISK_LOADING", 0.05)?,
            profit_margin: env_parse("PROFIT_MARGIN", 0.20)?,
            operational_cost: env_parse("OPERATIONAL_COST", 1000.0)?,
            cost_of_capital: env_parse("COST_OF_CAPITAL", 0.12)?,
            capital_var_multiplier: env_parse("CAPITAL_VAR_MULTIPLIER", 1.5)?,
        };
        pricing
            .validate()
            .map_err(|e| PricingError::Config(format!("pricing defaults: {e}")))?;

        let method = env_var_or("SIMULATION_METHOD", "hybrid");
        let simulation = SimulationParams {
            n_simulations: env_parse("N_SIMULATIONS", 10_000usize)?,
            seed: env_parse("RANDOM_SEED", 42u64)?,
            method: SimulationMethod::from_str(&method)
                .map_err(|e| PricingError::Config(format!("SIMULATION_METHOD: {e}")))?,
            bootstrap_weight: env_parse("BOOTSTRAP_WEIGHT", 0.5)?,
        };
        simulation
            .validate()
            .map_err(|e| PricingError::Config(format!("simulation defaults: {e}")))?;

        let fitting = FitSettings {
            min_sample_size_parametric: env_parse("MIN_SAMPLE_SIZE_PARAMETRIC", 20usize)?,
            gof_significance_level: env_parse("GOF_SIGNIFICANCE_LEVEL", 0.05)?,
        };

        let limits = ContractLimits {
            max_notional: env_parse("MAX_NOTIONAL_PER_CONTRACT", 500_000.0)?,
            default_grid_radius_km: env_parse("DEFAULT_GRID_RADIUS_KM", 10.0)?,
            default_settlement_days: env_parse("DEFAULT_SETTLEMENT_DAYS", 30u32)?,
            ..ContractLimits::default()
        };

        Ok(Self {
            server_port: env_parse("SERVER_PORT", 3001u16)?,
            pricing,
            simulation,
            fitting,
            limits,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 3001,
            pricing: PricingParams::default(),
            simulation: SimulationParams::default(),
            fitting: FitSettings::default(),
            limits: ContractLimits::default(),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> PricingResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| PricingError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
