/// Pricing session: the sequential state machine driving one pricing run.
///
///   Uninitialized → ContractSet → HistoryLoaded → DistributionFitted
///                 → PricedInitial → Simulated → PricedFinal
///
/// Each step runs only from its immediate predecessor stage. Out-of-order
/// calls fail with `PricingError::Precedence` naming the missing step, and a
/// failed step leaves the stage untouched. The session is the only owner of
/// run state; the engines it drives are pure.
use crate::config::AppConfig;
use crate::contract::{ContractRequest, ContractTerms};
use crate::errors::{PricingError, PricingResult};
use crate::history::{self, HistoricalSummary};
use crate::models::fitting::{DistributionFitter, FitMethod, FitSelection, FitSettings};
use crate::pricing::premium::{PremiumBreakdown, PricingEngine, PricingParams};
use crate::report::{
    CapitalDisclosure, ContractSection, DistributionSection, PricingReport, ProfitabilitySection,
    RunMetadata,
};
use crate::risk::limits::ContractLimits;
use crate::simulation::monte_carlo::{MonteCarloEngine, SimulationParams, SimulationResult};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingStage {
    Uninitialized,
    ContractSet,
    HistoryLoaded,
    DistributionFitted,
    PricedInitial,
    Simulated,
    PricedFinal,
}

impl PricingStage {
    /// Operation that moves a session into this stage.
    pub fn step_name(self) -> &'static str {
        match self {
            Self::Uninitialized => "new",
            Self::ContractSet => "set_contract",
            Self::HistoryLoaded => "load_history",
            Self::DistributionFitted => "fit_distribution",
            Self::PricedInitial => "price_initial",
            Self::Simulated => "simulate",
            Self::PricedFinal => "price_final",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Uninitialized => Some(Self::ContractSet),
            Self::ContractSet => Some(Self::HistoryLoaded),
            Self::HistoryLoaded => Some(Self::DistributionFitted),
            Self::DistributionFitted => Some(Self::PricedInitial),
            Self::PricedInitial => Some(Self::Simulated),
            Self::Simulated => Some(Self::PricedFinal),
            Self::PricedFinal => None,
        }
    }
}

impl std::fmt::Display for PricingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::ContractSet => write!(f, "contract_set"),
            Self::HistoryLoaded => write!(f, "history_loaded"),
            Self::DistributionFitted => write!(f, "distribution_fitted"),
            Self::PricedInitial => write!(f, "priced_initial"),
            Self::Simulated => write!(f, "simulated"),
            Self::PricedFinal => write!(f, "priced_final"),
        }
    }
}

pub struct PricingSession {
    run_id: Uuid,
    pricing_date: DateTime<Utc>,
    limits: ContractLimits,
    fit_settings: FitSettings,
    stage: PricingStage,

    contract: Option<ContractTerms>,
    history: Option<Vec<u32>>,
    historical_summary: Option<HistoricalSummary>,
    fit: Option<FitSelection>,
    pricing_params: Option<PricingParams>,
    initial_pricing: Option<PremiumBreakdown>,
    simulation_params: Option<SimulationParams>,
    simulation: Option<SimulationResult>,
    final_pricing: Option<PremiumBreakdown>,
}

impl PricingSession {
    pub fn new(pricing_date: DateTime<Utc>, limits: ContractLimits, fit_settings: FitSettings) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pricing_date,
            limits,
            fit_settings,
            stage: PricingStage::Uninitialized,
            contract: None,
            history: None,
            historical_summary: None,
            fit: None,
            pricing_params: None,
            initial_pricing: None,
            simulation_params: None,
            simulation: None,
            final_pricing: None,
        }
    }

    /// Session dated now, using the configured limits and fit settings.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(Utc::now(), cfg.limits.clone(), cfg.fitting.clone())
    }

    /// Fail closed unless the session sits exactly at `from`.
    fn require(&self, from: PricingStage, step: &'static str) -> PricingResult<()> {
        if self.stage == from {
            return Ok(());
        }
        let reason = if self.stage < from {
            let missing = self.stage.next().unwrap_or(from).step_name();
            format!("missing step {missing} (session is {})", self.stage)
        } else {
            format!("already ran (session is {})", self.stage)
        };
        Err(PricingError::Precedence { step, reason })
    }

    fn advance(&mut self, to: PricingStage) {
        tracing::debug!(run_id = %self.run_id, from = %self.stage, to = %to, "stage transition");
        self.stage = to;
    }

    pub fn set_contract(&mut self, request: &ContractRequest) -> PricingResult<&ContractTerms> {
        self.require(PricingStage::Uninitialized, "set_contract")?;
        let terms = ContractTerms::from_request(request, &self.limits, self.pricing_date.year())?;

        tracing::info!(
            run_id = %self.run_id,
            location = %terms.location().name,
            month = terms.observation_month(),
            year = terms.observation_year(),
            strike = terms.strike(),
            max_payout = terms.maximum_payout(),
            "contract set"
        );
        self.advance(PricingStage::ContractSet);
        Ok(&*self.contract.insert(terms))
    }

    pub fn load_history(&mut self, raw: &[i64]) -> PricingResult<&HistoricalSummary> {
        self.require(PricingStage::ContractSet, "load_history")?;
        let strike = self
            .contract
            .as_ref()
            .map(ContractTerms::strike)
            .ok_or_else(|| missing("load_history", "contract"))?;

        let data = history::validate_counts(raw)?;
        let summary = HistoricalSummary::compute(&data, strike)?;

        tracing::info!(
            run_id = %self.run_id,
            n_years = summary.n_years,
            mean = summary.mean_rainy_days,
            std = summary.std_rainy_days,
            trigger_frequency = summary.historical_trigger_frequency,
            "history loaded"
        );
        self.history = Some(data);
        self.advance(PricingStage::HistoryLoaded);
        Ok(&*self.historical_summary.insert(summary))
    }

    pub fn fit_distribution(&mut self, method: FitMethod) -> PricingResult<&FitSelection> {
        self.require(PricingStage::HistoryLoaded, "fit_distribution")?;
        let data = self.history.as_deref().ok_or_else(|| missing("fit_distribution", "history"))?;

        let selection = DistributionFitter::new(data, self.fit_settings.clone())?.fit(method)?;

        let chosen = &selection.selected.diagnostics;
        tracing::info!(
            run_id = %self.run_id,
            method = %method,
            selected = %chosen.distribution_type,
            aic = chosen.aic,
            gof_pvalue = chosen.gof_pvalue,
            candidates = selection.candidates.len(),
            "distribution fitted"
        );
        self.advance(PricingStage::DistributionFitted);
        Ok(&*self.fit.insert(selection))
    }

    /// First pricing pass, with capital from the normal proxy.
    pub fn price_initial(&mut self, params: PricingParams) -> PricingResult<&PremiumBreakdown> {
        self.require(PricingStage::DistributionFitted, "price_initial")?;
        let breakdown = {
            let contract = self.contract.as_ref().ok_or_else(|| missing("price_initial", "contract"))?;
            let fit = self.fit.as_ref().ok_or_else(|| missing("price_initial", "distribution"))?;
            PricingEngine::new(contract, &fit.selected.model, params.clone())?.calculate_premium(None)
        };

        tracing::info!(
            run_id = %self.run_id,
            pure_premium = breakdown.pure_premium,
            capital_proxy = breakdown.capital_required,
            gross_premium = breakdown.gross_premium,
            "initial premium"
        );
        self.pricing_params = Some(params);
        self.advance(PricingStage::PricedInitial);
        Ok(&*self.initial_pricing.insert(breakdown))
    }

    /// Simulate with a generator seeded from `params.seed`, owned by this call.
    pub fn simulate(&mut self, params: SimulationParams) -> PricingResult<&SimulationResult> {
        self.require(PricingStage::PricedInitial, "simulate")?;
        let result = {
            let contract = self.contract.as_ref().ok_or_else(|| missing("simulate", "contract"))?;
            let fit = self.fit.as_ref().ok_or_else(|| missing("simulate", "distribution"))?;
            let data = self.history.as_deref().ok_or_else(|| missing("simulate", "history"))?;
            MonteCarloEngine::new(contract, &fit.selected.model, data, params.clone())?.run()
        };

        tracing::info!(
            run_id = %self.run_id,
            method = %params.method,
            n = result.n_simulations,
            seed = params.seed,
            mean_payout = result.mean_payout,
            var_99 = result.var_99,
            trigger_frequency = result.trigger_frequency,
            "simulation complete"
        );
        self.simulation_params = Some(params);
        self.advance(PricingStage::Simulated);
        Ok(&*self.simulation.insert(result))
    }

    /// Second pricing pass: same loadings as the first, capital from simulated VaR99.
    pub fn price_final(&mut self) -> PricingResult<&PremiumBreakdown> {
        self.require(PricingStage::Simulated, "price_final")?;
        let breakdown = {
            let contract = self.contract.as_ref().ok_or_else(|| missing("price_final", "contract"))?;
            let fit = self.fit.as_ref().ok_or_else(|| missing("price_final", "distribution"))?;
            let params = self
                .pricing_params
                .clone()
                .ok_or_else(|| missing("price_final", "pricing parameters"))?;
            let var_99 = self
                .simulation
                .as_ref()
                .map(|s| s.var_99)
                .ok_or_else(|| missing("price_final", "simulation"))?;
            PricingEngine::new(contract, &fit.selected.model, params)?.calculate_premium(Some(var_99))
        };

        tracing::info!(
            run_id = %self.run_id,
            capital_required = breakdown.capital_required,
            gross_premium = breakdown.gross_premium,
            loss_ratio = breakdown.expected_loss_ratio,
            "final premium"
        );
        self.advance(PricingStage::PricedFinal);
        Ok(&*self.final_pricing.insert(breakdown))
    }

    /// Assemble the result report. Only available once the run is complete.
    pub fn report(&self) -> PricingResult<PricingReport> {
        self.require(PricingStage::PricedFinal, "report")?;
        let (
            Some(contract),
            Some(historical),
            Some(fit),
            Some(params),
            Some(initial),
            Some(sim_params),
            Some(simulation),
            Some(pricing),
        ) = (
            self.contract.as_ref(),
            self.historical_summary.as_ref(),
            self.fit.as_ref(),
            self.pricing_params.as_ref(),
            self.initial_pricing.as_ref(),
            self.simulation_params.as_ref(),
            self.simulation.as_ref(),
            self.final_pricing.as_ref(),
        ) else {
            return Err(missing("report", "run state"));
        };

        let break_even = PricingEngine::new(contract, &fit.selected.model, params.clone())?
            .break_even_trigger_probability();

        Ok(PricingReport {
            contract: ContractSection::from(contract),
            historical_analysis: historical.clone(),
            distribution: DistributionSection::from(fit),
            pricing: pricing.clone(),
            capital: CapitalDisclosure {
                pre_simulation: initial.capital_required,
                post_simulation: pricing.capital_required,
                initial_gross_premium: initial.gross_premium,
            },
            simulation: simulation.clone(),
            profitability: ProfitabilitySection::compute(pricing, break_even),
            metadata: RunMetadata {
                run_id: self.run_id,
                pricing_date: self.pricing_date.to_rfc3339(),
                engine_version: env!("CARGO_PKG_VERSION"),
                distribution_method: fit.method,
                selected_distribution: fit.selected.model.kind(),
                simulation_method: sim_params.method,
                n_simulations: sim_params.n_simulations,
                random_seed: sim_params.seed,
            },
        })
    }

    /// Run the whole chain and return the report. Stops at the first failing step.
    pub fn price_contract(
        mut self,
        contract: &ContractRequest,
        historical_data: &[i64],
        pricing: PricingParams,
        simulation: SimulationParams,
        method: FitMethod,
    ) -> PricingResult<PricingReport> {
        let outcome = self
            .set_contract(contract)
            .map(|_| ())
            .and_then(|_| self.load_history(historical_data).map(|_| ()))
            .and_then(|_| self.fit_distribution(method).map(|_| ()))
            .and_then(|_| self.price_initial(pricing).map(|_| ()))
            .and_then(|_| self.simulate(simulation).map(|_| ()))
            .and_then(|_| self.price_final().map(|_| ()));

        if let Err(e) = outcome {
            tracing::warn!(
                run_id = %self.run_id,
                stage = %self.stage,
                error = %e,
                "pricing run stopped"
            );
            return Err(e);
        }
        self.report()
    }
}

fn missing(step: &'static str, what: &str) -> PricingError {
    PricingError::Precedence {
        step,
        reason: format!("{what} not available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::tests::bankot_request;
    use crate::history::tests::BANKOT_OCTOBER;
    use crate::models::DistributionKind;
    use crate::pricing::premium::CapitalBasis;
    use chrono::TimeZone;

    fn session() -> PricingSession {
        let date = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        PricingSession::new(date, ContractLimits::default(), FitSettings::default())
    }

    fn run_all(s: &mut PricingSession, pricing: PricingParams) {
        s.set_contract(&bankot_request()).unwrap();
        s.load_history(&BANKOT_OCTOBER).unwrap();
        s.fit_distribution(FitMethod::Auto).unwrap();
        s.price_initial(pricing).unwrap();
        s.simulate(SimulationParams::default()).unwrap();
        s.price_final().unwrap();
    }

    #[test]
    fn test_full_chain_reaches_final_stage() {
        let mut s = session();
        run_all(&mut s, PricingParams::default());
        assert_eq!(s.stage, PricingStage::PricedFinal);

        let report = s.report().unwrap();
        assert_eq!(report.distribution.distribution_type, DistributionKind::Empirical);
        assert!((report.historical_analysis.mean_rainy_days - 9.8).abs() < 1e-12);
        assert_eq!(report.pricing.capital_basis, CapitalBasis::SimulatedVar99);
        assert!((report.pricing.capital_required - 1.5 * report.simulation.var_99).abs() < 1e-9);
        assert!(report.capital.pre_simulation >= 0.0);
        assert!(report.capital.post_simulation >= 0.0);
        assert!(report.pricing.gross_premium > report.pricing.expected_payout);
    }

    #[test]
    fn test_out_of_order_step_names_missing_step() {
        let mut s = session();
        match s.fit_distribution(FitMethod::Auto) {
            Err(PricingError::Precedence { step, reason }) => {
                assert_eq!(step, "fit_distribution");
                assert!(reason.contains("set_contract"), "{reason}");
            }
            other => panic!("expected precedence error, got {other:?}"),
        }

        s.set_contract(&bankot_request()).unwrap();
        s.load_history(&BANKOT_OCTOBER).unwrap();
        s.fit_distribution(FitMethod::Auto).unwrap();
        s.price_initial(PricingParams::default()).unwrap();
        match s.price_final() {
            Err(PricingError::Precedence { reason, .. }) => assert!(reason.contains("simulate"), "{reason}"),
            other => panic!("expected precedence error, got {other:?}"),
        }
        assert!(matches!(s.report(), Err(PricingError::Precedence { .. })));
        assert_eq!(s.stage, PricingStage::PricedInitial);
    }

    #[test]
    fn test_steps_are_not_reentrant() {
        let mut s = session();
        s.set_contract(&bankot_request()).unwrap();
        assert!(matches!(
            s.set_contract(&bankot_request()),
            Err(PricingError::Precedence { step: "set_contract", .. })
        ));
    }

    #[test]
    fn test_failed_step_keeps_stage() {
        let mut s = session();
        let mut bad = bankot_request();
        bad.observation_year = 2020;
        assert!(matches!(s.set_contract(&bad), Err(PricingError::InvalidContract(_))));
        assert_eq!(s.stage, PricingStage::Uninitialized);

        s.set_contract(&bankot_request()).unwrap();
        assert!(matches!(s.load_history(&[9, 10, 11]), Err(PricingError::InsufficientData(_))));
        assert_eq!(s.stage, PricingStage::ContractSet);
        s.load_history(&BANKOT_OCTOBER).unwrap();
        assert_eq!(s.stage, PricingStage::HistoryLoaded);
    }

    #[test]
    fn test_second_pass_keeps_caller_loadings() {
        let params = PricingParams {
            profit_margin: 0.3,
            operational_cost: 2_500.0,
            ..PricingParams::default()
        };
        let mut s = session();
        run_all(&mut s, params);
        let report = s.report().unwrap();
        assert!((report.pricing.operational_cost - 2_500.0).abs() < 1e-12);
        assert!((report.pricing.profit_amount - 0.3 * report.pricing.subtotal).abs() < 1e-9);
    }

    #[test]
    fn test_identical_runs_are_identical() {
        let run = || {
            session()
                .price_contract(
                    &bankot_request(),
                    &BANKOT_OCTOBER,
                    PricingParams::default(),
                    SimulationParams::default(),
                    FitMethod::Auto,
                )
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_ne!(a.metadata.run_id, b.metadata.run_id);
        assert_eq!(a.simulation, b.simulation);
        assert_eq!(a.pricing, b.pricing);
    }

    #[test]
    fn test_current_year_contract_accepted() {
        let mut req = bankot_request();
        req.observation_year = 2026;
        let mut s = session();
        assert!(s.set_contract(&req).is_ok());
    }
}
