/// Pricing report: the serialisable result of a completed session.
/// All functions are pure; raw simulation arrays are never included.
use crate::contract::ContractTerms;
use crate::history::HistoricalSummary;
use crate::models::fitting::{FitDiagnostics, FitMethod, FitSelection};
use crate::models::DistributionKind;
use crate::pricing::premium::PremiumBreakdown;
use crate::risk::metrics::PERCENTILE_LEVELS;
use crate::simulation::monte_carlo::{SimulationMethod, SimulationResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PricingReport {
    pub contract: ContractSection,
    pub historical_analysis: HistoricalSummary,
    pub distribution: DistributionSection,
    pub pricing: PremiumBreakdown,
    pub capital: CapitalDisclosure,
    pub simulation: SimulationResult,
    pub profitability: ProfitabilitySection,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractSection {
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub observation_month: u32,
    pub observation_year: i32,
    pub rainfall_threshold_mm: f64,
    pub strike_rainy_days: u32,
    pub payout_rate_per_day: f64,
    pub maximum_payout_days: u32,
    pub maximum_payout: f64,
    pub grid_radius_km: f64,
    pub settlement_days: u32,
}

impl From<&ContractTerms> for ContractSection {
    fn from(c: &ContractTerms) -> Self {
        Self {
            location: c.location().name.clone(),
            latitude: c.location().latitude,
            longitude: c.location().longitude,
            observation_month: c.observation_month(),
            observation_year: c.observation_year(),
            rainfall_threshold_mm: c.rainfall_threshold_mm(),
            strike_rainy_days: c.strike(),
            payout_rate_per_day: c.payout_rate(),
            maximum_payout_days: c.max_payout_days(),
            maximum_payout: c.maximum_payout(),
            grid_radius_km: c.grid_radius_km(),
            settlement_days: c.settlement_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionSection {
    #[serde(rename = "type")]
    pub distribution_type: DistributionKind,
    pub parameters: BTreeMap<String, f64>,
    pub mean: f64,
    pub variance: f64,
    pub is_good_fit: bool,
    pub gof_statistic: f64,
    pub gof_pvalue: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    /// Model rainy-day quantile per percentile level
    pub rainy_day_quantiles: BTreeMap<u32, u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Every candidate tried, selected one included
    pub candidates: Vec<FitDiagnostics>,
}

impl From<&FitSelection> for DistributionSection {
    fn from(fit: &FitSelection) -> Self {
        let d = &fit.selected.diagnostics;
        Self {
            distribution_type: d.distribution_type,
            parameters: d.parameters.clone(),
            mean: fit.selected.model.mean(),
            variance: fit.selected.model.variance(),
            is_good_fit: d.is_good_fit,
            gof_statistic: d.gof_statistic,
            gof_pvalue: d.gof_pvalue,
            log_likelihood: d.log_likelihood,
            aic: d.aic,
            bic: d.bic,
            rainy_day_quantiles: PERCENTILE_LEVELS
                .iter()
                .map(|&level| (level, fit.selected.model.inverse_cdf(level as f64 / 100.0)))
                .collect(),
            warnings: fit
                .candidates
                .iter()
                .flat_map(|c| c.warnings.iter().cloned())
                .collect(),
            candidates: fit.candidates.to_vec(),
        }
    }
}

/// Capital requirement before and after simulation.
#[derive(Debug, Clone, Serialize)]
pub struct CapitalDisclosure {
    /// Normal-proxy capital from the first pass
    pub pre_simulation: f64,
    /// Simulated-VaR capital used in the published premium
    pub post_simulation: f64,
    pub initial_gross_premium: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitabilitySection {
    pub expected_profit: f64,
    /// expected profit / capital required, as a fraction
    pub expected_roe: f64,
    pub break_even_trigger_rate: f64,
}

impl ProfitabilitySection {
    pub fn compute(pricing: &PremiumBreakdown, break_even_trigger_rate: f64) -> Self {
        let expected_profit = pricing.gross_premium - pricing.expected_payout;
        let expected_roe = if pricing.capital_required > 0.0 {
            expected_profit / pricing.capital_required
        } else {
            0.0
        };
        Self {
            expected_profit,
            expected_roe,
            break_even_trigger_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub pricing_date: String,
    pub engine_version: &'static str,
    pub distribution_method: FitMethod,
    pub selected_distribution: DistributionKind,
    pub simulation_method: SimulationMethod,
    pub n_simulations: usize,
    pub random_seed: u64,
}

impl PricingReport {
    /// Human-readable summary for logs and API clients.
    pub fn summary(&self) -> String {
        let rule = "=".repeat(65);
        let c = &self.contract;
        let h = &self.historical_analysis;
        let d = &self.distribution;
        let p = &self.pricing;
        let s = &self.simulation;
        let r = &self.profitability;

        let mut out = String::with_capacity(2048);
        // fmt::Write into a String cannot fail
        let _ = writeln!(out, "{rule}\nRAINFALL CONTRACT PRICING SUMMARY\n{rule}\n");

        let _ = writeln!(out, "Contract:");
        let _ = writeln!(out, "  Location:              {}", c.location);
        if let (Some(lat), Some(lon)) = (c.latitude, c.longitude) {
            let _ = writeln!(out, "  Coordinates:           ({lat:.3}, {lon:.3})");
        }
        let _ = writeln!(out, "  Observation Period:    {}/{}", c.observation_month, c.observation_year);
        let _ = writeln!(out, "  Rainfall Threshold:    {} mm/day", c.rainfall_threshold_mm);
        let _ = writeln!(out, "  Strike:                {} rainy days", c.strike_rainy_days);
        let _ = writeln!(out, "  Payout Rate:           {} per excess day", money(c.payout_rate_per_day, 0));
        let _ = writeln!(out, "  Maximum Payout Days:   {}", c.maximum_payout_days);
        let _ = writeln!(out, "  Maximum Payout:        {}\n", money(c.maximum_payout, 0));

        let _ = writeln!(out, "History ({} years):", h.n_years);
        let _ = writeln!(out, "  Mean Rainy Days:       {:.1}", h.mean_rainy_days);
        let _ = writeln!(out, "  Std Dev:               {:.1}", h.std_rainy_days);
        let _ = writeln!(out, "  Range:                 {} - {}", h.min_rainy_days, h.max_rainy_days);
        let _ = writeln!(out, "  Trigger Frequency:     {:.1}%", h.historical_trigger_frequency * 100.0);
        let _ = writeln!(out, "  Fitted Distribution:   {}", d.distribution_type);
        let _ = writeln!(out, "  Distribution Mean:     {:.1}\n", d.mean);

        let _ = writeln!(out, "Pricing:");
        let _ = writeln!(out, "  Pure Premium:          {}", money(p.pure_premium, 2));
        let _ = writeln!(out, "  Volatility Loading:    {}", money(p.volatility_charge, 2));
        let _ = writeln!(out, "  Basis Risk Loading:    {}", money(p.basis_risk_charge, 2));
        let _ = writeln!(out, "  Technical Premium:     {}", money(p.technical_premium, 2));
        let _ = writeln!(out, "  Capital Charge:        {}", money(p.capital_charge, 2));
        let _ = writeln!(out, "  Operational Cost:      {}", money(p.operational_cost, 2));
        let _ = writeln!(out, "  Profit Margin:         {}", money(p.profit_amount, 2));
        let _ = writeln!(out, "  ---------------------");
        let _ = writeln!(out, "  QUOTED PREMIUM:        {}\n", money(p.gross_premium, 2));
        let _ = writeln!(out, "  Premium / Notional:    {:.1}%", p.premium_as_pct_notional * 100.0);
        let _ = writeln!(out, "  Expected Loss Ratio:   {:.1}%\n", p.expected_loss_ratio * 100.0);

        let _ = writeln!(out, "Risk ({} simulations):", s.n_simulations);
        let _ = writeln!(out, "  Expected Payout:       {}", money(s.mean_payout, 2));
        let _ = writeln!(out, "  Standard Deviation:    {}", money(s.std_payout, 2));
        let _ = writeln!(out, "  Trigger Frequency:     {:.1}%", s.trigger_frequency * 100.0);
        let _ = writeln!(out, "  VaR (95%):             {}", money(s.var_95, 0));
        let _ = writeln!(out, "  VaR (99%):             {}", money(s.var_99, 0));
        let _ = writeln!(out, "  CVaR (99%):            {}", money(s.cvar_99, 0));
        let _ = writeln!(out, "  Capital (proxy):       {}", money(self.capital.pre_simulation, 0));
        let _ = writeln!(out, "  Capital (simulated):   {}\n", money(self.capital.post_simulation, 0));

        let _ = writeln!(out, "Profitability:");
        let _ = writeln!(out, "  Expected Profit:       {}", money(r.expected_profit, 2));
        let _ = writeln!(out, "  Expected ROE:          {:.1}%", r.expected_roe * 100.0);
        let _ = writeln!(out, "  Break-even Trigger:    {:.1}%", r.break_even_trigger_rate * 100.0);
        let _ = write!(out, "{rule}");
        out
    }
}

/// `$1,234.56`-style amount with thousands separators.
fn money(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    match frac_part {
        Some(f) => format!("{sign}${grouped}.{f}"),
        None => format!("{sign}${grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::tests::bankot_request;
    use crate::history::tests::BANKOT_OCTOBER;
    use crate::pricing::premium::PricingParams;
    use crate::risk::limits::ContractLimits;
    use crate::session::PricingSession;
    use crate::simulation::monte_carlo::SimulationParams;
    use crate::models::fitting::FitSettings;
    use chrono::{TimeZone, Utc};

    fn bankot_report() -> PricingReport {
        let date = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        PricingSession::new(date, ContractLimits::default(), FitSettings::default())
            .price_contract(
                &bankot_request(),
                &BANKOT_OCTOBER,
                PricingParams::default(),
                SimulationParams::default(),
                FitMethod::Auto,
            )
            .unwrap()
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(0.0, 2), "$0.00");
        assert_eq!(money(999.0, 0), "$999");
        assert_eq!(money(14_000.0, 0), "$14,000");
        assert_eq!(money(1_234_567.891, 2), "$1,234,567.89");
        assert_eq!(money(-2_500.5, 1), "-$2,500.5");
    }

    #[test]
    fn test_report_sections_serialise() {
        let report = bankot_report();
        let json = serde_json::to_value(&report).unwrap();
        for section in [
            "contract",
            "historical_analysis",
            "distribution",
            "pricing",
            "capital",
            "simulation",
            "profitability",
            "metadata",
        ] {
            assert!(json.get(section).is_some(), "missing section {section}");
        }
        assert_eq!(json["distribution"]["type"], "empirical");
        assert_eq!(json["contract"]["maximum_payout"], 98_000.0);
        assert_eq!(json["metadata"]["distribution_method"], "auto");
        assert_eq!(json["metadata"]["simulation_method"], "hybrid");
        assert!(json["simulation"].get("simulated_payouts").is_none());
        assert!(json["simulation"]["percentiles"].get("99").is_some());
        assert_eq!(json["distribution"]["rainy_day_quantiles"]["50"], 9);
    }

    #[test]
    fn test_profitability_from_final_pricing() {
        let report = bankot_report();
        let r = &report.profitability;
        assert!((r.expected_profit - (report.pricing.gross_premium - report.pricing.expected_payout)).abs() < 1e-9);
        assert!((r.break_even_trigger_rate - 0.2).abs() < 1e-12);
        if report.pricing.capital_required > 0.0 {
            assert!((r.expected_roe - r.expected_profit / report.pricing.capital_required).abs() < 1e-12);
        }
    }

    #[test]
    fn test_profitability_zero_capital_guard() {
        let pricing = PremiumBreakdown {
            expected_payout: 0.0,
            variance_payout: 0.0,
            std_payout: 0.0,
            pure_premium: 0.0,
            volatility_charge: 0.0,
            basis_risk_charge: 0.0,
            technical_premium: 0.0,
            capital_required: 0.0,
            capital_basis: crate::pricing::premium::CapitalBasis::SimulatedVar99,
            capital_charge: 0.0,
            operational_cost: 1000.0,
            subtotal: 1000.0,
            profit_amount: 200.0,
            gross_premium: 1200.0,
            premium_as_pct_notional: 0.0,
            expected_loss_ratio: 0.0,
        };
        let r = ProfitabilitySection::compute(&pricing, 0.0);
        assert_eq!(r.expected_roe, 0.0);
        assert!((r.expected_profit - 1200.0).abs() < 1e-12);
    }

    #[test]
    fn test_summary_mentions_quote() {
        let report = bankot_report();
        let text = report.summary();
        assert!(text.contains("Bankot, India"));
        assert!(text.contains("QUOTED PREMIUM"));
        assert!(text.contains("Fitted Distribution:   empirical"));
        assert!(text.contains("$98,000"));
    }
}
