/// Analytic premium calculation.
///
/// Expected payout is summed over the payout band, with the capped tail in closed form:
///   E[X]  = Σ_{d=K+1}^{K+M} pmf(d)·payout(d) + (1 - cdf(K+M))·M·rate
///   E[X²] likewise,  Var[X] = max(E[X²] - E[X]², 0)
///
/// Waterfall (strictly additive):
///   pure      = E[X]
///   technical = pure + vol_loading·σ + basis_loading·pure
///   capital   = multiplier · (VaR99 if simulated, else 2.33·σ)
///   subtotal  = technical + coc·capital·(settlement_days + 30)/365 + opcost
///   gross     = subtotal · (1 + margin)
use crate::contract::ContractTerms;
use crate::errors::{PricingError, PricingResult};
use crate::models::DistributionModel;
use serde::Serialize;

/// One-sided 99% quantile of the unit normal, used as a capital proxy before simulation.
pub const NORMAL_Z_99: f64 = 2.33;

/// Days added to the settlement lag when prorating the cost of capital.
const OBSERVATION_PERIOD_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Serialize)]
pub struct PricingParams {
    pub volatility_loading: f64,
    pub basis_risk_loading: f64,
    pub profit_margin: f64,
    pub operational_cost: f64,
    /// Annual rate
    pub cost_of_capital: f64,
    pub capital_var_multiplier: f64,
}

impl Default for PricingParams {
    fn default() -> Self {
        Self {
            volatility_loading: 0.15,
            basis_risk_loading: 0.05,
            profit_margin: 0.20,
            operational_cost: 1000.0,
            cost_of_capital: 0.12,
            capital_var_multiplier: 1.5,
        }
    }
}

impl PricingParams {
    pub fn validate(&self) -> PricingResult<()> {
        for (name, value) in [
            ("volatility_loading", self.volatility_loading),
            ("basis_risk_loading", self.basis_risk_loading),
            ("profit_margin", self.profit_margin),
            ("cost_of_capital", self.cost_of_capital),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PricingError::InvalidParameters(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if !(self.operational_cost >= 0.0 && self.operational_cost.is_finite()) {
            return Err(PricingError::InvalidParameters(format!(
                "operational_cost must be a finite non-negative amount, got {}",
                self.operational_cost
            )));
        }
        if !(self.capital_var_multiplier > 0.0 && self.capital_var_multiplier.is_finite()) {
            return Err(PricingError::InvalidParameters(format!(
                "capital_var_multiplier must be positive, got {}",
                self.capital_var_multiplier
            )));
        }
        Ok(())
    }
}

/// First two moments of the contract payout under a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PayoutMoments {
    pub expected: f64,
    pub variance: f64,
    pub std: f64,
}

/// What the capital requirement was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapitalBasis {
    /// 2.33σ normal approximation
    NormalProxy,
    /// Simulated 99% VaR
    SimulatedVar99,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PremiumBreakdown {
    pub expected_payout: f64,
    pub variance_payout: f64,
    pub std_payout: f64,
    pub pure_premium: f64,
    pub volatility_charge: f64,
    pub basis_risk_charge: f64,
    pub technical_premium: f64,
    pub capital_required: f64,
    pub capital_basis: CapitalBasis,
    pub capital_charge: f64,
    pub operational_cost: f64,
    pub subtotal: f64,
    pub profit_amount: f64,
    pub gross_premium: f64,
    /// gross / notional, as a fraction
    pub premium_as_pct_notional: f64,
    /// expected payout / gross, as a fraction
    pub expected_loss_ratio: f64,
}

pub struct PricingEngine<'a> {
    contract: &'a ContractTerms,
    model: &'a DistributionModel,
    params: PricingParams,
}

impl<'a> PricingEngine<'a> {
    pub fn new(
        contract: &'a ContractTerms,
        model: &'a DistributionModel,
        params: PricingParams,
    ) -> PricingResult<Self> {
        params.validate()?;
        Ok(Self {
            contract,
            model,
            params,
        })
    }

    pub fn payout_moments(&self) -> PayoutMoments {
        let strike = self.contract.strike();
        let cap = self.contract.exhaustion_point();

        let (mut e1, mut e2) = (0.0, 0.0);
        for d in (strike + 1)..=cap {
            let prob = self.model.pmf(d);
            let payout = self.contract.payout(d);
            e1 += prob * payout;
            e2 += prob * payout * payout;
        }

        let tail = (1.0 - self.model.cdf(cap)).max(0.0);
        let max_payout = self.contract.maximum_payout();
        e1 += tail * max_payout;
        e2 += tail * max_payout * max_payout;

        let variance = (e2 - e1 * e1).max(0.0);
        PayoutMoments {
            expected: e1,
            variance,
            std: variance.sqrt(),
        }
    }

    /// Itemised premium. `var_99` is the simulated 99% VaR once available;
    /// without it capital falls back to the normal proxy.
    pub fn calculate_premium(&self, var_99: Option<f64>) -> PremiumBreakdown {
        let p = &self.params;
        let moments = self.payout_moments();

        let pure_premium = moments.expected;
        let volatility_charge = p.volatility_loading * moments.std;
        let basis_risk_charge = p.basis_risk_loading * pure_premium;
        let technical_premium = pure_premium + volatility_charge + basis_risk_charge;

        let (capital_required, capital_basis) = match var_99 {
            Some(var) => (p.capital_var_multiplier * var.max(0.0), CapitalBasis::SimulatedVar99),
            None => (
                p.capital_var_multiplier * NORMAL_Z_99 * moments.std,
                CapitalBasis::NormalProxy,
            ),
        };
        let time_fraction =
            (self.contract.settlement_days() as f64 + OBSERVATION_PERIOD_DAYS) / 365.0;
        let capital_charge = p.cost_of_capital * capital_required * time_fraction;

        let subtotal = technical_premium + capital_charge + p.operational_cost;
        let profit_amount = p.profit_margin * subtotal;
        let gross_premium = subtotal + profit_amount;

        let notional = self.contract.maximum_payout();
        PremiumBreakdown {
            expected_payout: moments.expected,
            variance_payout: moments.variance,
            std_payout: moments.std,
            pure_premium,
            volatility_charge,
            basis_risk_charge,
            technical_premium,
            capital_required,
            capital_basis,
            capital_charge,
            operational_cost: p.operational_cost,
            subtotal,
            profit_amount,
            gross_premium,
            premium_as_pct_notional: ratio_or_zero(gross_premium, notional),
            expected_loss_ratio: ratio_or_zero(moments.expected, gross_premium),
        }
    }

    /// Probability the contract pays anything: 1 - cdf(strike).
    pub fn break_even_trigger_probability(&self) -> f64 {
        (1.0 - self.model.cdf(self.contract.strike())).clamp(0.0, 1.0)
    }
}

#[inline]
fn ratio_or_zero(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
