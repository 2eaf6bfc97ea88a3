use crate::contract::ContractTerms;

/// Internal risk limits and defaults applied to every contract.
#[derive(Debug, Clone)]
pub struct ContractLimits {
    /// Ceiling on max_payout_days * payout_rate
    pub max_notional: f64,
    /// Satellite rainfall coverage band
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
    pub default_grid_radius_km: f64,
    pub default_settlement_days: u32,
}

impl Default for ContractLimits {
    fn default() -> Self {
        Self {
            max_notional: 500_000.0,
            min_latitude: -60.0,
            max_latitude: 60.0,
            min_longitude: -180.0,
            max_longitude: 180.0,
            default_grid_radius_km: 10.0,
            default_settlement_days: 30,
        }
    }
}

/// Limit check result
#[derive(Debug, Clone, PartialEq)]
pub enum LimitCheck {
    /// Contract may be priced
    Allowed,
    /// Rejected with reason
    Blocked(String),
}

/// Check every contract limit, returning the first violation.
/// Pure function, no side effects.
pub fn check_contract_limits(
    terms: &ContractTerms,
    limits: &ContractLimits,
    current_year: i32,
) -> LimitCheck {
    let loc = terms.location();

    // 1. Coordinates inside coverage
    if let Some(lat) = loc.latitude {
        if !(limits.min_latitude..=limits.max_latitude).contains(&lat) {
            return LimitCheck::Blocked(format!(
                "latitude {lat} outside [{}, {}]",
                limits.min_latitude, limits.max_latitude
            ));
        }
    }
    if let Some(lon) = loc.longitude {
        if !(limits.min_longitude..=limits.max_longitude).contains(&lon) {
            return LimitCheck::Blocked(format!(
                "longitude {lon} outside [{}, {}]",
                limits.min_longitude, limits.max_longitude
            ));
        }
    }

    // 2. Observation period
    if !(1..=12).contains(&terms.observation_month()) {
        return LimitCheck::Blocked(format!(
            "observation month {} must be between 1 and 12",
            terms.observation_month()
        ));
    }
    if terms.observation_year() < current_year {
        return LimitCheck::Blocked(format!(
            "observation year {} is before {current_year}",
            terms.observation_year()
        ));
    }

    // 3. Economic terms
    if !(terms.rainfall_threshold_mm() > 0.0 && terms.rainfall_threshold_mm().is_finite()) {
        return LimitCheck::Blocked("rainfall threshold must be positive".to_string());
    }
    if !(terms.payout_rate() > 0.0 && terms.payout_rate().is_finite()) {
        return LimitCheck::Blocked("payout rate must be positive".to_string());
    }
    if !(terms.grid_radius_km() > 0.0 && terms.grid_radius_km().is_finite()) {
        return LimitCheck::Blocked("grid radius must be positive".to_string());
    }

    // 4. Notional ceiling
    let max_payout = terms.maximum_payout();
    if max_payout > limits.max_notional {
        return LimitCheck::Blocked(format!(
            "maximum payout {max_payout:.0} exceeds limit {:.0}",
            limits.max_notional
        ));
    }

    // 5. Feasibility within the month
    let Some(days) = terms.days_in_month() else {
        return LimitCheck::Blocked("observation period is not a calendar month".to_string());
    };
    if terms.strike() > days {
        return LimitCheck::Blocked(format!(
            "strike ({}) exceeds days in month ({days})",
            terms.strike()
        ));
    }
    if terms.max_payout_days() > days {
        return LimitCheck::Blocked(format!(
            "max payout days ({}) exceeds days in month ({days})",
            terms.max_payout_days()
        ));
    }
    match terms.strike().checked_add(terms.max_payout_days()) {
        Some(end) if end <= days => {}
        _ => {
            return LimitCheck::Blocked(format!(
                "strike + max payout days ({} + {}) exceeds days in month ({days})",
                terms.strike(),
                terms.max_payout_days()
            ));
        }
    }

    LimitCheck::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::tests::bankot_request;
    use crate::contract::ContractTerms;
    use crate::errors::PricingError;

    fn reject_reason(req: &crate::contract::ContractRequest) -> String {
        match ContractTerms::from_request(req, &ContractLimits::default(), 2026) {
            Err(PricingError::InvalidContract(reason)) => reason,
            other => panic!("expected InvalidContract, got {other:?}"),
        }
    }

    #[test]
    fn test_normal_contract_allowed() {
        let terms = ContractTerms::from_request(&bankot_request(), &ContractLimits::default(), 2026)
            .unwrap();
        assert_eq!(
            check_contract_limits(&terms, &ContractLimits::default(), 2026),
            LimitCheck::Allowed
        );
    }

    #[test]
    fn test_notional_ceiling_blocks() {
        let mut req = bankot_request();
        req.payout_rate_per_day = 80_000.0;
        assert!(reject_reason(&req).contains("exceeds limit"));
    }

    #[test]
    fn test_latitude_outside_coverage_blocks() {
        let mut req = bankot_request();
        req.location_lat = Some(75.0);
        assert!(reject_reason(&req).contains("latitude"));
    }

    #[test]
    fn test_infeasible_strike_blocks() {
        let mut req = bankot_request();
        req.observation_month = 2;
        req.strike_rainy_days = 25;
        req.maximum_payout_days = 5;
        assert!(reject_reason(&req).contains("days in month"));
    }

    #[test]
    fn test_huge_payout_days_block_without_overflow() {
        // tiny rate keeps the notional under the ceiling
        let mut req = bankot_request();
        req.strike_rainy_days = 31;
        req.maximum_payout_days = 4_294_967_265;
        req.payout_rate_per_day = 1e-7;
        assert!(reject_reason(&req).contains("days in month"));

        req.maximum_payout_days = u32::MAX as i64;
        req.strike_rainy_days = 1;
        assert!(reject_reason(&req).contains("days in month"));

        let mut req = bankot_request();
        req.strike_rainy_days = 25;
        req.maximum_payout_days = 7;
        assert!(reject_reason(&req).contains("strike + max payout days"));
    }

    #[test]
    fn test_past_year_and_bad_month_block() {
        let mut req = bankot_request();
        req.observation_year = 2020;
        assert!(reject_reason(&req).contains("before"));

        let mut req = bankot_request();
        req.observation_month = 0;
        assert!(reject_reason(&req).contains("month"));
    }

    #[test]
    fn test_non_positive_rate_blocks() {
        let mut req = bankot_request();
        req.payout_rate_per_day = 0.0;
        assert!(reject_reason(&req).contains("payout rate"));
    }
}
