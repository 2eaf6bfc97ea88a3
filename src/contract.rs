use crate::errors::{PricingError, PricingResult};
use crate::risk::limits::{self, ContractLimits, LimitCheck};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Wire payload ──

/// Contract terms as received from a client. Integer fields are signed so
/// that negative input reaches validation instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRequest {
    #[serde(default = "default_location_name")]
    pub location_name: String,
    #[serde(default)]
    pub location_lat: Option<f64>,
    #[serde(default)]
    pub location_lon: Option<f64>,
    pub observation_month: u32,
    pub observation_year: i32,
    pub rainfall_threshold_mm: f64,
    pub strike_rainy_days: i64,
    pub payout_rate_per_day: f64,
    pub maximum_payout_days: i64,
    #[serde(default)]
    pub grid_radius_km: Option<f64>,
    #[serde(default)]
    pub settlement_days: Option<i64>,
}

fn default_location_name() -> String {
    "Unknown".to_string()
}

// ── Validated terms ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Validated contract terms. Only constructible through [`ContractTerms::from_request`],
/// so every instance satisfies the contract limits it was checked against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractTerms {
    location: Location,
    observation_month: u32,
    observation_year: i32,
    rainfall_threshold_mm: f64,
    strike_rainy_days: u32,
    payout_rate_per_day: f64,
    maximum_payout_days: u32,
    grid_radius_km: f64,
    settlement_days: u32,
}

impl ContractTerms {
    /// Validate a request against `limits`. `current_year` is the year of the
    /// pricing date; contracts observing an earlier year are rejected.
    pub fn from_request(
        req: &ContractRequest,
        limits: &ContractLimits,
        current_year: i32,
    ) -> PricingResult<Self> {
        let strike_rainy_days = non_negative_days("strike_rainy_days", req.strike_rainy_days)?;
        let maximum_payout_days =
            non_negative_days("maximum_payout_days", req.maximum_payout_days)?;
        let settlement_days = match req.settlement_days {
            Some(days) => non_negative_days("settlement_days", days)?,
            None => limits.default_settlement_days,
        };

        let terms = Self {
            location: Location {
                name: req.location_name.clone(),
                latitude: req.location_lat,
                longitude: req.location_lon,
            },
            observation_month: req.observation_month,
            observation_year: req.observation_year,
            rainfall_threshold_mm: req.rainfall_threshold_mm,
            strike_rainy_days,
            payout_rate_per_day: req.payout_rate_per_day,
            maximum_payout_days,
            grid_radius_km: req.grid_radius_km.unwrap_or(limits.default_grid_radius_km),
            settlement_days,
        };

        match limits::check_contract_limits(&terms, limits, current_year) {
            LimitCheck::Allowed => Ok(terms),
            LimitCheck::Blocked(reason) => Err(PricingError::InvalidContract(reason)),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn observation_month(&self) -> u32 {
        self.observation_month
    }

    pub fn observation_year(&self) -> i32 {
        self.observation_year
    }

    pub fn rainfall_threshold_mm(&self) -> f64 {
        self.rainfall_threshold_mm
    }

    pub fn strike(&self) -> u32 {
        self.strike_rainy_days
    }

    pub fn payout_rate(&self) -> f64 {
        self.payout_rate_per_day
    }

    pub fn max_payout_days(&self) -> u32 {
        self.maximum_payout_days
    }

    pub fn grid_radius_km(&self) -> f64 {
        self.grid_radius_km
    }

    pub fn settlement_days(&self) -> u32 {
        self.settlement_days
    }

    /// Notional: the largest amount the contract can ever pay.
    #[inline]
    pub fn maximum_payout(&self) -> f64 {
        self.maximum_payout_days as f64 * self.payout_rate_per_day
    }

    /// Rainy-day count at and above which the payout is capped.
    /// Saturates; validated terms never come near `u32::MAX`.
    #[inline]
    pub fn exhaustion_point(&self) -> u32 {
        self.strike_rainy_days.saturating_add(self.maximum_payout_days)
    }

    /// Payout for an observed rainy-day count.
    ///
    /// payout = min(max(d - strike, 0), max_payout_days) * rate
    #[inline]
    pub fn payout(&self, rainy_days: u32) -> f64 {
        let excess = rainy_days.saturating_sub(self.strike_rainy_days);
        let capped = excess.min(self.maximum_payout_days);
        capped as f64 * self.payout_rate_per_day
    }

    /// Number of calendar days in the observation month, `None` for an invalid month.
    pub fn days_in_month(&self) -> Option<u32> {
        days_in_month(self.observation_year, self.observation_month)
    }
}

fn non_negative_days(field: &str, value: i64) -> PricingResult<u32> {
    u32::try_from(value).map_err(|_| {
        PricingError::InvalidContract(format!("{field} must be a non-negative day count, got {value}"))
    })
}

/// Calendar days in `month` of `year`.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}
