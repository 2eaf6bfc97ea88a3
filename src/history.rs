/// Historical rainy-day record: validation and descriptive statistics.
use crate::errors::{PricingError, PricingResult};
use serde::Serialize;

/// Fewer observations than this cannot support any fit.
pub const MIN_HISTORICAL_YEARS: usize = 5;

/// Validate raw per-year counts. Fails with `InsufficientData` below
/// [`MIN_HISTORICAL_YEARS`] and `InvalidData` on any negative count.
pub fn validate_counts(raw: &[i64]) -> PricingResult<Vec<u32>> {
    if raw.len() < MIN_HISTORICAL_YEARS {
        return Err(PricingError::InsufficientData(format!(
            "need at least {MIN_HISTORICAL_YEARS} historical observations, got {}",
            raw.len()
        )));
    }
    raw.iter()
        .enumerate()
        .map(|(i, &v)| {
            u32::try_from(v).map_err(|_| {
                PricingError::InvalidData(format!("observation {i} is not a valid rainy-day count: {v}"))
            })
        })
        .collect()
}

/// Mean and sample variance (ddof = 1). Variance is 0 for fewer than two points.
pub fn mean_and_variance(data: &[u32]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f64;
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
    if data.len() < 2 {
        return (mean, 0.0);
    }
    let ss = data
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>();
    (mean, ss / (n - 1.0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalSummary {
    pub n_years: usize,
    pub mean_rainy_days: f64,
    pub std_rainy_days: f64,
    pub min_rainy_days: u32,
    pub max_rainy_days: u32,
    pub median_rainy_days: f64,
    /// Fraction of years with a count strictly above the strike
    pub historical_trigger_frequency: f64,
    /// variance / mean; `None` when the mean is zero
    pub dispersion_index: Option<f64>,
}

impl HistoricalSummary {
    /// Summarise a validated record against a contract strike.
    pub fn compute(data: &[u32], strike: u32) -> PricingResult<Self> {
        let (Some(&min), Some(&max)) = (data.iter().min(), data.iter().max()) else {
            return Err(PricingError::InsufficientData("empty historical record".to_string()));
        };

        let (mean, variance) = mean_and_variance(data);
        let mut sorted = data.to_vec();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
        } else {
            sorted[mid] as f64
        };

        let triggers = data.iter().filter(|&&d| d > strike).count();

        Ok(Self {
            n_years: data.len(),
            mean_rainy_days: mean,
            std_rainy_days: variance.sqrt(),
            min_rainy_days: min,
            max_rainy_days: max,
            median_rainy_days: median,
            historical_trigger_frequency: triggers as f64 / data.len() as f64,
            dispersion_index: (mean > 0.0).then(|| variance / mean),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// October rainy days for Bankot, 2015-2024.
    pub(crate) const BANKOT_OCTOBER: [i64; 10] = [7, 10, 9, 12, 8, 14, 9, 11, 8, 10];

    pub(crate) fn bankot_counts() -> Vec<u32> {
        validate_counts(&BANKOT_OCTOBER).unwrap()
    }

    #[test]
    fn test_too_few_observations() {
        let err = validate_counts(&[3, 4, 5, 6]).unwrap_err();
        assert!(matches!(err, PricingError::InsufficientData(_)));
    }

    #[test]
    fn test_negative_observation() {
        let err = validate_counts(&[3, 4, -5, 6, 7]).unwrap_err();
        assert!(matches!(err, PricingError::InvalidData(_)));
    }

    #[test]
    fn test_bankot_moments() {
        let (mean, var) = mean_and_variance(&bankot_counts());
        assert!((mean - 9.8).abs() < 1e-12);
        // Σ(x - 9.8)^2 = 39.6, / 9
        assert!((var - 4.4).abs() < 1e-12, "var={var}");
    }

    #[test]
    fn test_summary() {
        let s = HistoricalSummary::compute(&bankot_counts(), 11).unwrap();
        assert_eq!(s.n_years, 10);
        assert_eq!(s.min_rainy_days, 7);
        assert_eq!(s.max_rainy_days, 14);
        assert!((s.median_rainy_days - 9.5).abs() < 1e-12);
        // 12 and 14 exceed the strike
        assert!((s.historical_trigger_frequency - 0.2).abs() < 1e-12);
        assert!(s.dispersion_index.unwrap() < 1.0);
    }
}
