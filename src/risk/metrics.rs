/// Sample risk statistics over simulated payouts.
///
/// Percentiles use linear interpolation between closest ranks:
///   rank = q · (n - 1),  value = x[⌊rank⌋]·(1 - frac) + x[⌈rank⌉]·frac
///
/// VaR(q)  = q-th percentile of the payout sample
/// CVaR(q) = mean of payouts ≥ VaR(q), or VaR(q) when that tail is empty
///
/// All functions expect an ascending-sorted slice where noted. Pure functions.

/// Confidence levels reported for VaR / CVaR.
pub const CONFIDENCE_LEVELS: [f64; 3] = [0.90, 0.95, 0.99];

/// Percentile table levels, in percent.
pub const PERCENTILE_LEVELS: [u32; 7] = [10, 25, 50, 75, 90, 95, 99];

/// Percentile `pct` (0..=100) of an ascending-sorted sample. 0.0 for an empty sample.
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            if lower == upper {
                sorted[lower]
            } else {
                let frac = rank - lower as f64;
                sorted[lower] * (1.0 - frac) + sorted[upper] * frac
            }
        }
    }
}

/// Value at risk at `confidence` (e.g. 0.99).
#[inline]
pub fn value_at_risk(sorted: &[f64], confidence: f64) -> f64 {
    percentile_sorted(sorted, confidence * 100.0)
}

/// Mean of the sample at or above `var`; falls back to `var` when nothing reaches it.
pub fn conditional_value_at_risk(sorted: &[f64], var: f64) -> f64 {
    let start = sorted.partition_point(|&x| x < var);
    let tail = &sorted[start..];
    if tail.is_empty() {
        var
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    }
}

/// Fraction of payouts strictly greater than zero.
pub fn trigger_frequency(payouts: &[f64]) -> f64 {
    if payouts.is_empty() {
        return 0.0;
    }
    payouts.iter().filter(|&&p| p > 0.0).count() as f64 / payouts.len() as f64
}

/// Mean and population standard deviation (ddof = 0).
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert!((percentile_sorted(&sorted, 50.0) - 30.0).abs() < 1e-12);
        assert!((percentile_sorted(&sorted, 10.0) - 14.0).abs() < 1e-12);
        assert!((percentile_sorted(&sorted, 100.0) - 50.0).abs() < 1e-12);
        assert_eq!(percentile_sorted(&[], 50.0), 0.0);
        assert_eq!(percentile_sorted(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn test_cvar_at_least_var() {
        let mut sorted: Vec<f64> = (0..100).map(|i| (i % 10) as f64 * 1000.0).collect();
        sorted.sort_by(f64::total_cmp);
        for q in CONFIDENCE_LEVELS {
            let var = value_at_risk(&sorted, q);
            let cvar = conditional_value_at_risk(&sorted, var);
            assert!(cvar >= var, "q={q}: cvar {cvar} < var {var}");
        }
    }

    #[test]
    fn test_cvar_with_point_mass_at_zero() {
        // 99% zeros: VaR99 is 0 so the tail is the whole sample
        let mut sorted = vec![0.0; 99];
        sorted.push(5000.0);
        let var = value_at_risk(&sorted, 0.95);
        assert_eq!(var, 0.0);
        assert!((conditional_value_at_risk(&sorted, var) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_cvar_falls_back_to_var() {
        assert_eq!(conditional_value_at_risk(&[1.0, 2.0], 3.0), 3.0);
    }

    #[test]
    fn test_trigger_frequency_counts_strictly_positive() {
        assert!((trigger_frequency(&[0.0, 0.0, 14_000.0, 28_000.0]) - 0.5).abs() < 1e-12);
        assert_eq!(trigger_frequency(&[]), 0.0);
    }

    #[test]
    fn test_population_std() {
        let (mean, std) = mean_and_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }
}
