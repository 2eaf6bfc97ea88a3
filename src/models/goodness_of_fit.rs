/// Pearson chi-squared goodness-of-fit test for count models.
///
/// Bins span min..=max of the observed data. Adjacent bins are pooled
/// left-to-right until each pooled bin expects at least [`MIN_EXPECTED`]
/// observations; an under-filled remainder is folded into the last pooled bin.
///
/// dof = pooled_bins - 1 - estimated_params, floored at 1.
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::errors::{PricingError, PricingResult};

pub const MIN_EXPECTED: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquaredTest {
    pub statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: usize,
}

/// Pool (observed, expected) bins by carry-forward accumulation.
pub fn pool_bins(observed: &[f64], expected: &[f64]) -> Vec<(f64, f64)> {
    let mut pooled: Vec<(f64, f64)> = Vec::with_capacity(observed.len());
    let mut obs_acc = 0.0;
    let mut exp_acc = 0.0;

    for (&o, &e) in observed.iter().zip(expected) {
        obs_acc += o;
        exp_acc += e;
        if exp_acc >= MIN_EXPECTED {
            pooled.push((obs_acc, exp_acc));
            obs_acc = 0.0;
            exp_acc = 0.0;
        }
    }

    if obs_acc > 0.0 || exp_acc > 0.0 {
        match pooled.last_mut() {
            Some(last) => {
                last.0 += obs_acc;
                last.1 += exp_acc;
            }
            None => pooled.push((obs_acc, exp_acc)),
        }
    }

    pooled
}

/// Run the test of `data` against `pmf`, with `estimated_params` fitted from the same data.
pub fn chi_squared_test<F>(
    data: &[u32],
    pmf: F,
    estimated_params: usize,
) -> PricingResult<ChiSquaredTest>
where
    F: Fn(u32) -> f64,
{
    let (Some(&min), Some(&max)) = (data.iter().min(), data.iter().max()) else {
        return Err(PricingError::InsufficientData(
            "chi-squared test needs observations".to_string(),
        ));
    };

    let n = data.len() as f64;
    let width = (max - min + 1) as usize;
    let mut observed = vec![0.0; width];
    for &d in data {
        observed[(d - min) as usize] += 1.0;
    }
    let expected: Vec<f64> = (min..=max).map(|k| pmf(k) * n).collect();

    let pooled = pool_bins(&observed, &expected);

    let statistic: f64 = pooled
        .iter()
        .map(|&(o, e)| {
            if e > 0.0 {
                (o - e) * (o - e) / e
            } else if o > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        })
        .sum();

    let degrees_of_freedom = pooled
        .len()
        .saturating_sub(1 + estimated_params)
        .max(1);

    let chi2 = ChiSquared::new(degrees_of_freedom as f64)
        .map_err(|e| PricingError::Model(format!("chi-squared({degrees_of_freedom}): {e}")))?;
    let p_value = if statistic.is_finite() {
        chi2.sf(statistic).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(ChiSquaredTest {
        statistic,
        p_value,
        degrees_of_freedom,
    })
}
