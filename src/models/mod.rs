pub mod fitting;
pub mod goodness_of_fit;
pub mod optimizer;

use crate::errors::{PricingError, PricingResult};
use rand::Rng;
use serde::Serialize;
use statrs::distribution::{Discrete, DiscreteCDF, NegativeBinomial, Poisson};
use std::collections::BTreeMap;

/// Upper bound on the support walked by cdf inversion.
/// Rainy-day counts never exceed 31; this leaves room for heavy NB tails.
const MAX_SUPPORT: u32 = 10_000;

/// Tail mass below which a sampling table stops growing.
const SAMPLING_TAIL_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    Poisson,
    NegativeBinomial,
    Empirical,
}

impl std::fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poisson => write!(f, "poisson"),
            Self::NegativeBinomial => write!(f, "negative_binomial"),
            Self::Empirical => write!(f, "empirical"),
        }
    }
}

/// Observed relative frequency per distinct count.
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalPmf {
    masses: BTreeMap<u32, f64>,
}

impl EmpiricalPmf {
    /// Build from raw observations. Each mass is count / n.
    pub fn from_observations(data: &[u32]) -> PricingResult<Self> {
        if data.is_empty() {
            return Err(PricingError::InsufficientData(
                "empirical distribution needs at least one observation".to_string(),
            ));
        }
        let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
        for &d in data {
            *counts.entry(d).or_insert(0) += 1;
        }
        let n = data.len() as f64;
        let masses = counts.into_iter().map(|(k, c)| (k, c as f64 / n)).collect();
        Ok(Self { masses })
    }

    #[inline]
    pub fn mass(&self, k: u32) -> f64 {
        self.masses.get(&k).copied().unwrap_or(0.0)
    }

    pub fn cumulative(&self, k: u32) -> f64 {
        self.masses.range(..=k).map(|(_, p)| p).sum::<f64>().min(1.0)
    }

    pub fn support(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.masses.iter().map(|(&k, &p)| (k, p))
    }

    pub fn max_value(&self) -> u32 {
        self.masses.keys().next_back().copied().unwrap_or(0)
    }

    pub fn distinct_values(&self) -> usize {
        self.masses.len()
    }
}

/// Probability model over non-negative rainy-day counts.
///
/// A closed sum type: every consumer (pricing, simulation, reporting) dispatches
/// exhaustively over the three kinds. Instances are immutable once fitted.
#[derive(Debug, Clone)]
pub enum DistributionModel {
    Poisson(Poisson),
    /// Number of failures before `n` successes, success probability `p`
    NegativeBinomial(NegativeBinomial),
    Empirical(EmpiricalPmf),
}

impl DistributionModel {
    pub fn poisson(lambda: f64) -> PricingResult<Self> {
        Poisson::new(lambda)
            .map(Self::Poisson)
            .map_err(|e| PricingError::Model(format!("poisson(lambda={lambda}): {e}")))
    }

    pub fn negative_binomial(n: f64, p: f64) -> PricingResult<Self> {
        if !(n > 0.0 && n.is_finite() && p > 0.0 && p < 1.0) {
            return Err(PricingError::Model(format!(
                "negative_binomial(n={n}, p={p}): need n > 0 and 0 < p < 1"
            )));
        }
        NegativeBinomial::new(n, p)
            .map(Self::NegativeBinomial)
            .map_err(|e| PricingError::Model(format!("negative_binomial(n={n}, p={p}): {e}")))
    }

    pub fn empirical(data: &[u32]) -> PricingResult<Self> {
        EmpiricalPmf::from_observations(data).map(Self::Empirical)
    }

    pub fn kind(&self) -> DistributionKind {
        match self {
            Self::Poisson(_) => DistributionKind::Poisson,
            Self::NegativeBinomial(_) => DistributionKind::NegativeBinomial,
            Self::Empirical(_) => DistributionKind::Empirical,
        }
    }

    /// Number of estimated parameters, as used by AIC/BIC and the chi-squared dof.
    pub fn parameter_count(&self) -> usize {
        match self {
            Self::Poisson(_) => 1,
            Self::NegativeBinomial(_) => 2,
            Self::Empirical(e) => e.distinct_values(),
        }
    }

    /// Named parameters for reporting: `lambda`; `n`, `p`; or `p_<k>` per support point.
    pub fn parameters(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Poisson(d) => BTreeMap::from([("lambda".to_string(), d.lambda())]),
            Self::NegativeBinomial(d) => {
                BTreeMap::from([("n".to_string(), d.r()), ("p".to_string(), d.p())])
            }
            Self::Empirical(e) => e.support().map(|(k, p)| (format!("p_{k}"), p)).collect(),
        }
    }

    #[inline]
    pub fn pmf(&self, k: u32) -> f64 {
        match self {
            Self::Poisson(d) => d.pmf(k as u64),
            Self::NegativeBinomial(d) => d.pmf(k as u64),
            Self::Empirical(e) => e.mass(k),
        }
    }

    #[inline]
    pub fn ln_pmf(&self, k: u32) -> f64 {
        match self {
            Self::Poisson(d) => d.ln_pmf(k as u64),
            Self::NegativeBinomial(d) => d.ln_pmf(k as u64),
            Self::Empirical(e) => e.mass(k).ln(),
        }
    }

    /// P(X <= k)
    #[inline]
    pub fn cdf(&self, k: u32) -> f64 {
        match self {
            Self::Poisson(d) => d.cdf(k as u64),
            Self::NegativeBinomial(d) => d.cdf(k as u64),
            Self::Empirical(e) => e.cumulative(k),
        }
    }

    /// Smallest k with cdf(k) >= q.
    pub fn inverse_cdf(&self, q: f64) -> u32 {
        let q = q.clamp(0.0, 1.0);
        let upper = match self {
            Self::Empirical(e) => e.max_value(),
            _ => MAX_SUPPORT,
        };
        let mut cumulative = 0.0;
        for k in 0..=upper {
            cumulative += self.pmf(k);
            if cumulative >= q - f64::EPSILON {
                return k;
            }
        }
        upper
    }

    pub fn mean(&self) -> f64 {
        match self {
            Self::Poisson(d) => d.lambda(),
            Self::NegativeBinomial(d) => d.r() * (1.0 - d.p()) / d.p(),
            Self::Empirical(e) => e.support().map(|(k, p)| k as f64 * p).sum(),
        }
    }

    pub fn variance(&self) -> f64 {
        match self {
            Self::Poisson(d) => d.lambda(),
            Self::NegativeBinomial(d) => d.r() * (1.0 - d.p()) / (d.p() * d.p()),
            Self::Empirical(e) => {
                let mean = self.mean();
                e.support()
                    .map(|(k, p)| {
                        let dev = k as f64 - mean;
                        dev * dev * p
                    })
                    .sum()
            }
        }
    }

    /// Draw `n` variates from the model using the caller's generator.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<u32> {
        let table = SamplingTable::new(self);
        (0..n).map(|_| table.draw(rng)).collect()
    }
}

/// Precomputed cumulative masses for inverse-transform sampling.
///
/// A uniform u in [0, 1) maps to the first k with cdf(k) > u, so each k is
/// drawn with probability pmf(k). Built once per batch of draws.
#[derive(Debug, Clone)]
pub struct SamplingTable {
    cumulative: Vec<f64>,
}

impl SamplingTable {
    pub fn new(model: &DistributionModel) -> Self {
        let upper = match model {
            DistributionModel::Empirical(e) => e.max_value(),
            _ => MAX_SUPPORT,
        };
        let mut cumulative = Vec::with_capacity(64);
        let mut running = 0.0;
        for k in 0..=upper {
            running += model.pmf(k);
            cumulative.push(running);
            if running >= 1.0 - SAMPLING_TAIL_EPS {
                break;
            }
        }
        Self { cumulative }
    }

    #[inline]
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let u: f64 = rng.gen();
        let idx = self.cumulative.partition_point(|&c| c <= u);
        idx.min(self.cumulative.len().saturating_sub(1)) as u32
    }
}
