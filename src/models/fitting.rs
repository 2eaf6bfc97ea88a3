/// Distribution fitting and model selection for annual rainy-day counts.
///
/// Candidates:
///   Poisson           λ = sample mean (closed-form MLE)
///   Negative binomial (n, p) by bounded MLE, seeded by method of moments
///   Empirical         observed relative frequencies (saturated, GOF p = 1)
///
/// Selection: small samples always go empirical. Otherwise the parametric
/// candidate with the lowest AIC wins if its chi-squared p-value clears the
/// significance level, else empirical.
use crate::errors::{PricingError, PricingResult};
use crate::history;
use crate::models::goodness_of_fit::chi_squared_test;
use crate::models::optimizer::{minimize_bounded, BoxConstraints, SpgOptions};
use crate::models::{DistributionKind, DistributionModel};
use serde::Serialize;
use smallvec::SmallVec;
use statrs::function::gamma::{digamma, ln_gamma};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Box constraints on (n, p) for the negative binomial MLE
const NB_N_BOUNDS: (f64, f64) = (0.1, 1000.0);
const NB_P_BOUNDS: (f64, f64) = (0.01, 0.99);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    Auto,
    Poisson,
    NegativeBinomial,
    Empirical,
}

impl FromStr for FitMethod {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "poisson" => Ok(Self::Poisson),
            "negative_binomial" => Ok(Self::NegativeBinomial),
            "empirical" => Ok(Self::Empirical),
            _ => Err(PricingError::UnknownMethod {
                kind: "fitting",
                name: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Poisson => write!(f, "poisson"),
            Self::NegativeBinomial => write!(f, "negative_binomial"),
            Self::Empirical => write!(f, "empirical"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitSettings {
    /// Below this many observations only the empirical model is considered
    pub min_sample_size_parametric: usize,
    /// A parametric fit is acceptable when its GOF p-value exceeds this
    pub gof_significance_level: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            min_sample_size_parametric: 20,
            gof_significance_level: 0.05,
        }
    }
}

/// Per-candidate fit record.
#[derive(Debug, Clone, Serialize)]
pub struct FitDiagnostics {
    pub distribution_type: DistributionKind,
    pub parameters: BTreeMap<String, f64>,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub gof_statistic: f64,
    pub gof_pvalue: f64,
    /// 0 for the empirical model, which is not tested
    pub gof_degrees_of_freedom: usize,
    pub is_good_fit: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FittedDistribution {
    pub model: DistributionModel,
    pub diagnostics: FitDiagnostics,
}

/// Outcome of a fitting run: the chosen model plus every candidate tried.
#[derive(Debug, Clone)]
pub struct FitSelection {
    pub method: FitMethod,
    pub selected: FittedDistribution,
    pub candidates: SmallVec<[FitDiagnostics; 3]>,
}

pub struct DistributionFitter<'a> {
    data: &'a [u32],
    mean: f64,
    variance: f64,
    settings: FitSettings,
}

impl<'a> DistributionFitter<'a> {
    pub fn new(data: &'a [u32], settings: FitSettings) -> PricingResult<Self> {
        if data.len() < history::MIN_HISTORICAL_YEARS {
            return Err(PricingError::InsufficientData(format!(
                "need at least {} data points for distribution fitting, got {}",
                history::MIN_HISTORICAL_YEARS,
                data.len()
            )));
        }
        let (mean, variance) = history::mean_and_variance(data);
        Ok(Self {
            data,
            mean,
            variance,
            settings,
        })
    }

    pub fn fit_poisson(&self) -> PricingResult<FittedDistribution> {
        if self.mean <= 0.0 {
            return Err(PricingError::InvalidData(
                "poisson fit needs at least one rainy day in the record".to_string(),
            ));
        }
        let model = DistributionModel::poisson(self.mean)?;
        self.diagnose(model, 1, Vec::new())
    }

    pub fn fit_negative_binomial(&self) -> PricingResult<FittedDistribution> {
        let len = self.data.len() as f64;
        let population_variance = self.variance * (len - 1.0) / len;
        let (n_init, p_init) = if population_variance <= self.mean {
            // No interior MLE: the likelihood climbs toward the Poisson limit,
            // so start on the p bound with the mean matched.
            let p = NB_P_BOUNDS.1;
            let n = (p * self.mean / (1.0 - p)).clamp(NB_N_BOUNDS.0, NB_N_BOUNDS.1);
            (n, p)
        } else {
            (
                self.mean * self.mean / (self.variance - self.mean),
                self.mean / self.variance,
            )
        };

        let bounds = BoxConstraints::new(
            vec![NB_N_BOUNDS.0, NB_P_BOUNDS.0],
            vec![NB_N_BOUNDS.1, NB_P_BOUNDS.1],
        )
        .map_err(PricingError::Model)?;

        let data = self.data;
        let result = minimize_bounded(
            &[n_init, p_init],
            &bounds,
            SpgOptions::default(),
            |x| nb_negative_log_likelihood(data, x[0], x[1]),
            |x| nb_negative_log_likelihood_gradient(data, x[0], x[1]),
        )
        .map_err(|e| PricingError::Model(format!("negative binomial MLE: {e}")))?;

        tracing::debug!(
            n = result.x[0],
            p = result.x[1],
            nll = result.objective,
            iterations = result.iterations,
            reason = ?result.reason,
            "negative binomial MLE"
        );

        let mut warnings = Vec::new();
        if !result.converged {
            tracing::warn!(
                reason = ?result.reason,
                iterations = result.iterations,
                n = result.x[0],
                p = result.x[1],
                "negative binomial optimisation did not converge, using last iterate"
            );
            warnings.push(format!(
                "negative binomial optimisation did not converge ({:?} after {} iterations)",
                result.reason, result.iterations
            ));
        }

        let model = DistributionModel::negative_binomial(result.x[0], result.x[1])?;
        self.diagnose(model, 2, warnings)
    }

    pub fn fit_empirical(&self) -> PricingResult<FittedDistribution> {
        let model = DistributionModel::empirical(self.data)?;
        let log_likelihood = self.log_likelihood(&model);
        let (aic, bic) = information_criteria(log_likelihood, model.parameter_count(), self.data.len());

        Ok(FittedDistribution {
            diagnostics: FitDiagnostics {
                distribution_type: DistributionKind::Empirical,
                parameters: model.parameters(),
                log_likelihood,
                aic,
                bic,
                gof_statistic: 0.0,
                gof_pvalue: 1.0,
                gof_degrees_of_freedom: 0,
                is_good_fit: true,
                warnings: Vec::new(),
            },
            model,
        })
    }

    /// Fit with an explicit method, or run automatic selection for [`FitMethod::Auto`].
    pub fn fit(&self, method: FitMethod) -> PricingResult<FitSelection> {
        let selected = match method {
            FitMethod::Auto => return self.select_best(),
            FitMethod::Poisson => self.fit_poisson()?,
            FitMethod::NegativeBinomial => self.fit_negative_binomial()?,
            FitMethod::Empirical => self.fit_empirical()?,
        };
        let mut candidates = SmallVec::new();
        candidates.push(selected.diagnostics.clone());
        Ok(FitSelection {
            method,
            selected,
            candidates,
        })
    }

    pub fn select_best(&self) -> PricingResult<FitSelection> {
        let empirical = self.fit_empirical()?;
        let mut candidates: SmallVec<[FitDiagnostics; 3]> = SmallVec::new();
        candidates.push(empirical.diagnostics.clone());

        if self.data.len() < self.settings.min_sample_size_parametric {
            tracing::info!(
                n = self.data.len(),
                min = self.settings.min_sample_size_parametric,
                "sample below parametric minimum, selecting empirical"
            );
            return Ok(FitSelection {
                method: FitMethod::Auto,
                selected: empirical,
                candidates,
            });
        }

        let mut parametric: SmallVec<[FittedDistribution; 2]> = SmallVec::new();
        for (name, fit) in [
            ("poisson", self.fit_poisson()),
            ("negative_binomial", self.fit_negative_binomial()),
        ] {
            match fit {
                Ok(f) => {
                    candidates.push(f.diagnostics.clone());
                    parametric.push(f);
                }
                Err(e) => tracing::warn!(candidate = name, error = %e, "fit failed, skipping candidate"),
            }
        }

        let best = parametric
            .into_iter()
            .min_by(|a, b| a.diagnostics.aic.total_cmp(&b.diagnostics.aic));

        let selected = match best {
            Some(fit) if fit.diagnostics.is_good_fit => fit,
            Some(fit) => {
                tracing::info!(
                    candidate = %fit.diagnostics.distribution_type,
                    gof_pvalue = fit.diagnostics.gof_pvalue,
                    "best parametric fit rejected by goodness-of-fit, selecting empirical"
                );
                empirical
            }
            None => empirical,
        };

        Ok(FitSelection {
            method: FitMethod::Auto,
            selected,
            candidates,
        })
    }

    fn log_likelihood(&self, model: &DistributionModel) -> f64 {
        self.data.iter().map(|&k| model.ln_pmf(k)).sum()
    }

    fn diagnose(
        &self,
        model: DistributionModel,
        n_params: usize,
        warnings: Vec<String>,
    ) -> PricingResult<FittedDistribution> {
        let log_likelihood = self.log_likelihood(&model);
        let (aic, bic) = information_criteria(log_likelihood, n_params, self.data.len());
        let gof = chi_squared_test(self.data, |k| model.pmf(k), n_params)?;

        Ok(FittedDistribution {
            diagnostics: FitDiagnostics {
                distribution_type: model.kind(),
                parameters: model.parameters(),
                log_likelihood,
                aic,
                bic,
                gof_statistic: gof.statistic,
                gof_pvalue: gof.p_value,
                gof_degrees_of_freedom: gof.degrees_of_freedom,
                is_good_fit: gof.p_value > self.settings.gof_significance_level,
                warnings,
            },
            model,
        })
    }
}

/// Validate raw counts and fit them in one call.
pub fn fit_distribution(
    raw: &[i64],
    method: FitMethod,
    settings: &FitSettings,
) -> PricingResult<FitSelection> {
    let data = history::validate_counts(raw)?;
    DistributionFitter::new(&data, settings.clone())?.fit(method)
}

/// (AIC, BIC) = (2k - 2LL, k ln n - 2LL)
fn information_criteria(log_likelihood: f64, k: usize, n: usize) -> (f64, f64) {
    let k = k as f64;
    (
        2.0 * k - 2.0 * log_likelihood,
        k * (n as f64).ln() - 2.0 * log_likelihood,
    )
}

/// -Σ ln[ Γ(x+n) / (Γ(n) x!) · p^n (1-p)^x ]
fn nb_negative_log_likelihood(data: &[u32], n: f64, p: f64) -> f64 {
    if n <= 0.0 || p <= 0.0 || p >= 1.0 {
        return f64::INFINITY;
    }
    let ln_gamma_n = ln_gamma(n);
    let (ln_p, ln_q) = (p.ln(), (1.0 - p).ln());
    -data
        .iter()
        .map(|&k| {
            let x = k as f64;
            ln_gamma(x + n) - ln_gamma_n - ln_gamma(x + 1.0) + n * ln_p + x * ln_q
        })
        .sum::<f64>()
}

/// ∂/∂n = -Σ[ψ(x+n) - ψ(n) + ln p],  ∂/∂p = -Σ[n/p - x/(1-p)]
fn nb_negative_log_likelihood_gradient(data: &[u32], n: f64, p: f64) -> Vec<f64> {
    let psi_n = digamma(n);
    let ln_p = p.ln();
    let (mut dn, mut dp) = (0.0, 0.0);
    for &k in data {
        let x = k as f64;
        dn += digamma(x + n) - psi_n + ln_p;
        dp += n / p - x / (1.0 - p);
    }
    vec![-dn, -dp]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::history::tests::{bankot_counts, BANKOT_OCTOBER};

    /// Over-dispersed record (variance well above mean), 24 observations.
    pub(crate) const OVERDISPERSED: [u32; 24] = [
        2, 5, 9, 1, 14, 3, 7, 20, 4, 6, 0, 11, 8, 2, 15, 5, 3, 9, 1, 12, 6, 4, 17, 2,
    ];

    /// Roughly equi-dispersed record, 30 observations around 10.
    pub(crate) const EQUIDISPERSED: [u32; 30] = [
        9, 11, 10, 8, 12, 10, 7, 13, 9, 10, 11, 6, 14, 10, 9, 12, 8, 11, 10, 9, 13, 7, 10, 11, 12,
        8, 10, 9, 11, 10,
    ];

    /// Poisson(6) quantiles at (i + 0.5) / 40, so variance sits just under the mean.
    const POISSON_LIKE: [u32; 40] = [
        1, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 5, 5, 5, 5, 5, 5, 5, 6, 6, 6, 6, 6, 6, 7, 7, 7, 7, 7, 7,
        8, 8, 8, 8, 9, 9, 9, 10, 11, 12,
    ];

    #[test]
    fn test_small_sample_selects_empirical() {
        let data = bankot_counts();
        let fitter = DistributionFitter::new(&data, FitSettings::default()).unwrap();
        assert!((fitter.mean - 9.8).abs() < 1e-12);
        let selection = fitter.fit(FitMethod::Auto).unwrap();
        assert_eq!(selection.selected.model.kind(), DistributionKind::Empirical);
        assert_eq!(selection.candidates.len(), 1);
    }

    #[test]
    fn test_poisson_mle_is_sample_mean() {
        let fitter = DistributionFitter::new(&EQUIDISPERSED, FitSettings::default()).unwrap();
        let fit = fitter.fit_poisson().unwrap();
        assert!((fit.model.mean() - fitter.mean).abs() < 1e-12);
        assert!((fit.diagnostics.parameters["lambda"] - fitter.mean).abs() < 1e-12);
        // 1 parameter: AIC = 2 - 2LL
        assert!((fit.diagnostics.aic - (2.0 - 2.0 * fit.diagnostics.log_likelihood)).abs() < 1e-9);
    }

    #[test]
    fn test_negative_binomial_recovers_mean_and_stays_in_bounds() {
        let fitter = DistributionFitter::new(&OVERDISPERSED, FitSettings::default()).unwrap();
        let fit = fitter.fit_negative_binomial().unwrap();
        let params = &fit.diagnostics.parameters;
        assert!(params["n"] >= NB_N_BOUNDS.0 && params["n"] <= NB_N_BOUNDS.1);
        assert!(params["p"] >= NB_P_BOUNDS.0 && params["p"] <= NB_P_BOUNDS.1);
        // At the interior MLE the fitted mean equals the sample mean
        let rel = (fit.model.mean() - fitter.mean).abs() / fitter.mean;
        assert!(rel < 1e-2, "fitted mean {} vs sample {}", fit.model.mean(), fitter.mean);
    }

    #[test]
    fn test_negative_binomial_beats_poisson_on_overdispersed_data() {
        let fitter = DistributionFitter::new(&OVERDISPERSED, FitSettings::default()).unwrap();
        let nb = fitter.fit_negative_binomial().unwrap();
        let po = fitter.fit_poisson().unwrap();
        assert!(nb.diagnostics.log_likelihood > po.diagnostics.log_likelihood);
        assert!(nb.diagnostics.aic < po.diagnostics.aic);
    }

    #[test]
    fn test_empirical_saturates_likelihood() {
        for data in [&OVERDISPERSED[..], &EQUIDISPERSED[..]] {
            let fitter = DistributionFitter::new(data, FitSettings::default()).unwrap();
            let emp = fitter.fit_empirical().unwrap().diagnostics;
            assert_eq!(emp.gof_pvalue, 1.0);
            assert!(emp.is_good_fit);
            for fit in [fitter.fit_poisson().unwrap(), fitter.fit_negative_binomial().unwrap()] {
                assert!(
                    emp.log_likelihood >= fit.diagnostics.log_likelihood - 1e-9,
                    "empirical LL {} < {} LL {}",
                    emp.log_likelihood,
                    fit.diagnostics.distribution_type,
                    fit.diagnostics.log_likelihood
                );
            }
        }
    }

    #[test]
    fn test_auto_selection_follows_heuristic() {
        let fitter = DistributionFitter::new(&EQUIDISPERSED, FitSettings::default()).unwrap();
        let selection = fitter.fit(FitMethod::Auto).unwrap();
        assert_eq!(selection.candidates.len(), 3);

        let parametric: Vec<&FitDiagnostics> = selection
            .candidates
            .iter()
            .filter(|c| c.distribution_type != DistributionKind::Empirical)
            .collect();
        let best = parametric
            .iter()
            .min_by(|a, b| a.aic.total_cmp(&b.aic))
            .unwrap();
        let expected = if best.is_good_fit {
            best.distribution_type
        } else {
            DistributionKind::Empirical
        };
        assert_eq!(selection.selected.model.kind(), expected);
    }

    #[test]
    fn test_auto_selects_negative_binomial_on_overdispersed_data() {
        let fitter = DistributionFitter::new(&OVERDISPERSED, FitSettings::default()).unwrap();
        let selection = fitter.select_best().unwrap();
        assert_eq!(selection.selected.model.kind(), DistributionKind::NegativeBinomial);
        assert!(selection.selected.diagnostics.is_good_fit);

        // Poisson is rejected outright on this record
        let poisson = selection
            .candidates
            .iter()
            .find(|c| c.distribution_type == DistributionKind::Poisson)
            .unwrap();
        assert!(!poisson.is_good_fit);
        assert!(poisson.aic > selection.selected.diagnostics.aic);
    }

    #[test]
    fn test_auto_selects_poisson_on_poisson_like_data() {
        let fitter = DistributionFitter::new(&POISSON_LIKE, FitSettings::default()).unwrap();
        let selection = fitter.select_best().unwrap();
        assert_eq!(selection.candidates.len(), 3);
        assert_eq!(selection.selected.model.kind(), DistributionKind::Poisson);
        assert!(selection.selected.diagnostics.gof_pvalue > 0.5);
        assert!((selection.selected.diagnostics.parameters["lambda"] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_binomial_converges_on_underdispersed_data() {
        for data in [EQUIDISPERSED.to_vec(), POISSON_LIKE.to_vec(), bankot_counts()] {
            let fitter = DistributionFitter::new(&data, FitSettings::default()).unwrap();
            let fit = fitter.fit_negative_binomial().unwrap();
            assert!(fit.diagnostics.warnings.is_empty(), "{:?}", fit.diagnostics.warnings);
            assert!((fit.diagnostics.parameters["p"] - NB_P_BOUNDS.1).abs() < 1e-12);
            let rel = (fit.model.mean() - fitter.mean).abs() / fitter.mean;
            assert!(rel < 1e-2, "fitted mean {} vs sample {}", fit.model.mean(), fitter.mean);
        }
    }

    #[test]
    fn test_gof_rejection_falls_back_to_empirical() {
        let settings = FitSettings {
            min_sample_size_parametric: 20,
            // Nothing can clear a p-value threshold of 1
            gof_significance_level: 1.0,
        };
        let fitter = DistributionFitter::new(&EQUIDISPERSED, settings).unwrap();
        let selection = fitter.select_best().unwrap();
        assert_eq!(selection.selected.model.kind(), DistributionKind::Empirical);
    }

    #[test]
    fn test_all_zero_record_skips_poisson() {
        let zeros = [0u32; 25];
        let fitter = DistributionFitter::new(&zeros, FitSettings::default()).unwrap();
        assert!(matches!(fitter.fit_poisson(), Err(PricingError::InvalidData(_))));
        let explicit = fitter.fit(FitMethod::Poisson).unwrap_err();
        assert!(explicit.is_client_error());
        // Selection survives the failed candidate
        let selection = fitter.select_best().unwrap();
        assert!(selection
            .candidates
            .iter()
            .all(|c| c.distribution_type != DistributionKind::Poisson));
    }

    #[test]
    fn test_unknown_method() {
        let err = "weibull".parse::<FitMethod>().unwrap_err();
        assert!(matches!(err, PricingError::UnknownMethod { kind: "fitting", .. }));
        assert_eq!("Negative_Binomial".parse::<FitMethod>().unwrap(), FitMethod::NegativeBinomial);
    }

    #[test]
    fn test_fit_distribution_validates_raw_counts() {
        assert!(matches!(
            fit_distribution(&[1, 2, 3], FitMethod::Auto, &FitSettings::default()),
            Err(PricingError::InsufficientData(_))
        ));
        assert!(matches!(
            fit_distribution(&[1, 2, -3, 4, 5], FitMethod::Auto, &FitSettings::default()),
            Err(PricingError::InvalidData(_))
        ));
        let selection =
            fit_distribution(&BANKOT_OCTOBER, FitMethod::Poisson, &FitSettings::default()).unwrap();
        assert_eq!(selection.selected.model.kind(), DistributionKind::Poisson);
        assert_eq!(selection.method, FitMethod::Poisson);
    }

    #[test]
    fn test_nll_gradient_matches_finite_difference() {
        let (n, p) = (3.5, 0.4);
        let g = nb_negative_log_likelihood_gradient(&OVERDISPERSED, n, p);
        let h = 1e-6;
        let dn = (nb_negative_log_likelihood(&OVERDISPERSED, n + h, p)
            - nb_negative_log_likelihood(&OVERDISPERSED, n - h, p))
            / (2.0 * h);
        let dp = (nb_negative_log_likelihood(&OVERDISPERSED, n, p + h)
            - nb_negative_log_likelihood(&OVERDISPERSED, n, p - h))
            / (2.0 * h);
        assert!((g[0] - dn).abs() < 1e-4 * dn.abs().max(1.0), "dn {} vs {dn}", g[0]);
        assert!((g[1] - dp).abs() < 1e-4 * dp.abs().max(1.0), "dp {} vs {dp}", g[1]);
    }
}
