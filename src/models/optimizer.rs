/// Box-constrained minimiser for smooth objectives with analytic gradients.
///
/// Spectral projected gradient (Birgin, Martinez & Raydan 2000): steps along the
/// projected negative gradient with a Barzilai-Borwein step length and an Armijo
/// backtracking line search. Deterministic for a given objective and start point.
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct BoxConstraints {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl BoxConstraints {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, String> {
        if lower.is_empty() || lower.len() != upper.len() {
            return Err("constraints require same non-zero lower/upper dimensions".to_string());
        }
        for (i, (lo, hi)) in lower.iter().zip(&upper).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(format!("invalid bound at index {i}: [{lo}, {hi}]"));
            }
        }
        Ok(Self { lower, upper })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| v.clamp(self.lower[i], self.upper[i]))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    GradientTolerance,
    ObjectiveTolerance,
    MaxIterations,
    LineSearchFailure,
    NumericalFailure,
}

#[derive(Debug, Clone, Copy)]
pub struct SpgOptions {
    pub max_iterations: usize,
    /// Infinity norm of the projected gradient step
    pub gradient_tolerance: f64,
    /// Relative objective decrease between iterates
    pub objective_tolerance: f64,
    pub armijo: f64,
    pub max_backtracks: usize,
    pub min_step: f64,
    pub max_step: f64,
}

impl Default for SpgOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1_000,
            gradient_tolerance: 1e-6,
            objective_tolerance: 1e-13,
            armijo: 1e-4,
            max_backtracks: 50,
            min_step: 1e-10,
            max_step: 1e10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimisationResult {
    /// Last iterate; always inside the bounds even when not converged
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
    pub reason: TerminationReason,
}

/// Minimise `objective` over `bounds` starting from `initial` (clamped into the box).
/// `gradient` must return the gradient of `objective` at the given point.
pub fn minimize_bounded<F, G>(
    initial: &[f64],
    bounds: &BoxConstraints,
    options: SpgOptions,
    mut objective: F,
    mut gradient: G,
) -> Result<OptimisationResult, String>
where
    F: FnMut(&[f64]) -> f64,
    G: FnMut(&[f64]) -> Vec<f64>,
{
    if initial.len() != bounds.dimension() {
        return Err("initial vector dimension does not match bounds".to_string());
    }

    let mut x = bounds.clamp(initial);
    let mut f = objective(&x);
    if !f.is_finite() {
        return Err("objective is not finite at initial point".to_string());
    }
    let mut g = gradient(&x);
    if g.iter().any(|v| !v.is_finite()) {
        return Err("gradient is not finite at initial point".to_string());
    }

    let projected_step = |x: &[f64], g: &[f64], alpha: f64| -> Vec<f64> {
        let trial: Vec<f64> = x.iter().zip(g).map(|(xi, gi)| xi - alpha * gi).collect();
        bounds
            .clamp(&trial)
            .iter()
            .zip(x)
            .map(|(p, xi)| p - xi)
            .collect()
    };

    // First step length scaled so the initial move has unit infinity norm.
    let unit = projected_step(&x, &g, 1.0);
    let unit_norm = inf_norm(&unit);
    let mut alpha = if unit_norm > 0.0 {
        (1.0 / unit_norm).clamp(options.min_step, options.max_step)
    } else {
        1.0
    };

    let mut reason = TerminationReason::MaxIterations;
    let mut converged = false;
    let mut iterations = 0usize;

    for iter in 0..options.max_iterations {
        iterations = iter + 1;

        // Stationarity measure independent of the current step length
        if inf_norm(&projected_step(&x, &g, 1.0)) <= options.gradient_tolerance {
            reason = TerminationReason::GradientTolerance;
            converged = true;
            break;
        }

        let d = projected_step(&x, &g, alpha);
        let slope: f64 = g.iter().zip(&d).map(|(gi, di)| gi * di).sum();

        let mut lambda = 1.0;
        let mut accepted = None;
        for _ in 0..options.max_backtracks {
            let trial: Vec<f64> = bounds.clamp(
                &x.iter().zip(&d).map(|(xi, di)| xi + lambda * di).collect::<Vec<_>>(),
            );
            let f_trial = objective(&trial);
            if f_trial.is_finite() && f_trial <= f + options.armijo * lambda * slope {
                accepted = Some((trial, f_trial));
                break;
            }
            lambda *= 0.5;
        }

        let Some((x_new, f_new)) = accepted else {
            reason = TerminationReason::LineSearchFailure;
            break;
        };

        let g_new = gradient(&x_new);
        if g_new.iter().any(|v| !v.is_finite()) {
            reason = TerminationReason::NumericalFailure;
            break;
        }

        let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy: f64 = s.iter().zip(&y).map(|(a, b)| a * b).sum();
        let ss: f64 = s.iter().map(|v| v * v).sum();

        let decrease = f - f_new;
        x = x_new;
        g = g_new;
        let f_prev = f;
        f = f_new;

        if decrease.abs() <= options.objective_tolerance * f_prev.abs().max(1.0) {
            reason = TerminationReason::ObjectiveTolerance;
            converged = true;
            break;
        }

        // Barzilai-Borwein step; fall back to the largest step on non-positive curvature
        alpha = if sy > 0.0 {
            (ss / sy).clamp(options.min_step, options.max_step)
        } else {
            options.max_step
        };
    }

    Ok(OptimisationResult {
        x,
        objective: f,
        iterations,
        converged,
        reason,
    })
}

#[inline]
fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}
