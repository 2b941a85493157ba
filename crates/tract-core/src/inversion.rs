//! Acoustic-to-articulatory inversion: iteratively deform an area function
//! until its formants match a target set.
//!
//! Each iteration estimates the current formants, builds per-tube sensitivity
//! functions from the kinetic/potential energy distribution at each formant
//! frequency, and perturbs the areas along the weighted sensitivity direction
//! with an adaptive step. Optional smoothness and energy-conservation
//! regularization keep the deformation articulatorily plausible.

use crate::chain::{duct_transfer_function, junction_profile};
use crate::formant::compute_formants;
use crate::{AreaFunction, ChainModel, SimConstants};

/// Inversion controls.
#[derive(Debug, Clone)]
pub struct InversionOptions {
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Stop when `mean(|f_est − f_target| / f_est) · 100` drops below this.
    pub threshold_pct: f64,
    /// Initial relative step applied to the sensitivity direction.
    pub step: f64,
    /// Three-point moving-average smoothing of the area perturbation.
    pub smooth: bool,
    /// Rescale areas after each step so the tract volume is conserved.
    pub conserve_energy: bool,
    /// Also adjust tube lengths (formants scale inversely with length).
    pub adjust_length: bool,
}

impl Default for InversionOptions {
    fn default() -> Self {
        Self {
            max_iter: 40,
            threshold_pct: 1.0,
            step: 0.2,
            smooth: true,
            conserve_energy: false,
            adjust_length: false,
        }
    }
}

/// Result of an inversion run.
#[derive(Debug, Clone)]
pub struct InversionReport {
    /// The deformed area function.
    pub area_function: AreaFunction,
    /// Relative formant error (percent) before each executed iteration, plus
    /// the final error.
    pub errors: Vec<f64>,
    /// Number of perturbation iterations actually executed.
    pub iterations: usize,
}

/// Relative formant error in percent.
fn formant_error_pct(est: &[f64], target: &[f64]) -> f64 {
    let n = est.len().min(target.len());
    if n == 0 {
        return f64::INFINITY;
    }
    let sum: f64 = est
        .iter()
        .zip(target)
        .take(n)
        .map(|(e, t)| ((e - t) / e).abs())
        .sum();
    sum / n as f64 * 100.0
}

/// Sensitivity of formant `f` to each tube's area: the normalized difference
/// of kinetic and potential acoustic energy per tube at that frequency.
fn sensitivity(af: &AreaFunction, f: f64, consts: &SimConstants) -> Vec<f64> {
    let n = af.n_tubes();
    let (p, u) = junction_profile(af, f, consts, ChainModel::Tmm);
    let mut ke = vec![0.0; n];
    let mut pe = vec![0.0; n];
    let mut total = 0.0;
    for i in 0..n {
        let (a, l) = (af.area[i], af.length[i]);
        let u2 = 0.5 * (u[i].norm_sqr() + u[i + 1].norm_sqr());
        let p2 = 0.5 * (p[i].norm_sqr() + p[i + 1].norm_sqr());
        ke[i] = consts.rho * l / (2.0 * a) * u2;
        pe[i] = l * a / (2.0 * consts.rho * consts.c * consts.c) * p2;
        total += ke[i] + pe[i];
    }
    if total <= 0.0 {
        return vec![0.0; n];
    }
    (0..n).map(|i| (ke[i] - pe[i]) / total).collect()
}

/// Deform `start` until its lowest formants match `targets` (Hz).
///
/// `freq` is the analysis grid handed to the transfer-function/formant
/// machinery; it must be uniform and extend past the highest target.
pub fn formant_to_area(
    start: &AreaFunction,
    targets: &[f64],
    freq: &[f64],
    consts: &SimConstants,
    opts: &InversionOptions,
) -> InversionReport {
    let n_f = targets.len();
    let mut af = start.clone();
    let mut step = opts.step;
    let mut errors = Vec::new();
    let mut iterations = 0;

    let volume0: f64 = af.area.iter().zip(&af.length).map(|(a, l)| a * l).sum();

    let mut est = estimate(&af, freq, consts, n_f);
    let mut err = formant_error_pct(&est, targets);
    errors.push(err);

    while err >= opts.threshold_pct && iterations < opts.max_iter && step > 1e-6 {
        let candidate = perturb(&af, &est, targets, consts, step, opts, volume0);
        let est_new = estimate(&candidate, freq, consts, n_f);
        let err_new = formant_error_pct(&est_new, targets);

        if err_new < err {
            af = candidate;
            est = est_new;
            err = err_new;
        } else {
            // Overshoot: halve the step and retry from the current best.
            step *= 0.5;
        }
        iterations += 1;
        errors.push(err);
    }

    InversionReport {
        area_function: af,
        errors,
        iterations,
    }
}

fn estimate(af: &AreaFunction, freq: &[f64], consts: &SimConstants, n_f: usize) -> Vec<f64> {
    let tf = duct_transfer_function(af, freq, consts, ChainModel::Tmm);
    compute_formants(&tf, n_f)
}

fn perturb(
    af: &AreaFunction,
    est: &[f64],
    targets: &[f64],
    consts: &SimConstants,
    step: f64,
    opts: &InversionOptions,
    volume0: f64,
) -> AreaFunction {
    let n = af.n_tubes();
    let mut delta = vec![0.0; n];
    let mut mean_rel = 0.0;
    let n_used = est.len().min(targets.len());
    for (fi, (e, t)) in est.iter().zip(targets).take(n_used).enumerate() {
        let rel = (t - e) / e;
        mean_rel += rel / n_used as f64;
        let s = sensitivity(af, est[fi], consts);
        for i in 0..n {
            delta[i] += rel * s[i];
        }
    }

    if opts.smooth && n >= 3 {
        let raw = delta.clone();
        for i in 1..n - 1 {
            delta[i] = (raw[i - 1] + raw[i] + raw[i + 1]) / 3.0;
        }
    }

    let mut out = af.clone();
    for i in 0..n {
        out.area[i] = (af.area[i] * (1.0 + step * delta[i])).max(consts.amin);
    }

    if opts.conserve_energy {
        let volume: f64 = out.area.iter().zip(&out.length).map(|(a, l)| a * l).sum();
        if volume > 0.0 {
            let scale = volume0 / volume;
            for a in &mut out.area {
                *a = (*a * scale).max(consts.amin);
            }
        }
    }

    if opts.adjust_length {
        // Raising every formant by x% is equivalent to shortening by x%.
        let scale = (1.0 - step * mean_rel).clamp(0.5, 2.0);
        for l in &mut out.length {
            *l *= scale;
        }
    }

    out
}
