//! Frequency-domain 2×2 ABCD chain matrices and duct transfer functions.
//!
//! Per-tube matrices are cascaded lips-first (outermost tube first), matching
//! the time-honoured convention of the transmission-matrix method; the
//! transfer function of a duct terminated by the lip radiation impedance is
//! `H(f) = 1 / (−C·Zrad + A)`.

use crate::{AreaFunction, ChainModel, SimConstants};
use num_complex::Complex64;
use std::f64::consts::PI;

/// A 2×2 complex chain matrix relating pressure/flow at a duct's two ends.
#[derive(Debug, Clone, Copy)]
pub struct ChainMatrix {
    pub a: Complex64,
    pub b: Complex64,
    pub c: Complex64,
    pub d: Complex64,
}

impl ChainMatrix {
    pub fn new(a: Complex64, b: Complex64, c: Complex64, d: Complex64) -> Self {
        Self { a, b, c, d }
    }

    /// Identity matrix (no-op element).
    pub fn identity() -> Self {
        Self {
            a: Complex64::new(1.0, 0.0),
            b: Complex64::new(0.0, 0.0),
            c: Complex64::new(0.0, 0.0),
            d: Complex64::new(1.0, 0.0),
        }
    }

    /// Chain (multiply) this matrix with another: self · other.
    pub fn cascade(&self, other: &ChainMatrix) -> ChainMatrix {
        ChainMatrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
        }
    }

    /// Shunt admittance stage folding a side branch of input impedance `zin`
    /// into the cascade.
    pub fn shunt(zin: Complex64) -> ChainMatrix {
        ChainMatrix {
            a: Complex64::new(1.0, 0.0),
            b: Complex64::new(0.0, 0.0),
            c: -1.0 / zin,
            d: Complex64::new(1.0, 0.0),
        }
    }

    /// Parallel combination of two duct spans sharing both end nodes (the
    /// anabranch fold).
    pub fn parallel(&self, o: &ChainMatrix) -> ChainMatrix {
        let bsum = self.b + o.b;
        ChainMatrix {
            a: (self.a * o.b + o.a * self.b) / bsum,
            b: self.b * o.b / bsum,
            c: self.c + o.c - (self.a - o.a) * (self.d - o.d) / bsum,
            d: (self.d * o.b + o.d * self.b) / bsum,
        }
    }

    /// Chain matrix of one uniform tube at angular frequency `omega`.
    pub fn tube(area: f64, length: f64, omega: f64, consts: &SimConstants, model: ChainModel) -> Self {
        let zo = area / (consts.rho * consts.c);
        let j = Complex64::new(0.0, 1.0);
        let jw = j * omega;

        match model {
            ChainModel::Cmp => {
                // Sondhi's complex propagation constant with viscous/thermal
                // correction.
                let (argh, gam) = if consts.loss {
                    let alp = (jw * consts.sondhi_c1).sqrt();
                    let bet = jw * consts.sondhi_wo2 / ((jw + consts.sondhi_a) * jw + consts.sondhi_b)
                        + alp;
                    let gam = ((alp + jw) / (bet + jw)).sqrt();
                    let sig = gam * (bet + jw);
                    (sig * length / consts.c, gam)
                } else {
                    (jw * length / consts.c, Complex64::new(1.0, 0.0))
                };
                let (sh, ch) = sinh_cosh(argh);
                ChainMatrix {
                    a: ch,
                    b: -gam * sh / zo,
                    c: -zo * sh / gam,
                    d: ch,
                }
            }
            ChainModel::Tmm => {
                let gam = if consts.loss {
                    let s = 2.0 * (area * PI).sqrt();
                    let r = s * (consts.rho * consts.mu * omega).sqrt()
                        / (2.0 * 2.0_f64.sqrt() * area * area);
                    let g = (consts.adiabatic - 1.0) * s / (consts.rho * consts.c * consts.c)
                        * (consts.heat_conduction * omega / (2.0 * consts.specific_heat * consts.rho))
                            .sqrt();
                    let l = consts.rho / area;
                    let celem = zo / consts.c;
                    let inv_zw = if consts.wall_yield {
                        let (wr, wm, wk) = consts.wall_source.wall_params();
                        1.0 / ((wr + j * omega * wm + wk / (j * omega)) / (s * s))
                    } else {
                        Complex64::new(0.0, 0.0)
                    };
                    ((Complex64::new(r, 0.0) + jw * l)
                        * (Complex64::new(g, 0.0) + jw * celem + inv_zw))
                        .sqrt()
                } else {
                    jw / consts.c
                };
                let (sh, ch) = sinh_cosh(gam * length);
                ChainMatrix {
                    a: ch,
                    b: -sh / zo,
                    c: -zo * sh,
                    d: ch,
                }
            }
        }
    }
}

fn sinh_cosh(z: Complex64) -> (Complex64, Complex64) {
    (z.sinh(), z.cosh())
}

/// Lip radiation impedance of a circular piston in an infinite baffle,
/// low-frequency form: `Zrad = ρω²/(2πc) + j·8ρω/(3π^1.5·√A)`.
pub fn radiation_impedance(omega: f64, area: f64, consts: &SimConstants) -> Complex64 {
    let grad = consts.rho * omega * omega / (2.0 * PI * consts.c);
    let lrad = 8.0 * consts.rho * omega / (3.0 * PI.powf(1.5) * area.sqrt());
    Complex64::new(grad, lrad)
}

/// Fixed glottal termination impedance used by the constriction-split
/// transfer function (3 cm effective glottis length, 0.4 cm² rest area).
pub fn glottal_impedance(freq: f64, consts: &SimConstants) -> Complex64 {
    let lg: f64 = 0.03;
    let ag0: f64 = 0.4e-4;
    let re = 12.0 * consts.mu * lg.powi(3) / ag0.powi(3)
        + 0.875 * consts.rho / (2.0 * ag0 * ag0);
    let im = freq * 2.0 * PI * consts.rho * lg / ag0;
    Complex64::new(re, im)
}

/// Cascade the tubes `range` of an area function, lips-first (highest index
/// first), continuing from `seed` when given.
pub fn cascade_tubes(
    af: &AreaFunction,
    range: std::ops::Range<usize>,
    freq: &[f64],
    consts: &SimConstants,
    model: ChainModel,
    seed: Option<&[ChainMatrix]>,
) -> Vec<ChainMatrix> {
    let mut out: Vec<ChainMatrix> = match seed {
        Some(s) => s.to_vec(),
        None => vec![ChainMatrix::identity(); freq.len()],
    };
    for k in range.rev() {
        let (a, l) = (af.area[k], af.length[k]);
        for (i, &f) in freq.iter().enumerate() {
            let omega = 2.0 * PI * f.max(1e-11);
            let tn = ChainMatrix::tube(a, l, omega, consts, model);
            out[i] = out[i].cascade(&tn);
        }
    }
    out
}

/// Input impedance of a duct loaded with `z_load` at its far (lips) end:
/// `Zin = (D·Zl − B)/(−C·Zl + A)`.
pub fn input_impedance(chain: &[ChainMatrix], z_load: &[Complex64]) -> Vec<Complex64> {
    chain
        .iter()
        .zip(z_load)
        .map(|(t, &zl)| (t.d * zl - t.b) / (-t.c * zl + t.a))
        .collect()
}

/// Complex transfer function of a duct over a frequency vector.
#[derive(Debug, Clone)]
pub struct TransferFunction {
    /// Frequency bins (Hz).
    pub freq: Vec<f64>,
    /// Complex flow transfer `U_lips/U_glottis` at each bin.
    pub h: Vec<Complex64>,
}

/// Transfer function of a single unbranched duct terminated by the lip
/// radiation impedance.
pub fn duct_transfer_function(
    af: &AreaFunction,
    freq: &[f64],
    consts: &SimConstants,
    model: ChainModel,
) -> TransferFunction {
    let chain = cascade_tubes(af, 0..af.n_tubes(), freq, consts, model, None);
    let a_last = af.area[af.n_tubes() - 1];
    let h = chain
        .iter()
        .zip(freq)
        .map(|(t, &f)| {
            let omega = 2.0 * PI * f.max(1e-11);
            let zrad = radiation_impedance(omega, a_last, consts);
            1.0 / (-t.c * zrad + t.a)
        })
        .collect();
    TransferFunction {
        freq: freq.to_vec(),
        h,
    }
}

/// Pressure/flow profile of a duct at one frequency, back-propagated from a
/// unit lip pressure through each tube. Returns `(p, u)` at every junction,
/// lips end last. Used by the sensitivity-function machinery of the
/// articulatory inversion.
pub fn junction_profile(
    af: &AreaFunction,
    freq_hz: f64,
    consts: &SimConstants,
    model: ChainModel,
) -> (Vec<Complex64>, Vec<Complex64>) {
    let n = af.n_tubes();
    let omega = 2.0 * PI * freq_hz.max(1e-11);
    let zrad = radiation_impedance(omega, af.area[n - 1], consts);

    let mut p = vec![Complex64::new(0.0, 0.0); n + 1];
    let mut u = vec![Complex64::new(0.0, 0.0); n + 1];
    p[n] = Complex64::new(1.0, 0.0);
    u[n] = p[n] / zrad;
    for k in (0..n).rev() {
        let t = ChainMatrix::tube(af.area[k], af.length[k], omega, consts, model);
        p[k] = t.a * p[k + 1] + t.b * u[k + 1];
        u[k] = t.c * p[k + 1] + t.d * u[k + 1];
    }
    (p, u)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_cascade() {
        let id = ChainMatrix::identity();
        let m = ChainMatrix::new(
            Complex64::new(1.0, 0.5),
            Complex64::new(0.0, 1.0),
            Complex64::new(0.0, -1.0),
            Complex64::new(1.0, 0.5),
        );
        let r = id.cascade(&m);
        assert!((r.a - m.a).norm() < 1e-12);
        assert!((r.b - m.b).norm() < 1e-12);
        assert!((r.c - m.c).norm() < 1e-12);
        assert!((r.d - m.d).norm() < 1e-12);
    }

    #[test]
    fn test_lossless_tube_determinant_unity() {
        // A lossless tube matrix is reciprocal: det = cosh² − sinh² = 1.
        let mut consts = SimConstants::default();
        consts.loss = false;
        let t = ChainMatrix::tube(3e-4, 0.05, 2.0 * PI * 700.0, &consts, ChainModel::Tmm);
        let det = t.a * t.d - t.b * t.c;
        assert!((det - Complex64::new(1.0, 0.0)).norm() < 1e-10, "det = {det}");
    }

    #[test]
    fn test_uniform_tube_quarter_wave_peak() {
        // Closed-open uniform tube: |H| peaks near c/4L.
        let mut consts = SimConstants::default();
        consts.loss = false;
        consts.wall_yield = false;
        let af = AreaFunction::uniform(vec![3e-4; 20], 0.17).unwrap();
        let freq: Vec<f64> = (0..=500).map(|k| k as f64 * 10.0).collect();
        let tf = duct_transfer_function(&af, &freq, &consts, ChainModel::Tmm);

        let f1_expected = consts.c / (4.0 * 0.17);
        let peak_bin = tf
            .h
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        let f_peak = freq[peak_bin];
        // The radiation reactance lowers the peak slightly (end correction).
        assert!(
            (f_peak - f1_expected).abs() / f1_expected < 0.08,
            "first peak at {f_peak} Hz, expected ~{f1_expected} Hz"
        );
    }

    #[test]
    fn test_transfer_function_finite_at_dc() {
        let consts = SimConstants::default();
        let af = AreaFunction::uniform(vec![3e-4; 10], 0.17).unwrap();
        let freq = vec![0.0, 10.0, 50.0];
        let tf = duct_transfer_function(&af, &freq, &consts, ChainModel::Tmm);
        for (f, h) in tf.freq.iter().zip(&tf.h) {
            assert!(h.norm().is_finite(), "H must stay finite at {f} Hz");
        }
        // At very low frequency the tube passes flow essentially unchanged.
        assert!((tf.h[0].norm() - 1.0).abs() < 0.1, "|H(0)| = {}", tf.h[0].norm());
    }

    #[test]
    fn test_two_tube_scenario() {
        // Concrete end-to-end scenario: [2e-4, 1e-4] m², [0.08, 0.02] m,
        // 0..5000 Hz in 50 Hz steps.
        let consts = SimConstants::default();
        let af = AreaFunction::new(vec![2e-4, 1e-4], vec![0.08, 0.02]).unwrap();
        let freq: Vec<f64> = (0..=100).map(|k| k as f64 * 50.0).collect();
        let tf = duct_transfer_function(&af, &freq, &consts, ChainModel::Tmm);

        assert_eq!(tf.h.len(), freq.len());
        for h in &tf.h {
            assert!(h.norm().is_finite());
        }
        // A local maximum must exist near the first resonance of the
        // back-cavity-dominated system (~ c/4L with L = 0.1 m → ~866 Hz).
        let lo = (600.0 / 50.0) as usize;
        let hi = (1200.0 / 50.0) as usize;
        let peak_in_band = (lo..=hi)
            .map(|i| tf.h[i].norm())
            .fold(f64::NEG_INFINITY, f64::max);
        let background = tf.h[2].norm();
        assert!(
            peak_in_band > background,
            "expected a resonant maximum between 600 and 1200 Hz"
        );
    }

    #[test]
    fn test_cmp_model_runs() {
        let consts = SimConstants::default();
        let af = AreaFunction::uniform(vec![3e-4; 10], 0.17).unwrap();
        let freq: Vec<f64> = (1..=50).map(|k| k as f64 * 100.0).collect();
        let tf = duct_transfer_function(&af, &freq, &consts, ChainModel::Cmp);
        for h in &tf.h {
            assert!(h.norm().is_finite());
            assert!(h.norm() > 0.0);
        }
    }

    #[test]
    fn test_shunt_fold_reduces_transfer() {
        // Folding a finite side-branch admittance must change the cascade.
        let consts = SimConstants::default();
        let af = AreaFunction::uniform(vec![3e-4; 10], 0.17).unwrap();
        let freq = vec![500.0];
        let plain = cascade_tubes(&af, 0..10, &freq, &consts, ChainModel::Tmm, None);

        let branch = AreaFunction::uniform(vec![1e-4; 6], 0.06).unwrap();
        let bchain = cascade_tubes(&branch, 0..6, &freq, &consts, ChainModel::Tmm, None);
        let zl = vec![radiation_impedance(2.0 * PI * 500.0, 1e-4, &consts)];
        let zin = input_impedance(&bchain, &zl);

        let upper = cascade_tubes(&af, 5..10, &freq, &consts, ChainModel::Tmm, None);
        let folded = upper[0].cascade(&ChainMatrix::shunt(zin[0]));
        let full = cascade_tubes(&af, 0..5, &freq, &consts, ChainModel::Tmm, Some(&[folded]));

        assert!(
            (full[0].a - plain[0].a).norm() > 1e-9,
            "shunt branch must perturb the cascade"
        );
    }
}
