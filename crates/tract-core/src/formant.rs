//! Formant extraction: inverse-FFT impulse response plus ESPRIT subspace pole
//! estimation.

use crate::chain::TransferFunction;
use crate::constants::FORMANT_FLOOR_HZ;
use nalgebra::DMatrix;
use num_complex::Complex64;
use realfft::RealFftPlanner;

/// Convert a one-sided transfer function (uniform frequency grid, DC bin
/// first) into a real impulse response of length `2·(bins − 1)` by symmetric
/// inverse FFT.
pub fn impulse_response(h: &[Complex64]) -> Vec<f64> {
    let bins = h.len();
    let nfft = 2 * (bins - 1);

    let mut planner = RealFftPlanner::<f64>::new();
    let ifft = planner.plan_fft_inverse(nfft);

    let mut spectrum: Vec<_> = h
        .iter()
        .map(|&c| realfft::num_complex::Complex { re: c.re, im: c.im })
        .collect();

    // realfft requires DC and Nyquist bins to be purely real.
    spectrum[0].im = 0.0;
    let last = spectrum.len() - 1;
    spectrum[last].im = 0.0;

    let mut output = vec![0.0f64; nfft];
    if ifft.process(&mut spectrum, &mut output).is_err() {
        return output;
    }

    // Normalize by nfft (realfft convention).
    let norm = 1.0 / nfft as f64;
    for s in &mut output {
        *s *= norm;
    }
    output
}

/// Estimate the frequencies of the damped sinusoids composing `x` (ESPRIT).
///
/// Builds a block-Hankel correlation matrix from the signal tail past its
/// maximum, takes the dominant `k`-dimensional signal subspace by SVD, solves
/// the shift-invariance eigenproblem, and converts eigenvalue phase to
/// frequency. Returns the positive frequencies above the exclusion floor,
/// ascending. Overdamped pole estimates (|z| < 0.5) are discarded as
/// numerical artifacts.
pub fn esprit(x: &[f64], sr: f64, k: usize) -> Vec<f64> {
    let idx = x
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let x = &x[idx..];
    let n = x.len();
    if n < 8 {
        return Vec::new();
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    let x: Vec<f64> = x.iter().map(|&v| v - mean).collect();

    let m = 100.min(n / 2);
    let nl = n - m + 1;
    let nt = (nl / m).max(1);

    let mut r = DMatrix::<f64>::zeros(m, m);
    for chunk in 0..nt {
        let deb = chunk * m;
        let fin = deb + 2 * m - 1;
        if fin > n {
            break;
        }
        let xt = &x[deb..fin];
        // Hankel block: H[i][j] = xt[i + j].
        let h = DMatrix::from_fn(m, m, |i, j| xt[i + j]);
        r += &h * h.transpose();
    }

    let svd = r.svd(true, false);
    let u = match svd.u {
        Some(u) => u,
        None => return Vec::new(),
    };
    let k = k.min(m - 1);
    let up = u.view((1, 0), (m - 1, k)).into_owned();
    let um = u.view((0, 0), (m - 1, k)).into_owned();
    let um_pinv = match um.pseudo_inverse(1e-12) {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };
    let phi = um_pinv * up;

    let eig = phi.schur().complex_eigenvalues();
    let mut freqs: Vec<f64> = eig
        .iter()
        .filter(|z| z.norm() >= 0.5)
        .map(|z| z.arg() / (2.0 * std::f64::consts::PI) * sr)
        .filter(|&f| f > FORMANT_FLOOR_HZ)
        .collect();
    freqs.sort_by(f64::total_cmp);
    freqs
}

/// Lowest `n_formants` resonance frequencies of a transfer function sampled
/// on a uniform frequency grid.
pub fn compute_formants(tf: &TransferFunction, n_formants: usize) -> Vec<f64> {
    if tf.freq.len() < 2 {
        return Vec::new();
    }
    let df = tf.freq[1] - tf.freq[0];
    let ir = impulse_response(&tf.h);
    let sr = ir.len() as f64 * df;
    let mut f = esprit(&ir, sr, 12.max(2 * n_formants));
    f.truncate(n_formants);
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::duct_transfer_function;
    use crate::{AreaFunction, ChainModel, SimConstants};

    #[test]
    fn test_impulse_response_of_unity_spectrum() {
        let bins = 129;
        let h = vec![Complex64::new(1.0, 0.0); bins];
        let ir = impulse_response(&h);
        assert_eq!(ir.len(), 256);
        let max = ir.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(ir[0], max, "unity spectrum should yield a leading delta");
    }

    #[test]
    fn test_esprit_recovers_two_tones() {
        // Two lightly damped sinusoids at 440 and 1230 Hz.
        let sr = 10_000.0;
        let n = 512;
        let x: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / sr;
                (-t * 30.0).exp() * (2.0 * std::f64::consts::PI * 440.0 * t).cos()
                    + 0.6 * (-t * 40.0).exp() * (2.0 * std::f64::consts::PI * 1230.0 * t).cos()
            })
            .collect();
        let f = esprit(&x, sr, 4);
        assert!(f.len() >= 2, "expected two tones, got {f:?}");
        assert!((f[0] - 440.0).abs() < 15.0, "f0 = {}", f[0]);
        assert!((f[1] - 1230.0).abs() < 15.0, "f1 = {}", f[1]);
    }

    #[test]
    fn test_uniform_tube_odd_quarter_wave_series() {
        // Closed at the glottis, open at the lips: f_n ≈ (2n−1)·c/(4L).
        let mut consts = SimConstants::default();
        consts.wall_yield = false;
        consts.loss = false;
        let total_length = 0.17;
        let af = AreaFunction::uniform(vec![3e-4; 34], total_length).unwrap();
        let freq: Vec<f64> = (0..=200).map(|kk| kk as f64 * 25.0).collect();
        let tf = duct_transfer_function(&af, &freq, &consts, ChainModel::Tmm);
        let formants = compute_formants(&tf, 3);
        assert_eq!(formants.len(), 3, "got {formants:?}");
        for (i, f) in formants.iter().enumerate() {
            let expected = (2 * i + 1) as f64 * consts.c / (4.0 * total_length);
            assert!(
                (f - expected).abs() / expected < 0.06,
                "formant {i}: {f} Hz vs expected {expected} Hz"
            );
        }
    }

    #[test]
    fn test_formants_sorted_and_above_floor() {
        let consts = SimConstants::default();
        let af = AreaFunction::new(vec![2e-4, 1e-4], vec![0.08, 0.02]).unwrap();
        let freq: Vec<f64> = (0..=100).map(|kk| kk as f64 * 50.0).collect();
        let tf = duct_transfer_function(&af, &freq, &consts, ChainModel::Tmm);
        let formants = compute_formants(&tf, 4);
        for w in formants.windows(2) {
            assert!(w[0] <= w[1], "formants must be ascending: {formants:?}");
        }
        for f in &formants {
            assert!(*f > FORMANT_FLOOR_HZ);
        }
    }
}
