//! Small FIR design helper for the optional glottal-flow smoothing.

use std::f64::consts::PI;

/// Hamming-windowed sinc low-pass of odd length `2·half + 1`, cutoff given as
/// a fraction of the Nyquist frequency. Coefficients sum to one.
pub fn fir1_lowpass(order: usize, cutoff_ratio: f64) -> Vec<f64> {
    let half = order.max(1);
    let n = 2 * half + 1;
    let fc = 0.5 * cutoff_ratio.clamp(1e-6, 1.0);
    let mut taps = Vec::with_capacity(n);
    for i in 0..n {
        let m = i as f64 - half as f64;
        let sinc = if m == 0.0 {
            2.0 * fc
        } else {
            (2.0 * PI * fc * m).sin() / (PI * m)
        };
        let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos();
        taps.push(sinc * window);
    }
    let sum: f64 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps
}

/// Causal FIR evaluation at the newest sample of `history` (newest last).
pub fn fir_apply_latest(taps: &[f64], history: &[f64]) -> f64 {
    let mut acc = 0.0;
    for (k, &h) in taps.iter().enumerate() {
        if k < history.len() {
            acc += h * history[history.len() - 1 - k];
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fir1_unity_dc_gain() {
        let taps = fir1_lowpass(16, 1000.0 / 22_050.0);
        let sum: f64 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12, "DC gain must be 1, got {sum}");
    }

    #[test]
    fn test_fir1_symmetric() {
        let taps = fir1_lowpass(8, 0.2);
        let n = taps.len();
        for i in 0..n / 2 {
            assert!((taps[i] - taps[n - 1 - i]).abs() < 1e-12, "linear phase");
        }
    }

    #[test]
    fn test_fir_apply_passes_constant() {
        let taps = fir1_lowpass(8, 0.1);
        let history = vec![2.5; 64];
        let y = fir_apply_latest(&taps, &history);
        assert!((y - 2.5).abs() < 1e-12);
    }
}
