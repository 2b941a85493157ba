//! CLI test harness for the synthesis pipeline.
//!
//! Builds a static /a/-like vocal tract with a self-oscillating glottis,
//! synthesizes half a second of voicing, and prints signal statistics and
//! the first formants of the shape.
//!
//! Run with:
//!   cargo run -p tract-core --example synthesize_vowel

use tract_core::chain::duct_transfer_function;
use tract_core::formant::compute_formants;
use tract_core::oscillator::Oscillator;
use tract_core::{
    AreaFunction, AreaSequence, ChainModel, FoldModel, SimConstants, VtNetwork, Waveguide,
};

fn main() {
    println!("=== Vocal-tract synthesis test ===");

    let consts = SimConstants::default();
    let duration = 0.5;
    let n = (duration * consts.fs) as usize;

    // A coarse /a/ area function: narrow pharynx, wide front cavity.
    let shape = AreaFunction::new(
        vec![
            2.6e-4, 1.9e-4, 1.2e-4, 0.9e-4, 0.7e-4, 1.1e-4, 2.3e-4, 4.0e-4, 5.2e-4, 4.6e-4,
        ],
        vec![0.017; 10],
    )
    .expect("valid shape");

    // 1. Frequency-domain check: transfer function and formants.
    let freq: Vec<f64> = (0..=200).map(|k| k as f64 * 25.0).collect();
    let tf = duct_transfer_function(&shape, &freq, &consts, ChainModel::Tmm);
    let formants = compute_formants(&tf, 3);
    println!("Formants of the static shape: {formants:.0?} Hz");

    // 2. Time-domain synthesis with the two-mass glottis.
    let oral = Waveguide::main_oral_tract(AreaSequence::constant(shape, n));
    let mut glottis = Oscillator::glottis(FoldModel::IshizakaFlanagan);
    glottis.fundamental_frequency = vec![118.0; n];
    glottis.partial_abduction = vec![0.0; n];

    let mut net = VtNetwork::new(vec![oral], vec![glottis]).expect("valid topology");
    net.subglottal_control = (0..n)
        .map(|k| 780.0 * (k as f64 / (0.01 * consts.fs)).min(1.0))
        .collect();

    println!("Synthesizing {n} samples at {} Hz...", consts.fs);
    let out = net.synthesize(&consts).expect("valid constants");

    let peak = out
        .pressure_radiated
        .iter()
        .fold(0.0f64, |m, &x| m.max(x.abs()));
    let rms = (out
        .pressure_radiated
        .iter()
        .map(|x| x * x)
        .sum::<f64>()
        / out.pressure_radiated.len() as f64)
        .sqrt();
    println!(
        "Done: {:?}, {} samples, peak {peak:.3e}, rms {rms:.3e}",
        out.termination,
        out.pressure_radiated.len()
    );

    let cycles = net.oscillator_history[0]
        .windows(2)
        .filter(|w| w[0].heights[1] <= 0.0 && w[1].heights[1] > 0.0)
        .count();
    println!("Glottal opening events: {cycles}");
}
