//! Time-domain electro-acoustic simulation of the human vocal tract.
//!
//! The tract is modeled as a network of acoustic tube segments (oral tract,
//! nasal branch, glottal chink, subglottal tract, side cavities). Each sample,
//! every segment's equivalent-circuit elements are recomputed from its area
//! function, a global linear system expressing flow/pressure continuity across
//! the whole network is assembled and solved, and a two-mass vocal-fold
//! oscillator coupled through the instantaneous glottal pressures closes the
//! loop. The radiated pressure waveform is the synthesized speech signal.
//!
//! The frequency-domain side (`chain`, `formant`, `inversion`) cascades 2×2
//! ABCD chain matrices over area-function snapshots for transfer functions,
//! formant estimation, and acoustic-to-articulatory inversion.

pub mod area;
pub mod chain;
pub mod constants;
pub mod dsp;
pub mod elements;
pub mod formant;
pub mod inversion;
pub mod network;
pub mod oscillator;
pub mod plate;
pub mod waveguide;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Shared interface types
// ---------------------------------------------------------------------------

/// Vocal-fold mechanical model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldModel {
    /// Smooth-plate model: continuous channel geometry with Vilain-style
    /// pressure-force integrals.
    Smooth,
    /// Ishizaka–Flanagan two-mass model with discrete open/closed branches.
    IshizakaFlanagan,
}

/// Chain-matrix physical model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainModel {
    /// Finite lossy tube: series R–L, shunt G–C, optional wall admittance.
    Tmm,
    /// Sondhi complex propagation constant with thermal/viscous correction.
    Cmp,
}

/// Optional FIR smoothing of the glottal-flow history, applied when the main
/// constriction sits in the lip region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowFilter {
    None,
    /// Hamming-windowed sinc low-pass of the given order, 1 kHz cutoff.
    Fir1 { order: usize },
}

/// Simulation constants. One immutable value per synthesis or analysis call;
/// nothing in the library mutates it as scratch space.
#[derive(Debug, Clone)]
pub struct SimConstants {
    /// Air density (kg/m³).
    pub rho: f64,
    /// Speed of sound (m/s).
    pub c: f64,
    /// Dynamic viscosity of air (Pa·s).
    pub mu: f64,
    /// Simulation sample rate (Hz).
    pub fs: f64,
    /// Empirical wall-parameter table.
    pub wall_source: constants::WallSource,
    /// Enable flow-direction-dependent Bernoulli loss resistances.
    pub dynamic_term: bool,
    /// Enable yielding-wall shunt branches.
    pub wall_yield: bool,
    /// Enable viscous/thermal loss in the chain-matrix model.
    pub loss: bool,
    /// Enable the inertial (unsteady) term in the plate pressure forces.
    pub unsteady: bool,
    /// Vocal-fold mechanical model.
    pub fold_model: FoldModel,
    /// Area floor (m²) below which all reciprocal-of-area computations clamp.
    pub amin: f64,
    /// Critical Reynolds number for frication onset.
    pub reynolds_critical: f64,
    /// Frication noise amplitude; zero disables the noise source.
    pub noise_amplitude: f64,
    /// Flow-separation factor of the smooth plate model (separation where the
    /// channel widens past `separation_factor · h1`).
    pub separation_factor: f64,
    /// Multiplier on the glottal-chink inductance.
    pub chink_inductance_factor: f64,
    /// Glottal-flow smoothing filter.
    pub flow_filter: FlowFilter,
    /// Ratio of specific heats of air.
    pub adiabatic: f64,
    /// Heat conduction coefficient of air (W/(m·K)).
    pub heat_conduction: f64,
    /// Specific heat of air at constant pressure (J/(kg·K)).
    pub specific_heat: f64,
    /// Sondhi correction constants for the `Cmp` chain-matrix branch.
    pub sondhi_c1: f64,
    pub sondhi_wo2: f64,
    pub sondhi_a: f64,
    pub sondhi_b: f64,
}

impl Default for SimConstants {
    fn default() -> Self {
        use std::f64::consts::PI;
        Self {
            rho: 1.204,
            c: 346.3,
            mu: 1.86e-5,
            fs: 44_100.0,
            wall_source: constants::WallSource::Maeda,
            dynamic_term: true,
            wall_yield: true,
            loss: true,
            unsteady: true,
            fold_model: FoldModel::IshizakaFlanagan,
            amin: 1e-11,
            reynolds_critical: 2_700.0,
            noise_amplitude: 0.0,
            separation_factor: 1.2,
            chink_inductance_factor: 4.0,
            flow_filter: FlowFilter::None,
            adiabatic: 1.4,
            heat_conduction: 0.023,
            specific_heat: 1_006.0,
            sondhi_c1: 4.0,
            sondhi_wo2: (406.0 * PI) * (406.0 * PI),
            sondhi_a: 130.0 * PI,
            sondhi_b: (30.0 * PI) * (30.0 * PI),
        }
    }
}

impl SimConstants {
    /// Sample period `T = 1/fs` (s).
    pub fn period(&self) -> f64 {
        1.0 / self.fs
    }

    /// Fail fast on parameters that would poison every downstream formula.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("rho", self.rho),
            ("c", self.c),
            ("mu", self.mu),
            ("fs", self.fs),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(ConfigError::NonPositive { name, value: v });
            }
        }
        if !self.amin.is_finite() || self.amin <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "amin",
                value: self.amin,
            });
        }
        if self.separation_factor < 1.0 {
            return Err(ConfigError::NonPositive {
                name: "separation_factor",
                value: self.separation_factor,
            });
        }
        Ok(())
    }
}

/// Invalid simulation constants, reported before any simulation loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("simulation constant `{name}` must be finite and positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error(
        "glottal opening parameters not set for a parametric-glottis run; \
         provide input areas and abduction or add a glottis oscillator"
    )]
    MissingGlottalDrive,
}

/// Malformed network topology, reported at construction time.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("segment 0 must be the radiating main oral tract")]
    MissingOralTract,
    #[error("more than one glottal chink in the network")]
    DuplicateChink,
    #[error("more than one subglottal tract in the network")]
    DuplicateSubglottal,
    #[error("more than one glottis oscillator in the network")]
    DuplicateGlottis,
    #[error("the glottal chink must be the last segment")]
    ChinkNotLast,
    #[error("the subglottal tract must come after all plain branches")]
    SubglottalMisplaced,
    #[error("segment {segment} attaches to parent {parent} at junction {junction}, out of range 0..{max}")]
    JunctionOutOfRange {
        segment: usize,
        parent: usize,
        junction: usize,
        max: usize,
    },
    #[error("segment {segment} names parent {parent}, which does not precede it")]
    ParentOrder { segment: usize, parent: usize },
    #[error("segment {0} has an empty area function")]
    EmptySegment(usize),
    #[error("anabranch on segment {0} must re-enter its parent at a later junction")]
    AnabranchOrder(usize),
}

/// Degenerate area-function geometry.
#[derive(Debug, Error)]
pub enum AreaError {
    #[error("area function needs at least 2 tubes, got {0}")]
    TooFewTubes(usize),
    #[error("area and length differ in tube count: {area} vs {length}")]
    ShapeMismatch { area: usize, length: usize },
    #[error("frame count mismatch across animated area function: {0} vs {1}")]
    FrameMismatch(usize, usize),
}

pub use area::{AreaFunction, AreaSequence, Tube};
pub use chain::{ChainMatrix, TransferFunction};
pub use network::{SynthesisOutcome, Termination, VtNetwork};
pub use oscillator::{Oscillator, OscillatorKind};
pub use waveguide::{Attachment, SegmentRole, Waveguide};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants_validate() {
        assert!(SimConstants::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_constants_rejected() {
        let mut c = SimConstants::default();
        c.rho = 0.0;
        assert!(c.validate().is_err(), "zero density must be rejected");

        let mut c = SimConstants::default();
        c.fs = f64::NAN;
        assert!(c.validate().is_err(), "NaN sample rate must be rejected");
    }
}
