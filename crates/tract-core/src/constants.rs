//! Physical constants, empirical wall-loss tables, and unit helpers.

use std::f64::consts::PI;

/// Radiation conductance factor for a circular piston in an infinite baffle:
/// `Grad = 9π²·A / (128·ρ·c)`.
pub const RADIATION_CONDUCTANCE_FACTOR: f64 = 9.0 * PI * PI / 128.0;

/// Radiation inertance factor: `Lrad = 8ρ / (3·π^1.5·√A)`. The time-domain
/// integration constant `Srad` in the network solver is `3/8` of the
/// trapezoidal admittance of this inertance.
pub const RADIATION_INERTANCE_NUMERATOR: f64 = 8.0 / 3.0;

/// Exclusion floor for pole-estimation output (Hz). Resonances below this are
/// discarded as DC/drift artifacts.
pub const FORMANT_FLOOR_HZ: f64 = 50.0;

/// Per-unit-surface wall mechanical parameters `(resistance, mass, stiffness)`
/// in SI units (Pa·s/m, kg/m², N/m³).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallSource {
    /// Maeda (1982) soft-tissue values.
    Maeda,
    /// Birkholz vocal-tract wall values.
    Birkholz,
    /// Mokhtari subglottal-calibrated values.
    Mokhtari,
}

impl WallSource {
    /// Wall triple for supraglottal tract walls.
    pub fn wall_params(self) -> (f64, f64, f64) {
        match self {
            WallSource::Maeda => (16_000.0, 15.0, 3.0e6),
            WallSource::Birkholz => (8_000.0, 21.0, 8.45e6),
            WallSource::Mokhtari => (10_600.0, 14.0, 3.2e6),
        }
    }

    /// Wall triple for the subglottal tract. Bronchial walls are softer and
    /// heavier than the supraglottal mucosa, whichever table is selected.
    pub fn subglottal_wall_params(self) -> (f64, f64, f64) {
        let (r, m, k) = self.wall_params();
        (0.7 * r, 1.4 * m, 0.45 * k)
    }
}

/// Power transform between midsagittal height and cross-sectional area,
/// `area_cm² = a · height_cm ^ b` with the conventional `a = 1.8`, `b = 1.2`.
///
/// `height_to_area` takes metres and returns m²; `area_to_height` is its
/// inverse. Non-positive input maps to zero.
pub fn height_to_area(height_m: f64, a: f64, b: f64) -> f64 {
    if height_m <= 0.0 {
        return 0.0;
    }
    let h_cm = height_m * 100.0;
    a * h_cm.powf(b) * 1e-4
}

pub fn area_to_height(area_m2: f64, a: f64, b: f64) -> f64 {
    if area_m2 <= 0.0 {
        return 0.0;
    }
    let area_cm2 = area_m2 * 1e4;
    (area_cm2 / a).powf(1.0 / b) * 1e-2
}

/// Default power-transform coefficients.
pub const POWTR_A: f64 = 1.8;
pub const POWTR_B: f64 = 1.2;

/// Wall surface of a tube of area `a` and length `l`, treating the tube as a
/// circular duct: `S = 2·√(π·a)·l`.
pub fn wall_surface(area: f64, length: f64) -> f64 {
    2.0 * (PI * area).sqrt() * length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_transform_round_trip() {
        let h = 2.3e-3; // 2.3 mm
        let a = height_to_area(h, POWTR_A, POWTR_B);
        let h_back = area_to_height(a, POWTR_A, POWTR_B);
        assert!(
            (h - h_back).abs() < 1e-12,
            "power transform should round-trip: {h} vs {h_back}"
        );
    }

    #[test]
    fn test_power_transform_non_positive() {
        assert_eq!(height_to_area(-1.0, POWTR_A, POWTR_B), 0.0);
        assert_eq!(area_to_height(0.0, POWTR_A, POWTR_B), 0.0);
    }

    #[test]
    fn test_wall_tables_positive() {
        for src in [WallSource::Maeda, WallSource::Birkholz, WallSource::Mokhtari] {
            let (r, m, k) = src.wall_params();
            assert!(r > 0.0 && m > 0.0 && k > 0.0);
            let (rs, ms, ks) = src.subglottal_wall_params();
            assert!(rs < r, "subglottal walls should be softer");
            assert!(ms > m, "subglottal walls should be heavier");
            assert!(ks < k);
        }
    }
}
