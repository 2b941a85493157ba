//! Two-mass mechanical oscillator: vocal folds (glottis) or a supraglottal
//! constriction (tongue). Two mass-spring-damper units per side, two
//! independent mechanical chains (the opposing folds), coupled to the
//! waveguide network through the instantaneous pressures and flow.

use crate::constants::{area_to_height, POWTR_A, POWTR_B};
use crate::plate::{pressure_forces, FoldForces, PlateChannel};
use crate::{FoldModel, SimConstants};

/// Oscillator role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillatorKind {
    /// Vocal folds at the glottal end of the oral tract.
    Glottis,
    /// Supraglottal constriction oscillator embedded in a host segment.
    Tongue {
        /// Host segment index in the network arena.
        segment: usize,
        /// Tube index of the constriction within the host segment.
        position: usize,
    },
}

/// Per-sample record of the oscillator state, appended by the network.
#[derive(Debug, Clone, Copy)]
pub struct OscillatorSample {
    pub mass_position: [[f64; 2]; 2],
    /// `[h0, h1, h2, h3, separation]` opening heights (m).
    pub heights: [f64; 5],
    pub mass: [f64; 2],
    pub stiffness: [f64; 2],
    pub damping: [f64; 2],
    pub coupling_stiffness: f64,
    pub dc_flow: f64,
}

/// Two-mass oscillator state.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub kind: OscillatorKind,
    pub model: FoldModel,

    // Geometry.
    /// Fold (or constriction) length along the duct width (m).
    pub length: f64,
    /// Nominal fold length before abduction scaling.
    pub rest_length: f64,
    /// Mass plate thicknesses along the flow axis (m).
    pub width: [f64; 2],
    /// Abscissae of the inlet, the two masses, and the outlet.
    pub x_position: [f64; 4],
    /// Rest displacement per mass per chain; the rest opening of mass i is
    /// the sum over chains.
    pub rest_position: [[f64; 2]; 2],
    /// Largest meaningful opening area (m²), used to normalize abduction.
    pub max_opening: f64,
    /// Contact threshold on the opening height (m).
    pub contact_height: f64,

    // Nominal mechanical parameters.
    pub mass_nominal: [f64; 2],
    pub stiffness_nominal: [f64; 2],
    pub coupling_nominal: f64,
    pub zeta_open: [f64; 2],
    /// Natural frequency of mass 1 at nominal parameters (Hz).
    pub natural_f0: f64,

    // Instantaneous mechanical state: [mass][chain].
    pub mass_position: [[f64; 2]; 2],
    pub mass_position_nm1: [[f64; 2]; 2],
    pub mass_position_nm2: [[f64; 2]; 2],
    pub mass: [f64; 2],
    /// Effective stiffness, contact-scaled while a mass is in collision.
    pub stiffness: [f64; 2],
    /// Open-branch (pitch-scaled, uncollided) stiffness.
    stiffness_open: [f64; 2],
    pub damping: [f64; 2],
    pub coupling_stiffness: f64,
    pub is_contact: bool,
    pub contact_mask: [bool; 2],

    // Coupling state with the adjacent waveguide.
    pub inst_flow: f64,
    pub prev_flow: f64,
    pub upstream_pressure: f64,
    pub downstream_pressure: f64,
    /// Static abduction offset added to every opening height (m).
    pub abduction_offset: f64,
    pub heights: [f64; 4],
    pub separation_height: f64,
    pub separation_x: f64,
    /// Effective flow area `length · separation height` (m²).
    pub area: f64,
    pub resistance: f64,
    pub inductance: f64,
    pub bernoulli: f64,
    /// Low-pass-filtered DC flow component (glottis only).
    pub dc_flow: f64,
    forces: FoldForces,

    // Per-frame control trajectories.
    pub fundamental_frequency: Vec<f64>,
    pub partial_abduction: Vec<f64>,
    pub low_frequency_abduction: Vec<f64>,
    /// Vibrating length per frame after abduction scaling.
    pub output_length: Vec<f64>,
}

impl Oscillator {
    /// A glottis with Ishizaka–Flanagan mechanical constants.
    pub fn glottis(model: FoldModel) -> Self {
        let lg = 1.4e-2;
        let rest_h = 1.8e-4; // per mass, both chains combined
        Self {
            kind: OscillatorKind::Glottis,
            model,
            length: lg,
            rest_length: lg,
            width: [2.5e-3, 0.5e-3],
            x_position: [0.0, 2.5e-3, 3.0e-3, 3.2e-3],
            rest_position: [[0.5 * rest_h; 2]; 2],
            max_opening: 2.5e-5,
            contact_height: 1.0e-5,
            mass_nominal: [0.125e-3, 0.025e-3],
            stiffness_nominal: [80.0, 8.0],
            coupling_nominal: 25.0,
            zeta_open: [0.1, 0.6],
            natural_f0: (80.0f64 / 0.125e-3).sqrt() / (2.0 * std::f64::consts::PI),
            mass_position: [[0.5 * rest_h; 2]; 2],
            mass_position_nm1: [[0.5 * rest_h; 2]; 2],
            mass_position_nm2: [[0.5 * rest_h; 2]; 2],
            mass: [0.125e-3, 0.025e-3],
            stiffness: [80.0, 8.0],
            stiffness_open: [80.0, 8.0],
            damping: [0.0, 0.0],
            coupling_stiffness: 25.0,
            is_contact: false,
            contact_mask: [false; 2],
            inst_flow: 0.0,
            prev_flow: 0.0,
            upstream_pressure: 0.0,
            downstream_pressure: 0.0,
            abduction_offset: 0.0,
            heights: [0.0; 4],
            separation_height: 0.0,
            separation_x: 0.0,
            area: 0.0,
            resistance: 0.0,
            inductance: 0.0,
            bernoulli: 0.0,
            dc_flow: 0.0,
            forces: FoldForces::default(),
            fundamental_frequency: Vec::new(),
            partial_abduction: Vec::new(),
            low_frequency_abduction: Vec::new(),
            output_length: Vec::new(),
        }
    }

    /// A supraglottal (tongue) oscillator hosted by `segment` at `position`.
    pub fn tongue(model: FoldModel, segment: usize, position: usize) -> Self {
        let mut o = Self::glottis(model);
        o.kind = OscillatorKind::Tongue { segment, position };
        o.mass_nominal = [1.0e-3, 0.2e-3];
        o.stiffness_nominal = [120.0, 12.0];
        o.mass = o.mass_nominal;
        o.stiffness = o.stiffness_nominal;
        o.stiffness_open = o.stiffness_nominal;
        o.natural_f0 = (120.0f64 / 1.0e-3).sqrt() / (2.0 * std::f64::consts::PI);
        o
    }

    /// Reset the mechanical state to rest before a synthesis run.
    pub fn reset(&mut self) {
        self.mass_position = self.rest_position;
        self.mass_position_nm1 = self.rest_position;
        self.mass_position_nm2 = self.rest_position;
        self.inst_flow = 0.0;
        self.prev_flow = 0.0;
        self.dc_flow = 0.0;
        self.is_contact = false;
        self.contact_mask = [false; 2];
    }

    /// Opening height of mass `i`: the two chains plus the static abduction
    /// offset.
    pub fn opening(&self, i: usize) -> f64 {
        self.mass_position[i][0] + self.mass_position[i][1] + self.abduction_offset
    }

    /// Update the coupling impedances for the current sample.
    ///
    /// `chink_area` augments the effective flow area of a glottis with a
    /// parallel posterior opening; `input_area` is the area of the first
    /// downstream tube; `constriction_area`/`constriction_length` describe
    /// the main supraglottal constriction (used by the DC-flow estimate).
    pub fn update_impedance(
        &mut self,
        consts: &SimConstants,
        chink_area: f64,
        input_area: f64,
        constriction_area: f64,
        constriction_length: f64,
    ) {
        let h1 = self.opening(0);
        let h2 = self.opening(1);
        let h0 = self.heights[0].max(1e-6);
        let h3 = area_to_height(input_area, POWTR_A, POWTR_B).max(1e-6);
        self.heights = [h0, h1, h2, h3];

        // Separation point: the smooth plate model detaches where the channel
        // has widened past `separation_factor · h1`; the Ishizaka–Flanagan
        // empirical model detaches at the narrower mass edge.
        let (xs, hs) = match self.model {
            FoldModel::Smooth => {
                if h1 > 0.0 && h2 > consts.separation_factor * h1 {
                    let a = (h2 - h1) / (self.x_position[2] - self.x_position[1]);
                    let hs = consts.separation_factor * h1;
                    (self.x_position[1] + (hs - h1) / a, hs)
                } else {
                    (self.x_position[2], h2)
                }
            }
            FoldModel::IshizakaFlanagan => {
                if h2 <= h1 {
                    (self.x_position[2], h2)
                } else {
                    (self.x_position[1], h1)
                }
            }
        };
        self.separation_x = xs;
        self.separation_height = hs;

        self.area = (self.length * hs).max(0.0);
        let ag = (self.area + chink_area).max(1e-10);

        // Per-mass viscous and inertial terms over the open channel.
        let mut r = 0.0;
        let mut l = 0.0;
        for (i, &h) in [h1, h2].iter().enumerate() {
            let hh = h.max(1e-5);
            let a_i = self.length * hh;
            r += 12.0 * consts.mu * self.width[i] * self.length * self.length / (a_i * a_i * a_i);
            l += consts.rho * self.width[i] / a_i;
        }
        self.resistance = r;
        self.inductance = l;
        self.bernoulli = 0.875 * consts.rho / (2.0 * ag * ag);

        if matches!(self.kind, OscillatorKind::Glottis) {
            // Closed-form Bernoulli DC flow through glottis + constriction,
            // low-pass filtered at 500 Hz.
            let ac = constriction_area.max(consts.amin);
            let ag2 = 1.0 / (ag * ag);
            let ac2 = 1.0 / (ac * ac);
            let w = self.width[0] + self.width[1];
            let rv = (12.0 * self.length * w * ag2 * ag2.sqrt()
                + 8.0 * std::f64::consts::PI * constriction_length * ac2)
                * consts.mu;
            let rk = 1.38 * consts.rho * (ac2 + ag2);
            let ps = self.upstream_pressure.max(0.0);
            let udc_raw = (-rv + (rv * rv + 4.0 * rk * ps).sqrt()) / (2.0 * rk);
            let udc_raw = if udc_raw.is_finite() { udc_raw } else { 0.0 };
            let alpha = 1.0 - (-2.0 * std::f64::consts::PI * 500.0 * consts.period()).exp();
            self.dc_flow += alpha * (udc_raw - self.dc_flow);
        }
    }

    /// Rescale mass/stiffness toward the target fundamental frequency and
    /// abduction, then apply the contact check per mass.
    pub fn update_param(&mut self, consts: &SimConstants, f0_target: f64, partial_abduction: f64) {
        let _ = consts;
        let f0 = if f0_target.is_finite() && f0_target > 1.0 {
            f0_target
        } else {
            tracing::warn!(f0_target, "unrealistic fundamental frequency clamped to 1 Hz");
            1.0
        };
        let q = f0 / self.natural_f0;
        let ab = partial_abduction.clamp(0.1, 1.0);

        for i in 0..2 {
            self.mass[i] = self.mass_nominal[i] * ab / q;
            self.stiffness_open[i] = self.stiffness_nominal[i] * q * ab;
            self.stiffness[i] = self.stiffness_open[i];

            let h = self.opening(i);
            self.contact_mask[i] = h <= self.contact_height;
            let zeta = if self.contact_mask[i] {
                // Collision: stiffened spring and heavy damping until the
                // mass clears the contact threshold again.
                self.stiffness[i] *= 4.0;
                self.zeta_open[i] + 1.0
            } else {
                self.zeta_open[i]
            };
            self.damping[i] = 2.0 * zeta * (self.mass[i] * self.stiffness[i]).sqrt();
        }
        self.coupling_stiffness = self.coupling_nominal * q * ab;
        self.is_contact = self.contact_mask[0] || self.contact_mask[1];
    }

    /// Smooth-model force computation from the plate pressure integrals.
    pub fn applied_force(&mut self, consts: &SimConstants) {
        let ch = PlateChannel {
            x: self.x_position,
            h0: self.heights[0],
            h1: self.heights[1],
            h2: self.heights[2],
            xs: self.separation_x,
            hs: self.separation_height,
        };
        let dug_dt = (self.inst_flow - self.prev_flow) * consts.fs;
        self.forces = pressure_forces(
            self.inst_flow,
            self.length,
            dug_dt,
            self.upstream_pressure,
            self.downstream_pressure,
            &ch,
            consts,
        );
    }

    /// Smooth-model mass update: implicit-stiffness finite difference with
    /// the cross-coupling spring eliminated algebraically.
    pub fn update_mass_position(&mut self, consts: &SimConstants) {
        let f = self.forces.net();
        let forces = [[0.5 * f[0]; 2], [0.5 * f[1]; 2]];
        let next = self.solve_masses(consts, &forces, self.contact_mask);
        self.advance(next);
    }

    /// Ishizaka–Flanagan mass update: evaluate the four open/closed branch
    /// combinations in closed form and keep the first physically consistent
    /// one (checked in the order open/open, open/closed, closed/open,
    /// closed/closed).
    pub fn update_mass_ishiflan(&mut self, consts: &SimConstants) {
        let ps = self.upstream_pressure;
        let psup = self.downstream_pressure;
        let combos = [
            [false, false],
            [false, true],
            [true, false],
            [true, true],
        ];
        let mut chosen = None;
        for combo in combos {
            let forces = self.ishi_forces(consts, combo, ps, psup);
            let next = self.solve_masses(consts, &forces, combo);
            if self.consistent(&next, combo) {
                chosen = Some(next);
                break;
            }
        }
        let next = chosen.unwrap_or_else(|| {
            let forces = self.ishi_forces(consts, [true, true], ps, psup);
            self.solve_masses(consts, &forces, [true, true])
        });
        self.advance(next);
    }

    /// Driving force per mass per chain for an assumed open/closed state.
    fn ishi_forces(
        &self,
        consts: &SimConstants,
        closed: [bool; 2],
        ps: f64,
        psup: f64,
    ) -> [[f64; 2]; 2] {
        let lg = self.length;
        let h1 = self.opening(0).max(0.0);

        // Mass 1 face: full subglottal pressure when either mass seals the
        // channel, Bernoulli-reduced channel pressure otherwise.
        let p1 = if closed[0] {
            if closed[1] {
                ps
            } else {
                psup
            }
        } else if closed[1] {
            ps
        } else {
            let a1 = (lg * h1).max(1e-10);
            ps - 1.37 * consts.rho / 2.0 * (self.inst_flow / a1).powi(2)
        };
        // Mass 2 sits in the separated jet: supraglottal pressure.
        let p2 = psup;

        let f1 = p1 * lg * self.width[0];
        let f2 = p2 * lg * self.width[1];
        [[0.5 * f1; 2], [0.5 * f2; 2]]
    }

    /// One finite-difference step for both masses and chains with the
    /// contact-scaled parameters of `closed`, solving the 2×2 coupled system
    /// per chain by direct elimination.
    fn solve_masses(
        &self,
        consts: &SimConstants,
        forces: &[[f64; 2]; 2],
        closed: [bool; 2],
    ) -> [[f64; 2]; 2] {
        let t = consts.period();
        let t2 = t * t;
        let kc = self.coupling_stiffness;
        let mut next = [[0.0; 2]; 2];

        for chain in 0..2 {
            let mut a = [0.0; 2];
            let mut rhs = [0.0; 2];
            for i in 0..2 {
                let (k, zeta) = if closed[i] {
                    (self.stiffness_open[i] * 4.0, self.zeta_open[i] + 1.0)
                } else {
                    (self.stiffness_open[i], self.zeta_open[i])
                };
                let m = self.mass[i];
                let r = 2.0 * zeta * (m * k).sqrt();
                let x = self.mass_position[i][chain];
                let xm1 = self.mass_position_nm1[i][chain];
                let rest = self.rest_position[i][chain];
                a[i] = m / t2 + r / (2.0 * t) + k + kc;
                rhs[i] = forces[i][chain] + 2.0 * m / t2 * x - (m / t2 - r / (2.0 * t)) * xm1
                    + k * rest;
            }
            // [a0 −kc; −kc a1]·x = rhs, eliminated directly.
            let det = a[0] * a[1] - kc * kc;
            next[0][chain] = (rhs[0] * a[1] + kc * rhs[1]) / det;
            next[1][chain] = (rhs[1] * a[0] + kc * rhs[0]) / det;
        }
        next
    }

    fn consistent(&self, next: &[[f64; 2]; 2], closed: [bool; 2]) -> bool {
        for i in 0..2 {
            let h = next[i][0] + next[i][1] + self.abduction_offset;
            if closed[i] {
                if h > 0.0 {
                    return false;
                }
            } else if h <= 0.0 {
                return false;
            }
        }
        true
    }

    fn advance(&mut self, next: [[f64; 2]; 2]) {
        self.mass_position_nm2 = self.mass_position_nm1;
        self.mass_position_nm1 = self.mass_position;
        self.mass_position = next;
    }

    /// Snapshot for the per-sample output record.
    pub fn sample(&self) -> OscillatorSample {
        OscillatorSample {
            mass_position: self.mass_position,
            heights: [
                self.heights[0],
                self.heights[1],
                self.heights[2],
                self.heights[3],
                self.separation_height,
            ],
            mass: self.mass,
            stiffness: self.stiffness,
            damping: self.damping,
            coupling_stiffness: self.coupling_stiffness,
            dc_flow: self.dc_flow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_flag_and_scaled_coefficients() {
        let consts = SimConstants::default();
        let mut o = Oscillator::glottis(FoldModel::IshizakaFlanagan);

        // Drive mass 1 below the contact threshold.
        o.mass_position[0] = [0.0, 0.0];
        o.update_param(&consts, 120.0, 1.0);
        assert!(o.is_contact, "contact must be flagged");
        assert!(o.contact_mask[0] && !o.contact_mask[1]);

        // Contact stiffness is the open-branch value times four, and damping
        // uses ζ + 1.
        let q = 120.0 / o.natural_f0;
        let k_open = o.stiffness_nominal[0] * q;
        assert!(
            (o.stiffness[0] - 4.0 * k_open).abs() / k_open < 1e-12,
            "contact stiffness scaling"
        );
        let expected_damping =
            2.0 * (o.zeta_open[0] + 1.0) * (o.mass[0] * o.stiffness[0]).sqrt();
        assert!((o.damping[0] - expected_damping).abs() < 1e-12);

        // Recovery clears the flag.
        o.mass_position = o.rest_position;
        o.update_param(&consts, 120.0, 1.0);
        assert!(!o.is_contact, "contact must clear once the height recovers");
        assert!((o.stiffness[0] - k_open).abs() / k_open < 1e-12);
    }

    #[test]
    fn test_unrealistic_pitch_clamped() {
        let consts = SimConstants::default();
        let mut o = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        for bad in [0.0, -20.0, f64::NAN, f64::INFINITY] {
            o.update_param(&consts, bad, 1.0);
            assert!(
                o.stiffness[0].is_finite() && o.stiffness[0] > 0.0,
                "pitch {bad} must clamp to a usable value"
            );
        }
    }

    #[test]
    fn test_abduction_floor() {
        let consts = SimConstants::default();
        let mut o = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        o.update_param(&consts, 120.0, 0.0);
        let m_floor = o.mass[0];
        o.update_param(&consts, 120.0, 0.1);
        assert!(
            (o.mass[0] - m_floor).abs() < 1e-18,
            "abduction below 0.1 must behave like 0.1"
        );
    }

    #[test]
    fn test_separation_branches() {
        let mut consts = SimConstants::default();
        consts.separation_factor = 1.2;
        let mut o = Oscillator::glottis(FoldModel::Smooth);
        // Divergent: h2 well past 1.2·h1.
        o.mass_position = [[1.0e-4; 2], [2.0e-4; 2]];
        o.update_impedance(&consts, 0.0, 3e-4, 1e-4, 0.02);
        assert!(
            (o.separation_height - 1.2 * o.opening(0)).abs() < 1e-12,
            "smooth model separates at sep·h1"
        );
        assert!(o.separation_x < o.x_position[2]);

        // Convergent: separation at the exit.
        o.mass_position = [[2.0e-4; 2], [1.0e-4; 2]];
        o.update_impedance(&consts, 0.0, 3e-4, 1e-4, 0.02);
        assert!((o.separation_height - o.opening(1)).abs() < 1e-12);

        let mut o = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        o.mass_position = [[1.0e-4; 2], [2.0e-4; 2]];
        o.update_impedance(&consts, 0.0, 3e-4, 1e-4, 0.02);
        assert!(
            (o.separation_height - o.opening(0)).abs() < 1e-12,
            "ishi model separates at the narrower mass"
        );
    }

    #[test]
    fn test_dc_flow_positive_under_pressure() {
        let consts = SimConstants::default();
        let mut o = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        o.upstream_pressure = 800.0;
        for _ in 0..2000 {
            o.update_impedance(&consts, 0.0, 3e-4, 1e-4, 0.02);
        }
        assert!(o.dc_flow > 0.0, "sustained pressure must drive DC flow");
        assert!(o.dc_flow < 1e-2, "DC flow magnitude sanity: {}", o.dc_flow);
    }

    #[test]
    fn test_free_oscillation_conserves_scale() {
        // With constant forcing the masses must stay bounded (the implicit
        // stiffness step is dissipative).
        let consts = SimConstants::default();
        let mut o = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        o.update_param(&consts, 120.0, 1.0);
        o.upstream_pressure = 800.0;
        o.downstream_pressure = 0.0;
        for _ in 0..4410 {
            o.update_impedance(&consts, 0.0, 3e-4, 1e-4, 0.02);
            o.update_param(&consts, 120.0, 1.0);
            o.update_mass_ishiflan(&consts);
        }
        for i in 0..2 {
            for chain in 0..2 {
                let x = o.mass_position[i][chain];
                assert!(x.is_finite(), "mass position diverged");
                assert!(x.abs() < 5e-2, "mass excursion implausibly large: {x}");
            }
        }
    }
}
