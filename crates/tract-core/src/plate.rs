//! Pressure forces on the two fold masses of the smooth-plate glottis model.
//!
//! The flow channel between inlet and outlet is three straight plates
//! `h(x) = slope·x + intercept` joining the openings `h0 → h1 → h2 → h3` at
//! abscissae `x0..x3`. The force on each mass face is the integral of the
//! channel pressure distribution (Bernoulli + Poiseuille + unsteady inertia)
//! over that plate, with separate closed-form branches for attached flow,
//! separated flow (past the separation point `xs`), and mass closure.

use crate::SimConstants;

/// Relative-slope threshold below which a plate counts as parallel; the slope
/// is regularized to this value so the exact primitives stay well-posed (the
/// resulting forces agree with the parallel-limit expansion to the same
/// order).
const PRES: f64 = 1e-5;

/// Channel geometry for one sample.
#[derive(Debug, Clone, Copy)]
pub struct PlateChannel {
    /// Abscissae of inlet, mass 1, mass 2, outlet.
    pub x: [f64; 4],
    /// Openings at inlet, mass 1, mass 2 (m).
    pub h0: f64,
    pub h1: f64,
    pub h2: f64,
    /// Separation point abscissa and opening.
    pub xs: f64,
    pub hs: f64,
}

/// Left/right pressure forces on the two masses.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldForces {
    /// Force on mass i from the channel left of it.
    pub left: [f64; 2],
    /// Force on mass i from the channel right of it.
    pub right: [f64; 2],
}

impl FoldForces {
    /// Net force per mass.
    pub fn net(&self) -> [f64; 2] {
        [self.left[0] + self.right[0], self.left[1] + self.right[1]]
    }
}

// Plate primitives: closed-form integrals over [xi, xip1] of 1/h², x/h²,
// ln h, x·ln h for h(x) = a·x + b.

fn wv(xi: f64, xip1: f64, a: f64, b: f64) -> f64 {
    let hi = a * xi + b;
    let hip1 = a * xip1 + b;
    (1.0 / a) * (1.0 / hi - 1.0 / hip1)
}

fn xv(xi: f64, xip1: f64, a: f64, b: f64) -> f64 {
    let hi = a * xi + b;
    let hip1 = a * xip1 + b;
    (hip1 / hi).ln() / (a * a) + (1.0 / a) * (xi - hi / a) * (1.0 / hi - 1.0 / hip1)
}

fn yv(xi: f64, xip1: f64, a: f64, b: f64) -> f64 {
    let hi = a * xi + b;
    let hip1 = a * xip1 + b;
    (1.0 / a) * (hip1 * hip1.ln() - hip1 - hi * hi.ln() + hi)
}

fn zv(xi: f64, xip1: f64, a: f64, b: f64) -> f64 {
    let hi = a * xi + b;
    let hip1 = a * xip1 + b;
    let t = ((hip1 * hip1 * hip1.ln() - hi * hi * hi.ln()) / 2.0
        - (hip1 * hip1 - hi * hi) / 4.0)
        / (a * a);
    t + (1.0 / a) * (xi - hi / a) * (hip1 * hip1.ln() - hip1 - hi * hi.ln() + hi)
}

/// Slope/intercept of a plate from its two end openings, with the parallel
/// regularization applied.
fn plate(x_a: f64, h_a: f64, x_b: f64, h_b: f64) -> (f64, f64) {
    let mut a = (h_b - h_a) / (x_b - x_a);
    let b0 = h_a - a * x_a;
    if (a * x_b / b0).abs() < PRES {
        let sign = if a >= 0.0 { 1.0 } else { -1.0 };
        a = sign * PRES * b0.abs() / x_b.max(PRES);
    }
    (a, h_a - a * x_a)
}

/// Pressure forces on the two masses for the current flow state.
///
/// `ug` is the glottal flow, `dug_dt` its time derivative, `ps`/`psupra` the
/// sub- and supraglottal pressures, `lg` the fold length.
pub fn pressure_forces(
    ug: f64,
    lg: f64,
    dug_dt: f64,
    ps: f64,
    psupra: f64,
    ch: &PlateChannel,
    consts: &SimConstants,
) -> FoldForces {
    let [x0, x1, x2, _x3] = ch.x;
    let (h0, h1, h2) = (ch.h0, ch.h1, ch.h2);
    let sep = consts.separation_factor;

    // Bernoulli, Poiseuille, and inertia prefactors.
    let tmp1 = 0.5 * consts.rho * ug * ug / (lg * lg);
    let tmp2 = -12.0 * consts.mu * ug / lg;
    let tmp3 = if consts.unsteady {
        -consts.rho * dug_dt / lg
    } else {
        0.0
    };

    let mut f = FoldForces::default();
    // Closure fallback for the inlet plate.
    f.left[0] = 0.5 * (x1 - x0) * lg * ps;
    f.right[1] = 0.5 * lg * psupra * (ch.x[3] - x2);

    if h1 > 0.0 && h2 > 0.0 {
        let (a0, b0) = plate(x0, h0, x1, h1);
        let (a1, b1) = plate(x1, h1, x2, h2);

        // Force on mass 1 from the inlet plate.
        {
            let w = wv(x0, x1, a0, b0);
            let xvv = xv(x0, x1, a0, b0);
            let yvv = yv(x0, x1, a0, b0);
            let zvv = zv(x0, x1, a0, b0);
            let d2 = (x1 - x0) * (x1 - x0);
            let bern = tmp1 * (1.0 / (h0 * h0) - 2.0 * (xvv - x0 * w) / d2);
            let pois = tmp2 / (2.0 * a0) * (1.0 / (h0 * h0) - 2.0 * (xvv - x0 * w) / d2);
            let inst = tmp3 / a0 * (2.0 * (zvv - x0 * yvv) / d2 - h0.ln());
            f.left[0] = 0.5 * (x1 - x0) * lg * (ps + bern + pois + inst);
        }

        let d2 = (x2 - x1) * (x2 - x1);
        let dh0 = 1.0 / (h0 * h0);
        let dh1 = 1.0 / (h1 * h1);

        if h2 < h1 * sep {
            // Attached flow all the way to mass 2.
            let w = wv(x1, x2, a1, b1);
            let xvv = xv(x1, x2, a1, b1);
            let yvv = yv(x1, x2, a1, b1);
            let zvv = zv(x1, x2, a1, b1);

            let bern_r = tmp1 * (dh0 + 2.0 * (xvv - x2 * w) / d2);
            let pois_r = tmp2
                * ((dh0 - dh1) / (2.0 * a0) + (dh1 + 2.0 * (xvv - x2 * w) / d2) / (2.0 * a1));
            let inst_r = tmp3
                * ((h1 / h0).ln() / a0 + (2.0 * (x2 * yvv - zvv) / d2 - h1.ln()) / a1);
            f.right[0] = 0.5 * (x2 - x1) * lg * (ps + bern_r + pois_r + inst_r);

            let bern_l = tmp1 * (dh0 - 2.0 * (xvv - x1 * w) / d2);
            let pois_l = tmp2
                * ((dh0 - dh1) / (2.0 * a0) + (dh1 - 2.0 * (xvv - x1 * w) / d2) / (2.0 * a1));
            let inst_l = tmp3
                * ((h1 / h0).ln() / a0 + (2.0 * (zvv - x1 * yvv) / d2 - h1.ln()) / a1);
            f.left[1] = 0.5 * (x2 - x1) * lg * (ps + bern_l + pois_l + inst_l);
        } else {
            // Divergent channel with separation at xs: the pressure acts up
            // to the separation point, the supraglottal pressure beyond it.
            let xs = ch.xs;
            let w = wv(x1, xs, a1, b1);
            let xvv = xv(x1, xs, a1, b1);
            let yvv = yv(x1, xs, a1, b1);
            let zvv = zv(x1, xs, a1, b1);

            let tmp_g = (xs - x1) / (x2 - x1) * (x2 - (xs + x1) / 2.0);
            let bern_r = tmp1 * (dh0 - (x2 * w - xvv) / (tmp_g * (x2 - x1)));
            let pois_r = tmp2
                * ((dh0 - dh1) / (2.0 * a0) + dh1 / (2.0 * a1)
                    - (x2 * w - xvv) / (tmp_g * (x2 - x1)));
            let inst_r = tmp3
                * ((h1 / h0).ln() / a0
                    + ((x2 * yvv - zvv) / (tmp_g * (x2 - x1)) - h1.ln()) / a1);
            f.right[0] = lg * tmp_g * (ps + bern_r + pois_r + inst_r)
                + lg * psupra * (x2 - xs) / (x2 - x1) * (x2 - (x2 + xs) / 2.0);

            let tmp_h = (xs - x1) / (x2 - x1) * ((xs + x1) / 2.0 - x1);
            let bern_l = tmp1 * (dh0 - (xvv - x1 * w) / (tmp_h * (x2 - x1)));
            let pois_l = tmp2
                * ((dh0 - dh1) / (2.0 * a0) + dh1 / (2.0 * a1)
                    - (xvv - x1 * w) / (tmp_h * (x2 - x1)));
            let inst_l = tmp3
                * ((h1 / h0).ln() / a0
                    + ((zvv - x1 * yvv) / (tmp_h * (x2 - x1)) - h1.ln()) / a1);
            f.left[1] = lg * tmp_h * (ps + bern_l + pois_l + inst_l)
                + lg * psupra * (x2 - xs) / (x2 - x1) * ((x2 + xs) / 2.0 - x1);
        }
    } else if h1 > 0.0 && h2 <= 0.0 {
        // Closure at mass 2: the subglottal pressure loads the channel.
        f.right[0] = 0.5 * (x2 - x1) * lg * ps;
        f.left[1] = 0.5 * (x2 - x1) * lg * ps;
    } else if h1 <= 0.0 && h2 > 0.0 {
        // Closure at mass 1: only the supraglottal side communicates.
        f.right[0] = 0.5 * (x2 - x1) * lg * psupra;
        f.left[1] = 0.5 * (x2 - x1) * lg * psupra;
    }

    f
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> PlateChannel {
        PlateChannel {
            x: [0.0, 1.0e-3, 3.0e-3, 3.2e-3],
            h0: 1.2e-3,
            h1: 0.9e-3,
            h2: 0.8e-3,
            xs: 3.0e-3,
            hs: 0.8e-3,
        }
    }

    #[test]
    fn test_static_pressure_distribution_when_no_flow() {
        // With zero flow and zero flow derivative, every dynamic term
        // vanishes: the forces reduce to the static pressure loads.
        let consts = SimConstants::default();
        let ch = channel();
        let ps = 800.0;
        let f = pressure_forces(0.0, 1.4e-2, 0.0, ps, 0.0, &ch, &consts);
        let expect_l1 = 0.5 * (ch.x[1] - ch.x[0]) * 1.4e-2 * ps;
        assert!(
            (f.left[0] - expect_l1).abs() / expect_l1 < 1e-9,
            "static inlet force: {} vs {}",
            f.left[0],
            expect_l1
        );
        let expect_r1 = 0.5 * (ch.x[2] - ch.x[1]) * 1.4e-2 * ps;
        assert!((f.right[0] - expect_r1).abs() / expect_r1 < 1e-9);
    }

    #[test]
    fn test_closure_at_mass_two_uses_subglottal_pressure() {
        let consts = SimConstants::default();
        let mut ch = channel();
        ch.h2 = -1e-5;
        let f = pressure_forces(1e-4, 1.4e-2, 0.0, 800.0, 50.0, &ch, &consts);
        let expect = 0.5 * (ch.x[2] - ch.x[1]) * 1.4e-2 * 800.0;
        assert!((f.right[0] - expect).abs() < 1e-9);
        assert!((f.left[1] - expect).abs() < 1e-9);
    }

    #[test]
    fn test_closure_at_mass_one_uses_supraglottal_pressure() {
        let consts = SimConstants::default();
        let mut ch = channel();
        ch.h1 = 0.0;
        let f = pressure_forces(0.0, 1.4e-2, 0.0, 800.0, 50.0, &ch, &consts);
        let expect = 0.5 * (ch.x[2] - ch.x[1]) * 1.4e-2 * 50.0;
        assert!((f.right[0] - expect).abs() < 1e-9);
        assert!((f.left[1] - expect).abs() < 1e-9);
    }

    #[test]
    fn test_bernoulli_suction_in_convergent_channel() {
        // Flow through a convergent channel accelerates toward mass 2; the
        // Bernoulli term lowers the pressure there relative to rest.
        let mut consts = SimConstants::default();
        consts.unsteady = false;
        let ch = channel();
        let ps = 800.0;
        let lg = 1.4e-2;
        let static_f = pressure_forces(0.0, lg, 0.0, ps, 0.0, &ch, &consts);
        let flowing = pressure_forces(3e-4, lg, 0.0, ps, 0.0, &ch, &consts);
        assert!(
            flowing.left[1] < static_f.left[1],
            "Bernoulli suction should reduce the force on mass 2: {} vs {}",
            flowing.left[1],
            static_f.left[1]
        );
    }

    #[test]
    fn test_separated_flow_branch_engages() {
        // Strongly divergent channel: h2 well past sep·h1, separation point
        // midway along the second plate.
        let consts = SimConstants::default();
        let mut ch = channel();
        ch.h1 = 0.5e-3;
        ch.h2 = 1.5e-3;
        ch.hs = consts.separation_factor * ch.h1;
        // xs where h(x) = sep·h1 on plate 2.
        let a = (ch.h2 - ch.h1) / (ch.x[2] - ch.x[1]);
        ch.xs = ch.x[1] + (ch.hs - ch.h1) / a;
        let f = pressure_forces(2e-4, 1.4e-2, 0.0, 800.0, 10.0, &ch, &consts);
        for v in [f.left[0], f.left[1], f.right[0], f.right[1]] {
            assert!(v.is_finite(), "separated-flow force must be finite");
        }
    }

    #[test]
    fn test_parallel_plate_regularization_finite() {
        let consts = SimConstants::default();
        let mut ch = channel();
        ch.h1 = 1.0e-3;
        ch.h2 = 1.0e-3; // exactly parallel second plate
        ch.h0 = 1.0e-3; // and inlet plate
        let f = pressure_forces(2e-4, 1.4e-2, 1e-2, 800.0, 10.0, &ch, &consts);
        for v in [f.left[0], f.left[1], f.right[0], f.right[1]] {
            assert!(v.is_finite(), "parallel plates must not divide by zero");
        }
    }
}
