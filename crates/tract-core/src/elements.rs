//! Per-segment equivalent-circuit element computation.
//!
//! Discretization convention (made explicit here because every memory update
//! in the solver depends on it): an `n`-tube segment has `n + 1` flow unknowns
//! and `n + 1` pressure nodes. Node `j < n` sits at the centre of tube `j` and
//! carries that tube's full compliance and wall branch; node `n` is the
//! termination node (radiation load for radiating segments, an end-cap lump
//! otherwise). Flow `j` connects node `j - 1` to node `j` through the
//! downstream half of tube `j - 1` and the upstream half of tube `j`, so the
//! half-tube arrays `lj`/`rj` have `n + 1` entries with the last one
//! duplicating the final tube's downstream half.
//!
//! All discrete terms come from trapezoidal integration, matching the memory
//! recursions in the time-domain solver: capacitor `Vc = 4C/T·P − Vc`,
//! inductor `Q = 4L/T·U − Q`, wall branch `Qwl/Qwc`, radiation inertance
//! `V += −2·Srad·√A·P`.

use crate::constants::{wall_surface, RADIATION_CONDUCTANCE_FACTOR};
use crate::{AreaFunction, SimConstants};
use std::f64::consts::PI;

/// Termination of a segment's far end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Open at the lips/nostrils: piston radiation load.
    Radiating,
    /// Closed side cavity: rigid end-cap with a half-tube compliance lump.
    Closed,
    /// Subglottal tract: the far end couples back into the glottis; the last
    /// unknown of the block is the connection pressure, not a flow.
    GlottalConnection,
}

/// Equivalent-circuit element state of one segment for the current sample.
#[derive(Debug, Clone, Default)]
pub struct AcousticElements {
    /// Half-tube inertance per flow slot (n+1).
    pub lj: Vec<f64>,
    /// Half-tube viscous resistance per flow slot (n+1).
    pub rj: Vec<f64>,
    /// Node compliance (n+1; node n only for closed ends).
    pub cj: Vec<f64>,
    /// Nodal pressure factor `1/(2C/T + Gw [+ radiation])` per node (n+1).
    pub bj: Vec<f64>,
    /// Wall-branch conductance per node.
    pub gw: Vec<f64>,
    /// Wall inertance discrete term `2M/(T·S)` per node.
    pub wl: Vec<f64>,
    /// Wall compliance discrete term `T·K/(2·S)` per node.
    pub wc: Vec<f64>,
    /// Bernoulli contraction resistance per flow slot.
    pub rcm: Vec<f64>,
    /// Bernoulli expansion resistance per flow slot.
    pub rcp: Vec<f64>,
    /// Frication pressure source per node.
    pub ns: Vec<f64>,
    /// Injected flow source per node.
    pub udj: Vec<f64>,
    /// Radiation inertance integration coefficient `Srad·√A_last` for the
    /// terminal node, zero for non-radiating segments.
    pub srad_term: f64,
    /// Radiation conductance at the terminal node.
    pub grad: f64,
}

impl AcousticElements {
    pub fn n_nodes(&self) -> usize {
        self.bj.len()
    }

    /// Recompute every element from the current-frame geometry.
    ///
    /// `u_prev` is the previous sample's flow vector (n+1 entries; zeros on
    /// the first sample), `upstream_area` the area feeding junction 0 (the
    /// instantaneous glottal area for the oral tract, the parent tube area
    /// for branches), and `downstream_area` the area beyond the far end for
    /// [`Termination::GlottalConnection`] segments.
    ///
    /// Areas are clamped at `consts.amin` before any reciprocal is formed;
    /// callers are expected to clamp upstream too, but this floor holds
    /// regardless of call path.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &mut self,
        af: &AreaFunction,
        consts: &SimConstants,
        u_prev: &[f64],
        upstream_area: f64,
        downstream_area: f64,
        termination: Termination,
        subglottal_walls: bool,
    ) {
        let n = af.n_tubes();
        let t = consts.period();
        let rho = consts.rho;
        let c = consts.c;

        self.resize(n + 1);

        let area: Vec<f64> = af.area.iter().map(|&a| a.max(consts.amin)).collect();
        let length = &af.length;

        // Half-tube series elements.
        for j in 0..=n {
            let k = j.min(n - 1);
            let (a, dx) = (area[k], length[k]);
            self.lj[j] = 0.5 * rho * dx / a;
            self.rj[j] = 4.0 * PI * consts.mu * dx / (a * a);
        }

        // Node shunt elements: full tube compliance and wall branch.
        let (wr_c, wm_c, wk_c) = if subglottal_walls {
            consts.wall_source.subglottal_wall_params()
        } else {
            consts.wall_source.wall_params()
        };
        for j in 0..n {
            let (a, dx) = (area[j], length[j]);
            self.cj[j] = dx * a / (rho * c * c);
            let s = wall_surface(a, dx);
            let wr = wr_c / s;
            self.wl[j] = 2.0 * wm_c / (t * s);
            self.wc[j] = t * wk_c / (2.0 * s);
            self.gw[j] = if consts.wall_yield {
                1.0 / (wr + self.wl[j] + self.wc[j])
            } else {
                0.0
            };
            self.bj[j] = 1.0 / (2.0 * self.cj[j] / t + self.gw[j]);
        }

        // Termination node.
        let a_last = area[n - 1];
        self.gw[n] = 0.0;
        self.wl[n] = 0.0;
        self.wc[n] = 0.0;
        match termination {
            Termination::Radiating => {
                self.cj[n] = 0.0;
                self.grad = RADIATION_CONDUCTANCE_FACTOR * a_last / (rho * c);
                self.srad_term = t / 2.0 * 0.375 * PI.powf(1.5) * a_last.sqrt() / rho;
                self.bj[n] = 1.0 / (self.grad + self.srad_term);
            }
            Termination::Closed => {
                self.cj[n] = 0.5 * length[n - 1] * a_last / (rho * c * c);
                self.grad = 0.0;
                self.srad_term = 0.0;
                self.bj[n] = 1.0 / (2.0 * self.cj[n] / t);
            }
            Termination::GlottalConnection => {
                // The far node is the glottal connection pressure unknown;
                // no shunt of its own.
                self.cj[n] = 0.0;
                self.grad = 0.0;
                self.srad_term = 0.0;
                self.bj[n] = 0.0;
            }
        }

        // Flow-direction-dependent Bernoulli losses at area discontinuities.
        for j in 0..=n {
            self.rcm[j] = 0.0;
            self.rcp[j] = 0.0;
            if !consts.dynamic_term {
                continue;
            }
            let u = u_prev.get(j).copied().unwrap_or(0.0);
            if u == 0.0 {
                continue;
            }
            let a_up = if j == 0 {
                upstream_area.max(consts.amin)
            } else {
                area[j - 1]
            };
            let a_down = if j == n {
                match termination {
                    Termination::GlottalConnection => downstream_area.max(consts.amin),
                    // Free jet at an open end; the radiation load accounts
                    // for the kinetic loss there.
                    _ => continue,
                }
            } else {
                area[j]
            };
            if a_down < a_up {
                self.rcm[j] = rho * u.abs() / (2.0 * a_down * a_down);
            } else if a_down > a_up {
                self.rcp[j] = rho * u.abs() / (2.0 * a_up * a_up);
            }
        }

        for j in 0..=n {
            self.ns[j] = 0.0;
            self.udj[j] = 0.0;
        }
    }

    /// Series inertance seen by flow unknown `j`.
    pub fn series_inductance(&self, j: usize) -> f64 {
        let n = self.lj.len() - 1;
        if j == 0 {
            self.lj[0]
        } else if j == n {
            self.lj[n]
        } else {
            self.lj[j - 1] + self.lj[j]
        }
    }

    /// Series resistance seen by flow unknown `j`, including the directional
    /// Bernoulli terms.
    pub fn series_resistance(&self, j: usize) -> f64 {
        let n = self.rj.len() - 1;
        let r = if j == 0 {
            self.rj[0]
        } else if j == n {
            self.rj[n]
        } else {
            self.rj[j - 1] + self.rj[j]
        };
        r + self.rcm[j] + self.rcp[j]
    }

    fn resize(&mut self, len: usize) {
        for v in [
            &mut self.lj,
            &mut self.rj,
            &mut self.cj,
            &mut self.bj,
            &mut self.gw,
            &mut self.wl,
            &mut self.wc,
            &mut self.rcm,
            &mut self.rcp,
            &mut self.ns,
            &mut self.udj,
        ] {
            v.clear();
            v.resize(len, 0.0);
        }
    }
}
