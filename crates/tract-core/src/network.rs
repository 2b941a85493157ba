//! The vocal-apparatus network: topology validation, per-sample global system
//! assembly and solve, state propagation, and the synthesis loop.
//!
//! Row ordering is an explicit contract: segment blocks are stacked in arena
//! order — main oral tract first (its row 0 is the glottal flow `Ug`), then
//! plain branches, then the subglottal tract (whose last row is the glottal
//! connection pressure, not a flow), then the single glottal-chink row.
//! [`VtNetwork::row_offsets`] exposes the resulting offsets and is covered by
//! tests; topology validation rejects any arena that cannot be ordered this
//! way.

use crate::area::resample_linear;
use crate::chain::{
    cascade_tubes, input_impedance, radiation_impedance, ChainMatrix, TransferFunction,
};
use crate::constants::{area_to_height, height_to_area, POWTR_A, POWTR_B};
use crate::dsp::{fir1_lowpass, fir_apply_latest};
use crate::elements::Termination as TubeEnd;
use crate::oscillator::{Oscillator, OscillatorKind, OscillatorSample};
use crate::waveguide::{SegmentRole, Waveguide};
use crate::{ChainModel, ConfigError, FlowFilter, FoldModel, SimConstants, TopologyError};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// How a synthesis run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// All requested samples were produced.
    Completed,
    /// The per-sample solve became singular; the signal is truncated at
    /// `sample`.
    SolverFailure { sample: usize },
}

/// Radiated-pressure signal plus the explicit outcome of the run.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub pressure_radiated: Vec<f64>,
    pub termination: Termination,
}

/// Glottal source aggregates entering the global system each sample.
#[derive(Debug, Clone, Copy, Default)]
struct GlottalDrive {
    /// Total discretized series resistance of the glottal branch, including
    /// the first oral half-tube.
    resistance: f64,
    /// Total glottal inductance (folds only).
    inductance: f64,
    /// Bernoulli coefficient of the quadratic flow relation.
    bernoulli: f64,
    /// Driving pressure behind the glottis; zero when the subglottal tract
    /// supplies the connection pressure unknown instead.
    ps: f64,
    /// Lung control pressure driving the subglottal tract entrance.
    lung: f64,
    /// Vocal folds in contact: the glottal flow is forced to zero.
    contact: bool,
}

/// The full vocal apparatus.
#[derive(Debug, Clone)]
pub struct VtNetwork {
    pub segments: Vec<Waveguide>,
    pub oscillators: Vec<Oscillator>,
    /// Subglottal (lung) control pressure per sample (Pa).
    pub subglottal_control: Vec<f64>,
    /// Parametric glottal drive for runs without a glottis oscillator.
    pub input_glottal_area: Option<Vec<f64>>,
    pub input_abduction: Option<Vec<f64>>,
    /// Phonetic annotation carried along for downstream analysis.
    pub phonetic_labels: Vec<String>,
    pub phonetic_instants: Vec<f64>,
    /// Simulation rate of the recorded output (Hz).
    pub simulation_frequency: f64,
    /// Radiated pressure of the last synthesis run.
    pub pressure_radiated: Vec<f64>,
    /// Per-oscillator recorded state, one entry per sample.
    pub oscillator_history: Vec<Vec<OscillatorSample>>,

    chink: Option<usize>,
    subglottal: Option<usize>,
    glottis: Option<usize>,
    radiating: Vec<usize>,
    offsets: Vec<usize>,
    n_unknowns: usize,
}

impl VtNetwork {
    /// Build and validate a network.
    pub fn new(
        segments: Vec<Waveguide>,
        oscillators: Vec<Oscillator>,
    ) -> Result<Self, TopologyError> {
        let mut net = Self {
            segments,
            oscillators,
            subglottal_control: Vec::new(),
            input_glottal_area: None,
            input_abduction: None,
            phonetic_labels: Vec::new(),
            phonetic_instants: Vec::new(),
            simulation_frequency: 0.0,
            pressure_radiated: Vec::new(),
            oscillator_history: Vec::new(),
            chink: None,
            subglottal: None,
            glottis: None,
            radiating: Vec::new(),
            offsets: Vec::new(),
            n_unknowns: 0,
        };
        net.validate_and_index()?;
        Ok(net)
    }

    fn validate_and_index(&mut self) -> Result<(), TopologyError> {
        let n = self.segments.len();
        if n == 0
            || self.segments[0].role != SegmentRole::MainOralTract
            || !self.segments[0].radiating
        {
            return Err(TopologyError::MissingOralTract);
        }

        self.chink = None;
        self.subglottal = None;
        for (k, s) in self.segments.iter().enumerate() {
            if s.n_tubes() == 0 {
                return Err(TopologyError::EmptySegment(k));
            }
            match s.role {
                SegmentRole::GlottalChink => {
                    if self.chink.replace(k).is_some() {
                        return Err(TopologyError::DuplicateChink);
                    }
                }
                SegmentRole::SubGlottalTract => {
                    if self.subglottal.replace(k).is_some() {
                        return Err(TopologyError::DuplicateSubglottal);
                    }
                }
                _ => {}
            }
        }
        if let Some(c) = self.chink {
            if c != n - 1 {
                return Err(TopologyError::ChinkNotLast);
            }
        }
        if let Some(sg) = self.subglottal {
            let expected = if self.chink.is_some() { n - 2 } else { n - 1 };
            if sg != expected {
                return Err(TopologyError::SubglottalMisplaced);
            }
        }

        // Attachments: parents must precede children, junction indices must
        // address an interior pressure node of the parent.
        for k in 0..n {
            let (parent, reentry) = (self.segments[k].parent, self.segments[k].reentry);
            if let Some(att) = parent {
                if att.parent >= k {
                    return Err(TopologyError::ParentOrder {
                        segment: k,
                        parent: att.parent,
                    });
                }
                let max = self.segments[att.parent].n_tubes();
                if att.junction + 1 >= max {
                    return Err(TopologyError::JunctionOutOfRange {
                        segment: k,
                        parent: att.parent,
                        junction: att.junction,
                        max,
                    });
                }
            }
            if let Some(re) = reentry {
                let att = parent.ok_or(TopologyError::AnabranchOrder(k))?;
                if re.parent != att.parent || re.junction <= att.junction {
                    return Err(TopologyError::AnabranchOrder(k));
                }
                let max = self.segments[re.parent].n_tubes();
                if re.junction + 1 >= max {
                    return Err(TopologyError::JunctionOutOfRange {
                        segment: k,
                        parent: re.parent,
                        junction: re.junction,
                        max,
                    });
                }
            }
        }

        // Derived child lists and radiating set.
        for s in &mut self.segments {
            s.children.clear();
            s.reentries.clear();
        }
        for k in 0..n {
            if let Some(att) = self.segments[k].parent {
                self.segments[att.parent].children.push((k, att.junction));
            }
            if let Some(re) = self.segments[k].reentry {
                self.segments[re.parent].reentries.push((k, re.junction));
            }
        }
        self.radiating = (0..n).filter(|&k| self.segments[k].radiating).collect();

        self.glottis = None;
        for (i, o) in self.oscillators.iter().enumerate() {
            if matches!(o.kind, OscillatorKind::Glottis) {
                if self.glottis.replace(i).is_some() {
                    return Err(TopologyError::DuplicateGlottis);
                }
            }
        }

        self.offsets = Vec::with_capacity(n);
        let mut off = 0;
        for s in &self.segments {
            self.offsets.push(off);
            off += s.n_rows();
        }
        self.n_unknowns = off;
        Ok(())
    }

    /// Row offset of every segment block in the global system — the declared
    /// stacking contract.
    pub fn row_offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn n_unknowns(&self) -> usize {
        self.n_unknowns
    }

    /// Zero every segment's state buffers and every oscillator.
    pub fn init_network(&mut self) {
        for s in &mut self.segments {
            s.init_acoustics();
        }
        for o in &mut self.oscillators {
            o.reset();
        }
        self.pressure_radiated.clear();
        self.oscillator_history = vec![Vec::new(); self.oscillators.len()];
    }

    // -----------------------------------------------------------------------
    // Frequency-domain analysis
    // -----------------------------------------------------------------------

    /// Transfer function of the whole network at frame `frame`, folding every
    /// branch in as a shunt admittance and every anabranch as a parallel
    /// span. With `constriction` set, additionally returns the transfer
    /// function seen from that constriction node (noise-source placement).
    pub fn compute_transfer_function(
        &self,
        freq: &[f64],
        frame: usize,
        consts: &SimConstants,
        model: ChainModel,
        constriction: Option<usize>,
    ) -> (TransferFunction, Option<Vec<Complex64>>) {
        let n_seg = self.segments.len();
        let lw = freq.len();
        let mut zin: Vec<Option<Vec<Complex64>>> = vec![None; n_seg];
        let mut h_main = vec![Complex64::new(0.0, 0.0); lw];
        let mut h_cstr = None;

        for kw in (0..n_seg).rev() {
            let seg = &self.segments[kw];
            if matches!(
                seg.role,
                SegmentRole::GlottalChink | SegmentRole::SubGlottalTract
            ) {
                continue;
            }
            let af = seg.areas.frame(frame);
            let n = af.n_tubes();

            // Walk tubes lips-first, folding children at their nodes.
            let mut children: Vec<(usize, usize)> = seg.children.clone();
            children.sort_by(|a, b| b.1.cmp(&a.1));
            let mut chain = vec![ChainMatrix::identity(); lw];
            let mut next_tube = n;

            // Anabranch spans are folded when the walk reaches the re-entry.
            let reentry = seg.reentries.first().copied();

            if let Some((ana, c2)) = reentry {
                let c1 = self.segments[ana].parent.map(|a| a.junction).unwrap_or(0);
                chain = cascade_tubes(af, c2 + 1..n, freq, consts, model, None);
                let span = cascade_tubes(af, c1 + 1..c2 + 1, freq, consts, model, None);
                let ana_af = self.segments[ana].areas.frame(frame);
                let ana_chain =
                    cascade_tubes(ana_af, 0..ana_af.n_tubes(), freq, consts, model, None);
                for i in 0..lw {
                    chain[i] = chain[i].cascade(&span[i].parallel(&ana_chain[i]));
                }
                next_tube = c1 + 1;
            }

            for (child, node) in children {
                if self.segments[child].reentry.is_some() {
                    continue; // folded above as a parallel span
                }
                if node + 1 > next_tube {
                    continue;
                }
                chain = cascade_tubes(af, node + 1..next_tube, freq, consts, model, Some(&chain));
                let child_zin = zin[child].as_ref().expect("children precede parents");
                for i in 0..lw {
                    chain[i] = chain[i].cascade(&ChainMatrix::shunt(child_zin[i]));
                }
                next_tube = node + 1;
            }
            let chain = cascade_tubes(af, 0..next_tube, freq, consts, model, Some(&chain));

            let z_load: Vec<Complex64> = freq
                .iter()
                .map(|&f| {
                    let omega = 2.0 * std::f64::consts::PI * f.max(1e-11);
                    if seg.radiating {
                        radiation_impedance(omega, af.area[n - 1], consts)
                    } else {
                        Complex64::new(0.0, 0.0)
                    }
                })
                .collect();

            if kw == 0 {
                for i in 0..lw {
                    h_main[i] = 1.0 / (-chain[i].c * z_load[i] + chain[i].a);
                }
                if let Some(loc) = constriction {
                    h_cstr = Some(self.constriction_transfer(af, loc, freq, consts, model));
                }
            } else if seg.radiating {
                zin[kw] = Some(input_impedance(&chain, &z_load));
            } else {
                // Closed far end: Zin = −D/C.
                zin[kw] = Some(chain.iter().map(|t| -t.d / t.c).collect());
            }
        }

        (
            TransferFunction {
                freq: freq.to_vec(),
                h: h_main,
            },
            h_cstr,
        )
    }

    /// Transfer function from a supraglottal constriction to the lips: the
    /// downstream cascade radiates, the upstream cascade (reversed) is loaded
    /// with the fixed glottal impedance, and the two input impedances divide
    /// the source.
    fn constriction_transfer(
        &self,
        af: &crate::AreaFunction,
        loc: usize,
        freq: &[f64],
        consts: &SimConstants,
        model: ChainModel,
    ) -> Vec<Complex64> {
        let n = af.n_tubes();
        let loc = loc.min(n - 2);
        let a_up: Vec<f64> = af.area[..=loc].iter().rev().copied().collect();
        let l_up: Vec<f64> = af.length[..=loc].iter().rev().copied().collect();
        let up = crate::AreaFunction {
            area: a_up,
            length: l_up,
        };
        let down = crate::AreaFunction {
            area: af.area[loc + 1..].to_vec(),
            length: af.length[loc + 1..].to_vec(),
        };

        let up_chain = cascade_tubes(&up, 0..up.n_tubes(), freq, consts, model, None);
        let down_chain = cascade_tubes(&down, 0..down.n_tubes(), freq, consts, model, None);

        freq.iter()
            .enumerate()
            .map(|(i, &f)| {
                let omega = 2.0 * std::f64::consts::PI * f.max(1e-11);
                let zrad = radiation_impedance(omega, af.area[n - 1], consts);
                let zg = crate::chain::glottal_impedance(f, consts);
                let dn = &down_chain[i];
                let upc = &up_chain[i];
                let tf_front = 1.0 / (dn.c * zrad + dn.d);
                let z_front = (dn.a * zrad + dn.b) / (dn.c * zrad + dn.d);
                let z_back = (upc.a * zg + upc.b) / (upc.c * zg + upc.d);
                tf_front * z_back / (z_front + z_back)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Time-domain solve
    // -----------------------------------------------------------------------

    /// Assemble the global system for one sample.
    fn assemble(&mut self, consts: &SimConstants, drive: &GlottalDrive) -> (DMatrix<f64>, DVector<f64>) {
        let nu = self.n_unknowns;
        let mut w = DMatrix::<f64>::zeros(nu, nu);
        let mut f = DVector::<f64>::zeros(nu);

        // Refresh the node integration terms from the wall memories.
        for s in &mut self.segments {
            if s.role == SegmentRole::GlottalChink {
                continue;
            }
            let n = s.n_tubes();
            for j in 0..n {
                s.state.v[j] =
                    s.state.vc[j] - s.elements.gw[j] * (s.state.qwl[j] - s.state.qwc[j]);
            }
        }

        let po_col = self.subglottal.map(|sg| {
            let n = self.segments[sg].n_tubes();
            self.offsets[sg] + n
        });
        let chink_col = self.chink.map(|c| self.offsets[c]);

        for k in 0..self.segments.len() {
            let off = self.offsets[k];
            match self.segments[k].role {
                SegmentRole::GlottalChink => {
                    self.assemble_chink(&mut w, &mut f, off, consts, drive, po_col)
                }
                SegmentRole::SubGlottalTract => {
                    self.assemble_subglottal(&mut w, &mut f, k, off, consts, drive, chink_col)
                }
                SegmentRole::MainOralTract => {
                    self.assemble_duct(&mut w, &mut f, k, off, consts, Some(drive), po_col, chink_col)
                }
                SegmentRole::Branch => {
                    self.assemble_duct(&mut w, &mut f, k, off, consts, None, None, None)
                }
            }
        }

        (w, f)
    }

    /// Coupling coefficients of the pressure at node `node` of segment `k`
    /// into row `row`, with sign `sign` (+1 when the node pressure enters the
    /// row equation positively).
    #[allow(clippy::too_many_arguments)]
    fn couple_node(
        &self,
        w: &mut DMatrix<f64>,
        f: &mut DVector<f64>,
        row: usize,
        k: usize,
        node: usize,
        sign: f64,
        chink_col: Option<usize>,
    ) {
        let seg = &self.segments[k];
        let off = self.offsets[k];
        let b = seg.elements.bj[node];
        let n = seg.n_tubes();

        // P_node = b·(U_node − U_node+1 − Σ children + Σ re-entries + ud + v)
        w[(row, off + node)] += sign * b;
        if node + 1 <= n {
            w[(row, off + node + 1)] -= sign * b;
        }
        for &(child, cnode) in &seg.children {
            if cnode == node {
                w[(row, self.offsets[child])] -= sign * b;
            }
        }
        for &(ana, rnode) in &seg.reentries {
            if rnode == node {
                let ana_last = self.offsets[ana] + self.segments[ana].n_tubes();
                w[(row, ana_last)] += sign * b;
            }
        }
        // The glottal chink discharges into node 0 of the oral tract.
        if k == 0 && node == 0 {
            if let Some(cc) = chink_col {
                w[(row, cc)] += sign * b;
            }
        }
        // The node's constant term moves to the right-hand side with the
        // opposite sign.
        f[row] -= sign * b * (seg.elements.udj[node] + seg.state.v[node]);
    }

    /// Rows of the main oral tract or a plain branch.
    #[allow(clippy::too_many_arguments)]
    fn assemble_duct(
        &self,
        w: &mut DMatrix<f64>,
        f: &mut DVector<f64>,
        k: usize,
        off: usize,
        consts: &SimConstants,
        drive: Option<&GlottalDrive>,
        po_col: Option<usize>,
        chink_col: Option<usize>,
    ) {
        let t = consts.period();
        let n = self.segments[k].n_tubes();

        // Row 0.
        if let Some(d) = drive {
            // Glottal flow row of the oral tract.
            let e = &self.segments[k].elements;
            let q0 = self.segments[k].state.q[0];
            let (ns0, ns1) = (e.ns[0], e.ns[1]);
            w[(off, off)] -= d.resistance;
            self.couple_node(w, f, off, k, 0, -1.0, chink_col);
            if let Some(pc) = po_col {
                w[(off, pc)] += 1.0;
            } else {
                f[off] -= d.ps;
            }
            if let Some(cc) = chink_col {
                let e = &self.segments[k].elements;
                let hch = -(e.rj[0] + e.rcm[0] + 2.0 * e.lj[0] / t);
                w[(off, cc)] += hch;
            }
            f[off] += -q0 + ns0 - ns1;
        } else {
            // Branch inflow row: taps the parent pressure node.
            let att = self.segments[k].parent.expect("branches have parents");
            let e = &self.segments[k].elements;
            let z0 = e.series_resistance(0) + 2.0 * e.series_inductance(0) / t;
            let q0 = self.segments[k].state.q[0];
            let (ns0, ns1) = (e.ns[0], e.ns[1]);
            w[(off, off)] -= z0;
            self.couple_node(w, f, off, att.parent, att.junction, 1.0, None);
            self.couple_node(w, f, off, k, 0, -1.0, None);
            f[off] += -q0 + ns0 - ns1;
        }

        // Interior rows.
        for j in 1..n {
            let row = off + j;
            let e = &self.segments[k].elements;
            let z = e.series_resistance(j) + 2.0 * e.series_inductance(j) / t;
            let qj = self.segments[k].state.q[j];
            let (nsj, nsj1) = (e.ns[j], e.ns[j + 1]);
            w[(row, row)] -= z;
            self.couple_node(w, f, row, k, j - 1, 1.0, chink_col);
            self.couple_node(w, f, row, k, j, -1.0, chink_col);
            f[row] += -qj + nsj - nsj1;
        }

        // Far-end row.
        let row = off + n;
        let e = &self.segments[k].elements;
        let z = e.series_resistance(n) + 2.0 * e.series_inductance(n) / t;
        let qn = self.segments[k].state.q[n];
        let nsn = e.ns[n];
        w[(row, row)] -= z;
        self.couple_node(w, f, row, k, n - 1, 1.0, chink_col);
        if let Some(re) = self.segments[k].reentry {
            // Anabranch outflow into the parent re-entry node.
            self.couple_node(w, f, row, re.parent, re.junction, -1.0, None);
        } else {
            // Radiating or closed termination node.
            let b = self.segments[k].elements.bj[n];
            let vn = self.segments[k].state.v[n];
            w[(row, row)] -= b;
            f[row] += b * vn;
        }
        f[row] += -qn + nsn;
    }

    /// Rows of the subglottal tract: lungs at row 0, the connection pressure
    /// as the last unknown.
    #[allow(clippy::too_many_arguments)]
    fn assemble_subglottal(
        &self,
        w: &mut DMatrix<f64>,
        f: &mut DVector<f64>,
        k: usize,
        off: usize,
        consts: &SimConstants,
        drive: &GlottalDrive,
        chink_col: Option<usize>,
    ) {
        let t = consts.period();
        let n = self.segments[k].n_tubes();

        // Row 0: driven by the lung pressure.
        {
            let e = &self.segments[k].elements;
            let z0 = e.series_resistance(0) + 2.0 * e.series_inductance(0) / t;
            let q0 = self.segments[k].state.q[0];
            w[(off, off)] -= z0;
            self.couple_node(w, f, off, k, 0, -1.0, None);
            f[off] += -drive.lung - q0;
        }

        for j in 1..n {
            let row = off + j;
            let e = &self.segments[k].elements;
            let z = e.series_resistance(j) + 2.0 * e.series_inductance(j) / t;
            let qj = self.segments[k].state.q[j];
            w[(row, row)] -= z;
            self.couple_node(w, f, row, k, j - 1, 1.0, None);
            if j == n - 1 {
                // Node n−1 discharges into the glottal path (Ug + Uch), not
                // into a flow unknown of this block.
                let b = self.segments[k].elements.bj[n - 1];
                w[(row, row)] -= b;
                w[(row, 0)] += b;
                if let Some(cc) = chink_col {
                    w[(row, cc)] += b;
                }
                let seg = &self.segments[k];
                f[row] += b * (seg.elements.udj[n - 1] + seg.state.v[n - 1]);
            } else {
                self.couple_node(w, f, row, k, j, -1.0, None);
            }
            f[row] += -qj;
        }

        // Connection-pressure row: P_{n−1} − po = Z_n·(Ug + Uch) − Q_n.
        let row = off + n;
        let e = &self.segments[k].elements;
        let z = e.series_resistance(n) + 2.0 * e.series_inductance(n) / t;
        let b = e.bj[n - 1];
        let qn = self.segments[k].state.q[n];
        let hsg = -(b + z);
        w[(row, row)] = -1.0;
        w[(row, off + n - 1)] += b;
        w[(row, 0)] += hsg;
        if let Some(cc) = chink_col {
            w[(row, cc)] += hsg;
        }
        let seg = &self.segments[k];
        f[row] += -b * (seg.elements.udj[n - 1] + seg.state.v[n - 1]) - qn;
    }

    /// The single chink row: a parallel glottal path into oral node 0.
    fn assemble_chink(
        &self,
        w: &mut DMatrix<f64>,
        f: &mut DVector<f64>,
        off: usize,
        consts: &SimConstants,
        drive: &GlottalDrive,
        po_col: Option<usize>,
    ) {
        let t = consts.period();
        let c = self.chink.expect("chink row exists");
        let (rch, lch) = {
            let e = &self.segments[c].elements;
            (
                e.rj[0] + e.rj[1],
                (e.lj[0] + e.lj[1]) * consts.chink_inductance_factor,
            )
        };
        let ot = &self.segments[0].elements;
        let shared = ot.rj[0] + ot.rcm[0] + 2.0 * ot.lj[0] / t;

        w[(off, off)] -= rch + 2.0 * lch / t + shared;
        self.couple_node(w, f, off, 0, 0, -1.0, Some(off));
        // Shared first oral half-tube: the main glottal flow sees the same
        // series elements.
        w[(off, 0)] -= shared;
        if let Some(pc) = po_col {
            w[(off, pc)] += 1.0;
        } else {
            f[off] -= drive.ps;
        }
        let qch = self.segments[c].state.q[0];
        let nsch = self.segments[c].elements.ns[0];
        f[off] += -qch + nsch;
    }

    /// Solve for all flows. The glottal flow is the nonlinear Bernoulli
    /// unknown of row 0: in fold contact it is forced to zero; otherwise the
    /// quadratic `a₂·Ug² + Ug − F₁₁ = 0` is solved in closed form and the
    /// known `Ug` is moved to the right-hand side of the reduced system.
    fn solve(
        &self,
        w: &DMatrix<f64>,
        f: &DVector<f64>,
        drive: &GlottalDrive,
        consts: &SimConstants,
    ) -> Option<(DVector<f64>, f64)> {
        let nu = self.n_unknowns;

        let reduced = w.view((1, 1), (nu - 1, nu - 1)).into_owned();
        let lu = reduced.lu();

        let ug = if drive.contact {
            0.0
        } else {
            let full = w.clone().lu();
            let gsf = full.solve(f)?;
            let f11 = gsf[0];
            let mut e0 = DVector::<f64>::zeros(nu);
            e0[0] = 1.0;
            let gsi0 = full.solve(&e0)?;
            let a2 = -drive.bernoulli * gsi0[0];
            let ug = if a2 != 0.0 {
                solve_quadratic(a2, 1.0, -f11).unwrap_or(0.0)
            } else {
                f11
            };
            ug.max(0.0)
        };

        // Move the known glottal flow to the right-hand side.
        let mut f2 = DVector::<f64>::zeros(nu - 1);
        for i in 1..nu {
            f2[i - 1] = f[i] - w[(i, 0)] * ug;
        }
        let ut = lu.solve(&f2)?;
        if ut.iter().any(|x| !x.is_finite()) || !ug.is_finite() {
            return None;
        }
        Some((ut, ug))
    }

    /// Scatter the solved flows back into the segments and advance every
    /// memory term.
    fn propagate(&mut self, ut: &DVector<f64>, ug: f64, consts: &SimConstants, drive: &GlottalDrive) {
        let t = consts.period();
        let n_seg = self.segments.len();

        let uch = self
            .chink
            .map(|c| ut[self.offsets[c] - 1])
            .unwrap_or(0.0);

        // Flows. The reduced solution vector is offset by one (row 0 was the
        // glottal unknown).
        for k in 0..n_seg {
            let off = self.offsets[k];
            let n = self.segments[k].n_tubes();
            match self.segments[k].role {
                SegmentRole::MainOralTract => {
                    self.segments[k].state.flow[0] = ug;
                    for j in 1..=n {
                        self.segments[k].state.flow[j] = ut[off + j - 1];
                    }
                    self.segments[k].state.glottal_flow = ug;
                }
                SegmentRole::GlottalChink => {
                    self.segments[k].state.flow[0] = uch;
                    self.segments[k].state.glottal_flow = uch;
                }
                SegmentRole::SubGlottalTract => {
                    for j in 0..n {
                        self.segments[k].state.flow[j] = ut[off + j - 1];
                    }
                    self.segments[k].state.flow[n] = ug + uch;
                    self.segments[k].state.connection_pressure = ut[off + n - 1];
                }
                SegmentRole::Branch => {
                    for j in 0..=n {
                        self.segments[k].state.flow[j] = ut[off + j - 1];
                    }
                }
            }
        }

        // Node pressures, then the trapezoidal memories.
        for k in 0..n_seg {
            let n = self.segments[k].n_tubes();
            match self.segments[k].role {
                SegmentRole::GlottalChink => {
                    // The chink shares oral node 0.
                    let p0 = self.segments[0].state.pressure[0];
                    let l0 = self.segments[0].elements.lj[0];
                    let seg = &mut self.segments[k];
                    seg.state.pressure[0] = p0;
                    let lch = (seg.elements.lj[0] + seg.elements.lj[1])
                        * consts.chink_inductance_factor;
                    seg.state.q[0] =
                        4.0 * (lch + l0) / t * uch + 4.0 * l0 / t * ug - seg.state.q[0];
                }
                SegmentRole::SubGlottalTract => {
                    for j in 0..n {
                        let inflow = self.segments[k].state.flow[j];
                        let outflow = self.segments[k].state.flow[j + 1];
                        let seg = &self.segments[k];
                        let p = seg.elements.bj[j]
                            * (inflow - outflow + seg.elements.udj[j] + seg.state.v[j]);
                        self.segments[k].state.pressure[j] = p;
                    }
                    let po = self.segments[k].state.connection_pressure;
                    self.segments[k].state.pressure[n] = po;
                    // The standard memory advance covers the connection
                    // branch too: flow[n] already holds Ug + Uch.
                    self.advance_duct_memories(k, consts);
                }
                _ => {
                    let node_pressures: Vec<f64> = (0..n)
                        .map(|j| {
                            let seg = &self.segments[k];
                            let mut balance = seg.state.flow[j] - seg.state.flow[j + 1];
                            for &(child, cnode) in &seg.children {
                                if cnode == j {
                                    balance -= self.segments[child].state.flow[0];
                                }
                            }
                            for &(ana, rnode) in &seg.reentries {
                                if rnode == j {
                                    let na = self.segments[ana].n_tubes();
                                    balance += self.segments[ana].state.flow[na];
                                }
                            }
                            if k == 0 && j == 0 {
                                balance += uch;
                            }
                            seg.elements.bj[j]
                                * (balance + seg.elements.udj[j] + seg.state.v[j])
                        })
                        .collect();
                    let seg = &mut self.segments[k];
                    seg.state.pressure[..n].copy_from_slice(&node_pressures);
                    // Termination node.
                    let pn = seg.elements.bj[n] * (seg.state.flow[n] + seg.state.v[n]);
                    seg.state.pressure[n] = pn;
                    self.advance_duct_memories(k, consts);

                    let seg = &mut self.segments[k];
                    match seg.termination() {
                        TubeEnd::Radiating => {
                            let pn = seg.state.pressure[n];
                            seg.state.v[n] += -2.0 * seg.elements.srad_term * pn;
                        }
                        TubeEnd::Closed => {
                            let pn = seg.state.pressure[n];
                            seg.state.vc[n] =
                                4.0 * seg.elements.cj[n] / t * pn - seg.state.vc[n];
                            seg.state.v[n] = seg.state.vc[n];
                        }
                        TubeEnd::GlottalConnection => {}
                    }
                    if k == 0 {
                        // Glottal branch memory: fold inductance plus the
                        // shared first half-tube carrying Ug and Uch.
                        let l0 = seg.elements.lj[0];
                        let lgl = drive.inductance + l0;
                        seg.state.q[0] =
                            4.0 * lgl / t * ug + 4.0 * l0 / t * uch - seg.state.q[0];
                    }
                }
            }
        }

        // Keep the current flows as the next sample's previous flows.
        for s in &mut self.segments {
            s.state.flow_prev.copy_from_slice(&s.state.flow);
        }
    }

    /// Standard inductor, capacitor, and wall memory advance for a duct
    /// block (all rows except the specially-handled ones).
    fn advance_duct_memories(&mut self, k: usize, consts: &SimConstants) {
        let t = consts.period();
        let n = self.segments[k].n_tubes();
        let seg = &mut self.segments[k];
        let start = if k == 0 { 1 } else { 0 };
        for j in start..=n {
            let l = seg.elements.series_inductance(j);
            seg.state.q[j] = 4.0 * l / t * seg.state.flow[j] - seg.state.q[j];
        }
        for j in 0..n {
            let p = seg.state.pressure[j];
            seg.state.vc[j] = 4.0 * seg.elements.cj[j] / t * p - seg.state.vc[j];
            let u3 = seg.elements.gw[j] * (p + seg.state.qwl[j] - seg.state.qwc[j]);
            seg.state.qwc[j] = 2.0 * seg.elements.wc[j] * u3 + seg.state.qwc[j];
            seg.state.qwl[j] = 2.0 * seg.elements.wl[j] * u3 - seg.state.qwl[j];
        }
    }

    /// Append the current sample to every history buffer.
    fn record(&mut self, radiated: f64) {
        for s in &mut self.segments {
            s.state.pressure_history.push(s.state.pressure.clone());
            s.state.flow_history.push(s.state.flow.clone());
            s.state.glottal_flow_history.push(s.state.glottal_flow);
            s.state.reynolds_history.push(s.state.reynolds);
        }
        for (i, o) in self.oscillators.iter().enumerate() {
            self.oscillator_history[i].push(o.sample());
        }
        self.pressure_radiated.push(radiated);
    }

    // -----------------------------------------------------------------------
    // Synthesis
    // -----------------------------------------------------------------------

    /// Time-domain synthesis over every frame of the oral tract's area
    /// sequence. Returns the radiated-pressure signal together with the
    /// explicit run outcome; a singular per-sample solve truncates the signal
    /// instead of discarding it.
    pub fn synthesize(&mut self, consts: &SimConstants) -> Result<SynthesisOutcome, ConfigError> {
        consts.validate()?;
        let t = consts.period();
        let num_iter = self.segments[0].areas.n_frames();
        self.simulation_frequency = consts.fs;

        let glottis_idx = self.glottis;
        if glottis_idx.is_none() {
            let ok = self
                .input_glottal_area
                .as_ref()
                .is_some_and(|v| v.len() >= num_iter)
                && self
                    .input_abduction
                    .as_ref()
                    .is_some_and(|v| v.len() >= num_iter);
            if !ok {
                return Err(ConfigError::MissingGlottalDrive);
            }
        }

        self.init_network();
        let mut rng = SmallRng::seed_from_u64(0x5eed);

        // Vibrating fold length after abduction, and the pitch floor.
        if let Some(gi) = glottis_idx {
            let g = &mut self.oscillators[gi];
            for f0 in &mut g.fundamental_frequency {
                if !f0.is_finite() || *f0 <= 60.0 {
                    *f0 = 60.0;
                }
            }
            g.output_length.clear();
            for k in 0..num_iter {
                let pa = g.partial_abduction.get(k).copied().unwrap_or(0.0);
                let lchk = (pa * pa).clamp(consts.amin, 1.0 - consts.amin);
                g.output_length.push(g.rest_length * (1.0 - lchk));
            }
            // Upstream inlet height: subglottal outlet when present, a fixed
            // bronchial area otherwise.
            let h_up = match self.subglottal {
                Some(sg) => {
                    let af = self.segments[sg].areas.frame(0);
                    area_to_height(af.area[af.n_tubes() - 1], POWTR_A, POWTR_B)
                }
                None => area_to_height(3.1314e-5, POWTR_A, POWTR_B),
            };
            self.oscillators[gi].heights[0] = h_up;
        }

        let taps = match consts.flow_filter {
            FlowFilter::Fir1 { order } => Some(fir1_lowpass(order, 2000.0 / consts.fs)),
            FlowFilter::None => None,
        };
        let mut ug_history: Vec<f64> = Vec::with_capacity(num_iter);

        let mut ps = self.subglottal_control.first().copied().unwrap_or(0.0);
        let mut radiated_prev = 0.0;
        let mut termination = Termination::Completed;

        for k in 0..num_iter {
            if self.subglottal.is_none() || k == 0 {
                ps = self
                    .subglottal_control
                    .get(k)
                    .or(self.subglottal_control.last())
                    .copied()
                    .unwrap_or(0.0);
            }
            let a_chink = self
                .chink
                .map(|c| self.segments[c].areas.frame(k).area[0])
                .unwrap_or(0.0);

            let oral_char = self.segments[0].areas.frame(k).characteristics();
            let input_area = self.segments[0].areas.frame(k).area[0];
            let constriction_length =
                self.segments[0].areas.frame(k).length[oral_char.constriction_location];

            // Supraglottal oscillators write their opening back into the
            // host geometry before the element update.
            for oi in 0..self.oscillators.len() {
                if let OscillatorKind::Tongue { segment, position } = self.oscillators[oi].kind {
                    let host_area = self.segments[segment].areas.frame(k).area[position];
                    let o = &mut self.oscillators[oi];
                    o.heights[0] = area_to_height(host_area, POWTR_A, POWTR_B);
                    o.update_impedance(consts, 0.0, host_area, oral_char.constriction_area, constriction_length);
                    let new_area = height_to_area(o.separation_height, POWTR_A, POWTR_B).max(1e-8);
                    self.segments[segment].areas.frame_mut(k).area[position] = new_area;
                }
            }

            // Glottal drive for this sample.
            let mut drive = GlottalDrive {
                ps: if self.subglottal.is_some() { 0.0 } else { ps },
                lung: self
                    .subglottal_control
                    .get(k)
                    .or(self.subglottal_control.last())
                    .copied()
                    .unwrap_or(0.0),
                ..GlottalDrive::default()
            };
            let mut glottal_area;
            match glottis_idx {
                Some(gi) => {
                    let lg = self.oscillators[gi].output_length[k];
                    let g = &mut self.oscillators[gi];
                    g.length = lg;
                    g.abduction_offset = g.low_frequency_abduction.get(k).copied().unwrap_or(0.0);
                    g.upstream_pressure = ps;
                    g.update_impedance(
                        consts,
                        a_chink,
                        input_area,
                        oral_char.constriction_area,
                        constriction_length,
                    );
                    glottal_area = g.area;
                    drive.inductance = g.inductance;
                    drive.bernoulli = g.bernoulli;
                }
                None => {
                    // Parametric glottis: closed-form viscous resistance on
                    // the commanded area, no mechanics. The abduction input
                    // shortens the vibrating length as for an oscillator.
                    let ag = self.input_glottal_area.as_ref().unwrap()[k].max(consts.amin);
                    glottal_area = ag;
                    let ab = (self.input_abduction.as_ref().unwrap()[k] / 2.5e-5)
                        .clamp(0.0, 1.0);
                    let lg = 1.4e-2 * (1.0 - (ab * ab).min(1.0 - consts.amin));
                    let w_total = 3e-3;
                    drive.inductance = 0.0;
                    drive.bernoulli = 0.0;
                    drive.contact = ag <= consts.amin;
                    let rg = 12.0 * consts.mu * lg * lg * w_total / (ag * ag * ag);
                    drive.resistance = rg;
                }
            }
            glottal_area = glottal_area.max(consts.amin);

            // Element update per segment.
            for ks in 0..self.segments.len() {
                let upstream = match self.segments[ks].role {
                    SegmentRole::MainOralTract => glottal_area + a_chink,
                    SegmentRole::SubGlottalTract => 1.0,
                    SegmentRole::GlottalChink => a_chink.max(consts.amin),
                    SegmentRole::Branch => {
                        let att = self.segments[ks].parent.expect("validated");
                        self.segments[att.parent].areas.frame(k).area[att.junction]
                    }
                };
                let downstream = match self.segments[ks].role {
                    SegmentRole::SubGlottalTract => glottal_area,
                    _ => 0.0,
                };
                let termination_kind = self.segments[ks].termination();
                let is_sub = self.segments[ks].role == SegmentRole::SubGlottalTract;
                let flow_prev = self.segments[ks].state.flow_prev.clone();
                let af = self.segments[ks].areas.frame(k).clone();
                self.segments[ks].elements.compute(
                    &af,
                    consts,
                    &flow_prev,
                    upstream,
                    downstream,
                    termination_kind,
                    is_sub,
                );
            }

            // A supraglottal oscillator replaces the host half-tube inertance
            // at its position.
            for o in &self.oscillators {
                if let OscillatorKind::Tongue { segment, position } = o.kind {
                    self.segments[segment].elements.lj[position] = 0.0;
                }
            }

            // Frication state of the oral tract.
            if consts.noise_amplitude > 0.0 {
                let u_for_noise = match glottis_idx {
                    Some(gi) => self.oscillators[gi].dc_flow,
                    None => self.segments[0].state.glottal_flow,
                };
                self.segments[0].compute_reynolds(u_for_noise, k, consts);
                self.segments[0].compute_noise(consts, consts.noise_amplitude, k, &mut rng);
            }

            // Mechanical parameter update + contact check.
            if let Some(gi) = glottis_idx {
                let f0 = self.oscillators[gi]
                    .fundamental_frequency
                    .get(k)
                    .copied()
                    .unwrap_or(120.0);
                let pa = self.oscillators[gi]
                    .partial_abduction
                    .get(k)
                    .copied()
                    .unwrap_or(1.0);
                self.oscillators[gi].update_param(consts, f0, pa);
                let g = &self.oscillators[gi];
                let e = &self.segments[0].elements;
                drive.resistance = g.resistance
                    + e.rj[0]
                    + e.rcm[0]
                    + 2.0 * (g.inductance + e.lj[0]) / t;
                drive.contact = g.is_contact;
            } else {
                let e = &self.segments[0].elements;
                drive.resistance += e.rj[0] + e.rcm[0] + 2.0 * e.lj[0] / t;
            }
            for oi in 0..self.oscillators.len() {
                if matches!(self.oscillators[oi].kind, OscillatorKind::Tongue { .. }) {
                    let f0 = self.oscillators[oi]
                        .fundamental_frequency
                        .get(k)
                        .copied()
                        .unwrap_or(30.0);
                    let pa = self.oscillators[oi]
                        .partial_abduction
                        .get(k)
                        .copied()
                        .unwrap_or(1.0);
                    self.oscillators[oi].update_param(consts, f0, pa);
                }
            }

            // Assemble and solve; a singular system truncates the run.
            let (wmat, fvec) = self.assemble(consts, &drive);
            let Some((ut, ug)) = self.solve(&wmat, &fvec, &drive, consts) else {
                tracing::warn!(sample = k, "singular global system; returning partial signal");
                termination = Termination::SolverFailure { sample: k };
                break;
            };
            self.propagate(&ut, ug, consts, &drive);

            if let Some(sg) = self.subglottal {
                let n = self.segments[sg].n_tubes();
                ps = self.segments[sg].state.pressure[n - 1];
            }

            // Radiated sample: discrete derivative of the summed radiating
            // terminal flows.
            let mut um = 0.0;
            for &r in &self.radiating {
                let n = self.segments[r].n_tubes();
                um += self.segments[r].state.flow[n];
            }
            let radiated = um - radiated_prev;
            radiated_prev = um;

            // Oscillator dynamics consume the updated pressures.
            if let Some(gi) = glottis_idx {
                let p_downstream = self.segments[0].state.pressure[0];
                let ug_now = match &taps {
                    Some(taps) => {
                        ug_history.push(ug);
                        if oral_char.constriction_location * 100
                            >= 85 * self.segments[0].n_tubes()
                        {
                            fir_apply_latest(taps, &ug_history)
                        } else {
                            ug
                        }
                    }
                    None => ug,
                };
                let g = &mut self.oscillators[gi];
                g.prev_flow = g.inst_flow;
                g.inst_flow = ug_now;
                g.downstream_pressure = p_downstream;
                match g.model {
                    FoldModel::Smooth => {
                        g.applied_force(consts);
                        g.update_mass_position(consts);
                    }
                    FoldModel::IshizakaFlanagan => g.update_mass_ishiflan(consts),
                }
            }
            for oi in 0..self.oscillators.len() {
                if let OscillatorKind::Tongue { segment, position } = self.oscillators[oi].kind {
                    let up = self.segments[segment].state.pressure[position.saturating_sub(1)];
                    let down = self.segments[segment].state.pressure
                        [(position + 1).min(self.segments[segment].n_tubes())];
                    let flow = self.segments[segment].state.flow[position];
                    let o = &mut self.oscillators[oi];
                    o.upstream_pressure = up;
                    o.downstream_pressure = down;
                    o.prev_flow = o.inst_flow;
                    o.inst_flow = flow;
                    match o.model {
                        FoldModel::Smooth => {
                            o.applied_force(consts);
                            o.update_mass_position(consts);
                        }
                        FoldModel::IshizakaFlanagan => o.update_mass_ishiflan(consts),
                    }
                }
            }

            self.record(radiated);
        }

        Ok(SynthesisOutcome {
            pressure_radiated: self.pressure_radiated.clone(),
            termination,
        })
    }

    /// Linearly resample the recorded trajectories to a lower output rate.
    /// A target at or above the simulation rate is refused with a warning.
    pub fn resample_output(&mut self, fso: f64) {
        let fsi = self.simulation_frequency;
        if fso >= fsi || fsi <= 0.0 {
            tracing::warn!(fso, fsi, "output rate must be below the simulation rate");
            return;
        }
        let npts = (self.pressure_radiated.len() as f64 * fso / fsi) as usize;
        if npts == 0 {
            return;
        }
        self.pressure_radiated = resample_linear(&self.pressure_radiated, npts);
        if !self.subglottal_control.is_empty() {
            self.subglottal_control = resample_linear(&self.subglottal_control, npts);
        }
        for s in &mut self.segments {
            s.state.glottal_flow_history = resample_linear(&s.state.glottal_flow_history, npts);
            s.state.reynolds_history = resample_linear(&s.state.reynolds_history, npts);
        }
        self.simulation_frequency = fso;
    }
}

/// Largest real root of `a·x² + b·x + c = 0`; `None` when complex.
fn solve_quadratic(a: f64, b: f64, c: f64) -> Option<f64> {
    let delta = b * b - 4.0 * a * c;
    if delta < 0.0 {
        return None;
    }
    let s = delta.sqrt();
    let x1 = (-b + s) / (2.0 * a);
    let x2 = (-b - s) / (2.0 * a);
    Some(x1.max(x2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveguide::Attachment;
    use crate::{AreaFunction, AreaSequence};

    fn vowel_shape() -> AreaFunction {
        AreaFunction::new(
            vec![2.6e-4, 1.9e-4, 1.2e-4, 0.9e-4, 1.5e-4, 3.1e-4, 4.3e-4, 3.8e-4],
            vec![0.021; 8],
        )
        .unwrap()
    }

    fn voiced_network(num_samples: usize, f0: f64) -> VtNetwork {
        let oral =
            Waveguide::main_oral_tract(AreaSequence::constant(vowel_shape(), num_samples));
        let mut glottis = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        glottis.fundamental_frequency = vec![f0; num_samples];
        glottis.partial_abduction = vec![0.0; num_samples];
        let mut net = VtNetwork::new(vec![oral], vec![glottis]).unwrap();
        // Soft pressure onset over the first 100 samples.
        net.subglottal_control = (0..num_samples)
            .map(|k| 800.0 * (k as f64 / 100.0).min(1.0))
            .collect();
        net
    }

    #[test]
    fn test_row_offsets_contract() {
        let n = 64;
        let oral = Waveguide::main_oral_tract(AreaSequence::constant(vowel_shape(), n));
        let nasal = Waveguide::branch(
            AreaSequence::constant(
                AreaFunction::new(vec![1e-4; 6], vec![0.015; 6]).unwrap(),
                n,
            ),
            Attachment {
                parent: 0,
                junction: 3,
            },
            true,
        );
        let sub = Waveguide::subglottal_tract(AreaSequence::constant(
            AreaFunction::new(vec![2e-4; 5], vec![0.03; 5]).unwrap(),
            n,
        ));
        let chink = Waveguide::glottal_chink(AreaSequence::constant(
            AreaFunction::new(vec![2e-6], vec![0.003]).unwrap(),
            n,
        ));
        let net = VtNetwork::new(vec![oral, nasal, sub, chink], vec![]).unwrap();

        // Oral: 9 rows, nasal: 7, subglottal: 6 (5 flows + po), chink: 1.
        assert_eq!(net.row_offsets(), &[0, 9, 16, 22]);
        assert_eq!(net.n_unknowns(), 23);
    }

    #[test]
    fn test_topology_validation() {
        let n = 8;
        let shape = AreaSequence::constant(vowel_shape(), n);
        let chink_shape = AreaSequence::constant(
            AreaFunction::new(vec![2e-6], vec![0.003]).unwrap(),
            n,
        );

        // A branch cannot be segment 0.
        let branch = Waveguide::branch(
            shape.clone(),
            Attachment {
                parent: 0,
                junction: 1,
            },
            false,
        );
        assert!(matches!(
            VtNetwork::new(vec![branch], vec![]),
            Err(TopologyError::MissingOralTract)
        ));

        // Two chinks are rejected.
        let oral = Waveguide::main_oral_tract(shape.clone());
        let c1 = Waveguide::glottal_chink(chink_shape.clone());
        let c2 = Waveguide::glottal_chink(chink_shape.clone());
        assert!(matches!(
            VtNetwork::new(vec![oral, c1, c2], vec![]),
            Err(TopologyError::DuplicateChink)
        ));

        // The chink must be last.
        let oral = Waveguide::main_oral_tract(shape.clone());
        let c = Waveguide::glottal_chink(chink_shape.clone());
        let b = Waveguide::branch(
            AreaSequence::constant(
                AreaFunction::new(vec![1e-4; 4], vec![0.01; 4]).unwrap(),
                n,
            ),
            Attachment {
                parent: 0,
                junction: 2,
            },
            false,
        );
        assert!(matches!(
            VtNetwork::new(vec![oral, c, b], vec![]),
            Err(TopologyError::ChinkNotLast)
        ));

        // Out-of-range junction.
        let oral = Waveguide::main_oral_tract(shape.clone());
        let b = Waveguide::branch(
            AreaSequence::constant(
                AreaFunction::new(vec![1e-4; 4], vec![0.01; 4]).unwrap(),
                n,
            ),
            Attachment {
                parent: 0,
                junction: 9,
            },
            false,
        );
        assert!(matches!(
            VtNetwork::new(vec![oral, b], vec![]),
            Err(TopologyError::JunctionOutOfRange { .. })
        ));

        // Two glottis oscillators are rejected.
        let oral = Waveguide::main_oral_tract(shape);
        let g1 = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        let g2 = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        assert!(matches!(
            VtNetwork::new(vec![oral], vec![g1, g2]),
            Err(TopologyError::DuplicateGlottis)
        ));
    }

    #[test]
    fn test_missing_glottal_drive_fails_fast() {
        let mut net = VtNetwork::new(
            vec![Waveguide::main_oral_tract(AreaSequence::constant(
                vowel_shape(),
                16,
            ))],
            vec![],
        )
        .unwrap();
        net.subglottal_control = vec![800.0; 16];
        let consts = SimConstants::default();
        assert!(matches!(
            net.synthesize(&consts),
            Err(ConfigError::MissingGlottalDrive)
        ));
    }

    #[test]
    fn test_synthesis_output_shape_and_finiteness() {
        let n = 3000;
        let mut net = voiced_network(n, 120.0);
        let consts = SimConstants::default();
        let out = net.synthesize(&consts).unwrap();

        assert_eq!(out.termination, Termination::Completed);
        assert_eq!(out.pressure_radiated.len(), n);
        assert!(
            out.pressure_radiated.iter().any(|&x| x != 0.0),
            "radiated signal must not be identically zero"
        );
        for (k, &x) in out.pressure_radiated.iter().enumerate() {
            assert!(x.is_finite(), "non-finite radiated sample at {k}");
        }
        // Side effect: full per-sample state recorded for analysis.
        assert_eq!(net.segments[0].state.pressure_history.len(), n);
        assert_eq!(net.segments[0].state.glottal_flow_history.len(), n);
        assert_eq!(net.oscillator_history[0].len(), n);
    }

    #[test]
    fn test_synthesis_voicing_periodicity() {
        let n = 4000;
        let f0 = 120.0;
        let mut net = voiced_network(n, f0);
        let consts = SimConstants::default();
        let out = net.synthesize(&consts).unwrap();
        assert_eq!(out.termination, Termination::Completed);

        // Autocorrelation pitch check on the established-voicing tail.
        let x = &out.pressure_radiated[n / 2..];
        let mean = x.iter().sum::<f64>() / x.len() as f64;
        let xc: Vec<f64> = x.iter().map(|v| v - mean).collect();
        let lag_min = (consts.fs / 400.0) as usize;
        let lag_max = (consts.fs / 60.0) as usize;
        let mut best_lag = lag_min;
        let mut best = f64::NEG_INFINITY;
        for lag in lag_min..=lag_max.min(xc.len() / 2) {
            let mut acc = 0.0;
            for i in 0..xc.len() - lag {
                acc += xc[i] * xc[i + lag];
            }
            if acc > best {
                best = acc;
                best_lag = lag;
            }
        }
        let period_expected = consts.fs / f0;
        let ratio = best_lag as f64 / period_expected;
        // A pitch-tracking sanity check, not exact equality: the two-mass
        // model phonates near (not exactly at) the commanded f0, and the
        // autocorrelation peak may sit on a subharmonic of the lag grid.
        assert!(
            (0.4..=2.6).contains(&ratio),
            "voicing period {best_lag} samples vs expected ~{period_expected}"
        );
    }

    #[test]
    fn test_synthesis_with_chink_and_subglottal_runs() {
        let n = 600;
        let oral = Waveguide::main_oral_tract(AreaSequence::constant(vowel_shape(), n));
        let sub = Waveguide::subglottal_tract(AreaSequence::constant(
            AreaFunction::new(vec![2.0e-4, 2.4e-4, 2.8e-4], vec![0.04; 3]).unwrap(),
            n,
        ));
        let chink = Waveguide::glottal_chink(AreaSequence::constant(
            AreaFunction::new(vec![2e-6], vec![0.003]).unwrap(),
            n,
        ));
        let mut glottis = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        glottis.fundamental_frequency = vec![110.0; n];
        glottis.partial_abduction = vec![0.2; n];
        let mut net = VtNetwork::new(vec![oral, sub, chink], vec![glottis]).unwrap();
        net.subglottal_control = (0..n)
            .map(|k| 700.0 * (k as f64 / 80.0).min(1.0))
            .collect();

        let consts = SimConstants::default();
        let out = net.synthesize(&consts).unwrap();
        assert_eq!(out.pressure_radiated.len(), n);
        for &x in &out.pressure_radiated {
            assert!(x.is_finite());
        }
        // The chink leak flow was recorded.
        let chink_idx = 2;
        assert_eq!(
            net.segments[chink_idx].state.glottal_flow_history.len(),
            n
        );
    }

    #[test]
    fn test_synthesis_with_nasal_branch_runs() {
        let n = 600;
        let oral = Waveguide::main_oral_tract(AreaSequence::constant(vowel_shape(), n));
        let nasal = Waveguide::branch(
            AreaSequence::constant(
                AreaFunction::new(vec![0.5e-4, 1.0e-4, 1.4e-4, 1.0e-4], vec![0.02; 4]).unwrap(),
                n,
            ),
            Attachment {
                parent: 0,
                junction: 4,
            },
            true,
        );
        let mut glottis = Oscillator::glottis(FoldModel::IshizakaFlanagan);
        glottis.fundamental_frequency = vec![120.0; n];
        glottis.partial_abduction = vec![0.0; n];
        let mut net = VtNetwork::new(vec![oral, nasal], vec![glottis]).unwrap();
        net.subglottal_control = (0..n)
            .map(|k| 800.0 * (k as f64 / 80.0).min(1.0))
            .collect();

        let consts = SimConstants::default();
        let out = net.synthesize(&consts).unwrap();
        assert_eq!(out.termination, Termination::Completed);
        for &x in &out.pressure_radiated {
            assert!(x.is_finite());
        }
    }

    #[test]
    fn test_parametric_glottis_runs() {
        let n = 500;
        let oral = Waveguide::main_oral_tract(AreaSequence::constant(vowel_shape(), n));
        let mut net = VtNetwork::new(vec![oral], vec![]).unwrap();
        net.subglottal_control = vec![700.0; n];
        // A 100 Hz triangular glottal area pulse train.
        let fs = 44_100.0;
        net.input_glottal_area = Some(
            (0..n)
                .map(|k| {
                    let phase = (k as f64 * 100.0 / fs).fract();
                    5e-6 * (1.0 - (2.0 * phase - 1.0).abs())
                })
                .collect(),
        );
        net.input_abduction = Some(vec![5e-6; n]);

        let consts = SimConstants::default();
        let out = net.synthesize(&consts).unwrap();
        assert_eq!(out.pressure_radiated.len(), n);
        assert!(out.pressure_radiated.iter().any(|&x| x != 0.0));
        for &x in &out.pressure_radiated {
            assert!(x.is_finite());
        }
    }

    #[test]
    fn test_network_transfer_function_with_branch() {
        let n = 4;
        let oral = Waveguide::main_oral_tract(AreaSequence::constant(
            AreaFunction::uniform(vec![3e-4; 20], 0.17).unwrap(),
            n,
        ));
        let nasal = Waveguide::branch(
            AreaSequence::constant(
                AreaFunction::new(vec![1e-4; 8], vec![0.012; 8]).unwrap(),
                n,
            ),
            Attachment {
                parent: 0,
                junction: 10,
            },
            true,
        );
        let net = VtNetwork::new(vec![oral, nasal], vec![]).unwrap();

        let consts = SimConstants::default();
        let freq: Vec<f64> = (0..=100).map(|k| k as f64 * 50.0).collect();
        let (tf, _) = net.compute_transfer_function(&freq, 0, &consts, ChainModel::Tmm, None);
        assert_eq!(tf.h.len(), freq.len());
        for h in &tf.h {
            assert!(h.norm().is_finite());
        }

        // The nasal shunt must change the response relative to the bare duct.
        let bare = crate::chain::duct_transfer_function(
            net.segments[0].areas.frame(0),
            &freq,
            &consts,
            ChainModel::Tmm,
        );
        let diff: f64 = tf
            .h
            .iter()
            .zip(&bare.h)
            .map(|(a, b)| (a - b).norm())
            .sum();
        assert!(diff > 1e-9, "branch coupling must perturb the response");
    }

    #[test]
    fn test_constriction_transfer_function_finite() {
        let n = 4;
        let oral = Waveguide::main_oral_tract(AreaSequence::constant(vowel_shape(), n));
        let net = VtNetwork::new(vec![oral], vec![]).unwrap();
        let consts = SimConstants::default();
        let freq: Vec<f64> = (0..=100).map(|k| k as f64 * 50.0).collect();
        let (_, hc) =
            net.compute_transfer_function(&freq, 0, &consts, ChainModel::Tmm, Some(3));
        let hc = hc.expect("constriction transfer requested");
        assert_eq!(hc.len(), freq.len());
        for h in &hc {
            assert!(h.norm().is_finite());
        }
    }

    #[test]
    fn test_resample_output() {
        let n = 1000;
        let mut net = voiced_network(n, 120.0);
        let consts = SimConstants::default();
        net.synthesize(&consts).unwrap();
        net.resample_output(11_025.0);
        assert_eq!(net.pressure_radiated.len(), 250);
        assert_eq!(net.simulation_frequency, 11_025.0);

        // Refused upward resampling leaves everything untouched.
        let len = net.pressure_radiated.len();
        net.resample_output(22_050.0);
        assert_eq!(net.pressure_radiated.len(), len);
    }

    #[test]
    fn test_solve_quadratic() {
        // x² − 3x + 2: roots 1 and 2.
        let r = solve_quadratic(1.0, -3.0, 2.0).unwrap();
        assert!((r - 2.0).abs() < 1e-12);
        assert!(solve_quadratic(1.0, 0.0, 1.0).is_none());
    }
}
