//! Waveguide segments: the tube-network arena nodes.
//!
//! Segments are related by integer indices into the network arena (parent,
//! twin, anabranch re-entry), never by shared references; the network derives
//! the per-parent child lists at build time and validates the topology
//! invariants before any simulation starts.

use crate::elements::{AcousticElements, Termination};
use crate::{AreaSequence, SimConstants};
use rand::Rng;

/// Structural role of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    /// The radiating main tract; always segment 0 and the glottal reference.
    MainOralTract,
    /// Nasal tract or side cavity attached to a parent segment.
    Branch,
    /// Posterior glottal leak: a single parallel flow path, one unknown.
    GlottalChink,
    /// Subglottal tract between the lungs and the glottis.
    SubGlottalTract,
}

/// Attachment of a branch to a parent pressure node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub parent: usize,
    /// Parent pressure-node index (0 .. n_tubes − 1).
    pub junction: usize,
}

/// Per-sample acoustic state and recorded history of one segment.
#[derive(Debug, Clone, Default)]
pub struct TimeAcoustics {
    /// Node pressures, current sample (n+1).
    pub pressure: Vec<f64>,
    /// Junction flows, current sample (n+1).
    pub flow: Vec<f64>,
    /// Previous-sample flows, input to the element update.
    pub flow_prev: Vec<f64>,
    /// Series-inductor memories per flow.
    pub q: Vec<f64>,
    /// Wall-branch memories per node.
    pub qwl: Vec<f64>,
    pub qwc: Vec<f64>,
    /// Node integration terms.
    pub v: Vec<f64>,
    pub vc: Vec<f64>,
    /// Instantaneous glottal-path flow (oral tract: Ug; chink: Uch).
    pub glottal_flow: f64,
    /// Instantaneous Reynolds number at the main constriction.
    pub reynolds: f64,
    /// Subglottal connection pressure unknown.
    pub connection_pressure: f64,
    /// Recorded trajectories, one entry per sample.
    pub pressure_history: Vec<Vec<f64>>,
    pub flow_history: Vec<Vec<f64>>,
    pub glottal_flow_history: Vec<f64>,
    pub reynolds_history: Vec<f64>,
}

impl TimeAcoustics {
    fn reset(&mut self, n_nodes: usize) {
        for v in [
            &mut self.pressure,
            &mut self.flow,
            &mut self.flow_prev,
            &mut self.q,
            &mut self.qwl,
            &mut self.qwc,
            &mut self.v,
            &mut self.vc,
        ] {
            v.clear();
            v.resize(n_nodes, 0.0);
        }
        self.glottal_flow = 0.0;
        self.reynolds = 0.0;
        self.connection_pressure = 0.0;
        self.pressure_history.clear();
        self.flow_history.clear();
        self.glottal_flow_history.clear();
        self.reynolds_history.clear();
    }
}

/// One tube segment of the network.
#[derive(Debug, Clone)]
pub struct Waveguide {
    pub role: SegmentRole,
    /// Time-varying geometry, one frame per sample.
    pub areas: AreaSequence,
    /// Whether the far end radiates (oral tract, nasal tract).
    pub radiating: bool,
    /// Primary attachment for branches.
    pub parent: Option<Attachment>,
    /// Second attachment of an anabranch: the parallel path re-enters its
    /// parent here (must be a later junction of the same parent).
    pub reentry: Option<Attachment>,
    /// Symmetric paired side branch attached at the same parent node.
    pub twin: Option<usize>,
    /// Derived at network build: children attached to this segment, as
    /// `(child index, junction)`.
    pub children: Vec<(usize, usize)>,
    /// Derived at network build: anabranch children re-entering this segment,
    /// as `(child index, re-entry junction)`.
    pub reentries: Vec<(usize, usize)>,
    pub elements: AcousticElements,
    pub state: TimeAcoustics,
}

impl Waveguide {
    pub fn main_oral_tract(areas: AreaSequence) -> Self {
        Self::with_role(SegmentRole::MainOralTract, areas, true, None)
    }

    pub fn branch(areas: AreaSequence, parent: Attachment, radiating: bool) -> Self {
        Self::with_role(SegmentRole::Branch, areas, radiating, Some(parent))
    }

    pub fn glottal_chink(areas: AreaSequence) -> Self {
        Self::with_role(SegmentRole::GlottalChink, areas, false, None)
    }

    pub fn subglottal_tract(areas: AreaSequence) -> Self {
        Self::with_role(SegmentRole::SubGlottalTract, areas, false, None)
    }

    fn with_role(
        role: SegmentRole,
        areas: AreaSequence,
        radiating: bool,
        parent: Option<Attachment>,
    ) -> Self {
        Self {
            role,
            areas,
            radiating,
            parent,
            reentry: None,
            twin: None,
            children: Vec::new(),
            reentries: Vec::new(),
            elements: AcousticElements::default(),
            state: TimeAcoustics::default(),
        }
    }

    pub fn n_tubes(&self) -> usize {
        self.areas.n_tubes()
    }

    /// Number of unknowns this segment contributes to the global system.
    pub fn n_rows(&self) -> usize {
        match self.role {
            SegmentRole::GlottalChink => 1,
            _ => self.n_tubes() + 1,
        }
    }

    /// Far-end termination of this segment.
    pub fn termination(&self) -> Termination {
        match self.role {
            SegmentRole::SubGlottalTract => Termination::GlottalConnection,
            _ if self.radiating => Termination::Radiating,
            _ => Termination::Closed,
        }
    }

    /// Zero every state buffer for a fresh synthesis run.
    pub fn init_acoustics(&mut self) {
        let n_nodes = self.n_tubes() + 1;
        self.state.reset(n_nodes);
    }

    /// Reynolds number of the flow through the segment's tightest tube,
    /// using the equivalent circular diameter.
    pub fn compute_reynolds(&mut self, flow: f64, frame: usize, consts: &SimConstants) -> f64 {
        let af = self.areas.frame(frame);
        let a = af
            .area
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min)
            .max(consts.amin);
        let re = consts.rho * flow.abs() * (4.0 / (std::f64::consts::PI * a)).sqrt() / consts.mu;
        self.state.reynolds = re;
        re
    }

    /// Frication noise: a random pressure source just downstream of the
    /// constriction, active above the critical Reynolds number and scaled by
    /// `Re² − Rec²`. `amplitude` carries the overall calibration.
    pub fn compute_noise<R: Rng>(
        &mut self,
        consts: &SimConstants,
        amplitude: f64,
        frame: usize,
        rng: &mut R,
    ) {
        if amplitude <= 0.0 {
            return;
        }
        let re = self.state.reynolds;
        let rec = consts.reynolds_critical;
        if re <= rec {
            return;
        }
        let af = self.areas.frame(frame);
        let jc = af.characteristics().constriction_location;
        let node = (jc + 1).min(self.n_tubes());
        let excess = re * re - rec * rec;
        self.elements.ns[node] = amplitude * excess * rng.gen_range(-1.0..1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AreaFunction;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn seg() -> Waveguide {
        let af = AreaFunction::new(vec![3e-4, 1e-5, 3e-4], vec![0.05, 0.01, 0.05]).unwrap();
        Waveguide::main_oral_tract(AreaSequence::constant(af, 4))
    }

    #[test]
    fn test_row_counts() {
        let s = seg();
        assert_eq!(s.n_rows(), 4);
        let chink = Waveguide::glottal_chink(AreaSequence::constant(
            AreaFunction::new(vec![1e-6], vec![0.003]).unwrap(),
            4,
        ));
        assert_eq!(chink.n_rows(), 1);
    }

    #[test]
    fn test_init_acoustics_zeroes_state() {
        let mut s = seg();
        s.init_acoustics();
        assert_eq!(s.state.pressure.len(), 4);
        assert!(s.state.q.iter().all(|&x| x == 0.0));
        assert!(s.state.flow_prev.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_reynolds_scales_with_flow() {
        let consts = SimConstants::default();
        let mut s = seg();
        let re1 = s.compute_reynolds(1e-4, 0, &consts);
        let re2 = s.compute_reynolds(2e-4, 0, &consts);
        assert!(re2 > re1, "Reynolds must grow with flow");
        assert!((re2 / re1 - 2.0).abs() < 1e-12, "linear in flow magnitude");
    }

    #[test]
    fn test_noise_gated_by_reynolds() {
        let consts = SimConstants::default();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut s = seg();
        s.init_acoustics();
        s.elements.compute(
            s.areas.frame(0),
            &consts,
            &[0.0; 4],
            1e-5,
            0.0,
            Termination::Radiating,
            false,
        );

        // Laminar: below the critical Reynolds number, no source.
        s.compute_reynolds(1e-6, 0, &consts);
        s.compute_noise(&consts, 1e-12, 0, &mut rng);
        assert!(s.elements.ns.iter().all(|&x| x == 0.0));

        // Turbulent: a tight constriction and a strong flow set the source
        // just downstream of the constriction.
        s.compute_reynolds(5e-3, 0, &consts);
        assert!(s.state.reynolds > consts.reynolds_critical);
        s.compute_noise(&consts, 1e-12, 0, &mut rng);
        assert!(
            s.elements.ns[2] != 0.0,
            "noise source must sit after the constriction"
        );
    }
}
