//! Area functions: tube geometry, resampling, articulatory transforms, and
//! the cm²/cm tube-list interchange schema.

use crate::constants::{area_to_height, height_to_area, POWTR_A, POWTR_B};
use crate::AreaError;
use serde::{Deserialize, Serialize};

/// One tube record of the interchange schema. Areas are stored in cm² and
/// abscissae in cm, as produced by area-function editors; conversion to SI
/// happens at this boundary and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tube {
    pub area_cm2: f64,
    pub x_cm: f64,
}

/// Cross-sectional areas (m²) and tube lengths (m) of one duct, glottis end
/// first. A static snapshot; time-varying shapes are [`AreaSequence`].
#[derive(Debug, Clone, PartialEq)]
pub struct AreaFunction {
    pub area: Vec<f64>,
    pub length: Vec<f64>,
}

/// Derived shape characteristics, recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Characteristics {
    /// Sum of tube lengths (m).
    pub total_length: f64,
    /// Smallest cross-sectional area (m²).
    pub constriction_area: f64,
    /// Tube index of the smallest area.
    pub constriction_location: usize,
}

impl AreaFunction {
    pub fn new(area: Vec<f64>, length: Vec<f64>) -> Result<Self, AreaError> {
        if area.len() != length.len() {
            return Err(AreaError::ShapeMismatch {
                area: area.len(),
                length: length.len(),
            });
        }
        if area.is_empty() {
            return Err(AreaError::TooFewTubes(0));
        }
        Ok(Self { area, length })
    }

    /// Uniform-length shape: `n` tubes sharing `total_length`.
    pub fn uniform(area: Vec<f64>, total_length: f64) -> Result<Self, AreaError> {
        let n = area.len();
        if n == 0 {
            return Err(AreaError::TooFewTubes(0));
        }
        let length = vec![total_length / n as f64; n];
        Ok(Self { area, length })
    }

    pub fn n_tubes(&self) -> usize {
        self.area.len()
    }

    /// Total length, constriction area, and constriction location. Pure
    /// recomputation from the current arrays; calling it twice without
    /// mutation yields identical results.
    pub fn characteristics(&self) -> Characteristics {
        let total_length = self.length.iter().sum();
        let (constriction_location, constriction_area) = self
            .area
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |(bi, bv), (i, v)| {
                if v < bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            });
        Characteristics {
            total_length,
            constriction_area,
            constriction_location,
        }
    }

    /// Resample onto `num_tubes` tubes of equal length by nearest-neighbour
    /// lookup on the cumulative-length axis. Total length is preserved.
    pub fn interpolate(&self, num_tubes: usize) -> Result<AreaFunction, AreaError> {
        let n = self.n_tubes();
        if n < 2 {
            return Err(AreaError::TooFewTubes(n));
        }
        if num_tubes == 0 {
            return Err(AreaError::TooFewTubes(0));
        }
        let total: f64 = self.length.iter().sum();

        // Midpoint abscissa of every source tube.
        let mut centers = Vec::with_capacity(n);
        let mut x = 0.0;
        for &l in &self.length {
            centers.push(x + 0.5 * l);
            x += l;
        }

        let dl = total / num_tubes as f64;
        let mut area = Vec::with_capacity(num_tubes);
        for k in 0..num_tubes {
            let xq = (k as f64 + 0.5) * dl;
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|a, b| (a.1 - xq).abs().total_cmp(&(b.1 - xq).abs()))
                .map(|(i, _)| i)
                .unwrap_or(0);
            area.push(self.area[nearest]);
        }
        Ok(AreaFunction {
            area,
            length: vec![dl; num_tubes],
        })
    }

    /// Rotate the midsagittal profile beyond `pivot` to a new jaw-opening
    /// angle (radians), then re-interpolate onto a uniform grid of the same
    /// tube count. Areas driven non-positive by the rotation are clamped to
    /// `amin` and a contact warning is logged; the clamp is non-fatal.
    pub fn change_jaw_opening(&mut self, new_angle: f64, pivot: usize, amin: f64) {
        let n = self.n_tubes();
        if pivot + 1 >= n {
            return;
        }

        // Midsagittal heights and abscissae of the rotated portion.
        let mut x = self.length[..=pivot].iter().sum::<f64>();
        let x_pivot = x;
        let mut xs = Vec::with_capacity(n - pivot - 1);
        let mut hs = Vec::with_capacity(n - pivot - 1);
        for k in pivot + 1..n {
            x += 0.5 * self.length[k];
            xs.push(x);
            hs.push(area_to_height(self.area[k], POWTR_A, POWTR_B));
            x += 0.5 * self.length[k];
        }

        // Current opening angle: mean slope of the profile about the pivot.
        let mut slope = 0.0;
        for (xk, hk) in xs.iter().zip(&hs) {
            slope += hk / (xk - x_pivot);
        }
        slope /= xs.len() as f64;
        let cur_angle = slope.atan();
        let dtan = new_angle.tan() - cur_angle.tan();

        let mut contact = false;
        for ((k, xk), hk) in (pivot + 1..n).zip(&xs).zip(&hs) {
            let h_new = hk + (xk - x_pivot) * dtan;
            let mut a_new = height_to_area(h_new, POWTR_A, POWTR_B);
            if a_new <= 0.0 {
                a_new = amin;
                contact = true;
            }
            self.area[k] = a_new;
        }
        if contact {
            tracing::warn!(
                pivot,
                new_angle,
                "jaw rotation produced tongue/palate contact; area clamped to floor"
            );
        }

        if let Ok(regridded) = self.interpolate(n) {
            *self = regridded;
        }
    }

    /// Redistribute length uniformly across the lip tubes beyond `orig_teeth`
    /// so that their summed length becomes `new_length`.
    pub fn change_protrusion(&mut self, new_length: f64, orig_teeth: usize) {
        let n = self.n_tubes();
        if orig_teeth >= n {
            return;
        }
        let count = n - orig_teeth;
        let current: f64 = self.length[orig_teeth..].iter().sum();
        let delta = (new_length - current) / count as f64;
        for l in &mut self.length[orig_teeth..] {
            *l = (*l + delta).max(1e-6);
        }
    }

    /// Move `pct` percent of the way toward `target`, interpolating area and
    /// length piecewise-linearly over a normalized abscissa in [0, 1]. The
    /// result keeps this shape's tube count.
    pub fn morph_toward(&self, target: &AreaFunction, pct: f64) -> AreaFunction {
        let t = (pct / 100.0).clamp(0.0, 1.0);
        let n = self.n_tubes();
        let target_area = resample_linear(&target.area, n);
        let target_length = resample_linear(&target.length, n);
        let area = self
            .area
            .iter()
            .zip(&target_area)
            .map(|(a, b)| a + t * (b - a))
            .collect();
        let length = self
            .length
            .iter()
            .zip(&target_length)
            .map(|(a, b)| a + t * (b - a))
            .collect();
        AreaFunction { area, length }
    }

    /// Clamp every area at the floor `amin`.
    pub fn clamp_floor(&mut self, amin: f64) {
        for a in &mut self.area {
            if *a < amin {
                *a = amin;
            }
        }
    }

    /// Export to the cm²/cm tube-list schema. `x_cm` is the cumulative
    /// abscissa at the downstream end of each tube.
    pub fn to_tubes(&self) -> Vec<Tube> {
        let mut x = 0.0;
        self.area
            .iter()
            .zip(&self.length)
            .map(|(&a, &l)| {
                x += l;
                Tube {
                    area_cm2: a * 1e4,
                    x_cm: x * 1e2,
                }
            })
            .collect()
    }

    /// Import from the tube-list schema, inverting the unit conversion of
    /// [`to_tubes`](Self::to_tubes) exactly.
    pub fn from_tubes(tubes: &[Tube]) -> Result<Self, AreaError> {
        if tubes.is_empty() {
            return Err(AreaError::TooFewTubes(0));
        }
        let mut area = Vec::with_capacity(tubes.len());
        let mut length = Vec::with_capacity(tubes.len());
        let mut prev_x = 0.0;
        for t in tubes {
            area.push(t.area_cm2 * 1e-4);
            length.push((t.x_cm - prev_x) * 1e-2);
            prev_x = t.x_cm;
        }
        Self::new(area, length)
    }
}

/// Piecewise-linear resampling of `y` onto `n` points over a normalized
/// abscissa in [0, 1].
pub(crate) fn resample_linear(y: &[f64], n: usize) -> Vec<f64> {
    let m = y.len();
    if m == n {
        return y.to_vec();
    }
    if m == 1 {
        return vec![y[0]; n];
    }
    (0..n)
        .map(|k| {
            let u = k as f64 / (n - 1).max(1) as f64 * (m - 1) as f64;
            let i = (u.floor() as usize).min(m - 2);
            let frac = u - i as f64;
            y[i] + frac * (y[i + 1] - y[i])
        })
        .collect()
}

/// A time-varying area function: one frame per simulation control step, all
/// frames sharing a tube count.
#[derive(Debug, Clone)]
pub struct AreaSequence {
    frames: Vec<AreaFunction>,
}

impl AreaSequence {
    pub fn new(frames: Vec<AreaFunction>) -> Result<Self, AreaError> {
        if frames.is_empty() {
            return Err(AreaError::TooFewTubes(0));
        }
        let n = frames[0].n_tubes();
        for f in &frames[1..] {
            if f.n_tubes() != n {
                return Err(AreaError::FrameMismatch(n, f.n_tubes()));
            }
        }
        Ok(Self { frames })
    }

    /// A static shape repeated for `num_frames`.
    pub fn constant(shape: AreaFunction, num_frames: usize) -> Self {
        Self {
            frames: vec![shape; num_frames.max(1)],
        }
    }

    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn n_tubes(&self) -> usize {
        self.frames[0].n_tubes()
    }

    pub fn frame(&self, k: usize) -> &AreaFunction {
        &self.frames[k.min(self.frames.len() - 1)]
    }

    pub fn frame_mut(&mut self, k: usize) -> &mut AreaFunction {
        let i = k.min(self.frames.len() - 1);
        &mut self.frames[i]
    }

    pub fn frames(&self) -> &[AreaFunction] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vowel_like() -> AreaFunction {
        AreaFunction::new(
            vec![2.6e-4, 1.9e-4, 0.9e-4, 0.5e-4, 1.2e-4, 3.1e-4, 4.3e-4, 3.8e-4],
            vec![0.02; 8],
        )
        .unwrap()
    }

    #[test]
    fn test_interpolate_tube_count_and_length() {
        let af = vowel_like();
        let total = af.characteristics().total_length;
        for m in [4, 8, 17, 44] {
            let out = af.interpolate(m).unwrap();
            assert_eq!(out.n_tubes(), m);
            let total_out = out.characteristics().total_length;
            assert!(
                (total_out - total).abs() < 1e-12,
                "total length must be preserved: {total} vs {total_out}"
            );
        }
    }

    #[test]
    fn test_interpolate_rejects_degenerate() {
        let af = AreaFunction::new(vec![1e-4], vec![0.02]).unwrap();
        assert!(af.interpolate(10).is_err());
    }

    #[test]
    fn test_characteristics_idempotent() {
        let af = vowel_like();
        let a = af.characteristics();
        let b = af.characteristics();
        assert_eq!(a, b);
        assert_eq!(a.constriction_location, 3);
        assert!((a.constriction_area - 0.5e-4).abs() < 1e-18);
    }

    #[test]
    fn test_tube_list_round_trip() {
        let af = vowel_like();
        let tubes = af.to_tubes();
        let back = AreaFunction::from_tubes(&tubes).unwrap();
        for (a, b) in af.area.iter().zip(&back.area) {
            assert!((a - b).abs() < 1e-15, "area round trip: {a} vs {b}");
        }
        for (a, b) in af.length.iter().zip(&back.length) {
            assert!((a - b).abs() < 1e-15, "length round trip: {a} vs {b}");
        }
    }

    #[test]
    fn test_tube_list_json_round_trip() {
        let af = vowel_like();
        let json = serde_json::to_string(&af.to_tubes()).unwrap();
        let tubes: Vec<Tube> = serde_json::from_str(&json).unwrap();
        let back = AreaFunction::from_tubes(&tubes).unwrap();
        for (a, b) in af.area.iter().zip(&back.area) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_morph_endpoints() {
        let a = vowel_like();
        let mut b = vowel_like();
        for v in &mut b.area {
            *v *= 2.0;
        }
        let at_zero = a.morph_toward(&b, 0.0);
        let at_full = a.morph_toward(&b, 100.0);
        assert_eq!(at_zero, a);
        for (x, y) in at_full.area.iter().zip(&b.area) {
            assert!((x - y).abs() < 1e-15);
        }
        let mid = a.morph_toward(&b, 50.0);
        for ((x, lo), hi) in mid.area.iter().zip(&a.area).zip(&b.area) {
            assert!(*x > *lo && *x < *hi, "midpoint should lie strictly between");
        }
    }

    #[test]
    fn test_protrusion_hits_target_length() {
        let mut af = vowel_like();
        af.change_protrusion(0.06, 5);
        let lip_len: f64 = af.length[5..].iter().sum();
        assert!((lip_len - 0.06).abs() < 1e-12, "lip length {lip_len}");
    }

    #[test]
    fn test_jaw_opening_keeps_positive_areas() {
        let mut af = vowel_like();
        af.change_jaw_opening(-0.6, 2, 1e-11);
        assert_eq!(af.n_tubes(), 8);
        for &a in &af.area {
            assert!(a >= 1e-11, "clamp floor violated: {a}");
        }
    }

    #[test]
    fn test_jaw_opening_widens_front_tubes() {
        let mut af = vowel_like();
        let before: f64 = af.area[6];
        af.change_jaw_opening(1.0, 2, 1e-11);
        // Opening the jaw should enlarge the anterior tubes.
        let after = af.area[6];
        assert!(
            after > before,
            "positive rotation should widen the front: {before} -> {after}"
        );
    }
}
