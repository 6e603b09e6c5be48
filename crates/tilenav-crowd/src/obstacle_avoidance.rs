//! Velocity-space obstacle avoidance sampling
//!
//! Candidate velocities are scored by a four-term penalty: deviation from
//! the desired velocity, deviation from the current velocity, a side bias
//! that keeps the avoidance direction consistent across obstacles, and an
//! inverse time-to-impact term from sweeping the candidate against every
//! registered obstacle. Two samplers share the scoring: a brute-force grid
//! and a coarse-to-fine adaptive pattern.

use serde::{Deserialize, Serialize};
use tilenav_common::{
    distance_pt_seg_sqr_2d, dist_2d, dot_2d, normalize_2d, perp_2d, rotate_2d, sqr, tri_area_2d,
    Vec3,
};

/// Maximum angular divisions of the adaptive sampling pattern.
pub const MAX_PATTERN_DIVS: usize = 32;

/// Maximum rings of the adaptive sampling pattern.
pub const MAX_PATTERN_RINGS: usize = 4;

/// A moving circular obstacle (typically another agent).
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleCircle {
    /// Position of the obstacle.
    pub p: Vec3,
    /// Velocity of the obstacle.
    pub vel: Vec3,
    /// Velocity the obstacle wants to travel at.
    pub dvel: Vec3,
    /// Radius of the obstacle.
    pub rad: f32,
    /// Separation direction, set up by `prepare`.
    pub dp: Vec3,
    /// Avoidance-side normal, set up by `prepare`.
    pub np: Vec3,
}

/// A static wall obstacle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObstacleSegment {
    /// Segment endpoints.
    pub p: Vec3,
    pub q: Vec3,
    /// True when the agent already stands within epsilon of the segment.
    pub touch: bool,
}

/// Tuning parameters for the avoidance samplers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObstacleAvoidanceParams {
    /// Bias of the sampling pattern toward the desired velocity.
    pub vel_bias: f32,
    pub weight_des_vel: f32,
    pub weight_cur_vel: f32,
    pub weight_side: f32,
    pub weight_toi: f32,
    /// Time horizon for impact penalties, in seconds.
    pub horiz_time: f32,
    /// Samples per axis of the grid sampler.
    pub grid_size: u8,
    pub adaptive_divs: u8,
    pub adaptive_rings: u8,
    pub adaptive_depth: u8,
}

impl Default for ObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            vel_bias: 0.4,
            weight_des_vel: 2.0,
            weight_cur_vel: 0.75,
            weight_side: 0.75,
            weight_toi: 2.5,
            horiz_time: 2.5,
            grid_size: 33,
            adaptive_divs: 7,
            adaptive_rings: 2,
            adaptive_depth: 5,
        }
    }
}

/// One fully scored velocity sample.
#[derive(Debug, Clone, Copy)]
pub struct AvoidanceSample {
    pub vel: Vec3,
    pub size: f32,
    pub penalty: f32,
    pub des_vel_penalty: f32,
    pub cur_vel_penalty: f32,
    pub side_penalty: f32,
    pub toi_penalty: f32,
}

/// Capture buffer for sampler introspection; meant for external debug
/// drawing, not for steering decisions.
#[derive(Debug, Default)]
pub struct ObstacleAvoidanceDebugData {
    samples: Vec<AvoidanceSample>,
    max_samples: usize,
}

impl ObstacleAvoidanceDebugData {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn sample(&self, i: usize) -> Option<&AvoidanceSample> {
        self.samples.get(i)
    }

    /// Scales every penalty column into [0, 1] for display.
    pub fn normalize_samples(&mut self) {
        normalize_column(&mut self.samples, |s| &mut s.penalty);
        normalize_column(&mut self.samples, |s| &mut s.des_vel_penalty);
        normalize_column(&mut self.samples, |s| &mut s.cur_vel_penalty);
        normalize_column(&mut self.samples, |s| &mut s.side_penalty);
        normalize_column(&mut self.samples, |s| &mut s.toi_penalty);
    }

    fn add(&mut self, sample: AvoidanceSample) {
        if self.samples.len() < self.max_samples {
            self.samples.push(sample);
        }
    }
}

fn normalize_column(
    samples: &mut [AvoidanceSample],
    field: impl Fn(&mut AvoidanceSample) -> &mut f32,
) {
    let mut max_val = 0.0f32;
    for sample in samples.iter_mut() {
        max_val = max_val.max(field(sample).abs());
    }
    if max_val > 1e-4 {
        let inv = 1.0 / max_val;
        for sample in samples.iter_mut() {
            *field(sample) *= inv;
        }
    }
}

/// Fixed-capacity obstacle registries plus the two velocity samplers.
///
/// Not safe for concurrent use; a crowd coordinator keeps one instance per
/// worker.
pub struct ObstacleAvoidanceQuery {
    params: ObstacleAvoidanceParams,
    inv_horiz_time: f32,
    inv_vmax: f32,

    max_circles: usize,
    circles: Vec<ObstacleCircle>,

    max_segments: usize,
    segments: Vec<ObstacleSegment>,
}

impl ObstacleAvoidanceQuery {
    pub fn new(max_circles: usize, max_segments: usize) -> Self {
        Self {
            params: ObstacleAvoidanceParams::default(),
            inv_horiz_time: 0.0,
            inv_vmax: 0.0,
            max_circles,
            circles: Vec::with_capacity(max_circles),
            max_segments,
            segments: Vec::with_capacity(max_segments),
        }
    }

    /// Empties both registries for the next agent.
    pub fn reset(&mut self) {
        self.circles.clear();
        self.segments.clear();
    }

    /// Registers a circular obstacle. Beyond capacity the call is a silent
    /// no-op; that bound is part of the contract, not an error.
    pub fn add_circle(&mut self, pos: Vec3, rad: f32, vel: Vec3, dvel: Vec3) {
        if self.circles.len() >= self.max_circles {
            return;
        }
        self.circles.push(ObstacleCircle {
            p: pos,
            rad,
            vel,
            dvel,
            dp: Vec3::ZERO,
            np: Vec3::ZERO,
        });
    }

    /// Registers a wall segment obstacle. Beyond capacity the call is a
    /// silent no-op.
    pub fn add_segment(&mut self, p: Vec3, q: Vec3) {
        if self.segments.len() >= self.max_segments {
            return;
        }
        self.segments.push(ObstacleSegment {
            p,
            q,
            touch: false,
        });
    }

    pub fn circle_count(&self) -> usize {
        self.circles.len()
    }

    pub fn circle(&self, i: usize) -> Option<&ObstacleCircle> {
        self.circles.get(i)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, i: usize) -> Option<&ObstacleSegment> {
        self.segments.get(i)
    }

    /// Derives the per-obstacle sampling state: separation directions and
    /// avoidance-side normals for circles, near-touch flags for segments.
    fn prepare(&mut self, pos: Vec3, dvel: Vec3) {
        for cir in &mut self.circles {
            // Separation direction, and a side normal whose sign is picked
            // by a cross-product test so both agents of a reciprocal pair
            // swerve the same way.
            cir.dp = (cir.p - pos).normalize_or_zero();
            let dv = cir.dvel - dvel;
            let a = tri_area_2d(Vec3::ZERO, cir.dp, dv);
            if a < 0.01 {
                cir.np = Vec3::new(-cir.dp.z, 0.0, cir.dp.x);
            } else {
                cir.np = Vec3::new(cir.dp.z, 0.0, -cir.dp.x);
            }
        }

        for seg in &mut self.segments {
            // Precalc if the agent is really close to the segment.
            let r = 0.01;
            let (dist_sqr, _) = distance_pt_seg_sqr_2d(pos, seg.p, seg.q);
            seg.touch = dist_sqr < sqr(r);
        }
    }

    /// Scores one candidate velocity. Returns `min_penalty` unchanged as
    /// soon as the candidate provably cannot beat it.
    #[allow(clippy::too_many_arguments)]
    fn process_sample(
        &self,
        vcand: Vec3,
        cs: f32,
        pos: Vec3,
        rad: f32,
        vel: Vec3,
        dvel: Vec3,
        min_penalty: f32,
        debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> f32 {
        // Penalty for straying from the desired and current velocities.
        let vpen = self.params.weight_des_vel * (dist_2d(vcand, dvel) * self.inv_vmax);
        let vcpen = self.params.weight_cur_vel * (dist_2d(vcand, vel) * self.inv_vmax);

        // Threshold hit time below which the impact term alone pushes the
        // total past min_penalty; lets the obstacle scan bail out early.
        let min_pen = min_penalty - vpen - vcpen;
        let t_threshold = (self.params.weight_toi / min_pen - 0.1) * self.params.horiz_time;
        if t_threshold - self.params.horiz_time > -f32::EPSILON {
            return min_penalty; // already too much
        }

        // Find the minimum time of impact amongst all obstacles.
        let mut tmin = self.params.horiz_time;
        let mut side = 0.0;
        let mut nside = 0;

        for cir in &self.circles {
            // Reciprocal velocity: assume the other agent does half the
            // work.
            let vab = vcand * 2.0 - vel - cir.vel;

            side += (dot_2d(cir.dp, vab) * 0.5 + 0.5)
                .min(dot_2d(cir.np, vab) * 2.0)
                .clamp(0.0, 1.0);
            nside += 1;

            let Some((htmin, htmax)) = sweep_circle_circle(pos, rad, vab, cir.p, cir.rad) else {
                continue;
            };
            let mut htmin = htmin;

            // Already overlapping: base the penalty on the (halved) exit
            // time instead.
            if htmin < 0.0 && htmax > 0.0 {
                htmin = -htmin * 0.5;
            }

            if (0.0..tmin).contains(&htmin) {
                tmin = htmin;
                if tmin < t_threshold {
                    return min_penalty;
                }
            }
        }

        for seg in &self.segments {
            let mut htmin;
            if seg.touch {
                // Standing on the segment: any velocity component into the
                // wall collides immediately, anything else is free.
                let sdir = seg.q - seg.p;
                let snorm = Vec3::new(-sdir.z, 0.0, sdir.x);
                if dot_2d(snorm, vcand) < 0.0 {
                    continue;
                }
                htmin = 0.0;
            } else {
                match isect_ray_seg(pos, vcand, seg.p, seg.q) {
                    Some(t) => htmin = t,
                    None => continue,
                }
            }

            // Avoid walls less: a doubled impact time halves the penalty
            // weight relative to agent impacts.
            htmin *= 2.0;

            if htmin < tmin {
                tmin = htmin;
                if tmin < t_threshold {
                    return min_penalty;
                }
            }
        }

        // Normalize the side bias so it cannot dominate.
        if nside != 0 {
            side /= nside as f32;
        }

        let spen = self.params.weight_side * side;
        let tpen = self.params.weight_toi * (1.0 / (0.1 + tmin * self.inv_horiz_time));

        let penalty = vpen + vcpen + spen + tpen;
        if let Some(debug) = debug {
            debug.add(AvoidanceSample {
                vel: vcand,
                size: cs,
                penalty,
                des_vel_penalty: vpen,
                cur_vel_penalty: vcpen,
                side_penalty: spen,
                toi_penalty: tpen,
            });
        }
        penalty
    }

    /// Scores every candidate on a square grid biased toward the desired
    /// velocity. Returns the number of samples evaluated and the
    /// least-penalized velocity.
    #[allow(clippy::too_many_arguments)]
    pub fn sample_velocity_grid(
        &mut self,
        pos: Vec3,
        rad: f32,
        vmax: f32,
        vel: Vec3,
        dvel: Vec3,
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> (usize, Vec3) {
        self.prepare(pos, dvel);
        self.params = *params;
        self.inv_horiz_time = 1.0 / self.params.horiz_time;
        self.inv_vmax = if vmax > 0.0 { 1.0 / vmax } else { f32::MAX };

        if let Some(debug) = debug.as_deref_mut() {
            debug.reset();
        }

        let cvx = dvel.x * self.params.vel_bias;
        let cvz = dvel.z * self.params.vel_bias;
        let cs = vmax * 2.0 * (1.0 - self.params.vel_bias) / (self.params.grid_size as f32 - 1.0);
        let half = (self.params.grid_size as f32 - 1.0) * cs * 0.5;

        let mut min_penalty = f32::MAX;
        let mut nvel = Vec3::ZERO;
        let mut ns = 0;

        for y in 0..self.params.grid_size {
            for x in 0..self.params.grid_size {
                let vcand = Vec3::new(
                    cvx + x as f32 * cs - half,
                    0.0,
                    cvz + y as f32 * cs - half,
                );
                if sqr(vcand.x) + sqr(vcand.z) > sqr(vmax + cs / 2.0) {
                    continue;
                }

                let penalty = self.process_sample(
                    vcand,
                    cs,
                    pos,
                    rad,
                    vel,
                    dvel,
                    min_penalty,
                    debug.as_deref_mut(),
                );
                ns += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    nvel = vcand;
                }
            }
        }

        (ns, nvel)
    }

    /// Coarse-to-fine sampler: evaluates a rotated polar pattern around a
    /// running best estimate, halving the search radius each depth level.
    /// Cheaper than the grid at comparable quality for sparse obstacle
    /// sets.
    #[allow(clippy::too_many_arguments)]
    pub fn sample_velocity_adaptive(
        &mut self,
        pos: Vec3,
        rad: f32,
        vmax: f32,
        vel: Vec3,
        dvel: Vec3,
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> (usize, Vec3) {
        self.prepare(pos, dvel);
        self.params = *params;
        self.inv_horiz_time = 1.0 / self.params.horiz_time;
        self.inv_vmax = if vmax > 0.0 { 1.0 / vmax } else { f32::MAX };

        if let Some(debug) = debug.as_deref_mut() {
            debug.reset();
        }

        // Build the sampling pattern aligned to the desired velocity.
        let nd = (self.params.adaptive_divs as usize).clamp(1, MAX_PATTERN_DIVS);
        let nr = (self.params.adaptive_rings as usize).clamp(1, MAX_PATTERN_RINGS);
        let depth = self.params.adaptive_depth as usize;

        let da = (1.0 / nd as f32) * std::f32::consts::TAU;
        let ca = da.cos();
        let sa = da.sin();

        // Alternate rings are offset by half an angular step.
        let ddir = [normalize_2d(dvel), rotate_2d(normalize_2d(dvel), da * 0.5)];

        let mut pat = [[0.0f32; 2]; MAX_PATTERN_DIVS * MAX_PATTERN_RINGS + 1];
        let mut npat = 1; // slot 0 is the zero sample

        for j in 0..nr {
            let r = (nr - j) as f32 / nr as f32;
            let dj = ddir[j % 2];
            pat[npat] = [dj.x * r, dj.z * r];
            let mut last1 = npat;
            let mut last2 = npat;
            npat += 1;

            let mut i = 1;
            while i < nd - 1 {
                // Next point on the right (rotate clockwise) and on the
                // left (rotate counterclockwise).
                pat[npat] = [
                    pat[last1][0] * ca + pat[last1][1] * sa,
                    -pat[last1][0] * sa + pat[last1][1] * ca,
                ];
                pat[npat + 1] = [
                    pat[last2][0] * ca - pat[last2][1] * sa,
                    pat[last2][0] * sa + pat[last2][1] * ca,
                ];
                last1 = npat;
                last2 = npat + 1;
                npat += 2;
                i += 2;
            }

            if nd % 2 == 0 {
                pat[npat] = [
                    pat[last2][0] * ca - pat[last2][1] * sa,
                    pat[last2][0] * sa + pat[last2][1] * ca,
                ];
                npat += 1;
            }
        }

        // Start sampling around the biased desired velocity.
        let mut cr = vmax * (1.0 - self.params.vel_bias);
        let mut res = Vec3::new(
            dvel.x * self.params.vel_bias,
            0.0,
            dvel.z * self.params.vel_bias,
        );
        let mut ns = 0;

        for _ in 0..depth {
            let mut min_penalty = f32::MAX;
            let mut bvel = Vec3::ZERO;

            for p in pat.iter().take(npat) {
                let vcand = Vec3::new(res.x + p[0] * cr, 0.0, res.z + p[1] * cr);
                if sqr(vcand.x) + sqr(vcand.z) > sqr(vmax + 0.001) {
                    continue;
                }

                let penalty = self.process_sample(
                    vcand,
                    cr / 10.0,
                    pos,
                    rad,
                    vel,
                    dvel,
                    min_penalty,
                    debug.as_deref_mut(),
                );
                ns += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    bvel = vcand;
                }
            }

            res = bvel;
            cr *= 0.5;
        }

        (ns, res)
    }
}

/// Sweeps a moving circle against a static one on the xz-plane; returns the
/// entry and exit times, or `None` when there is no intersection.
fn sweep_circle_circle(c0: Vec3, r0: f32, v: Vec3, c1: Vec3, r1: f32) -> Option<(f32, f32)> {
    const EPS: f32 = 0.0001;
    let s = c1 - c0;
    let r = r0 + r1;
    let c = dot_2d(s, s) - r * r;
    let a = dot_2d(v, v);
    if a < EPS {
        return None; // not moving
    }
    let b = dot_2d(v, s);
    let d = b * b - a * c;
    if d < 0.0 {
        return None; // no intersection
    }
    let ia = 1.0 / a;
    let rd = d.sqrt();
    Some(((b - rd) * ia, (b + rd) * ia))
}

/// Intersects a velocity ray with a segment on the xz-plane; returns the
/// time of impact within one time unit.
fn isect_ray_seg(ap: Vec3, u: Vec3, bp: Vec3, bq: Vec3) -> Option<f32> {
    let v = bq - bp;
    let w = ap - bp;
    let d = perp_2d(u, v);
    if d.abs() < 1e-6 {
        return None;
    }
    let d = 1.0 / d;
    let t = perp_2d(v, w) * d;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let s = perp_2d(u, w) * d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_overflow_drops_silently() {
        let mut query = ObstacleAvoidanceQuery::new(2, 1);

        for i in 0..5 {
            query.add_circle(Vec3::new(i as f32, 0.0, 0.0), 0.5, Vec3::ZERO, Vec3::ZERO);
        }
        assert_eq!(query.circle_count(), 2);

        query.add_segment(Vec3::ZERO, Vec3::X);
        query.add_segment(Vec3::ZERO, Vec3::Z);
        assert_eq!(query.segment_count(), 1);

        // Repeating the overflow never changes the counts.
        query.add_circle(Vec3::ZERO, 0.5, Vec3::ZERO, Vec3::ZERO);
        query.add_segment(Vec3::ZERO, Vec3::X);
        assert_eq!(query.circle_count(), 2);
        assert_eq!(query.segment_count(), 1);

        query.reset();
        assert_eq!(query.circle_count(), 0);
        assert_eq!(query.segment_count(), 0);
    }

    #[test]
    fn test_grid_sampler_free_space_returns_desired_velocity() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();

        let dvel = Vec3::new(1.0, 0.0, 0.0);
        let (ns, nvel) = query.sample_velocity_grid(
            Vec3::ZERO,
            0.5,
            2.0,
            dvel,
            dvel,
            &params,
            None,
        );
        assert!(ns > 0);
        assert!(nvel.abs_diff_eq(dvel, 1e-3));
    }

    #[test]
    fn test_adaptive_sampler_free_space_converges_to_desired() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();

        let dvel = Vec3::new(1.0, 0.0, 0.0);
        let (ns, nvel) = query.sample_velocity_adaptive(
            Vec3::ZERO,
            0.5,
            2.0,
            dvel,
            dvel,
            &params,
            None,
        );
        assert!(ns > 0);
        // Pattern size x depth bounds the evaluation count: 7 divisions on
        // 2 rings plus the center, refined over 5 levels.
        assert!(ns <= 75);
        // Coarse-to-fine refinement lands near the unobstructed optimum.
        assert!(nvel.abs_diff_eq(dvel, 0.1));
    }

    #[test]
    fn test_sampler_never_exceeds_max_speed() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();
        let vmax = 1.5;

        // Desired velocity over the speed cap; the sampler must clamp.
        let dvel = Vec3::new(5.0, 0.0, 0.0);
        let (_, grid) =
            query.sample_velocity_grid(Vec3::ZERO, 0.5, vmax, dvel, dvel, &params, None);
        assert!(grid.length() <= vmax + 0.1);

        let (_, adaptive) =
            query.sample_velocity_adaptive(Vec3::ZERO, 0.5, vmax, dvel, dvel, &params, None);
        assert!(adaptive.length() <= vmax + 0.1);
    }

    #[test]
    fn test_agent_ahead_deflects_velocity() {
        let mut query = ObstacleAvoidanceQuery::new(6, 8);
        let params = ObstacleAvoidanceParams::default();

        // Head-on collision course with a stationary agent dead ahead.
        let vel = Vec3::new(1.0, 0.0, 0.0);
        query.add_circle(Vec3::new(2.0, 0.0, 0.0), 0.5, Vec3::ZERO, Vec3::ZERO);

        let (_, nvel) =
            query.sample_velocity_grid(Vec3::ZERO, 0.5, 2.0, vel, vel, &params, None);
        // Straight ahead collides within the horizon; the sampler must pick
        // something else.
        assert!(!nvel.abs_diff_eq(vel, 1e-3));
        assert!(nvel.length() <= 2.0 + 0.1);
    }

    #[test]
    fn test_prepare_picks_consistent_side_normal() {
        let mut query = ObstacleAvoidanceQuery::new(4, 4);
        query.add_circle(Vec3::new(2.0, 0.0, 0.0), 0.5, Vec3::ZERO, Vec3::ZERO);

        let params = ObstacleAvoidanceParams::default();
        let dvel = Vec3::new(1.0, 0.0, 0.0);
        query.sample_velocity_grid(Vec3::ZERO, 0.5, 2.0, dvel, dvel, &params, None);

        let cir = query.circle(0).unwrap();
        assert!(cir.dp.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-5));
        // The side normal is perpendicular to the separation direction.
        assert!(dot_2d(cir.dp, cir.np).abs() < 1e-5);
        assert!((cir.np.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_touching_wall_blocks_inward_velocities() {
        let mut query = ObstacleAvoidanceQuery::new(4, 4);
        let params = ObstacleAvoidanceParams::default();

        // A wall passing within the touch epsilon just ahead in +z.
        query.add_segment(Vec3::new(-2.0, 0.0, 0.005), Vec3::new(2.0, 0.0, 0.005));

        let dvel = Vec3::new(0.0, 0.0, 1.0);
        let (_, nvel) =
            query.sample_velocity_grid(Vec3::ZERO, 0.5, 2.0, dvel, dvel, &params, None);

        // Into the wall is an immediate collision; the best sample points
        // along or away from it.
        assert!(nvel.z < 0.0 + 1e-3);

        let seg = query.segment(0).unwrap();
        assert!(seg.touch);
    }

    #[test]
    fn test_wall_ahead_is_avoided_less_than_agent() {
        // The same obstacle distance produces a milder penalty for walls,
        // so a wall allows a faster approach than an agent does.
        let params = ObstacleAvoidanceParams::default();
        let vel = Vec3::new(1.0, 0.0, 0.0);

        let mut wall_query = ObstacleAvoidanceQuery::new(4, 4);
        wall_query.add_segment(Vec3::new(1.2, 0.0, -2.0), Vec3::new(1.2, 0.0, 2.0));
        let (_, wall_vel) =
            wall_query.sample_velocity_grid(Vec3::ZERO, 0.5, 2.0, vel, vel, &params, None);

        let mut agent_query = ObstacleAvoidanceQuery::new(4, 4);
        agent_query.add_circle(Vec3::new(1.2, 0.0, 0.0), 0.5, Vec3::ZERO, Vec3::ZERO);
        let (_, agent_vel) =
            agent_query.sample_velocity_grid(Vec3::ZERO, 0.5, 2.0, vel, vel, &params, None);

        assert!(wall_vel.x >= agent_vel.x - 1e-3);
    }

    #[test]
    fn test_debug_data_records_fully_scored_samples() {
        let mut query = ObstacleAvoidanceQuery::new(4, 4);
        let params = ObstacleAvoidanceParams::default();
        let mut debug = ObstacleAvoidanceDebugData::new(4096);

        // Free space: nothing early-outs, every evaluated sample lands in
        // the buffer.
        let dvel = Vec3::new(1.0, 0.0, 0.0);
        let (ns, _) = query.sample_velocity_grid(
            Vec3::ZERO,
            0.5,
            2.0,
            dvel,
            dvel,
            &params,
            Some(&mut debug),
        );
        assert_eq!(debug.sample_count(), ns);

        // With an obstacle the early-out may skip scoring some candidates.
        query.add_circle(Vec3::new(1.0, 0.0, 0.0), 0.5, Vec3::ZERO, Vec3::ZERO);
        let (ns, _) = query.sample_velocity_grid(
            Vec3::ZERO,
            0.5,
            2.0,
            dvel,
            dvel,
            &params,
            Some(&mut debug),
        );
        assert!(debug.sample_count() <= ns);

        debug.normalize_samples();
        for i in 0..debug.sample_count() {
            assert!(debug.sample(i).unwrap().penalty <= 1.0 + 1e-5);
        }
    }
}
