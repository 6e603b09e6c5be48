//! Polygon and segment geometry used by the navigation queries
//!
//! All predicates here treat polygons as convex and operate on the xz-plane;
//! the y component only participates in height interpolation.

use glam::Vec3;

use crate::math::perp_2d;

/// Squared xz-plane distance from `pt` to the segment `p`-`q`, together with
/// the parameter of the closest point along the segment.
pub fn distance_pt_seg_sqr_2d(pt: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    (dx * dx + dz * dz, t)
}

/// Height of the triangle ABC at the xz-location of `p`, if `p` projects into
/// the triangle.
pub fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        u = -u;
        v = -v;
    }
    let denom = denom.abs();

    // The (sloppy) epsilons keep points on shared triangle edges inside.
    if u >= -EPS && v >= -EPS && (u + v) <= denom + EPS {
        let inv = 1.0 / denom;
        Some(a.y + v0.y * u * inv + v1.y * v * inv)
    } else {
        None
    }
}

/// Tests whether the point lies inside the convex polygon on the xz-plane.
pub fn point_in_poly_2d(pt: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Result of clipping a segment against a convex polygon on the xz-plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyHit {
    /// Entry parameter along the segment.
    pub tmin: f32,
    /// Exit parameter along the segment.
    pub tmax: f32,
    /// Polygon edge crossed on entry, or `None` when the segment starts inside.
    pub seg_min: Option<usize>,
    /// Polygon edge crossed on exit, or `None` when the segment ends inside.
    pub seg_max: Option<usize>,
}

/// Clips the segment `p0`-`p1` against a convex polygon on the xz-plane.
///
/// Returns `None` when the segment misses the polygon entirely.
pub fn intersect_segment_poly_2d(p0: Vec3, p1: Vec3, verts: &[Vec3]) -> Option<SegmentPolyHit> {
    const EPS: f32 = 0.00000001;

    let mut hit = SegmentPolyHit {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };
    let dir = p1 - p0;

    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let edge = verts[i] - verts[j];
        let diff = p0 - verts[j];
        let n = perp_2d(edge, diff);
        let d = perp_2d(dir, edge);
        if d.abs() < EPS {
            // Segment is parallel to the edge plane.
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = n / d;
        if d < 0.0 {
            // Crossing into the polygon.
            if t > hit.tmin {
                hit.tmin = t;
                hit.seg_min = Some(j);
                if hit.tmin > hit.tmax {
                    return None;
                }
            }
        } else {
            // Crossing out of the polygon.
            if t < hit.tmax {
                hit.tmax = t;
                hit.seg_max = Some(j);
                if hit.tmax < hit.tmin {
                    return None;
                }
            }
        }
        j = i;
    }

    Some(hit)
}

/// Determines whether two axis-aligned bounding boxes overlap.
#[inline]
pub fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.x <= bmax.x
        && amax.x >= bmin.x
        && amin.y <= bmax.y
        && amax.y >= bmin.y
        && amin.z <= bmax.z
        && amax.z >= bmin.z
}

/// Tests whether two convex polygons overlap on the xz-plane, using the
/// separating axis theorem over both polygons' edge normals.
pub fn overlap_poly_poly_2d(polya: &[Vec3], polyb: &[Vec3]) -> bool {
    const EPS: f32 = 1e-4;

    for (verts, others) in [(polya, polyb), (polyb, polya)] {
        let mut j = verts.len() - 1;
        for i in 0..verts.len() {
            let va = verts[j];
            let vb = verts[i];
            let norm = Vec3::new(vb.z - va.z, 0.0, -(vb.x - va.x));

            let (amin, amax) = project_poly_2d(norm, verts);
            let (bmin, bmax) = project_poly_2d(norm, others);
            if amin + EPS > bmax || amax - EPS < bmin {
                // Found a separating axis; merely touching does not count.
                return false;
            }
            j = i;
        }
    }
    true
}

fn project_poly_2d(axis: Vec3, verts: &[Vec3]) -> (f32, f32) {
    let mut rmin = f32::MAX;
    let mut rmax = f32::MIN;
    for &v in verts {
        let d = axis.x * v.x + axis.z * v.z;
        rmin = rmin.min(d);
        rmax = rmax.max(d);
    }
    (rmin, rmax)
}
