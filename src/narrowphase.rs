//! Narrow-phase contact manifold computation.
//!
//! Dispatches on shape kinds: circle-circle directly, polygon-circle via the
//! max-support edge, polygon-polygon via SAT with reference/incident edge
//! selection and clipping. Polygon routines read the shapes' world-vertex
//! caches, so callers must [`Shape::transform`] both shapes first.

use crate::math::{rotate, Real, Transform, Vector2};
use crate::shape::{Shape, ShapeKind};

/// Feature flag: contact against a polygon face.
const FEATURE_FACE: u32 = 0x1;
/// Feature flag: contact against a polygon vertex.
const FEATURE_VERTEX: u32 = 0x2;
/// Feature flag: the second polygon owns the reference face.
const FEATURE_FLIP: u32 = 0x4;

/// Pack the reference and incident feature indices into a stable id used to
/// match contacts across steps.
fn feature_id(reference: usize, incident: usize, flags: u32) -> u32 {
    ((reference as u32) << 16) | ((incident as u32) << 8) | flags
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifoldPoint {
    /// World-space contact position.
    pub position: Vector2,
    /// Signed distance along the manifold normal; negative when
    /// penetrating.
    pub separation: Real,
    /// Packed feature id.
    pub id: u32,
}

impl ManifoldPoint {
    fn new(position: Vector2, separation: Real, id: u32) -> Self {
        Self {
            position,
            separation,
            id,
        }
    }
}

/// Up to two contact points sharing a normal that points from shape A
/// toward shape B.
#[derive(Debug, Clone, Copy)]
pub struct Manifold {
    pub normal: Vector2,
    pub points: [ManifoldPoint; 2],
    pub count: usize,
}

impl Manifold {
    fn empty() -> Manifold {
        Manifold {
            normal: Vector2::ZERO,
            points: [ManifoldPoint::default(); 2],
            count: 0,
        }
    }

    fn single(normal: Vector2, point: ManifoldPoint) -> Manifold {
        Manifold {
            normal,
            points: [point, ManifoldPoint::default()],
            count: 1,
        }
    }
}

/// A polygon's current world-space vertices plus its body-local normals and
/// the rotation taking them to world space.
struct PolyView<'a> {
    verts: &'a [Vector2],
    normals: &'a [Vector2],
    angle: Real,
}

impl PolyView<'_> {
    fn world_normal(&self, i: usize) -> Vector2 {
        rotate(self.normals[i], self.angle)
    }
}

fn poly_view(shape: &Shape, xform: Transform) -> PolyView<'_> {
    let ShapeKind::Polygon {
        normals,
        world_vertices,
        ..
    } = &shape.kind
    else {
        unreachable!("poly_view on a non-polygon shape")
    };
    PolyView {
        verts: world_vertices,
        normals,
        angle: xform.angle,
    }
}

/// Compute the contact manifold for a shape pair. The normal points from
/// `a` toward `b`. An empty manifold means the shapes are separated.
pub fn collide(a: &Shape, xa: Transform, b: &Shape, xb: Transform) -> Manifold {
    match (&a.kind, &b.kind) {
        (
            ShapeKind::Circle {
                center: ca,
                radius: ra,
            },
            ShapeKind::Circle {
                center: cb,
                radius: rb,
            },
        ) => circle_vs_circle(xa.apply(*ca), *ra, xb.apply(*cb), *rb),
        (ShapeKind::Polygon { .. }, ShapeKind::Circle { center, radius }) => {
            polygon_vs_circle(&poly_view(a, xa), xb.apply(*center), *radius)
        }
        (ShapeKind::Circle { center, radius }, ShapeKind::Polygon { .. }) => {
            let mut manifold = polygon_vs_circle(&poly_view(b, xb), xa.apply(*center), *radius);
            manifold.normal = -manifold.normal;
            manifold
        }
        (ShapeKind::Polygon { .. }, ShapeKind::Polygon { .. }) => {
            polygon_vs_polygon(&poly_view(a, xa), &poly_view(b, xb))
        }
    }
}

fn circle_vs_circle(pa: Vector2, ra: Real, pb: Vector2, rb: Real) -> Manifold {
    let delta = pb - pa;
    let dist = delta.length();
    let normal = if dist > 1e-8 {
        delta / dist
    } else {
        // coincident centers: push the pair apart vertically
        Vector2::Y
    };
    Manifold::single(
        normal,
        ManifoldPoint::new(pa + normal * ra, dist - (ra + rb), 0),
    )
}

/// Polygon against circle; the manifold normal points from the polygon
/// toward the circle.
fn polygon_vs_circle(poly: &PolyView<'_>, center: Vector2, radius: Real) -> Manifold {
    let n = poly.verts.len();

    // edge whose outward normal best supports the circle center
    let mut best_sep = -Real::INFINITY;
    let mut best_edge = 0;
    for i in 0..n {
        let sep = (center - poly.verts[i]).dot(poly.world_normal(i));
        if sep > best_sep {
            best_sep = sep;
            best_edge = i;
        }
    }
    if best_sep > radius {
        return Manifold::empty();
    }

    let v0 = poly.verts[best_edge];
    let v1 = poly.verts[(best_edge + 1) % n];
    let edge = v1 - v0;
    let t = (center - v0).dot(edge) / edge.length_squared();

    if !(0.0..=1.0).contains(&t) {
        // corner region: contact against the nearer vertex
        let (vertex, vertex_index) = if t < 0.0 {
            (v0, best_edge)
        } else {
            (v1, (best_edge + 1) % n)
        };
        let delta = center - vertex;
        let dist = delta.length();
        if dist > radius {
            return Manifold::empty();
        }
        let normal = if dist > 1e-8 {
            delta / dist
        } else {
            poly.world_normal(best_edge)
        };
        return Manifold::single(
            normal,
            ManifoldPoint::new(
                vertex,
                dist - radius,
                feature_id(vertex_index, 0, FEATURE_VERTEX),
            ),
        );
    }

    // face region
    let normal = poly.world_normal(best_edge);
    Manifold::single(
        normal,
        ManifoldPoint::new(
            center - normal * radius,
            best_sep - radius,
            feature_id(best_edge, 0, FEATURE_FACE),
        ),
    )
}

/// Largest separation of `b` from the edges of `a`, with the owning edge
/// index. Negative means overlap along every tested axis.
fn find_max_separation(a: &PolyView<'_>, b: &PolyView<'_>) -> (Real, usize) {
    let mut best_sep = -Real::INFINITY;
    let mut best_edge = 0;
    for i in 0..a.verts.len() {
        let normal = a.world_normal(i);
        let mut min_support = Real::INFINITY;
        for &bv in b.verts {
            min_support = min_support.min((bv - a.verts[i]).dot(normal));
        }
        if min_support > best_sep {
            best_sep = min_support;
            best_edge = i;
        }
    }
    (best_sep, best_edge)
}

/// Edge of `inc` most anti-parallel to the reference normal.
fn find_incident_edge(inc: &PolyView<'_>, ref_normal: Vector2) -> usize {
    let mut min_dot = Real::INFINITY;
    let mut best_edge = 0;
    for i in 0..inc.verts.len() {
        let dot = inc.world_normal(i).dot(ref_normal);
        if dot < min_dot {
            min_dot = dot;
            best_edge = i;
        }
    }
    best_edge
}

/// Clip the segment `(v0, v1)` to the half-plane on the positive side of
/// the line through `point` with the given normal.
fn clip_segment_to_line(
    v0: Vector2,
    v1: Vector2,
    point: Vector2,
    normal: Vector2,
) -> ([Vector2; 2], usize) {
    let mut out = [Vector2::ZERO; 2];
    let mut count = 0;

    let d0 = (v0 - point).dot(normal);
    let d1 = (v1 - point).dot(normal);

    if d0 >= 0.0 {
        out[count] = v0;
        count += 1;
    }
    if d1 >= 0.0 {
        out[count] = v1;
        count += 1;
    }
    if d0 * d1 < 0.0 {
        let t = d0 / (d0 - d1);
        out[count] = v0 + (v1 - v0) * t;
        count += 1;
    }

    (out, count)
}

fn polygon_vs_polygon(a: &PolyView<'_>, b: &PolyView<'_>) -> Manifold {
    let (sep_a, edge_a) = find_max_separation(a, b);
    if sep_a > 0.0 {
        return Manifold::empty();
    }
    let (sep_b, edge_b) = find_max_separation(b, a);
    if sep_b > 0.0 {
        return Manifold::empty();
    }

    // Reference face owns the axis of least penetration; small bias keeps
    // the choice stable when the separations are nearly equal.
    let (reference, incident, ref_edge, flip) = if sep_a >= sep_b - 1e-3 {
        (a, b, edge_a, false)
    } else {
        (b, a, edge_b, true)
    };

    let n = reference.verts.len();
    let ref_v0 = reference.verts[ref_edge];
    let ref_v1 = reference.verts[(ref_edge + 1) % n];
    let ref_normal = reference.world_normal(ref_edge);
    let tangent = (ref_v1 - ref_v0).normalize_or_zero();

    let inc_edge = find_incident_edge(incident, ref_normal);
    let inc_n = incident.verts.len();
    let inc_v0 = incident.verts[inc_edge];
    let inc_v1 = incident.verts[(inc_edge + 1) % inc_n];

    // clip the incident edge between the reference edge's side planes
    let (clipped, count) = clip_segment_to_line(inc_v0, inc_v1, ref_v0, tangent);
    if count < 2 {
        return Manifold::empty();
    }
    let (clipped, count) = clip_segment_to_line(clipped[0], clipped[1], ref_v1, -tangent);
    if count < 2 {
        return Manifold::empty();
    }

    let flip_flag = if flip { FEATURE_FLIP } else { 0 };
    let mut manifold = Manifold::empty();
    manifold.normal = if flip { -ref_normal } else { ref_normal };
    for (k, &point) in clipped.iter().enumerate() {
        let separation = (point - ref_v0).dot(ref_normal);
        if separation <= 0.0 {
            manifold.points[manifold.count] = ManifoldPoint::new(
                point,
                separation,
                feature_id(ref_edge, inc_edge, k as u32 | flip_flag),
            );
            manifold.count += 1;
        }
    }
    manifold
}
