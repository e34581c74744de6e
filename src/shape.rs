//! Collision shapes: circles and convex polygons.
//!
//! Shapes live in body-local coordinates. Polygons keep a cache of
//! world-space vertices that is rewritten by [`Shape::transform`]; the cache
//! is only meaningful immediately after that call.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use crate::error::{PhysicsError, Result};
use crate::math::{cross, Aabb, Real, Transform, Vector2, PI};

pub const MAX_POLYGON_VERTICES: usize = 16;

static SHAPE_ID: AtomicU32 = AtomicU32::new(0);

fn next_shape_id() -> u32 {
    SHAPE_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

#[derive(Debug, Clone)]
pub enum ShapeKind {
    Circle {
        /// Center in body-local coordinates.
        center: Vector2,
        radius: Real,
    },
    Polygon {
        /// CCW-wound convex vertices in body-local coordinates.
        vertices: Vec<Vector2>,
        /// Outward unit normal of edge `(vertices[i], vertices[i + 1])`.
        normals: Vec<Vector2>,
        /// World-space vertices, valid right after a `transform` call.
        world_vertices: Vec<Vector2>,
    },
}

/// Mass properties of a single shape at unit scale: mass, body-local
/// centroid, and second moment about the body origin.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ShapeMassData {
    pub mass: Real,
    pub centroid: Vector2,
    pub inertia: Real,
}

#[derive(Debug, Clone)]
pub struct Shape {
    pub(crate) id: u32,
    pub kind: ShapeKind,
}

impl Shape {
    pub fn circle(center: Vector2, radius: Real) -> Shape {
        Shape {
            id: next_shape_id(),
            kind: ShapeKind::Circle { center, radius },
        }
    }

    /// Build a convex polygon from vertices in any order. The vertices are
    /// rewound counterclockwise around their mean point and shifted by
    /// `offset`.
    pub fn polygon(vertices: &[Vector2], offset: Vector2) -> Result<Shape> {
        let n = vertices.len();
        if n < 3 {
            return Err(PhysicsError::InvalidShape("polygon needs at least 3 vertices"));
        }
        if n > MAX_POLYGON_VERTICES {
            return Err(PhysicsError::InvalidShape("polygon exceeds 16 vertices"));
        }

        let mean = vertices.iter().copied().sum::<Vector2>() / n as Real;
        let mut verts: Vec<Vector2> = vertices.to_vec();
        verts.sort_by(|a, b| {
            let ta = (a.y - mean.y).atan2(a.x - mean.x);
            let tb = (b.y - mean.y).atan2(b.x - mean.x);
            ta.partial_cmp(&tb).unwrap_or(Ordering::Equal)
        });
        for v in &mut verts {
            *v += offset;
        }

        let mut area = 0.0;
        for i in 0..n {
            area += cross(verts[i], verts[(i + 1) % n]);
        }
        area *= 0.5;
        if area <= Real::EPSILON {
            return Err(PhysicsError::InvalidShape("degenerate polygon has zero area"));
        }
        for i in 0..n {
            let e0 = verts[(i + 1) % n] - verts[i];
            let e1 = verts[(i + 2) % n] - verts[(i + 1) % n];
            // relative tolerance: the cross scales with the edge lengths
            if cross(e0, e1) < -1e-4 * e0.length() * e1.length() {
                return Err(PhysicsError::InvalidShape("polygon is not convex"));
            }
        }

        let mut normals = Vec::with_capacity(n);
        for i in 0..n {
            let edge = verts[(i + 1) % n] - verts[i];
            normals.push(Vector2::new(edge.y, -edge.x).normalize_or_zero());
        }

        Ok(Shape {
            id: next_shape_id(),
            kind: ShapeKind::Polygon {
                world_vertices: verts.clone(),
                vertices: verts,
                normals,
            },
        })
    }

    /// Axis-aligned rectangle of the given width and height, centered on
    /// `offset`.
    pub fn rect(width: Real, height: Real, offset: Vector2) -> Result<Shape> {
        let hw = width * 0.5;
        let hh = height * 0.5;
        Shape::polygon(
            &[
                Vector2::new(-hw, -hh),
                Vector2::new(hw, -hh),
                Vector2::new(hw, hh),
                Vector2::new(-hw, hh),
            ],
            offset,
        )
    }

    /// Regular polygon with `sides` vertices inscribed in a circle of
    /// `radius`.
    pub fn ngon(sides: usize, radius: Real, offset: Vector2) -> Result<Shape> {
        if !(3..=MAX_POLYGON_VERTICES).contains(&sides) {
            return Err(PhysicsError::InvalidShape("ngon needs between 3 and 16 sides"));
        }
        let mut verts = Vec::with_capacity(sides);
        for i in 0..sides {
            let theta = 2.0 * PI * i as Real / sides as Real;
            verts.push(Vector2::new(radius * theta.cos(), radius * theta.sin()));
        }
        Shape::polygon(&verts, offset)
    }

    /// Convex hull of an arbitrary point cloud (Andrew's monotone chain).
    /// Fails if the hull degenerates or carries more than 16 vertices.
    pub fn convex_hull(points: &[Vector2], offset: Vector2) -> Result<Shape> {
        if points.len() < 3 {
            return Err(PhysicsError::InvalidShape("convex hull needs at least 3 points"));
        }

        let mut sorted: Vec<Vector2> = points.to_vec();
        sorted.sort_by(|a, b| {
            a.x.partial_cmp(&b.x)
                .unwrap_or(Ordering::Equal)
                .then(a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal))
        });
        sorted.dedup();

        fn half_hull<'a>(points: impl Iterator<Item = &'a Vector2>) -> Vec<Vector2> {
            let mut hull: Vec<Vector2> = Vec::new();
            for &p in points {
                while hull.len() >= 2 {
                    let a = hull[hull.len() - 2];
                    let b = hull[hull.len() - 1];
                    if cross(b - a, p - a) <= 0.0 {
                        hull.pop();
                    } else {
                        break;
                    }
                }
                hull.push(p);
            }
            hull
        }

        let mut lower = half_hull(sorted.iter());
        let mut upper = half_hull(sorted.iter().rev());
        // each half ends where the other begins
        lower.pop();
        upper.pop();
        lower.extend(upper);

        if lower.len() > MAX_POLYGON_VERTICES {
            return Err(PhysicsError::InvalidShape("convex hull exceeds 16 vertices"));
        }
        Shape::polygon(&lower, offset)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Rewrite the world-vertex cache for the given body transform. No-op
    /// for circles.
    pub fn transform(&mut self, xform: Transform) {
        if let ShapeKind::Polygon {
            vertices,
            world_vertices,
            ..
        } = &mut self.kind
        {
            for (world, local) in world_vertices.iter_mut().zip(vertices.iter()) {
                *world = xform.apply(*local);
            }
        }
    }

    /// World-space bounding box. The polygon box is computed from the
    /// world-vertex cache, so call [`Shape::transform`] with the same
    /// `xform` first.
    pub fn aabb(&self, xform: Transform) -> Aabb {
        match &self.kind {
            ShapeKind::Circle { center, radius } => {
                Aabb::from_center(xform.apply(*center), Vector2::splat(*radius))
            }
            ShapeKind::Polygon { world_vertices, .. } => {
                let mut min = world_vertices[0];
                let mut max = world_vertices[0];
                for &v in &world_vertices[1..] {
                    min = min.min(v);
                    max = max.max(v);
                }
                Aabb { min, max }
            }
        }
    }

    /// Mass, centroid, and second moment about the body origin for the
    /// given density.
    pub(crate) fn mass_data(&self, density: Real) -> ShapeMassData {
        match &self.kind {
            ShapeKind::Circle { center, radius } => {
                let mass = density * PI * radius * radius;
                ShapeMassData {
                    mass,
                    centroid: *center,
                    inertia: mass * (0.5 * radius * radius + center.length_squared()),
                }
            }
            ShapeKind::Polygon { vertices, .. } => {
                let n = vertices.len();
                let mut area = 0.0;
                let mut centroid = Vector2::ZERO;
                let mut inertia = 0.0;
                for i in 0..n {
                    let v0 = vertices[i];
                    let v1 = vertices[(i + 1) % n];
                    let c = cross(v0, v1);
                    area += c;
                    centroid += (v0 + v1) * c;
                    inertia += c * (v0.dot(v0) + v0.dot(v1) + v1.dot(v1));
                }
                area *= 0.5;
                let mass = density * area;
                ShapeMassData {
                    mass,
                    centroid: centroid / (6.0 * area),
                    inertia: density * inertia / 12.0,
                }
            }
        }
    }
}
