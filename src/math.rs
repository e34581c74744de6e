//! Scalar and vector primitives shared across the engine.
//!
//! The scalar precision is selected at compile time: `f32` by default, `f64`
//! with the `f64` cargo feature. All public geometry speaks [`Vector2`].

#[cfg(feature = "f64")]
pub type Real = f64;
#[cfg(not(feature = "f64"))]
pub type Real = f32;

#[cfg(feature = "f64")]
pub use glam::DVec2 as Vector2;
#[cfg(not(feature = "f64"))]
pub use glam::Vec2 as Vector2;

pub const PI: Real = core::f64::consts::PI as Real;

/// Rotate a vector by `angle` radians (counterclockwise).
pub fn rotate(v: Vector2, angle: Real) -> Vector2 {
    let (s, c) = angle.sin_cos();
    Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y)
}

/// 2D scalar cross product `a.x * b.y - a.y * b.x`.
pub fn cross(a: Vector2, b: Vector2) -> Real {
    a.perp_dot(b)
}

/// Cross product of an angular velocity with a vector: `w x v`.
pub fn cross_sv(w: Real, v: Vector2) -> Vector2 {
    Vector2::new(-w * v.y, w * v.x)
}

/// A rigid 2D transform: translation plus rotation about the translated
/// point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vector2,
    pub angle: Real,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vector2::ZERO,
        angle: 0.0,
    };

    pub fn new(position: Vector2, angle: Real) -> Self {
        Self { position, angle }
    }

    /// Map a local-space point to world space.
    pub fn apply(&self, point: Vector2) -> Vector2 {
        self.position + rotate(point, self.angle)
    }

    /// Map a world-space point back to local space.
    pub fn apply_inverse(&self, point: Vector2) -> Vector2 {
        rotate(point - self.position, -self.angle)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector2,
    pub max: Vector2,
}

impl Aabb {
    pub fn new(min_x: Real, min_y: Real, max_x: Real, max_y: Real) -> Self {
        Self {
            min: Vector2::new(min_x, min_y),
            max: Vector2::new(max_x, max_y),
        }
    }

    pub fn from_center(center: Vector2, half_extents: Vector2) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Standard interval overlap test.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// True if `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
    }

    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}
