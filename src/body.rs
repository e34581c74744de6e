//! Rigid bodies: motion state, mass properties, and integration.

use crate::math::{cross, rotate, Aabb, Real, Transform, Vector2};
use crate::error::{PhysicsError, Result};
use crate::settings::SpaceSettings;
use crate::shape::Shape;

pub type BodyId = u64;

/// Sentinel for a body that is not (or no longer) registered in a space.
pub(crate) const UNREGISTERED: BodyId = BodyId::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Static,
    Dynamic,
    /// Zero inverse mass like a static body, but integrates whatever
    /// velocities the caller sets.
    Kinematic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// kg/m^2; shapes added to a body weigh `density * area`.
    pub density: Real,
    pub restitution: Real,
    pub friction: Real,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            density: 1.0,
            restitution: 0.3,
            friction: 0.5,
        }
    }
}

/// Initial state for [`RigidBody::new`].
#[derive(Debug, Clone, Copy)]
pub struct RigidBodyInit {
    pub body_type: BodyType,
    pub position: Vector2,
    pub angle: Real,
    pub linear_velocity: Vector2,
    pub angular_velocity: Real,
    pub material: Material,
}

impl Default for RigidBodyInit {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vector2::ZERO,
            angle: 0.0,
            linear_velocity: Vector2::ZERO,
            angular_velocity: 0.0,
            material: Material::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RigidBody {
    pub(crate) id: BodyId,
    pub body_type: BodyType,

    /// World position of the center of mass.
    pub(crate) position: Vector2,
    pub(crate) angle: Real,
    /// World location of the body-local frame origin:
    /// `position - rotate(com, angle)`.
    pub(crate) origin: Vector2,

    pub linear_velocity: Vector2,
    pub angular_velocity: Real,

    pub(crate) force: Vector2,
    pub(crate) torque: Real,

    pub(crate) mass: Real,
    pub(crate) invmass: Real,
    pub(crate) inertia: Real,
    pub(crate) invinertia: Real,
    /// Body-local centroid of the shape union.
    pub(crate) com: Vector2,

    pub material: Material,
    pub gravity_scale: Real,
    pub linear_damping_scale: Real,
    pub angular_damping_scale: Real,

    pub collision_enabled: bool,
    /// Bodies sharing a nonzero group never collide.
    pub collision_group: u32,
    pub collision_category: u32,
    pub collision_mask: u32,

    pub(crate) shapes: Vec<Shape>,

    pub(crate) cached_aabb: Aabb,
    pub(crate) cache_aabb: bool,
    pub(crate) cache_transform: bool,
}

impl RigidBody {
    pub fn new(init: RigidBodyInit) -> RigidBody {
        RigidBody {
            id: UNREGISTERED,
            body_type: init.body_type,
            position: init.position,
            angle: init.angle,
            origin: init.position,
            linear_velocity: init.linear_velocity,
            angular_velocity: init.angular_velocity,
            force: Vector2::ZERO,
            torque: 0.0,
            mass: 0.0,
            invmass: 0.0,
            inertia: 0.0,
            invinertia: 0.0,
            com: Vector2::ZERO,
            material: init.material,
            gravity_scale: 1.0,
            linear_damping_scale: 1.0,
            angular_damping_scale: 1.0,
            collision_enabled: true,
            collision_group: 0,
            collision_category: 1,
            collision_mask: u32::MAX,
            shapes: Vec::new(),
            cached_aabb: Aabb::from_center(init.position, Vector2::ZERO),
            cache_aabb: false,
            cache_transform: false,
        }
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub fn position(&self) -> Vector2 {
        self.position
    }

    pub fn angle(&self) -> Real {
        self.angle
    }

    /// World location of the body-local frame origin.
    pub fn origin(&self) -> Vector2 {
        self.origin
    }

    /// Body-local centroid of the attached shapes.
    pub fn center_of_mass(&self) -> Vector2 {
        self.com
    }

    pub fn mass(&self) -> Real {
        self.mass
    }

    pub fn inertia(&self) -> Real {
        self.inertia
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn set_position(&mut self, position: Vector2) {
        self.position = position;
        self.origin = position - rotate(self.com, self.angle);
        self.invalidate_caches();
    }

    pub fn set_angle(&mut self, angle: Real) {
        self.angle = angle;
        self.origin = self.position - rotate(self.com, angle);
        self.invalidate_caches();
    }

    /// Override the computed mass. Fails for a non-positive mass on a
    /// dynamic body; static and kinematic bodies keep zero inverse mass.
    pub fn set_mass(&mut self, mass: Real) -> Result<()> {
        if self.body_type == BodyType::Dynamic && mass <= 0.0 {
            return Err(PhysicsError::InvalidArgument(
                "dynamic body mass must be positive",
            ));
        }
        self.mass = mass;
        if self.body_type == BodyType::Dynamic {
            self.invmass = 1.0 / mass;
        }
        Ok(())
    }

    /// Override the computed inertia. Zero locks rotation.
    pub fn set_inertia(&mut self, inertia: Real) -> Result<()> {
        if inertia < 0.0 {
            return Err(PhysicsError::InvalidArgument("inertia must be non-negative"));
        }
        self.inertia = inertia;
        self.invinertia = if self.body_type == BodyType::Dynamic && inertia > 0.0 {
            1.0 / inertia
        } else {
            0.0
        };
        Ok(())
    }

    /// Attach a shape and recompute mass, inertia, and centroid from the
    /// shape union, assuming uniform density. The body frame stays put; the
    /// center of mass (and with it `position`) may move.
    pub fn add_shape(&mut self, shape: Shape) {
        self.shapes.push(shape);
        self.recompute_mass();
    }

    fn recompute_mass(&mut self) {
        let origin = self.origin;

        let mut mass = 0.0;
        let mut weighted = Vector2::ZERO;
        let mut inertia_origin = 0.0;
        for shape in &self.shapes {
            let data = shape.mass_data(self.material.density);
            mass += data.mass;
            weighted += data.centroid * data.mass;
            inertia_origin += data.inertia;
        }

        self.mass = mass;
        self.com = if mass > 0.0 { weighted / mass } else { Vector2::ZERO };
        // parallel axis: moment about the centroid from the moment about
        // the body origin
        self.inertia = (inertia_origin - mass * self.com.length_squared()).max(0.0);

        if self.body_type == BodyType::Dynamic {
            self.invmass = if mass > 0.0 { 1.0 / mass } else { 0.0 };
            self.invinertia = if self.inertia > 0.0 {
                1.0 / self.inertia
            } else {
                0.0
            };
        }

        self.position = origin + rotate(self.com, self.angle);
        self.origin = origin;
        self.invalidate_caches();
    }

    pub fn apply_force(&mut self, force: Vector2) {
        self.force += force;
    }

    /// Apply a force at a world-space point.
    pub fn apply_force_at(&mut self, force: Vector2, point: Vector2) {
        self.force += force;
        self.torque += cross(point - self.position, force);
    }

    pub fn apply_torque(&mut self, torque: Real) {
        self.torque += torque;
    }

    /// Apply an impulse at offset `r` from the center of mass (world
    /// orientation).
    pub fn apply_impulse(&mut self, impulse: Vector2, r: Vector2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.linear_velocity += impulse * self.invmass;
        self.angular_velocity += self.invinertia * cross(r, impulse);
    }

    /// Advance velocities from accumulated forces and gravity, then clear
    /// the accumulators. Static and kinematic bodies only clear.
    pub fn integrate_accelerations(
        &mut self,
        gravity: Vector2,
        settings: &SpaceSettings,
        dt: Real,
    ) {
        if self.body_type != BodyType::Dynamic {
            self.force = Vector2::ZERO;
            self.torque = 0.0;
            return;
        }

        self.linear_velocity += (self.force * self.invmass + gravity * self.gravity_scale) * dt;
        self.angular_velocity += self.torque * self.invinertia * dt;

        self.linear_velocity *=
            (1.0 - settings.linear_damping).powf(dt * self.linear_damping_scale);
        self.angular_velocity *=
            (1.0 - settings.angular_damping).powf(dt * self.angular_damping_scale);

        self.force = Vector2::ZERO;
        self.torque = 0.0;
    }

    /// Advance the pose from velocities. Static bodies never move.
    pub fn integrate_velocities(&mut self, dt: Real) {
        if self.body_type == BodyType::Static {
            return;
        }
        self.position += self.linear_velocity * dt;
        self.angle += self.angular_velocity * dt;
        self.origin = self.position - rotate(self.com, self.angle);
        self.invalidate_caches();
    }

    /// Shift the pose directly (position-level solving).
    pub(crate) fn shift(&mut self, delta: Vector2, dangle: Real) {
        self.position += delta;
        self.angle += dangle;
        self.origin = self.position - rotate(self.com, self.angle);
        self.invalidate_caches();
    }

    /// Body-local frame to world transform.
    pub fn transform(&self) -> Transform {
        Transform::new(self.origin, self.angle)
    }

    /// World bounding box over all shapes, cached until the pose changes.
    pub fn aabb(&mut self) -> Aabb {
        if self.cache_aabb {
            return self.cached_aabb;
        }
        let xform = self.transform();
        if !self.cache_transform {
            for shape in &mut self.shapes {
                shape.transform(xform);
            }
            self.cache_transform = true;
        }
        let mut bounds: Option<Aabb> = None;
        for shape in &self.shapes {
            let shape_aabb = shape.aabb(xform);
            bounds = Some(match bounds {
                Some(b) => b.merge(&shape_aabb),
                None => shape_aabb,
            });
        }
        self.cached_aabb = bounds.unwrap_or(Aabb::from_center(self.position, Vector2::ZERO));
        self.cache_aabb = true;
        self.cached_aabb
    }

    pub fn kinetic_energy(&self) -> Real {
        0.5 * self.mass * self.linear_velocity.length_squared()
    }

    pub fn rotational_energy(&self) -> Real {
        0.5 * self.inertia * self.angular_velocity * self.angular_velocity
    }

    pub(crate) fn invalidate_caches(&mut self) {
        self.cache_aabb = false;
        self.cache_transform = false;
    }
}

/// Linear velocity, angular velocity, inverse mass, and inverse inertia for
/// a body slot; zeros when the slot is empty.
pub(crate) fn velocity_state(
    bodies: &[Option<RigidBody>],
    index: usize,
) -> (Vector2, Real, Real, Real) {
    match bodies.get(index).and_then(|slot| slot.as_ref()) {
        Some(b) => (b.linear_velocity, b.angular_velocity, b.invmass, b.invinertia),
        None => (Vector2::ZERO, 0.0, 0.0, 0.0),
    }
}

/// Apply an impulse to a body slot at offset `r` from its center of mass.
/// Zero-inverse-mass bodies are unaffected.
pub(crate) fn apply_impulse_at(
    bodies: &mut [Option<RigidBody>],
    index: usize,
    impulse: Vector2,
    r: Vector2,
) {
    if let Some(body) = bodies.get_mut(index).and_then(|slot| slot.as_mut()) {
        body.linear_velocity += impulse * body.invmass;
        body.angular_velocity += body.invinertia * cross(r, impulse);
    }
}
