//! The simulation container: owns bodies, constraints, and persistent
//! contacts, and advances them through the fixed-substep pipeline.

use std::collections::BTreeMap;

use log::debug;

use crate::body::{BodyId, RigidBody, UNREGISTERED};
use crate::broadphase::{collect_pairs, BodyBounds, BroadPhase};
use crate::constraint::{Constraint, ConstraintId};
use crate::contact::{
    pair_key, Contact, ContactEvent, ContactListener, PersistentContactPair,
};
use crate::contact_solver;
use crate::error::{PhysicsError, Result};
use crate::math::{Aabb, Real, Transform, Vector2};
use crate::narrowphase::collide;
use crate::settings::{PositionCorrection, SpaceSettings};
use crate::shape::ShapeKind;

pub const GRAVITY_EARTH: Real = 9.81;

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Began,
    Persisted,
    Removed,
}

type PendingEvent = (EventKind, ContactEvent);

/// Result of a [`Space::raycast`] query.
#[derive(Debug, Clone, Copy)]
pub struct RaycastHit {
    pub body: BodyId,
    pub point: Vector2,
    pub distance: Real,
}

/// A simulated world. Bodies and constraints are moved in with `add_*`,
/// mutated by [`Space::step`], and handed back by `remove_*`.
pub struct Space {
    /// Slot index doubles as the body id; slots are never recycled, so ids
    /// stay monotonic for the lifetime of the space.
    bodies: Vec<Option<RigidBody>>,
    constraints: Vec<Constraint>,
    /// Persistent contacts keyed by `(shape_a, shape_b)`, `shape_a <
    /// shape_b`. Ordered so iteration is deterministic.
    contacts: BTreeMap<(u32, u32), PersistentContactPair>,
    broadphase_pairs: Vec<(BodyId, BodyId)>,
    broadphase: BroadPhase,
    pub settings: SpaceSettings,
    gravity: Vector2,
    pub kill_bounds: Aabb,
    pub use_kill_bounds: bool,
    listener: Option<Box<dyn ContactListener>>,
    id_counter: BodyId,
    constraint_id_counter: ConstraintId,
    removal_queue: Vec<BodyId>,
}

impl Default for Space {
    fn default() -> Self {
        Self::new()
    }
}

impl Space {
    pub fn new() -> Space {
        Space {
            bodies: Vec::new(),
            constraints: Vec::new(),
            contacts: BTreeMap::new(),
            broadphase_pairs: Vec::new(),
            broadphase: BroadPhase::BruteForce,
            settings: SpaceSettings::default(),
            gravity: Vector2::new(0.0, -GRAVITY_EARTH),
            kill_bounds: Aabb::new(-1e4, -1e4, 1e4, 1e4),
            use_kill_bounds: true,
            listener: None,
            id_counter: 0,
            constraint_id_counter: 0,
            removal_queue: Vec::new(),
        }
    }

    pub fn gravity(&self) -> Vector2 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vector2) {
        self.gravity = gravity;
    }

    pub fn broadphase(&self) -> BroadPhase {
        self.broadphase
    }

    pub fn set_broadphase(&mut self, broadphase: BroadPhase) {
        self.broadphase = broadphase;
    }

    pub fn set_contact_listener(&mut self, listener: Box<dyn ContactListener>) {
        self.listener = Some(listener);
    }

    /// Move a body into the space and assign it the next id.
    pub fn add_rigidbody(&mut self, mut body: RigidBody) -> BodyId {
        let id = self.id_counter;
        self.id_counter += 1;
        body.id = id;
        self.bodies.push(Some(body));
        id
    }

    /// Unlink a body and hand it back. Contacts referencing it are dropped
    /// with removal events.
    pub fn remove_rigidbody(&mut self, id: BodyId) -> Result<RigidBody> {
        let mut events = Vec::new();
        let body = self.remove_rigidbody_internal(id, &mut events)?;
        self.dispatch_events(&mut events);
        Ok(body)
    }

    fn remove_rigidbody_internal(
        &mut self,
        id: BodyId,
        events: &mut Vec<PendingEvent>,
    ) -> Result<RigidBody> {
        if self.get_body(id).is_none() {
            return Err(PhysicsError::NotFound(id));
        }

        // emit removal events while the body is still present
        let bodies = &self.bodies;
        self.contacts.retain(|_, pcp| {
            let keep = pcp.body_a != id && pcp.body_b != id;
            if !keep {
                for i in 0..pcp.contact_count {
                    if !pcp.contacts[i].remove_invoked {
                        pcp.contacts[i].remove_invoked = true;
                        let contact = pcp.contacts[i];
                        events.push((EventKind::Removed, make_event(bodies, pcp, &contact)));
                    }
                }
            }
            keep
        });

        let mut body = self
            .bodies
            .get_mut(id as usize)
            .and_then(|slot| slot.take())
            .ok_or(PhysicsError::NotFound(id))?;
        body.id = UNREGISTERED;
        Ok(body)
    }

    pub fn get_body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(id as usize)?.as_ref()
    }

    pub fn get_body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(id as usize)?.as_mut()
    }

    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.iter().flatten()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.iter().flatten().count()
    }

    /// Move a constraint into the space. Fails if a referenced body is not
    /// present.
    pub fn add_constraint(&mut self, mut constraint: Constraint) -> Result<ConstraintId> {
        let (body_a, body_b) = constraint.bodies();
        if self.get_body(body_a).is_none() {
            return Err(PhysicsError::NotFound(body_a));
        }
        if let Some(id) = body_b {
            if self.get_body(id).is_none() {
                return Err(PhysicsError::NotFound(id));
            }
        }
        constraint.initialize(&self.bodies);

        let id = self.constraint_id_counter;
        self.constraint_id_counter += 1;
        constraint.id = id;
        self.constraints.push(constraint);
        Ok(id)
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<Constraint> {
        let index = self
            .constraints
            .iter()
            .position(|c| c.id == id)
            .ok_or(PhysicsError::NotFound(id))?;
        Ok(self.constraints.remove(index))
    }

    pub fn get_constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id == id)
    }

    pub fn get_constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.constraints.iter_mut().find(|c| c.id == id)
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn contact_pairs(&self) -> impl Iterator<Item = &PersistentContactPair> {
        self.contacts.values()
    }

    /// The persistent pair for two shape ids, in either order.
    pub fn contact_pair(&self, shape_a: u32, shape_b: u32) -> Option<&PersistentContactPair> {
        self.contacts.get(&pair_key(shape_a, shape_b))
    }

    /// Empty every collection and reset the id counters; the space behaves
    /// as freshly constructed afterwards.
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.constraints.clear();
        self.contacts.clear();
        self.broadphase_pairs.clear();
        self.removal_queue.clear();
        self.id_counter = 0;
        self.constraint_id_counter = 0;
    }

    /// Advance the simulation by `dt` seconds, split into
    /// `settings.substeps` equal substeps. Zero `dt` or zero substeps is a
    /// no-op.
    pub fn step(&mut self, dt: Real) {
        if dt <= 0.0 || self.settings.substeps == 0 {
            return;
        }
        let h = dt / self.settings.substeps as Real;
        let inv_h = 1.0 / h;
        for _ in 0..self.settings.substeps {
            self.substep(h, inv_h);
        }
    }

    fn substep(&mut self, h: Real, inv_h: Real) {
        let settings = self.settings;
        let gravity = self.gravity;

        // 1. accelerations
        for body in self.bodies.iter_mut().flatten() {
            body.invalidate_caches();
            body.integrate_accelerations(gravity, &settings, h);
        }

        // 2. broad phase: fresh bounds, prune separated pairs, collect
        // candidates
        let bounds = self.refresh_bounds();
        let mut events = Vec::new();
        self.prune_separated_contacts(&bounds, &mut events);
        self.broadphase_pairs = collect_pairs(self.broadphase, &self.bodies, &bounds);
        self.dispatch_events(&mut events);

        // 3. narrow phase
        self.narrow_phase(&mut events);
        self.dispatch_events(&mut events);

        // 4-6. solver
        {
            let bodies = &mut self.bodies;
            let constraints = &mut self.constraints;
            let contacts = &mut self.contacts;

            for constraint in constraints.iter_mut() {
                constraint.presolve(bodies, &settings, h, inv_h);
            }
            for constraint in constraints.iter() {
                constraint.warmstart(bodies);
            }
            for pcp in contacts.values_mut() {
                contact_solver::presolve(bodies, pcp, &settings, inv_h);
            }
            for pcp in contacts.values_mut() {
                contact_solver::warmstart(bodies, pcp, &settings);
            }
            for _ in 0..settings.velocity_iterations {
                for constraint in constraints.iter_mut() {
                    constraint.solve(bodies);
                }
                for pcp in contacts.values_mut() {
                    contact_solver::solve_velocity(bodies, pcp);
                }
            }
        }

        // 7. velocities, then kill bounds
        for body in self.bodies.iter_mut().flatten() {
            body.integrate_velocities(h);
        }
        if self.use_kill_bounds {
            let kill_bounds = self.kill_bounds;
            for slot in self.bodies.iter_mut() {
                if let Some(body) = slot {
                    let aabb = body.aabb();
                    if !kill_bounds.contains(&aabb) {
                        debug!("body {} left the kill bounds, scheduling removal", body.id);
                        self.removal_queue.push(body.id);
                    }
                }
            }
        }

        // 8. optional position correction
        if settings.contact_position_correction == PositionCorrection::Ngs {
            self.solve_positions();
        }

        self.flush_removals(&mut events);
        self.dispatch_events(&mut events);
    }

    /// Rewrite every body's shape transforms and bounding boxes for this
    /// substep.
    fn refresh_bounds(&mut self) -> Vec<Option<BodyBounds>> {
        self.bodies
            .iter_mut()
            .map(|slot| {
                slot.as_mut().map(|body| {
                    let xform = body.transform();
                    for shape in &mut body.shapes {
                        shape.transform(xform);
                    }
                    let mut shapes = Vec::with_capacity(body.shapes.len());
                    let mut merged: Option<Aabb> = None;
                    for shape in &body.shapes {
                        let shape_aabb = shape.aabb(xform);
                        merged = Some(match merged {
                            Some(aabb) => aabb.merge(&shape_aabb),
                            None => shape_aabb,
                        });
                        shapes.push(shape_aabb);
                    }
                    let body_aabb =
                        merged.unwrap_or(Aabb::from_center(body.position(), Vector2::ZERO));
                    body.cached_aabb = body_aabb;
                    body.cache_aabb = true;
                    body.cache_transform = true;
                    BodyBounds {
                        body: body_aabb,
                        shapes,
                    }
                })
            })
            .collect()
    }

    /// Drop persistent pairs whose body boxes no longer overlap, emitting
    /// one removal event per contact.
    fn prune_separated_contacts(
        &mut self,
        bounds: &[Option<BodyBounds>],
        events: &mut Vec<PendingEvent>,
    ) {
        let bodies = &self.bodies;
        self.contacts.retain(|_, pcp| {
            let bounds_a = bounds.get(pcp.body_a as usize).and_then(|b| b.as_ref());
            let bounds_b = bounds.get(pcp.body_b as usize).and_then(|b| b.as_ref());
            let keep = match (bounds_a, bounds_b) {
                (Some(a), Some(b)) => a.body.overlaps(&b.body),
                _ => false,
            };
            if !keep {
                for i in 0..pcp.contact_count {
                    if !pcp.contacts[i].remove_invoked {
                        pcp.contacts[i].remove_invoked = true;
                        let contact = pcp.contacts[i];
                        events.push((EventKind::Removed, make_event(bodies, pcp, &contact)));
                    }
                }
            }
            keep
        });
    }

    fn narrow_phase(&mut self, events: &mut Vec<PendingEvent>) {
        let bodies = &self.bodies;
        let contacts = &mut self.contacts;
        let settings = &self.settings;

        for &(id_a, id_b) in &self.broadphase_pairs {
            let (Some(a), Some(b)) = (
                bodies.get(id_a as usize).and_then(|s| s.as_ref()),
                bodies.get(id_b as usize).and_then(|s| s.as_ref()),
            ) else {
                continue;
            };
            let xform_a = a.transform();
            let xform_b = b.transform();

            for shape_a in a.shapes() {
                for shape_b in b.shapes() {
                    // canonical orientation: lower shape id first
                    let swapped = shape_a.id() > shape_b.id();
                    let manifold = if swapped {
                        collide(shape_b, xform_b, shape_a, xform_a)
                    } else {
                        collide(shape_a, xform_a, shape_b, xform_b)
                    };
                    let (first, second, first_id, key) = if swapped {
                        (b, a, id_b, (shape_b.id(), shape_a.id()))
                    } else {
                        (a, b, id_a, (shape_a.id(), shape_b.id()))
                    };
                    let second_id = if first_id == id_a { id_b } else { id_a };

                    if manifold.count == 0 {
                        if let Some(pcp) = contacts.get_mut(&key) {
                            pcp.contact_count = 0;
                        }
                        continue;
                    }

                    let mut pcp = PersistentContactPair {
                        body_a: first_id,
                        body_b: second_id,
                        shape_a: key.0,
                        shape_b: key.1,
                        normal: manifold.normal,
                        contact_count: manifold.count,
                        contacts: [Contact::default(); 2],
                        friction: settings
                            .friction_mix
                            .combine(first.material.friction, second.material.friction),
                        restitution: settings
                            .restitution_mix
                            .combine(first.material.restitution, second.material.restitution),
                    };
                    for k in 0..manifold.count {
                        let point = manifold.points[k];
                        pcp.contacts[k] = Contact {
                            anchor_a: point.position - first.position(),
                            anchor_b: point.position - second.position(),
                            separation: point.separation,
                            id: point.id,
                            ..Contact::default()
                        };
                    }

                    match contacts.get(&key) {
                        Some(old) => {
                            for contact in pcp.contacts[..pcp.contact_count].iter_mut() {
                                let previous = old
                                    .active_contacts()
                                    .iter()
                                    .find(|c| c.id == contact.id);
                                if let Some(previous) = previous {
                                    contact.is_persisted = true;
                                    if settings.warmstarting {
                                        contact.solver.normal_impulse =
                                            previous.solver.normal_impulse;
                                        contact.solver.tangent_impulse =
                                            previous.solver.tangent_impulse;
                                    }
                                }
                            }
                            events.push((
                                EventKind::Persisted,
                                make_event(bodies, &pcp, &pcp.contacts[0]),
                            ));
                            contacts.insert(key, pcp);
                        }
                        None => {
                            // only actually penetrating pairs enter the map
                            if pcp.active_contacts().iter().any(|c| c.separation < 0.0) {
                                events.push((
                                    EventKind::Began,
                                    make_event(bodies, &pcp, &pcp.contacts[0]),
                                ));
                                contacts.insert(key, pcp);
                            }
                        }
                    }
                }
            }
        }
    }

    /// NGS: refresh each pair's manifold from the moved shapes and push
    /// positions apart directly.
    fn solve_positions(&mut self) {
        let settings = self.settings;
        let keys: Vec<(u32, u32)> = self.contacts.keys().copied().collect();

        for _ in 0..settings.position_iterations {
            for &key in &keys {
                let Some(pcp) = self.contacts.get(&key) else {
                    continue;
                };
                if pcp.contact_count == 0 {
                    continue;
                }
                let ia = pcp.body_a as usize;
                let ib = pcp.body_b as usize;
                let (shape_a, shape_b) = (pcp.shape_a, pcp.shape_b);
                let contact_ids: Vec<u32> =
                    pcp.active_contacts().iter().map(|c| c.id).collect();

                for index in [ia, ib] {
                    if let Some(body) = self.bodies.get_mut(index).and_then(|s| s.as_mut()) {
                        let xform = body.transform();
                        for shape in &mut body.shapes {
                            shape.transform(xform);
                        }
                    }
                }

                let (Some(a), Some(b)) = (
                    self.bodies.get(ia).and_then(|s| s.as_ref()),
                    self.bodies.get(ib).and_then(|s| s.as_ref()),
                ) else {
                    continue;
                };
                let Some(sa) = a.shapes().iter().find(|s| s.id() == shape_a) else {
                    continue;
                };
                let Some(sb) = b.shapes().iter().find(|s| s.id() == shape_b) else {
                    continue;
                };

                let manifold = collide(sa, a.transform(), sb, b.transform());
                if manifold.count == 0 {
                    continue;
                }
                let mut corrections = Vec::with_capacity(manifold.count);
                for k in 0..manifold.count {
                    let point = manifold.points[k];
                    // contacts that no longer match a live feature stay
                    // untouched
                    if !contact_ids.contains(&point.id) {
                        continue;
                    }
                    corrections.push((
                        point.position - a.position(),
                        point.position - b.position(),
                        point.separation,
                    ));
                }
                if corrections.is_empty() {
                    continue;
                }
                contact_solver::solve_position(
                    &mut self.bodies,
                    ia,
                    ib,
                    manifold.normal,
                    &corrections,
                    &settings,
                );
            }
        }
    }

    fn flush_removals(&mut self, events: &mut Vec<PendingEvent>) {
        if self.removal_queue.is_empty() {
            return;
        }
        let queue = std::mem::take(&mut self.removal_queue);
        for id in queue {
            let _ = self.remove_rigidbody_internal(id, events);
        }
    }

    fn dispatch_events(&mut self, events: &mut Vec<PendingEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(listener) = self.listener.as_deref_mut() {
            for (kind, event) in events.drain(..) {
                match kind {
                    EventKind::Began => listener.on_contact_began(&event),
                    EventKind::Persisted => listener.on_contact_persisted(&event),
                    EventKind::Removed => listener.on_contact_removed(&event),
                }
            }
        } else {
            events.clear();
        }
    }

    /// Ids of all bodies whose bounding box overlaps `bounds`.
    pub fn query_aabb(&mut self, bounds: Aabb) -> Vec<BodyId> {
        let mut hits = Vec::new();
        for body in self.bodies.iter_mut().flatten() {
            if body.aabb().overlaps(&bounds) {
                hits.push(body.id);
            }
        }
        hits
    }

    /// Closest body hit by a ray, if any within `max_distance`.
    pub fn raycast(
        &self,
        origin: Vector2,
        direction: Vector2,
        max_distance: Real,
    ) -> Option<RaycastHit> {
        let length = direction.length();
        if length < 1e-8 {
            return None;
        }
        let dir = direction / length;

        let mut closest: Option<RaycastHit> = None;
        for body in self.bodies.iter().flatten() {
            let xform = body.transform();
            for shape in body.shapes() {
                let t = match &shape.kind {
                    ShapeKind::Circle { center, radius } => {
                        ray_vs_circle(origin, dir, xform.apply(*center), *radius)
                    }
                    ShapeKind::Polygon { vertices, .. } => {
                        ray_vs_polygon(origin, dir, vertices, xform)
                    }
                };
                if let Some(t) = t {
                    if t >= 0.0
                        && t <= max_distance
                        && closest.is_none_or(|hit| t < hit.distance)
                    {
                        closest = Some(RaycastHit {
                            body: body.id,
                            point: origin + dir * t,
                            distance: t,
                        });
                    }
                }
            }
        }
        closest
    }
}

fn make_event(
    bodies: &[Option<RigidBody>],
    pcp: &PersistentContactPair,
    contact: &Contact,
) -> ContactEvent {
    let position_a = bodies
        .get(pcp.body_a as usize)
        .and_then(|slot| slot.as_ref())
        .map(|b| b.position())
        .unwrap_or(Vector2::ZERO);
    ContactEvent {
        body_a: pcp.body_a,
        body_b: pcp.body_b,
        shape_a: pcp.shape_a,
        shape_b: pcp.shape_b,
        normal: pcp.normal,
        penetration: -contact.separation,
        position: position_a + contact.anchor_a,
        normal_impulse: contact.solver.normal_impulse,
        friction_impulse: contact.solver.tangent_impulse,
        id: contact.id,
    }
}

fn ray_vs_circle(origin: Vector2, dir: Vector2, center: Vector2, radius: Real) -> Option<Real> {
    let f = origin - center;
    let b = 2.0 * f.dot(dir);
    let c = f.length_squared() - radius * radius;
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let t1 = (-b - sqrt_d) * 0.5;
    let t2 = (-b + sqrt_d) * 0.5;
    if t1 >= 0.0 {
        Some(t1)
    } else if t2 >= 0.0 {
        Some(t2)
    } else {
        None
    }
}

fn ray_vs_polygon(
    origin: Vector2,
    dir: Vector2,
    vertices: &[Vector2],
    xform: Transform,
) -> Option<Real> {
    let n = vertices.len();
    let mut closest: Option<Real> = None;
    for i in 0..n {
        let a = xform.apply(vertices[i]);
        let b = xform.apply(vertices[(i + 1) % n]);
        if let Some(t) = ray_vs_segment(origin, dir, a, b) {
            if closest.is_none_or(|best| t < best) {
                closest = Some(t);
            }
        }
    }
    closest
}

fn ray_vs_segment(origin: Vector2, dir: Vector2, a: Vector2, b: Vector2) -> Option<Real> {
    let edge = b - a;
    let denom = dir.perp_dot(edge);
    if denom.abs() < 1e-8 {
        return None;
    }
    let to_a = a - origin;
    let t = to_a.perp_dot(edge) / denom;
    let u = to_a.perp_dot(dir) / denom;
    if t >= 0.0 && (0.0..=1.0).contains(&u) {
        Some(t)
    } else {
        None
    }
}
