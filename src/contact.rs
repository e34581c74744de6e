//! Contact points, persistent contact pairs, and contact events.

use crate::body::BodyId;
use crate::math::{Real, Vector2};

/// Per-contact solver state. Impulses accumulate across solver iterations
/// and, for persisted contacts, carry over between steps (warm-starting).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactSolverInfo {
    pub normal_impulse: Real,
    pub tangent_impulse: Real,
    pub normal_mass: Real,
    pub tangent_mass: Real,
    pub velocity_bias: Real,
}

/// A single contact point between two shapes.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    /// World-orientation offset from body A's center of mass.
    pub anchor_a: Vector2,
    /// World-orientation offset from body B's center of mass.
    pub anchor_b: Vector2,
    /// Signed distance along the pair normal; negative when penetrating.
    pub separation: Real,
    /// Packed feature id used to match contacts across steps.
    pub id: u32,
    pub solver: ContactSolverInfo,
    /// True once this contact was matched to one from the previous step.
    pub is_persisted: bool,
    /// Guards against emitting more than one removal event.
    pub remove_invoked: bool,
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            anchor_a: Vector2::ZERO,
            anchor_b: Vector2::ZERO,
            separation: 0.0,
            id: 0,
            solver: ContactSolverInfo::default(),
            is_persisted: false,
            remove_invoked: false,
        }
    }
}

pub const MAX_CONTACTS_PER_PAIR: usize = 2;

/// The manifold for one shape pair, persisted across steps. Keyed in the
/// space by `(shape_a, shape_b)` with `shape_a < shape_b`.
#[derive(Debug, Clone)]
pub struct PersistentContactPair {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub shape_a: u32,
    pub shape_b: u32,
    /// Unit normal from shape A toward shape B.
    pub normal: Vector2,
    pub contact_count: usize,
    pub contacts: [Contact; MAX_CONTACTS_PER_PAIR],
    /// Mixed friction coefficient for the pair.
    pub friction: Real,
    /// Mixed restitution coefficient for the pair.
    pub restitution: Real,
}

impl PersistentContactPair {
    pub fn key(&self) -> (u32, u32) {
        (self.shape_a, self.shape_b)
    }

    /// The live contacts (the fixed array may hold stale trailing entries).
    pub fn active_contacts(&self) -> &[Contact] {
        &self.contacts[..self.contact_count]
    }

    /// Deepest penetration across the live contacts, zero if none
    /// penetrate.
    pub fn penetration(&self) -> Real {
        self.active_contacts()
            .iter()
            .map(|c| -c.separation)
            .fold(0.0, Real::max)
    }
}

pub(crate) fn pair_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

/// Snapshot of a contact pair handed to listener callbacks.
#[derive(Debug, Clone, Copy)]
pub struct ContactEvent {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub shape_a: u32,
    pub shape_b: u32,
    pub normal: Vector2,
    pub penetration: Real,
    /// World position of the first contact point.
    pub position: Vector2,
    pub normal_impulse: Real,
    pub friction_impulse: Real,
    pub id: u32,
}

/// Observer for contact lifecycle events, invoked between pipeline phases.
/// Implementations carry whatever context they need; callbacks receive the
/// event as plain data and cannot mutate the space.
pub trait ContactListener {
    fn on_contact_began(&mut self, _event: &ContactEvent) {}
    fn on_contact_persisted(&mut self, _event: &ContactEvent) {}
    fn on_contact_removed(&mut self, _event: &ContactEvent) {}
}
