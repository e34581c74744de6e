//! Broad-phase candidate pair generation.
//!
//! Both strategies share one contract: given the bodies and their current
//! bounding boxes, produce the candidate body pairs `(a, b)` with
//! `a.id < b.id` whose filters pass and whose boxes overlap on at least one
//! shape pair. Pruning of stale persistent contacts lives in the space,
//! which owns the contact map.

use std::collections::{HashMap, HashSet};

use crate::body::{BodyId, BodyType, RigidBody};
use crate::math::{Aabb, Real};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadPhase {
    BruteForce,
    SpatialHash,
}

const SPATIAL_HASH_CELL_SIZE: Real = 5.0;

/// World bounding boxes for one body, refreshed each substep.
#[derive(Debug, Clone)]
pub(crate) struct BodyBounds {
    pub body: Aabb,
    pub shapes: Vec<Aabb>,
}

/// Pair filters, cheapest first. Id ordering is handled by the sweep
/// itself.
pub fn should_collide(a: &RigidBody, b: &RigidBody) -> bool {
    if !a.collision_enabled || !b.collision_enabled {
        return false;
    }
    if a.body_type != BodyType::Dynamic && b.body_type != BodyType::Dynamic {
        return false;
    }
    if a.collision_group != 0 && a.collision_group == b.collision_group {
        return false;
    }
    if a.collision_mask & b.collision_category == 0 || b.collision_mask & a.collision_category == 0
    {
        return false;
    }
    true
}

fn any_shape_overlap(a: &BodyBounds, b: &BodyBounds) -> bool {
    for sa in &a.shapes {
        for sb in &b.shapes {
            if sa.overlaps(sb) {
                return true;
            }
        }
    }
    false
}

pub(crate) fn collect_pairs(
    kind: BroadPhase,
    bodies: &[Option<RigidBody>],
    bounds: &[Option<BodyBounds>],
) -> Vec<(BodyId, BodyId)> {
    match kind {
        BroadPhase::BruteForce => brute_force_pairs(bodies, bounds),
        BroadPhase::SpatialHash => spatial_hash_pairs(bodies, bounds),
    }
}

fn brute_force_pairs(
    bodies: &[Option<RigidBody>],
    bounds: &[Option<BodyBounds>],
) -> Vec<(BodyId, BodyId)> {
    let mut pairs = Vec::new();
    for i in 0..bodies.len() {
        let (Some(a), Some(bounds_a)) = (&bodies[i], &bounds[i]) else {
            continue;
        };
        for j in (i + 1)..bodies.len() {
            let (Some(b), Some(bounds_b)) = (&bodies[j], &bounds[j]) else {
                continue;
            };
            if !should_collide(a, b) {
                continue;
            }
            if bounds_a.body.overlaps(&bounds_b.body) && any_shape_overlap(bounds_a, bounds_b) {
                pairs.push((a.id, b.id));
            }
        }
    }
    pairs
}

fn spatial_hash_pairs(
    bodies: &[Option<RigidBody>],
    bounds: &[Option<BodyBounds>],
) -> Vec<(BodyId, BodyId)> {
    let mut grid = SpatialHash::new(SPATIAL_HASH_CELL_SIZE);
    for (i, slot) in bounds.iter().enumerate() {
        if let Some(bb) = slot {
            grid.insert(i as BodyId, &bb.body);
        }
    }

    let mut pairs = Vec::new();
    for (ia, ib) in grid.pairs() {
        let (Some(a), Some(bounds_a)) = (&bodies[ia as usize], &bounds[ia as usize]) else {
            continue;
        };
        let (Some(b), Some(bounds_b)) = (&bodies[ib as usize], &bounds[ib as usize]) else {
            continue;
        };
        if !should_collide(a, b) {
            continue;
        }
        if bounds_a.body.overlaps(&bounds_b.body) && any_shape_overlap(bounds_a, bounds_b) {
            pairs.push((a.id, b.id));
        }
    }
    // cell iteration order is arbitrary; keep the step deterministic
    pairs.sort_unstable();
    pairs
}

/// Uniform grid over body bounding boxes. Bodies spanning several cells are
/// inserted into each; `pairs` deduplicates by ordered id.
pub struct SpatialHash {
    inv_cell_size: Real,
    cells: HashMap<(i32, i32), Vec<BodyId>>,
}

impl SpatialHash {
    pub fn new(cell_size: Real) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { SPATIAL_HASH_CELL_SIZE };
        Self {
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: BodyId, aabb: &Aabb) {
        let x0 = (aabb.min.x * self.inv_cell_size).floor() as i32;
        let y0 = (aabb.min.y * self.inv_cell_size).floor() as i32;
        let x1 = (aabb.max.x * self.inv_cell_size).floor() as i32;
        let y1 = (aabb.max.y * self.inv_cell_size).floor() as i32;

        for cx in x0..=x1 {
            for cy in y0..=y1 {
                self.cells.entry((cx, cy)).or_default().push(id);
            }
        }
    }

    /// Unique ordered pairs of bodies sharing at least one cell.
    pub fn pairs(&self) -> Vec<(BodyId, BodyId)> {
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();

        for cell_bodies in self.cells.values() {
            let n = cell_bodies.len();
            for i in 0..n {
                for j in (i + 1)..n {
                    let a = cell_bodies[i];
                    let b = cell_bodies[j];
                    let pair = if a < b { (a, b) } else { (b, a) };
                    if seen.insert(pair) {
                        pairs.push(pair);
                    }
                }
            }
        }
        pairs
    }
}
