//! Sequential-impulse solver for persistent contacts.
//!
//! Per substep: `presolve` fixes effective masses and the velocity bias,
//! `warmstart` replays accumulated impulses for persisted contacts, then
//! `solve_velocity` runs once per velocity iteration, friction before the
//! normal. Accumulated impulses are clamped, and only the delta is applied.

use crate::body::{apply_impulse_at, velocity_state, RigidBody};
use crate::contact::PersistentContactPair;
use crate::math::{cross, cross_sv, Real, Vector2};
use crate::settings::{PositionCorrection, SpaceSettings};

fn tangent_of(normal: Vector2) -> Vector2 {
    Vector2::new(-normal.y, normal.x)
}

pub(crate) fn presolve(
    bodies: &[Option<RigidBody>],
    pcp: &mut PersistentContactPair,
    settings: &SpaceSettings,
    inv_h: Real,
) {
    let ia = pcp.body_a as usize;
    let ib = pcp.body_b as usize;
    let (va, wa, invma, invia) = velocity_state(bodies, ia);
    let (vb, wb, invmb, invib) = velocity_state(bodies, ib);

    let normal = pcp.normal;
    let tangent = tangent_of(normal);

    for contact in pcp.contacts[..pcp.contact_count].iter_mut() {
        let ra = contact.anchor_a;
        let rb = contact.anchor_b;

        let rn_a = cross(ra, normal);
        let rn_b = cross(rb, normal);
        let k_normal = invma + invmb + invia * rn_a * rn_a + invib * rn_b * rn_b;
        contact.solver.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

        let rt_a = cross(ra, tangent);
        let rt_b = cross(rb, tangent);
        let k_tangent = invma + invmb + invia * rt_a * rt_a + invib * rt_b * rt_b;
        contact.solver.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

        let rel_v = (vb + cross_sv(wb, rb)) - (va + cross_sv(wa, ra));
        let vn = rel_v.dot(normal);

        // restitution only above the approach-speed threshold
        let mut bias = -pcp.restitution * (vn + settings.restitution_threshold).min(0.0);
        if settings.contact_position_correction == PositionCorrection::Baumgarte {
            bias += settings.baumgarte
                * inv_h
                * (-contact.separation - settings.penetration_slop).max(0.0);
        }
        contact.solver.velocity_bias = bias;
    }
}

pub(crate) fn warmstart(
    bodies: &mut [Option<RigidBody>],
    pcp: &mut PersistentContactPair,
    settings: &SpaceSettings,
) {
    let ia = pcp.body_a as usize;
    let ib = pcp.body_b as usize;
    let normal = pcp.normal;
    let tangent = tangent_of(normal);

    for contact in pcp.contacts[..pcp.contact_count].iter_mut() {
        if settings.warmstarting && contact.is_persisted {
            let impulse =
                normal * contact.solver.normal_impulse + tangent * contact.solver.tangent_impulse;
            apply_impulse_at(bodies, ia, -impulse, contact.anchor_a);
            apply_impulse_at(bodies, ib, impulse, contact.anchor_b);
        } else {
            contact.solver.normal_impulse = 0.0;
            contact.solver.tangent_impulse = 0.0;
        }
    }
}

/// One velocity iteration over the pair's contacts.
pub(crate) fn solve_velocity(bodies: &mut [Option<RigidBody>], pcp: &mut PersistentContactPair) {
    let ia = pcp.body_a as usize;
    let ib = pcp.body_b as usize;
    let normal = pcp.normal;
    let tangent = tangent_of(normal);

    for contact in pcp.contacts[..pcp.contact_count].iter_mut() {
        let ra = contact.anchor_a;
        let rb = contact.anchor_b;

        // friction, clamped to the cone of the accumulated normal impulse
        // from the start of this iteration
        let (va, wa, _, _) = velocity_state(bodies, ia);
        let (vb, wb, _, _) = velocity_state(bodies, ib);
        let rel_v = (vb + cross_sv(wb, rb)) - (va + cross_sv(wa, ra));
        let vt = rel_v.dot(tangent);
        let lambda = -vt * contact.solver.tangent_mass;

        let max_friction = pcp.friction * contact.solver.normal_impulse;
        let old = contact.solver.tangent_impulse;
        contact.solver.tangent_impulse = (old + lambda).clamp(-max_friction, max_friction);
        let delta = contact.solver.tangent_impulse - old;
        if delta != 0.0 {
            let impulse = tangent * delta;
            apply_impulse_at(bodies, ia, -impulse, ra);
            apply_impulse_at(bodies, ib, impulse, rb);
        }

        // normal, non-negative accumulated impulse
        let (va, wa, _, _) = velocity_state(bodies, ia);
        let (vb, wb, _, _) = velocity_state(bodies, ib);
        let rel_v = (vb + cross_sv(wb, rb)) - (va + cross_sv(wa, ra));
        let vn = rel_v.dot(normal);
        let lambda = -(vn - contact.solver.velocity_bias) * contact.solver.normal_mass;

        let old = contact.solver.normal_impulse;
        contact.solver.normal_impulse = (old + lambda).max(0.0);
        let delta = contact.solver.normal_impulse - old;
        if delta != 0.0 {
            let impulse = normal * delta;
            apply_impulse_at(bodies, ia, -impulse, ra);
            apply_impulse_at(bodies, ib, impulse, rb);
        }
    }
}

/// One NGS pass over a pair: push positions and angles apart along the
/// refreshed contact normal, capped per iteration.
pub(crate) fn solve_position(
    bodies: &mut [Option<RigidBody>],
    ia: usize,
    ib: usize,
    normal: Vector2,
    corrections: &[(Vector2, Vector2, Real)],
    settings: &SpaceSettings,
) {
    for &(ra, rb, separation) in corrections {
        let c = (separation + settings.penetration_slop).min(0.0);
        if c == 0.0 {
            continue;
        }

        let (_, _, invma, invia) = velocity_state(bodies, ia);
        let (_, _, invmb, invib) = velocity_state(bodies, ib);
        let rn_a = cross(ra, normal);
        let rn_b = cross(rb, normal);
        let k = invma + invmb + invia * rn_a * rn_a + invib * rn_b * rn_b;
        if k <= 0.0 {
            continue;
        }

        let magnitude = (settings.baumgarte * -c).min(settings.max_linear_correction);
        let impulse = normal * (magnitude / k);

        if let Some(a) = bodies.get_mut(ia).and_then(|slot| slot.as_mut()) {
            if a.invmass > 0.0 || a.invinertia > 0.0 {
                a.shift(-impulse * a.invmass, -a.invinertia * cross(ra, impulse));
            }
        }
        if let Some(b) = bodies.get_mut(ib).and_then(|slot| slot.as_mut()) {
            if b.invmass > 0.0 || b.invinertia > 0.0 {
                b.shift(impulse * b.invmass, b.invinertia * cross(rb, impulse));
            }
        }
    }
}
