//! End-to-end tests for the step pipeline: integration, contact solving,
//! constraints, events, and space lifecycle.

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;

use impulse2d::body::{BodyType, RigidBody, RigidBodyInit};
use impulse2d::broadphase::BroadPhase;
use impulse2d::constraint::Constraint;
use impulse2d::contact::{ContactEvent, ContactListener};
use impulse2d::error::PhysicsError;
use impulse2d::math::{Aabb, Vector2};
use impulse2d::settings::PositionCorrection;
use impulse2d::shape::Shape;
use impulse2d::space::Space;

const DT: f32 = 1.0 / 60.0;

fn dynamic_body(position: Vector2) -> RigidBody {
    RigidBody::new(RigidBodyInit {
        body_type: BodyType::Dynamic,
        position,
        ..Default::default()
    })
}

fn dynamic_circle(position: Vector2, radius: f32) -> RigidBody {
    let mut body = dynamic_body(position);
    body.add_shape(Shape::circle(Vector2::ZERO, radius));
    body
}

fn dynamic_box(position: Vector2, width: f32, height: f32) -> RigidBody {
    let mut body = dynamic_body(position);
    body.material.restitution = 0.0;
    body.add_shape(Shape::rect(width, height, Vector2::ZERO).unwrap());
    body
}

fn static_ground(position: Vector2, width: f32, height: f32) -> RigidBody {
    let mut body = RigidBody::new(RigidBodyInit {
        position,
        ..Default::default()
    });
    body.material.restitution = 0.0;
    body.add_shape(Shape::rect(width, height, Vector2::ZERO).unwrap());
    body
}

// =========================================================================
// Step basics
// =========================================================================

#[test]
fn test_free_fall_matches_symplectic_euler() {
    let mut space = Space::new();
    space.settings.linear_damping = 0.0;
    let id = space.add_rigidbody(dynamic_circle(Vector2::new(0.0, 10.0), 1.0));

    for _ in 0..60 {
        space.step(DT);
    }

    // p = p0 - g h^2 n(n+1)/2 for semi-implicit Euler
    let expected = 10.0 - 9.81 * DT * DT * (60.0 * 61.0 / 2.0);
    let body = space.get_body(id).unwrap();
    assert_relative_eq!(body.position().y, expected, epsilon = 1e-3);
    assert_relative_eq!(body.position().x, 0.0, epsilon = 1e-6);
}

#[test]
fn test_zero_dt_is_noop() {
    let mut space = Space::new();
    let id = space.add_rigidbody(dynamic_circle(Vector2::new(0.0, 10.0), 1.0));
    space.step(0.0);
    assert_eq!(space.get_body(id).unwrap().position().y, 10.0);
}

#[test]
fn test_zero_substeps_is_noop() {
    let mut space = Space::new();
    space.settings.substeps = 0;
    let id = space.add_rigidbody(dynamic_circle(Vector2::new(0.0, 10.0), 1.0));
    space.step(DT);
    assert_eq!(space.get_body(id).unwrap().position().y, 10.0);
}

#[test]
fn test_substeps_cover_the_full_dt() {
    let mut space = Space::new();
    space.settings.linear_damping = 0.0;
    space.set_gravity(Vector2::ZERO);
    let id = space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0));
    space.get_body_mut(id).unwrap().linear_velocity = Vector2::new(6.0, 0.0);

    space.settings.substeps = 4;
    space.step(1.0);
    assert_relative_eq!(space.get_body(id).unwrap().position().x, 6.0, epsilon = 1e-4);
}

#[test]
fn test_step_is_deterministic() {
    let run = || {
        let mut space = Space::new();
        space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
        for i in 0..5 {
            space.add_rigidbody(dynamic_box(
                Vector2::new(i as f32 * 0.3 - 0.6, 1.2 + i as f32),
                1.0,
                1.0,
            ));
        }
        for _ in 0..120 {
            space.step(DT);
        }
        space
            .bodies()
            .map(|b| (b.position(), b.angle()))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

// =========================================================================
// Contacts and resting
// =========================================================================

#[test]
fn test_static_body_unmoved_by_resting_box() {
    let mut space = Space::new();
    let ground = space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
    space.add_rigidbody(dynamic_box(Vector2::new(0.0, 2.0), 1.0, 1.0));

    for _ in 0..120 {
        space.step(DT);
    }

    let body = space.get_body(ground).unwrap();
    assert_eq!(body.position(), Vector2::ZERO);
    assert_eq!(body.linear_velocity, Vector2::ZERO);
}

#[test]
fn test_box_comes_to_rest_on_ground() {
    let mut space = Space::new();
    space.set_gravity(Vector2::new(0.0, -10.0));
    space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
    let id = space.add_rigidbody(dynamic_box(Vector2::new(0.0, 2.0), 1.0, 1.0));

    for _ in 0..300 {
        space.step(DT);
    }

    let body = space.get_body(id).unwrap();
    assert!(
        body.linear_velocity.y.abs() < 0.01,
        "box still moving: vy = {}",
        body.linear_velocity.y
    );
    // resting height is ground top + half extent, minus tolerated
    // penetration
    let rest = body.position().y - 1.0;
    assert!(
        rest.abs() < space.settings.penetration_slop + 0.02,
        "box rests at y = {}",
        body.position().y
    );
}

#[test]
fn test_momentum_preserved_in_elastic_collision() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    space.settings.linear_damping = 0.0;

    let mut a = dynamic_circle(Vector2::new(-2.0, 0.0), 0.5);
    a.material.restitution = 1.0;
    a.material.friction = 0.0;
    let mut b = dynamic_circle(Vector2::new(2.0, 0.0), 0.8);
    b.material.restitution = 1.0;
    b.material.friction = 0.0;
    let ia = space.add_rigidbody(a);
    let ib = space.add_rigidbody(b);
    space.get_body_mut(ia).unwrap().linear_velocity = Vector2::new(4.0, 0.0);
    space.get_body_mut(ib).unwrap().linear_velocity = Vector2::new(-2.0, 0.0);

    let momentum = |space: &Space| -> f32 {
        space
            .bodies()
            .map(|b| b.mass() * b.linear_velocity.x)
            .sum()
    };
    let before = momentum(&space);

    for _ in 0..120 {
        space.step(DT);
    }
    assert_relative_eq!(momentum(&space), before, epsilon = 1e-3);
}

#[test]
fn test_contact_persistence_and_warm_impulses() {
    let mut space = Space::new();
    let ground = space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
    // start slightly overlapping so the pair exists from the first step
    let falling = space.add_rigidbody(dynamic_box(Vector2::new(0.0, 0.98), 1.0, 1.0));

    let shape_a = space.get_body(ground).unwrap().shapes()[0].id();
    let shape_b = space.get_body(falling).unwrap().shapes()[0].id();

    for step in 0..10 {
        space.step(DT);
        let pcp = space
            .contact_pair(shape_a, shape_b)
            .expect("boxes in sustained contact");
        assert!(pcp.contact_count > 0);
        if step >= 1 {
            assert!(
                pcp.contacts[0].is_persisted,
                "contact not persisted on step {step}"
            );
            assert!(pcp.contacts[0].solver.normal_impulse > 0.0);
        }
    }
}

#[test]
fn test_warm_started_impulses_stay_in_friction_cone() {
    let mut space = Space::new();
    space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
    space.add_rigidbody(dynamic_box(Vector2::new(0.2, 1.2), 1.0, 1.0));
    space.add_rigidbody(dynamic_box(Vector2::new(0.0, 2.3), 1.0, 1.0));

    for _ in 0..240 {
        space.step(DT);
    }

    for pcp in space.contact_pairs() {
        for contact in pcp.active_contacts() {
            assert!(contact.solver.normal_impulse >= 0.0);
            assert!(
                contact.solver.tangent_impulse.abs()
                    <= pcp.friction * contact.solver.normal_impulse + 1e-3
            );
        }
    }
}

#[test]
fn test_contact_keys_are_ordered() {
    let mut space = Space::new();
    space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
    for i in 0..4 {
        space.add_rigidbody(dynamic_box(Vector2::new(i as f32 * 1.2 - 2.0, 1.2), 1.0, 1.0));
    }
    for _ in 0..30 {
        space.step(DT);
    }
    assert!(space.contact_pairs().count() > 0);
    for pcp in space.contact_pairs() {
        assert!(pcp.shape_a < pcp.shape_b);
    }
}

#[test]
fn test_pyramid_stack_settles() {
    let mut space = Space::new();
    space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));

    let rows = 10;
    for row in 0..rows {
        let count = rows - row;
        for i in 0..count {
            let x = (i as f32 - (count - 1) as f32 * 0.5) * 1.05;
            let y = 1.01 + row as f32 * 1.01;
            space.add_rigidbody(dynamic_box(Vector2::new(x, y), 1.0, 1.0));
        }
    }

    for _ in 0..600 {
        space.step(DT);
    }

    let max_vx = space
        .bodies()
        .map(|b| b.linear_velocity.x.abs())
        .fold(0.0f32, f32::max);
    assert!(max_vx < 0.5, "pyramid still sliding: max |vx| = {max_vx}");
}

#[test]
fn test_ngs_position_correction_resolves_overlap() {
    let mut space = Space::new();
    space.settings.contact_position_correction = PositionCorrection::Ngs;
    space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
    let id = space.add_rigidbody(dynamic_box(Vector2::new(0.0, 2.0), 1.0, 1.0));

    for _ in 0..300 {
        space.step(DT);
    }

    let body = space.get_body(id).unwrap();
    assert!(body.linear_velocity.y.abs() < 0.05);
    assert!((body.position().y - 1.0).abs() < 0.1);
}

// =========================================================================
// Filtering
// =========================================================================

#[test]
fn test_shared_group_suppresses_contacts() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);

    let mut a = dynamic_circle(Vector2::new(-0.4, 0.0), 0.5);
    a.collision_group = 7;
    let mut b = dynamic_circle(Vector2::new(0.4, 0.0), 0.5);
    b.collision_group = 7;
    let ia = space.add_rigidbody(a);
    space.add_rigidbody(b);

    space.step(DT);
    assert_eq!(space.contact_pairs().count(), 0);

    space.get_body_mut(ia).unwrap().collision_group = 0;
    space.step(DT);
    assert_eq!(space.contact_pairs().count(), 1);
}

#[test]
fn test_zero_mask_produces_no_contacts() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    let mut a = dynamic_circle(Vector2::new(-0.4, 0.0), 0.5);
    a.collision_mask = 0;
    space.add_rigidbody(a);
    space.add_rigidbody(dynamic_circle(Vector2::new(0.4, 0.0), 0.5));

    for _ in 0..10 {
        space.step(DT);
    }
    assert_eq!(space.contact_pairs().count(), 0);
}

#[test]
fn test_disabled_collisions_produce_no_contacts() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    let mut a = dynamic_circle(Vector2::new(-0.4, 0.0), 0.5);
    a.collision_enabled = false;
    space.add_rigidbody(a);
    space.add_rigidbody(dynamic_circle(Vector2::new(0.4, 0.0), 0.5));

    space.step(DT);
    assert_eq!(space.contact_pairs().count(), 0);
}

// =========================================================================
// Constraints
// =========================================================================

#[test]
fn test_distance_joint_holds_length() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    let ia = space.add_rigidbody(dynamic_circle(Vector2::new(-1.0, 0.0), 0.5));
    let ib = space.add_rigidbody(dynamic_circle(Vector2::new(1.0, 0.0), 0.5));
    space.get_body_mut(ia).unwrap().linear_velocity = Vector2::new(1.0, 0.0);
    space.get_body_mut(ib).unwrap().linear_velocity = Vector2::new(-1.0, 0.0);

    space
        .add_constraint(Constraint::distance(
            ia,
            Some(ib),
            Vector2::ZERO,
            Vector2::ZERO,
            2.0,
        ))
        .unwrap();

    for _ in 0..120 {
        space.step(DT);
    }

    let pa = space.get_body(ia).unwrap().position();
    let pb = space.get_body(ib).unwrap().position();
    assert!(
        ((pa - pb).length() - 2.0).abs() < 0.05,
        "joint drifted to {}",
        (pa - pb).length()
    );
}

#[test]
fn test_spring_pulls_toward_rest_length() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    let ia = space.add_rigidbody(dynamic_circle(Vector2::new(-1.5, 0.0), 0.3));
    let ib = space.add_rigidbody(dynamic_circle(Vector2::new(1.5, 0.0), 0.3));

    space
        .add_constraint(Constraint::spring(
            ia,
            Some(ib),
            Vector2::ZERO,
            Vector2::ZERO,
            2.0,
            40.0,
            4.0,
        ))
        .unwrap();

    for _ in 0..120 {
        space.step(DT);
    }

    let pa = space.get_body(ia).unwrap().position();
    let pb = space.get_body(ib).unwrap().position();
    let distance = (pa - pb).length();
    assert!(distance < 2.9, "spring never contracted: {distance}");
}

#[test]
fn test_world_anchored_hinge_acts_as_pendulum() {
    let mut space = Space::new();
    let id = space.add_rigidbody(dynamic_circle(Vector2::new(1.0, 0.0), 0.2));
    space
        .add_constraint(Constraint::hinge(id, None, Vector2::ZERO))
        .unwrap();

    for _ in 0..180 {
        space.step(DT);
    }

    // the bob stays on the unit circle around the pivot while swinging,
    // and can never rise above its release height
    let p = space.get_body(id).unwrap().position();
    assert!(
        (p.length() - 1.0).abs() < 0.05,
        "pendulum length drifted to {}",
        p.length()
    );
    assert!(p.y < 0.1, "pendulum rose above its release height: {}", p.y);
}

#[test]
fn test_hinge_angle_limits_stop_rotation() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    let id = space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0));
    space.get_body_mut(id).unwrap().angular_velocity = 2.0;

    space
        .add_constraint(Constraint::hinge_with_limits(
            id,
            None,
            Vector2::ZERO,
            -0.5,
            0.5,
        ))
        .unwrap();

    for _ in 0..240 {
        space.step(DT);
    }

    let body = space.get_body(id).unwrap();
    assert!(
        (body.angle() - 0.5).abs() < 0.2,
        "angle escaped the limit: {}",
        body.angle()
    );
    assert!(body.angular_velocity.abs() < 0.1);
}

#[test]
fn test_spline_constraint_projects_anchor_onto_curve() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    let id = space.add_rigidbody(dynamic_circle(Vector2::new(0.3, 0.0), 0.2));

    let points = vec![
        Vector2::new(-4.0, 1.0),
        Vector2::new(-2.0, 1.0),
        Vector2::new(0.0, 1.0),
        Vector2::new(2.0, 1.0),
        Vector2::new(4.0, 1.0),
    ];
    space
        .add_constraint(Constraint::spline(id, Vector2::ZERO, points).unwrap())
        .unwrap();

    for _ in 0..180 {
        space.step(DT);
    }

    let p = space.get_body(id).unwrap().position();
    assert!(
        (p.y - 1.0).abs() < 0.05,
        "anchor should sit on the curve, got y = {}",
        p.y
    );
}

#[test]
fn test_spline_needs_four_control_points() {
    let points = vec![Vector2::ZERO, Vector2::new(1.0, 0.0), Vector2::new(2.0, 0.0)];
    assert!(matches!(
        Constraint::spline(0, Vector2::ZERO, points),
        Err(PhysicsError::InvalidArgument(_))
    ));
}

#[test]
fn test_set_control_points_only_on_splines() {
    let mut constraint = Constraint::distance(0, None, Vector2::ZERO, Vector2::ZERO, 1.0);
    assert!(constraint
        .set_control_points(vec![Vector2::ZERO; 4])
        .is_err());
}

#[test]
fn test_constraint_requires_known_bodies() {
    let mut space = Space::new();
    let constraint = Constraint::distance(99, None, Vector2::ZERO, Vector2::ZERO, 1.0);
    assert!(matches!(
        space.add_constraint(constraint),
        Err(PhysicsError::NotFound(99))
    ));
}

// =========================================================================
// Events
// =========================================================================

#[derive(Default)]
struct EventCounts {
    began: usize,
    persisted: usize,
    removed: usize,
}

struct RecordingListener(Rc<RefCell<EventCounts>>);

impl ContactListener for RecordingListener {
    fn on_contact_began(&mut self, _event: &ContactEvent) {
        self.0.borrow_mut().began += 1;
    }
    fn on_contact_persisted(&mut self, _event: &ContactEvent) {
        self.0.borrow_mut().persisted += 1;
    }
    fn on_contact_removed(&mut self, _event: &ContactEvent) {
        self.0.borrow_mut().removed += 1;
    }
}

#[test]
fn test_contact_event_lifecycle() {
    let counts = Rc::new(RefCell::new(EventCounts::default()));
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    space.set_contact_listener(Box::new(RecordingListener(counts.clone())));

    let ia = space.add_rigidbody(dynamic_circle(Vector2::new(-0.4, 0.0), 0.5));
    space.add_rigidbody(dynamic_circle(Vector2::new(0.4, 0.0), 0.5));

    space.step(DT);
    assert_eq!(counts.borrow().began, 1);

    space.step(DT);
    assert!(counts.borrow().persisted >= 1);

    space.get_body_mut(ia).unwrap().set_position(Vector2::new(100.0, 0.0));
    space.step(DT);
    assert!(counts.borrow().removed >= 1);
}

// =========================================================================
// Space lifecycle
// =========================================================================

#[test]
fn test_add_remove_round_trip() {
    let mut space = Space::new();
    let id = space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0));
    assert_eq!(id, 0);
    assert_eq!(space.body_count(), 1);

    let body = space.remove_rigidbody(id).unwrap();
    assert_eq!(space.body_count(), 0);
    assert!(space.get_body(id).is_none());

    // removing again reports the miss
    assert!(matches!(
        space.remove_rigidbody(id),
        Err(PhysicsError::NotFound(0))
    ));

    // re-adding assigns a fresh, larger id
    let new_id = space.add_rigidbody(body);
    assert_eq!(new_id, 1);
}

#[test]
fn test_body_ids_are_monotonic() {
    let mut space = Space::new();
    let a = space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0));
    let b = space.add_rigidbody(dynamic_circle(Vector2::new(5.0, 0.0), 1.0));
    space.remove_rigidbody(a).unwrap();
    let c = space.add_rigidbody(dynamic_circle(Vector2::new(10.0, 0.0), 1.0));
    assert!(a < b && b < c);
}

#[test]
fn test_clear_resets_the_space() {
    let mut space = Space::new();
    let ia = space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0));
    space.add_rigidbody(dynamic_circle(Vector2::new(0.5, 0.0), 1.0));
    space
        .add_constraint(Constraint::distance(ia, None, Vector2::ZERO, Vector2::new(3.0, 0.0), 2.0))
        .unwrap();
    space.step(DT);

    space.clear();
    assert_eq!(space.body_count(), 0);
    assert_eq!(space.constraint_count(), 0);
    assert_eq!(space.contact_pairs().count(), 0);
    // counters restart
    assert_eq!(space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0)), 0);
}

#[test]
fn test_kill_bounds_remove_escaped_bodies() {
    let mut space = Space::new();
    space.kill_bounds = Aabb::new(-10.0, -10.0, 10.0, 10.0);
    let id = space.add_rigidbody(dynamic_circle(Vector2::new(0.0, 50.0), 1.0));

    space.step(DT);
    assert!(space.get_body(id).is_none());
    assert_eq!(space.body_count(), 0);
}

#[test]
fn test_remove_body_drops_its_contacts() {
    let mut space = Space::new();
    space.set_gravity(Vector2::ZERO);
    let ia = space.add_rigidbody(dynamic_circle(Vector2::new(-0.4, 0.0), 0.5));
    space.add_rigidbody(dynamic_circle(Vector2::new(0.4, 0.0), 0.5));
    space.step(DT);
    assert_eq!(space.contact_pairs().count(), 1);

    space.remove_rigidbody(ia).unwrap();
    assert_eq!(space.contact_pairs().count(), 0);
}

// =========================================================================
// Broad-phase strategies and queries
// =========================================================================

#[test]
fn test_spatial_hash_matches_brute_force() {
    let run = |broadphase: BroadPhase| {
        let mut space = Space::new();
        space.set_broadphase(broadphase);
        space.add_rigidbody(static_ground(Vector2::ZERO, 100.0, 1.0));
        for i in 0..6 {
            space.add_rigidbody(dynamic_box(
                Vector2::new(i as f32 * 1.1 - 3.0, 1.2),
                1.0,
                1.0,
            ));
        }
        for _ in 0..120 {
            space.step(DT);
        }
        space.bodies().map(|b| b.position()).collect::<Vec<_>>()
    };

    let brute = run(BroadPhase::BruteForce);
    let hashed = run(BroadPhase::SpatialHash);
    assert_eq!(brute.len(), hashed.len());
    for (a, b) in brute.iter().zip(hashed.iter()) {
        assert!((*a - *b).length() < 1e-4);
    }
}

#[test]
fn test_query_aabb() {
    let mut space = Space::new();
    let near = space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0));
    let far = space.add_rigidbody(dynamic_circle(Vector2::new(50.0, 0.0), 1.0));

    let hits = space.query_aabb(Aabb::new(-2.0, -2.0, 2.0, 2.0));
    assert!(hits.contains(&near));
    assert!(!hits.contains(&far));
}

#[test]
fn test_raycast_hits_closest_body() {
    let mut space = Space::new();
    let circle = space.add_rigidbody(dynamic_circle(Vector2::ZERO, 1.0));
    let mut far_box = dynamic_body(Vector2::new(5.0, 0.0));
    far_box.add_shape(Shape::rect(1.0, 1.0, Vector2::ZERO).unwrap());
    space.add_rigidbody(far_box);

    let hit = space
        .raycast(Vector2::new(-5.0, 0.0), Vector2::new(1.0, 0.0), 100.0)
        .expect("ray should hit");
    assert_eq!(hit.body, circle);
    assert_relative_eq!(hit.distance, 4.0, epsilon = 1e-3);
    assert_relative_eq!(hit.point.x, -1.0, epsilon = 1e-3);
}

#[test]
fn test_raycast_respects_max_distance() {
    let mut space = Space::new();
    space.add_rigidbody(dynamic_circle(Vector2::new(10.0, 0.0), 1.0));
    assert!(space
        .raycast(Vector2::ZERO, Vector2::new(1.0, 0.0), 5.0)
        .is_none());
}

