//! Non-contact constraints: distance joint, spring, hinge, and spline
//! follower.
//!
//! Every constraint runs the same three phases as the contact solver:
//! `presolve` caches anchors, effective masses, and bias terms for the
//! substep, `warmstart` replays the accumulated impulse, and `solve` runs
//! once per velocity iteration. A missing second body means the constraint
//! is anchored to a fixed world-space point.

use crate::body::{apply_impulse_at, velocity_state, BodyId, RigidBody};
use crate::error::{PhysicsError, Result};
use crate::math::{cross, cross_sv, Real, Transform, Vector2};
use crate::settings::SpaceSettings;

pub type ConstraintId = u64;

fn body_frame(bodies: &[Option<RigidBody>], id: BodyId) -> Option<(Transform, Vector2, Real)> {
    bodies
        .get(id as usize)
        .and_then(|slot| slot.as_ref())
        .map(|b| (b.transform(), b.position(), b.angle()))
}

/// Shared geometry of an axial (distance-like) constraint.
struct Axial {
    normal: Vector2,
    ra: Vector2,
    rb: Vector2,
    c: Real,
    k: Real,
}

fn axial_geometry(
    bodies: &[Option<RigidBody>],
    body_a: BodyId,
    body_b: Option<BodyId>,
    anchor_a: Vector2,
    anchor_b: Vector2,
    target_length: Real,
) -> Option<Axial> {
    let (xform_a, pos_a, _) = body_frame(bodies, body_a)?;
    let wa = xform_a.apply(anchor_a);
    let (wb, rb) = match body_b {
        Some(id) => {
            let (xform_b, pos_b, _) = body_frame(bodies, id)?;
            let wb = xform_b.apply(anchor_b);
            (wb, wb - pos_b)
        }
        // anchor_b is a fixed world point
        None => (anchor_b, Vector2::ZERO),
    };
    let ra = wa - pos_a;

    let delta = wb - wa;
    let dist = delta.length();
    if dist < 1e-8 {
        return None;
    }
    let normal = delta / dist;

    let (_, _, invma, invia) = velocity_state(bodies, body_a as usize);
    let (invmb, invib) = match body_b {
        Some(id) => {
            let (_, _, m, i) = velocity_state(bodies, id as usize);
            (m, i)
        }
        None => (0.0, 0.0),
    };
    let rn_a = cross(ra, normal);
    let rn_b = cross(rb, normal);
    let k = invma + invmb + invia * rn_a * rn_a + invib * rn_b * rn_b;
    if k <= 0.0 {
        return None;
    }

    Some(Axial {
        normal,
        ra,
        rb,
        c: dist - target_length,
        k,
    })
}

fn relative_normal_velocity(
    bodies: &[Option<RigidBody>],
    body_a: BodyId,
    body_b: Option<BodyId>,
    ra: Vector2,
    rb: Vector2,
    normal: Vector2,
) -> Real {
    let (va, wa, _, _) = velocity_state(bodies, body_a as usize);
    let (vb, wb) = match body_b {
        Some(id) => {
            let (v, w, _, _) = velocity_state(bodies, id as usize);
            (v, w)
        }
        None => (Vector2::ZERO, 0.0),
    };
    ((vb + cross_sv(wb, rb)) - (va + cross_sv(wa, ra))).dot(normal)
}

fn apply_axial(
    bodies: &mut [Option<RigidBody>],
    body_a: BodyId,
    body_b: Option<BodyId>,
    ra: Vector2,
    rb: Vector2,
    impulse: Vector2,
) {
    apply_impulse_at(bodies, body_a as usize, -impulse, ra);
    if let Some(id) = body_b {
        apply_impulse_at(bodies, id as usize, impulse, rb);
    }
}

/// Rigid rod between two anchors: `|wa - wb| = length`.
#[derive(Debug, Clone)]
pub struct DistanceJoint {
    pub body_a: BodyId,
    pub body_b: Option<BodyId>,
    /// Body-local anchors; `anchor_b` is a fixed world point when `body_b`
    /// is `None`.
    pub anchor_a: Vector2,
    pub anchor_b: Vector2,
    pub length: Real,

    normal: Vector2,
    ra: Vector2,
    rb: Vector2,
    bias: Real,
    mass: Real,
    impulse: Real,
    active: bool,
}

impl DistanceJoint {
    fn presolve(&mut self, bodies: &[Option<RigidBody>], settings: &SpaceSettings, inv_h: Real) {
        let Some(ax) = axial_geometry(
            bodies,
            self.body_a,
            self.body_b,
            self.anchor_a,
            self.anchor_b,
            self.length,
        ) else {
            self.active = false;
            return;
        };
        self.normal = ax.normal;
        self.ra = ax.ra;
        self.rb = ax.rb;
        self.bias = settings.baumgarte * inv_h * ax.c;
        self.mass = 1.0 / ax.k;
        self.active = true;
    }

    fn warmstart(&self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }
        apply_axial(
            bodies,
            self.body_a,
            self.body_b,
            self.ra,
            self.rb,
            self.normal * self.impulse,
        );
    }

    fn solve(&mut self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }
        let cdot = relative_normal_velocity(
            bodies, self.body_a, self.body_b, self.ra, self.rb, self.normal,
        );
        let lambda = -(cdot + self.bias) * self.mass;
        self.impulse += lambda;
        apply_axial(
            bodies,
            self.body_a,
            self.body_b,
            self.ra,
            self.rb,
            self.normal * lambda,
        );
    }
}

/// Soft distance constraint with stiffness and damping, solved with the
/// usual soft-constraint parameters `beta = hk/(d + hk)` and
/// `gamma = 1/((d + hk)h)`.
#[derive(Debug, Clone)]
pub struct Spring {
    pub body_a: BodyId,
    pub body_b: Option<BodyId>,
    pub anchor_a: Vector2,
    pub anchor_b: Vector2,
    pub rest_length: Real,
    pub stiffness: Real,
    pub damping: Real,

    normal: Vector2,
    ra: Vector2,
    rb: Vector2,
    bias: Real,
    gamma: Real,
    mass: Real,
    impulse: Real,
    active: bool,
}

impl Spring {
    fn presolve(
        &mut self,
        bodies: &[Option<RigidBody>],
        settings: &SpaceSettings,
        h: Real,
        inv_h: Real,
    ) {
        let Some(ax) = axial_geometry(
            bodies,
            self.body_a,
            self.body_b,
            self.anchor_a,
            self.anchor_b,
            self.rest_length,
        ) else {
            self.active = false;
            return;
        };
        self.normal = ax.normal;
        self.ra = ax.ra;
        self.rb = ax.rb;

        let hk = h * self.stiffness;
        let denom = self.damping + hk;
        if denom > 0.0 {
            self.gamma = 1.0 / (denom * h);
            self.bias = (hk / denom) * inv_h * ax.c;
        } else {
            // degenerate spring parameters fall back to a rigid rod
            self.gamma = 0.0;
            self.bias = settings.baumgarte * inv_h * ax.c;
        }
        self.mass = 1.0 / (ax.k + self.gamma);
        self.active = true;
    }

    fn warmstart(&self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }
        apply_axial(
            bodies,
            self.body_a,
            self.body_b,
            self.ra,
            self.rb,
            self.normal * self.impulse,
        );
    }

    fn solve(&mut self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }
        let cdot = relative_normal_velocity(
            bodies, self.body_a, self.body_b, self.ra, self.rb, self.normal,
        );
        let lambda = -(cdot + self.bias + self.gamma * self.impulse) * self.mass;
        self.impulse += lambda;
        apply_axial(
            bodies,
            self.body_a,
            self.body_b,
            self.ra,
            self.rb,
            self.normal * lambda,
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimitState {
    Inactive,
    AtLower,
    AtUpper,
}

/// Revolute joint: both bodies share a world anchor point. Optional angle
/// limits constrain the relative rotation.
#[derive(Debug, Clone)]
pub struct HingeJoint {
    pub body_a: BodyId,
    pub body_b: Option<BodyId>,
    /// World-space pivot at creation time; local anchors are derived when
    /// the constraint enters a space.
    pub anchor: Vector2,
    pub enable_limits: bool,
    pub lower_limit: Real,
    pub upper_limit: Real,

    pub(crate) anchor_a: Vector2,
    pub(crate) anchor_b: Vector2,
    pub(crate) reference_angle: Real,

    ra: Vector2,
    rb: Vector2,
    bias: Vector2,
    // inverse of the 2x2 effective mass block
    i11: Real,
    i12: Real,
    i22: Real,
    impulse: Vector2,
    limit_state: LimitState,
    limit_bias: Real,
    limit_mass: Real,
    limit_impulse: Real,
    active: bool,
}

impl HingeJoint {
    fn presolve(&mut self, bodies: &[Option<RigidBody>], settings: &SpaceSettings, inv_h: Real) {
        let Some((xform_a, pos_a, angle_a)) = body_frame(bodies, self.body_a) else {
            self.active = false;
            return;
        };
        let wa = xform_a.apply(self.anchor_a);
        let (wb, rb, angle_b) = match self.body_b {
            Some(id) => {
                let Some((xform_b, pos_b, angle_b)) = body_frame(bodies, id) else {
                    self.active = false;
                    return;
                };
                let wb = xform_b.apply(self.anchor_b);
                (wb, wb - pos_b, angle_b)
            }
            None => (self.anchor_b, Vector2::ZERO, 0.0),
        };
        self.ra = wa - pos_a;
        self.rb = rb;

        let (_, _, invma, invia) = velocity_state(bodies, self.body_a as usize);
        let (invmb, invib) = match self.body_b {
            Some(id) => {
                let (_, _, m, i) = velocity_state(bodies, id as usize);
                (m, i)
            }
            None => (0.0, 0.0),
        };

        let k11 = invma + invmb + invia * self.ra.y * self.ra.y + invib * self.rb.y * self.rb.y;
        let k12 = -invia * self.ra.x * self.ra.y - invib * self.rb.x * self.rb.y;
        let k22 = invma + invmb + invia * self.ra.x * self.ra.x + invib * self.rb.x * self.rb.x;
        let det = k11 * k22 - k12 * k12;
        if det.abs() < 1e-12 {
            self.active = false;
            return;
        }
        let inv_det = 1.0 / det;
        self.i11 = k22 * inv_det;
        self.i12 = -k12 * inv_det;
        self.i22 = k11 * inv_det;

        self.bias = (wb - wa) * (settings.baumgarte * inv_h);

        let kw = invia + invib;
        self.limit_mass = if kw > 0.0 { 1.0 / kw } else { 0.0 };
        self.limit_state = LimitState::Inactive;
        if self.enable_limits && self.limit_mass > 0.0 {
            let theta = angle_b - angle_a - self.reference_angle;
            if theta <= self.lower_limit {
                self.limit_state = LimitState::AtLower;
                self.limit_bias = settings.baumgarte * inv_h * (theta - self.lower_limit);
            } else if theta >= self.upper_limit {
                self.limit_state = LimitState::AtUpper;
                self.limit_bias = settings.baumgarte * inv_h * (theta - self.upper_limit);
            }
        }
        if self.limit_state == LimitState::Inactive {
            self.limit_impulse = 0.0;
        }
        self.active = true;
    }

    fn warmstart(&self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }
        apply_axial(
            bodies,
            self.body_a,
            self.body_b,
            self.ra,
            self.rb,
            self.impulse,
        );
        self.apply_angular(bodies, self.limit_impulse);
    }

    fn apply_angular(&self, bodies: &mut [Option<RigidBody>], impulse: Real) {
        if impulse == 0.0 {
            return;
        }
        if let Some(a) = bodies.get_mut(self.body_a as usize).and_then(|s| s.as_mut()) {
            a.angular_velocity -= a.invinertia * impulse;
        }
        if let Some(id) = self.body_b {
            if let Some(b) = bodies.get_mut(id as usize).and_then(|s| s.as_mut()) {
                b.angular_velocity += b.invinertia * impulse;
            }
        }
    }

    fn solve(&mut self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }

        // angle limit
        if self.limit_state != LimitState::Inactive {
            let (_, wa, _, _) = velocity_state(bodies, self.body_a as usize);
            let wb = match self.body_b {
                Some(id) => velocity_state(bodies, id as usize).1,
                None => 0.0,
            };
            let cdot = wb - wa;
            let lambda = -(cdot + self.limit_bias) * self.limit_mass;
            let old = self.limit_impulse;
            self.limit_impulse = match self.limit_state {
                LimitState::AtLower => (old + lambda).max(0.0),
                LimitState::AtUpper => (old + lambda).min(0.0),
                LimitState::Inactive => old,
            };
            self.apply_angular(bodies, self.limit_impulse - old);
        }

        // point constraint, solved as a 2x2 block
        let (va, wa, _, _) = velocity_state(bodies, self.body_a as usize);
        let (vb, wb) = match self.body_b {
            Some(id) => {
                let (v, w, _, _) = velocity_state(bodies, id as usize);
                (v, w)
            }
            None => (Vector2::ZERO, 0.0),
        };
        let rel = (vb + cross_sv(wb, self.rb)) - (va + cross_sv(wa, self.ra));
        let rhs = -(rel + self.bias);
        let impulse = Vector2::new(
            self.i11 * rhs.x + self.i12 * rhs.y,
            self.i12 * rhs.x + self.i22 * rhs.y,
        );
        self.impulse += impulse;
        apply_axial(bodies, self.body_a, self.body_b, self.ra, self.rb, impulse);
    }
}

const SPLINE_SAMPLES_PER_SEGMENT: usize = 24;

/// Uniform Catmull-Rom point through the quadruple `(p0, p1, p2, p3)`.
fn catmull_rom(p0: Vector2, p1: Vector2, p2: Vector2, p3: Vector2, t: Real) -> Vector2 {
    let t2 = t * t;
    let t3 = t2 * t;
    (p1 * 2.0
        + (p2 - p0) * t
        + (p0 * 2.0 - p1 * 5.0 + p2 * 4.0 - p3) * t2
        + (p3 - p0 + (p1 - p2) * 3.0) * t3)
        * 0.5
}

fn closest_point_on_spline(points: &[Vector2], p: Vector2) -> Vector2 {
    let last = points.len() - 1;
    let mut best = points[0];
    let mut best_dist = Real::INFINITY;
    for i in 0..last {
        let p0 = points[i.saturating_sub(1)];
        let p1 = points[i];
        let p2 = points[i + 1];
        let p3 = points[(i + 2).min(last)];
        for s in 0..=SPLINE_SAMPLES_PER_SEGMENT {
            let t = s as Real / SPLINE_SAMPLES_PER_SEGMENT as Real;
            let q = catmull_rom(p0, p1, p2, p3, t);
            let d = q.distance_squared(p);
            if d < best_dist {
                best_dist = d;
                best = q;
            }
        }
    }
    best
}

/// Constrains a body anchor to lie on a Catmull-Rom curve through the
/// control points; solved as a soft positional constraint toward the
/// nearest curve point.
#[derive(Debug, Clone)]
pub struct SplineJoint {
    pub body: BodyId,
    /// Local anchor on the body.
    pub anchor: Vector2,
    pub(crate) control_points: Vec<Vector2>,

    normal: Vector2,
    ra: Vector2,
    bias: Real,
    mass: Real,
    impulse: Real,
    active: bool,
}

impl SplineJoint {
    pub fn control_points(&self) -> &[Vector2] {
        &self.control_points
    }

    fn presolve(&mut self, bodies: &[Option<RigidBody>], settings: &SpaceSettings, inv_h: Real) {
        let Some((xform, pos, _)) = body_frame(bodies, self.body) else {
            self.active = false;
            return;
        };
        let wa = xform.apply(self.anchor);
        let target = closest_point_on_spline(&self.control_points, wa);
        let delta = target - wa;
        let dist = delta.length();
        if dist < 1e-8 {
            // already on the curve
            self.active = false;
            return;
        }
        self.normal = delta / dist;
        self.ra = wa - pos;

        let (_, _, invm, invi) = velocity_state(bodies, self.body as usize);
        let rn = cross(self.ra, self.normal);
        let k = invm + invi * rn * rn;
        if k <= 0.0 {
            self.active = false;
            return;
        }
        self.mass = 1.0 / k;
        self.bias = settings.baumgarte * inv_h * dist;
        self.active = true;
    }

    fn warmstart(&self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }
        apply_impulse_at(
            bodies,
            self.body as usize,
            -self.normal * self.impulse,
            self.ra,
        );
    }

    fn solve(&mut self, bodies: &mut [Option<RigidBody>]) {
        if !self.active {
            return;
        }
        let (va, wa, _, _) = velocity_state(bodies, self.body as usize);
        let cdot = -(va + cross_sv(wa, self.ra)).dot(self.normal);
        let lambda = -(cdot + self.bias) * self.mass;
        self.impulse += lambda;
        apply_impulse_at(bodies, self.body as usize, -self.normal * lambda, self.ra);
    }
}

#[derive(Debug, Clone)]
pub enum ConstraintKind {
    Distance(DistanceJoint),
    Spring(Spring),
    Hinge(HingeJoint),
    Spline(SplineJoint),
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub(crate) id: ConstraintId,
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Rigid distance joint. Anchors are body-local; with `body_b = None`
    /// the second anchor is a fixed world point.
    pub fn distance(
        body_a: BodyId,
        body_b: Option<BodyId>,
        anchor_a: Vector2,
        anchor_b: Vector2,
        length: Real,
    ) -> Constraint {
        Constraint {
            id: 0,
            kind: ConstraintKind::Distance(DistanceJoint {
                body_a,
                body_b,
                anchor_a,
                anchor_b,
                length,
                normal: Vector2::ZERO,
                ra: Vector2::ZERO,
                rb: Vector2::ZERO,
                bias: 0.0,
                mass: 0.0,
                impulse: 0.0,
                active: false,
            }),
        }
    }

    pub fn spring(
        body_a: BodyId,
        body_b: Option<BodyId>,
        anchor_a: Vector2,
        anchor_b: Vector2,
        rest_length: Real,
        stiffness: Real,
        damping: Real,
    ) -> Constraint {
        Constraint {
            id: 0,
            kind: ConstraintKind::Spring(Spring {
                body_a,
                body_b,
                anchor_a,
                anchor_b,
                rest_length,
                stiffness,
                damping,
                normal: Vector2::ZERO,
                ra: Vector2::ZERO,
                rb: Vector2::ZERO,
                bias: 0.0,
                gamma: 0.0,
                mass: 0.0,
                impulse: 0.0,
                active: false,
            }),
        }
    }

    /// Revolute joint around a world-space pivot.
    pub fn hinge(body_a: BodyId, body_b: Option<BodyId>, anchor: Vector2) -> Constraint {
        Constraint {
            id: 0,
            kind: ConstraintKind::Hinge(HingeJoint {
                body_a,
                body_b,
                anchor,
                enable_limits: false,
                lower_limit: 0.0,
                upper_limit: 0.0,
                anchor_a: Vector2::ZERO,
                anchor_b: anchor,
                reference_angle: 0.0,
                ra: Vector2::ZERO,
                rb: Vector2::ZERO,
                bias: Vector2::ZERO,
                i11: 0.0,
                i12: 0.0,
                i22: 0.0,
                impulse: Vector2::ZERO,
                limit_state: LimitState::Inactive,
                limit_bias: 0.0,
                limit_mass: 0.0,
                limit_impulse: 0.0,
                active: false,
            }),
        }
    }

    /// Hinge with relative-angle limits in radians.
    pub fn hinge_with_limits(
        body_a: BodyId,
        body_b: Option<BodyId>,
        anchor: Vector2,
        lower_limit: Real,
        upper_limit: Real,
    ) -> Constraint {
        let mut constraint = Constraint::hinge(body_a, body_b, anchor);
        if let ConstraintKind::Hinge(h) = &mut constraint.kind {
            h.enable_limits = true;
            h.lower_limit = lower_limit;
            h.upper_limit = upper_limit;
        }
        constraint
    }

    /// Spline follower; needs at least 4 control points.
    pub fn spline(body: BodyId, anchor: Vector2, control_points: Vec<Vector2>) -> Result<Constraint> {
        if control_points.len() < 4 {
            return Err(PhysicsError::InvalidArgument(
                "spline needs at least 4 control points",
            ));
        }
        Ok(Constraint {
            id: 0,
            kind: ConstraintKind::Spline(SplineJoint {
                body,
                anchor,
                control_points,
                normal: Vector2::ZERO,
                ra: Vector2::ZERO,
                bias: 0.0,
                mass: 0.0,
                impulse: 0.0,
                active: false,
            }),
        })
    }

    pub fn id(&self) -> ConstraintId {
        self.id
    }

    /// Replace a spline constraint's control points.
    pub fn set_control_points(&mut self, control_points: Vec<Vector2>) -> Result<()> {
        let ConstraintKind::Spline(spline) = &mut self.kind else {
            return Err(PhysicsError::InvalidArgument(
                "control points only apply to spline constraints",
            ));
        };
        if control_points.len() < 4 {
            return Err(PhysicsError::InvalidArgument(
                "spline needs at least 4 control points",
            ));
        }
        spline.control_points = control_points;
        Ok(())
    }

    pub(crate) fn bodies(&self) -> (BodyId, Option<BodyId>) {
        match &self.kind {
            ConstraintKind::Distance(c) => (c.body_a, c.body_b),
            ConstraintKind::Spring(c) => (c.body_a, c.body_b),
            ConstraintKind::Hinge(c) => (c.body_a, c.body_b),
            ConstraintKind::Spline(c) => (c.body, None),
        }
    }

    /// Derive body-local state that depends on poses at insertion time.
    pub(crate) fn initialize(&mut self, bodies: &[Option<RigidBody>]) {
        if let ConstraintKind::Hinge(h) = &mut self.kind {
            if let Some((xform_a, _, angle_a)) = body_frame(bodies, h.body_a) {
                h.anchor_a = xform_a.apply_inverse(h.anchor);
                match h.body_b {
                    Some(id) => {
                        if let Some((xform_b, _, angle_b)) = body_frame(bodies, id) {
                            h.anchor_b = xform_b.apply_inverse(h.anchor);
                            h.reference_angle = angle_b - angle_a;
                        }
                    }
                    None => {
                        h.anchor_b = h.anchor;
                        h.reference_angle = -angle_a;
                    }
                }
            }
        }
    }

    pub(crate) fn presolve(
        &mut self,
        bodies: &[Option<RigidBody>],
        settings: &SpaceSettings,
        h: Real,
        inv_h: Real,
    ) {
        match &mut self.kind {
            ConstraintKind::Distance(c) => c.presolve(bodies, settings, inv_h),
            ConstraintKind::Spring(c) => c.presolve(bodies, settings, h, inv_h),
            ConstraintKind::Hinge(c) => c.presolve(bodies, settings, inv_h),
            ConstraintKind::Spline(c) => c.presolve(bodies, settings, inv_h),
        }
    }

    pub(crate) fn warmstart(&self, bodies: &mut [Option<RigidBody>]) {
        match &self.kind {
            ConstraintKind::Distance(c) => c.warmstart(bodies),
            ConstraintKind::Spring(c) => c.warmstart(bodies),
            ConstraintKind::Hinge(c) => c.warmstart(bodies),
            ConstraintKind::Spline(c) => c.warmstart(bodies),
        }
    }

    pub(crate) fn solve(&mut self, bodies: &mut [Option<RigidBody>]) {
        match &mut self.kind {
            ConstraintKind::Distance(c) => c.solve(bodies),
            ConstraintKind::Spring(c) => c.solve(bodies),
            ConstraintKind::Hinge(c) => c.solve(bodies),
            ConstraintKind::Spline(c) => c.solve(bodies),
        }
    }
}
