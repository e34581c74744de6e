//! impulse2d — a 2D rigid-body physics engine.
//!
//! A [`space::Space`] owns bodies, shapes, and constraints, and advances
//! them with a fixed-substep pipeline: broad-phase pair generation,
//! narrow-phase manifolds persisted across steps, sequential-impulse
//! velocity solving with warm-starting, and symplectic Euler integration.

pub mod math;
pub mod error;
pub mod settings;
pub mod shape;
pub mod body;
pub mod contact;
pub mod broadphase;
pub mod narrowphase;
pub mod constraint;
mod contact_solver;
pub mod space;
