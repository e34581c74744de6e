use crate::math::Real;

/// How contact penetration is corrected.
///
/// `Baumgarte` feeds a position-error bias into the velocity solve.
/// `Ngs` runs a separate nonlinear Gauss-Seidel pass over positions and
/// angles after velocities are integrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionCorrection {
    Baumgarte,
    Ngs,
}

/// Rule used to combine the two bodies' material coefficients at a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoefficientMix {
    Average,
    Multiply,
    Sqrt,
    Min,
    Max,
}

impl CoefficientMix {
    pub fn combine(self, a: Real, b: Real) -> Real {
        match self {
            CoefficientMix::Average => (a + b) * 0.5,
            CoefficientMix::Multiply => a * b,
            CoefficientMix::Sqrt => (a * b).sqrt(),
            CoefficientMix::Min => a.min(b),
            CoefficientMix::Max => a.max(b),
        }
    }
}

/// Tunables for the solver pipeline. All fields are plain data and may be
/// changed between steps.
#[derive(Debug, Clone, Copy)]
pub struct SpaceSettings {
    /// Position-error feedback factor for Baumgarte stabilization.
    pub baumgarte: Real,
    /// Penetration depth tolerated before correction kicks in, in meters.
    pub penetration_slop: Real,
    pub contact_position_correction: PositionCorrection,
    pub velocity_iterations: usize,
    /// NGS iterations; unused under Baumgarte correction.
    pub position_iterations: usize,
    pub substeps: usize,
    pub linear_damping: Real,
    pub angular_damping: Real,
    pub warmstarting: bool,
    pub restitution_mix: CoefficientMix,
    pub friction_mix: CoefficientMix,
    /// Approach speeds below this produce no bounce.
    pub restitution_threshold: Real,
    /// Cap on per-iteration NGS positional correction, in meters.
    pub max_linear_correction: Real,
}

impl Default for SpaceSettings {
    fn default() -> Self {
        Self {
            baumgarte: 0.2,
            penetration_slop: 0.05,
            contact_position_correction: PositionCorrection::Baumgarte,
            velocity_iterations: 8,
            position_iterations: 4,
            substeps: 1,
            linear_damping: 0.0002,
            angular_damping: 0.0002,
            warmstarting: true,
            restitution_mix: CoefficientMix::Sqrt,
            friction_mix: CoefficientMix::Sqrt,
            restitution_threshold: 1.0,
            max_linear_correction: 0.2,
        }
    }
}
