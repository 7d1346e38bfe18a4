use nalgebra::RealField as NalgebraRealField;

use super::domain::Domain;

/// The base trait for [`Function`](super::function::Function) and
/// [`Constrained`](super::constrained::Constrained).
pub trait Problem {
    /// Type of the field, usually f64 or f32.
    type Field: RealField + Copy;

    /// Gets the domain of the problem: its dimensionality and optional
    /// rectangular bounds on the variables.
    fn domain(&self) -> Domain<Self::Field>;
}

/// Extension of [`nalgebra::RealField`] with additional constants.
pub trait RealField: NalgebraRealField {
    /// Machine epsilon.
    const EPSILON: Self;

    /// Square root of machine epsilon.
    const EPSILON_SQRT: Self;

    /// Smallest positive normal value.
    const TINY: Self;

    /// Large value used to moderate wild callback outputs. It is roughly the
    /// square root of the largest finite value, so that sums and products of
    /// moderated quantities stay finite.
    const HUGE: Self;
}

impl RealField for f32 {
    const EPSILON: Self = f32::EPSILON;
    const EPSILON_SQRT: Self = 0.00034526698;
    const TINY: Self = f32::MIN_POSITIVE;
    const HUGE: Self = 1.8446743e19;
}

impl RealField for f64 {
    const EPSILON: Self = f64::EPSILON;
    const EPSILON_SQRT: Self = 0.000000014901161193847656;
    const TINY: Self = f64::MIN_POSITIVE;
    const HUGE: Self = 1.3407807929942596e154;
}
