use std::fmt;

/// Reason for which the solver stopped.
///
/// The catalog is shared by the whole solver family; some variants can only
/// be produced by interpolation methods that are parameterized by the number
/// of interpolation points (`npt`) and are never returned by COBYLA. The
/// numeric codes of the legacy interface are available through
/// [`Status::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The lower bound of the trust-region radius was reached. This is the
    /// normal way to converge.
    SmallTrustRadius,
    /// A feasible point with objective value at most the target was found.
    TargetAchieved,
    /// A trust-region step failed to reduce the model.
    TrustStepFailed,
    /// The budget of objective evaluations was exhausted.
    MaxFunReached,
    /// A denominator in the model update cancelled out.
    DenominatorCancellation,
    /// The number of interpolation points is outside the valid range. Not
    /// produced by COBYLA.
    NptOutOfRange,
    /// Some variable has a bound gap smaller than twice the initial
    /// trust-region radius.
    BoundGapTooSmall,
    /// Rounding errors are becoming damaging.
    DamagingRounding,
    /// Rounding prevents any change to the variables.
    RoundingStalled,
    /// A zero denominator occurred in the interpolation update. The best
    /// point found so far is still returned.
    ZeroDenominator,
    /// The dimension of the problem is too small for the method. Not
    /// produced by COBYLA.
    DimensionTooSmall,
    /// The evaluation budget cannot even cover the initial interpolation
    /// set. Not produced by COBYLA, which revises the budget instead.
    MaxFunTooSmall,
    /// A constraint has an identically zero gradient. Not produced by
    /// COBYLA.
    ZeroConstraintGradient,
    /// NaN occurred in the variables before an evaluation.
    NanX,
    /// The objective callback returned NaN or a near-infinite value.
    NanInfF,
}

impl Status {
    /// Returns the integer exit code of the legacy interface.
    pub fn code(self) -> i32 {
        match self {
            Status::SmallTrustRadius => 0,
            Status::TargetAchieved => 1,
            Status::TrustStepFailed => 2,
            Status::MaxFunReached => 3,
            Status::DenominatorCancellation => 4,
            Status::NptOutOfRange => 5,
            Status::BoundGapTooSmall => 6,
            Status::DamagingRounding => 7,
            Status::RoundingStalled => 8,
            Status::ZeroDenominator => 9,
            Status::DimensionTooSmall => 10,
            Status::MaxFunTooSmall => 11,
            Status::ZeroConstraintGradient => 12,
            Status::NanX => -1,
            Status::NanInfF => -2,
        }
    }

    /// Whether the run ended by reaching a convergence criterion rather
    /// than by an abnormality.
    pub fn is_success(self) -> bool {
        matches!(self, Status::SmallTrustRadius | Status::TargetAchieved)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Status::SmallTrustRadius => "the lower bound of the trust-region radius is reached",
            Status::TargetAchieved => "the target function value is achieved",
            Status::TrustStepFailed => "a trust-region step failed to reduce the model",
            Status::MaxFunReached => "the budget of function evaluations is exhausted",
            Status::DenominatorCancellation => "a denominator in the update cancelled out",
            Status::NptOutOfRange => "the number of interpolation points is invalid",
            Status::BoundGapTooSmall => {
                "a bound gap is smaller than twice the initial trust-region radius"
            }
            Status::DamagingRounding => "rounding errors are becoming damaging",
            Status::RoundingStalled => "rounding prevents any change to the variables",
            Status::ZeroDenominator => "a zero denominator occurred in the update",
            Status::DimensionTooSmall => "the dimension is too small for the method",
            Status::MaxFunTooSmall => "the evaluation budget is too small",
            Status::ZeroConstraintGradient => "a constraint has a zero gradient",
            Status::NanX => "NaN occurred in the variables",
            Status::NanInfF => "the objective function returned NaN or a huge value",
        };

        f.write_str(message)
    }
}
