//! Two-phase parallel reduction
//!
//! A statistic call runs `plan -> chunked reduce -> tree reduce -> readback`,
//! twice for the centered statistics (the first pass yields the mean that
//! the second pass subtracts).

pub mod engine;
pub mod kernels;
pub mod moments;
pub mod plan;
pub mod tuning;

use std::fmt;

pub use engine::StatisticsEngine;
pub use kernels::AccumulatorKind;
pub use moments::{MomentAccumulator, MomentOrder};
pub use plan::ChunkPlan;
pub use tuning::ReductionTuning;

/// Aggregate statistics the engine computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Sum,
    Mean,
    /// Sample variance, `M2/(n-1)`
    Variance,
    StdDev,
    /// `sqrt(n)*M3 / M2^1.5`
    Skewness,
    /// `n*M4 / M2^2`
    Kurtosis,
}

impl Statistic {
    pub const ALL: [Statistic; 6] = [
        Statistic::Sum,
        Statistic::Mean,
        Statistic::Variance,
        Statistic::StdDev,
        Statistic::Skewness,
        Statistic::Kurtosis,
    ];

    /// Fewest samples for which the statistic is defined
    pub fn min_samples(self) -> usize {
        match self {
            Statistic::Sum => 0,
            Statistic::Mean => 1,
            Statistic::Variance | Statistic::StdDev | Statistic::Skewness | Statistic::Kurtosis => 2,
        }
    }

    /// Accumulator of the final reduction pass
    pub fn accumulator(self) -> AccumulatorKind {
        match self {
            Statistic::Sum => AccumulatorKind::Sum,
            Statistic::Mean => AccumulatorKind::Mean,
            Statistic::Variance | Statistic::StdDev => AccumulatorKind::SecondMoment,
            Statistic::Skewness => AccumulatorKind::ThirdMoment,
            Statistic::Kurtosis => AccumulatorKind::FourthMoment,
        }
    }

    /// Centered statistics reduce twice: once for the mean, once for the moments
    pub fn needs_second_pass(self) -> bool {
        !matches!(self, Statistic::Sum | Statistic::Mean)
    }

    pub fn name(self) -> &'static str {
        match self {
            Statistic::Sum => "sum",
            Statistic::Mean => "mean",
            Statistic::Variance => "variance",
            Statistic::StdDev => "stddev",
            Statistic::Skewness => "skewness",
            Statistic::Kurtosis => "kurtosis",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
