//! Pairwise moment combination
//!
//! Partial statistics are merged with the Chan et al. parallel update
//! formulas. The same arithmetic runs inside the reduction kernels (both the
//! software device and `kernels/statistics.hip`), so this module is the single
//! host-side definition that kernels and tests agree on.
//!
//! For two partials `a`, `b` with `n = n_a + n_b` and `delta = mean_b - mean_a`:
//!
//! ```text
//! mean = (n_a*mean_a + n_b*mean_b) / n
//! M2   = M2_a + M2_b + n_a*n_b*delta^2/n
//! M3   = M3_a + M3_b + delta^3*n_a*n_b*(n_a-n_b)/n^2 + 3*delta*(n_a*M2_b - n_b*M2_a)/n
//! M4   = M4_a + M4_b + delta^4*n_a*n_b*(n_a^2 - n_a*n_b + n_b^2)/n^3
//!        + 6*delta^2*(n_a^2*M2_b + n_b^2*M2_a)/n^2 + 4*delta*(n_a*M3_b - n_b*M3_a)/n
//! ```

/// Highest central moment an accumulator tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MomentOrder {
    /// `{count, mean}`
    Mean = 1,
    /// `{count, mean, M2}`
    Second = 2,
    /// `{count, mean, M2, M3}`
    Third = 3,
    /// `{count, mean, M2, M3, M4}`
    Fourth = 4,
}

/// Partial statistics of a set of samples.
///
/// `m2`, `m3` and `m4` are sums of powers of deviations from `mean`, not
/// normalised moments. Fields above the accumulator's [`MomentOrder`] stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MomentAccumulator {
    pub count: f64,
    pub mean: f64,
    pub m2: f64,
    pub m3: f64,
    pub m4: f64,
}

impl MomentAccumulator {
    /// The empty accumulator; merging with it is a no-op
    pub const IDENTITY: MomentAccumulator = MomentAccumulator {
        count: 0.0,
        mean: 0.0,
        m2: 0.0,
        m3: 0.0,
        m4: 0.0,
    };

    /// Accumulator of a single sample
    pub fn singleton(x: f64) -> Self {
        MomentAccumulator {
            count: 1.0,
            mean: x,
            ..Self::IDENTITY
        }
    }

    /// Merge two partials, computing moments up to `order`
    pub fn combine(&self, other: &Self, order: MomentOrder) -> Self {
        let (na, nb) = (self.count, other.count);
        let n = na + nb;
        if n == 0.0 {
            return Self::IDENTITY;
        }

        let mean = (na * self.mean + nb * other.mean) / n;
        let mut out = MomentAccumulator {
            count: n,
            mean,
            ..Self::IDENTITY
        };
        if order == MomentOrder::Mean {
            return out;
        }

        let delta = other.mean - self.mean;
        let delta2 = delta * delta;
        let nab = na * nb;

        out.m2 = self.m2 + other.m2 + nab * delta2 / n;
        if order == MomentOrder::Second {
            return out;
        }

        out.m3 = self.m3
            + other.m3
            + delta2 * delta * nab * (na - nb) / (n * n)
            + 3.0 * delta * (na * other.m2 - nb * self.m2) / n;
        if order == MomentOrder::Third {
            return out;
        }

        out.m4 = self.m4
            + other.m4
            + delta2 * delta2 * nab * (na * na - nab + nb * nb) / (n * n * n)
            + 6.0 * delta2 * (na * na * other.m2 + nb * nb * self.m2) / (n * n)
            + 4.0 * delta * (na * other.m3 - nb * self.m3) / n;
        out
    }

    /// Fold one sample in (incremental update)
    pub fn push(&mut self, x: f64, order: MomentOrder) {
        *self = self.combine(&Self::singleton(x), order);
    }

    /// Sample variance `M2/(n-1)`. Caller guarantees `n >= 2`.
    pub fn variance(&self) -> f64 {
        self.m2 / (self.count - 1.0)
    }

    /// Sample standard deviation
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// `sqrt(n)*M3 / M2^1.5`
    pub fn skewness(&self) -> f64 {
        self.count.sqrt() * self.m3 / self.m2.powf(1.5)
    }

    /// `n*M4 / M2^2` (not excess kurtosis)
    pub fn kurtosis(&self) -> f64 {
        self.count * self.m4 / (self.m2 * self.m2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(values: &[f64], order: MomentOrder) -> MomentAccumulator {
        let mut acc = MomentAccumulator::IDENTITY;
        for &x in values {
            acc.push(x, order);
        }
        acc
    }

    fn assert_close(actual: f64, expected: f64) {
        let scale = expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= 1e-10 * scale,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_identity_is_neutral() {
        let acc = fold(&[1.0, 2.0, 6.0], MomentOrder::Fourth);
        let left = MomentAccumulator::IDENTITY.combine(&acc, MomentOrder::Fourth);
        let right = acc.combine(&MomentAccumulator::IDENTITY, MomentOrder::Fourth);
        assert_eq!(left, acc);
        assert_eq!(right, acc);
    }

    #[test]
    fn test_empty_merge_is_identity() {
        let merged = MomentAccumulator::IDENTITY
            .combine(&MomentAccumulator::IDENTITY, MomentOrder::Fourth);
        assert_eq!(merged, MomentAccumulator::IDENTITY);
    }

    #[test]
    fn test_known_variance() {
        let acc = fold(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], MomentOrder::Second);
        assert_eq!(acc.count, 8.0);
        assert_close(acc.mean, 5.0);
        assert_close(acc.m2, 32.0);
        assert_close(acc.variance(), 32.0 / 7.0);
        assert!((acc.stddev() - 2.1381).abs() < 1e-4);
    }

    #[test]
    fn test_third_and_fourth_moments_match_direct_sums() {
        let values = [1.5, -2.0, 3.25, 8.0, 0.5, -1.0, 4.0];
        let acc = fold(&values, MomentOrder::Fourth);

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let m = |p: i32| values.iter().map(|x| (x - mean).powi(p)).sum::<f64>();

        assert_close(acc.mean, mean);
        assert_close(acc.m2, m(2));
        assert_close(acc.m3, m(3));
        assert_close(acc.m4, m(4));
    }

    #[test]
    fn test_split_merge_matches_sequential() {
        let values: Vec<f64> = (0..40).map(|i| (i as f64 * 0.37).sin() * 10.0).collect();
        let whole = fold(&values, MomentOrder::Fourth);
        let (a, b) = values.split_at(13);
        let merged = fold(a, MomentOrder::Fourth).combine(&fold(b, MomentOrder::Fourth), MomentOrder::Fourth);

        assert_close(merged.count, whole.count);
        assert_close(merged.mean, whole.mean);
        assert_close(merged.m2, whole.m2);
        assert_close(merged.m3, whole.m3);
        assert_close(merged.m4, whole.m4);
    }

    #[test]
    fn test_order_limits_tracked_moments() {
        let acc = fold(&[1.0, 5.0, 9.0], MomentOrder::Mean);
        assert_close(acc.mean, 5.0);
        assert_eq!(acc.m2, 0.0);
        assert_eq!(acc.m3, 0.0);
    }

    #[test]
    fn test_symmetric_data_has_zero_skew() {
        let acc = fold(&[-3.0, -1.0, 0.0, 1.0, 3.0], MomentOrder::Fourth);
        assert!(acc.skewness().abs() < 1e-12);
        assert!(acc.kurtosis() > 0.0);
    }
}
