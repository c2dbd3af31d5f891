//! Statistic entry points
//!
//! Every public call takes the context's pipeline lock for its whole launch
//! sequence, so concurrent callers on one context are serialised while
//! buffers keep flowing back to the allocator from any thread.

use crate::array::DeviceArray;
use crate::backend::{ComputeBackend, KernelArg, KernelKind, LaunchConfig};
use crate::context::DeviceContext;
use crate::error::{StatError, StatResult};
use crate::reduction::kernels::{decode_moments, AccumulatorKind, Record, MAX_RECORD_WIDTH};
use crate::reduction::moments::{MomentAccumulator, MomentOrder};
use crate::reduction::plan::ChunkPlan;
use crate::reduction::tuning::ReductionTuning;
use crate::reduction::Statistic;

/// Computes aggregate statistics of device arrays on one context
#[derive(Debug)]
pub struct StatisticsEngine<B: ComputeBackend> {
    ctx: DeviceContext<B>,
    tuning: ReductionTuning,
}

impl<B: ComputeBackend> Clone for StatisticsEngine<B> {
    fn clone(&self) -> Self {
        StatisticsEngine {
            ctx: self.ctx.clone(),
            tuning: self.tuning,
        }
    }
}

impl<B: ComputeBackend> StatisticsEngine<B> {
    /// Engine with class defaults and `ROCMSTAT_*` overrides
    pub fn new(ctx: DeviceContext<B>) -> StatResult<Self> {
        let tuning = ReductionTuning::from_env(ctx.limits().class)?;
        Self::with_tuning(ctx, tuning)
    }

    /// Engine with explicit tunables, clamped to the device
    pub fn with_tuning(ctx: DeviceContext<B>, tuning: ReductionTuning) -> StatResult<Self> {
        tuning.validate()?;
        let tuning = tuning.clamped(ctx.limits());
        tracing::debug!(
            "StatisticsEngine on '{}': group_size={}, num_groups={}",
            ctx.name(),
            tuning.group_size,
            tuning.num_groups
        );
        Ok(StatisticsEngine { ctx, tuning })
    }

    pub fn context(&self) -> &DeviceContext<B> {
        &self.ctx
    }

    pub fn tuning(&self) -> &ReductionTuning {
        &self.tuning
    }

    pub fn sum(&self, array: &DeviceArray<B>) -> StatResult<f64> {
        self.statistic(Statistic::Sum, array)
    }

    pub fn mean(&self, array: &DeviceArray<B>) -> StatResult<f64> {
        self.statistic(Statistic::Mean, array)
    }

    pub fn variance(&self, array: &DeviceArray<B>) -> StatResult<f64> {
        self.statistic(Statistic::Variance, array)
    }

    pub fn stddev(&self, array: &DeviceArray<B>) -> StatResult<f64> {
        self.statistic(Statistic::StdDev, array)
    }

    pub fn skewness(&self, array: &DeviceArray<B>) -> StatResult<f64> {
        self.statistic(Statistic::Skewness, array)
    }

    pub fn kurtosis(&self, array: &DeviceArray<B>) -> StatResult<f64> {
        self.statistic(Statistic::Kurtosis, array)
    }

    /// Compute `stat` over `array`
    ///
    /// Returns `InsufficientSamples` before launching anything when the
    /// statistic is undefined for `array.len()`.
    pub fn statistic(&self, stat: Statistic, array: &DeviceArray<B>) -> StatResult<f64> {
        self.check_context(array)?;
        let n = array.len();
        if n < stat.min_samples() {
            return Err(StatError::InsufficientSamples {
                statistic: stat,
                required: stat.min_samples(),
                actual: n,
            });
        }

        let _pipeline = self.ctx.lock_pipeline()?;
        tracing::debug!("Computing {} over {} elements", stat, n);

        let value = match stat {
            Statistic::Sum => self.reduce_pass(array, AccumulatorKind::Sum, 0.0)?[0],
            Statistic::Mean => decode_moments(&self.reduce_pass(array, AccumulatorKind::Mean, 0.0)?).mean,
            _ => {
                let acc = self.centered(array, stat.accumulator())?;
                if acc.m2 == 0.0 && matches!(stat, Statistic::Skewness | Statistic::Kurtosis) {
                    tracing::debug!("{} of data with zero spread is undefined (NaN)", stat);
                }
                match stat {
                    Statistic::Variance => acc.variance(),
                    Statistic::StdDev => acc.stddev(),
                    Statistic::Skewness => acc.skewness(),
                    _ => acc.kurtosis(),
                }
            }
        };

        tracing::debug!("{} = {}", stat, value);
        Ok(value)
    }

    /// Moment accumulator of `array` up to `order`.
    ///
    /// `Mean` is a single pass; higher orders use the centered second pass.
    /// An empty array yields the identity accumulator.
    pub fn moments(&self, array: &DeviceArray<B>, order: MomentOrder) -> StatResult<MomentAccumulator> {
        self.check_context(array)?;
        let _pipeline = self.ctx.lock_pipeline()?;
        let kind = match order {
            MomentOrder::Mean => {
                return Ok(decode_moments(&self.reduce_pass(array, AccumulatorKind::Mean, 0.0)?));
            }
            MomentOrder::Second => AccumulatorKind::SecondMoment,
            MomentOrder::Third => AccumulatorKind::ThirdMoment,
            MomentOrder::Fourth => AccumulatorKind::FourthMoment,
        };
        self.centered(array, kind)
    }

    /// Memory report of the underlying context
    pub fn report(&self) -> StatResult<String> {
        self.ctx.report()
    }

    /// Release every cached block of the underlying context
    pub fn clear_caches(&self) -> StatResult<()> {
        let _pipeline = self.ctx.lock_pipeline()?;
        self.ctx.clear_caches()
    }

    fn check_context(&self, array: &DeviceArray<B>) -> StatResult<()> {
        if array.buffer().belongs_to(&self.ctx) {
            Ok(())
        } else {
            Err(StatError::ContextMismatch)
        }
    }

    /// Mean pass, then a moment pass over `x - mean`
    fn centered(&self, array: &DeviceArray<B>, kind: AccumulatorKind) -> StatResult<MomentAccumulator> {
        let mean = decode_moments(&self.reduce_pass(array, AccumulatorKind::Mean, 0.0)?).mean;
        let mut acc = decode_moments(&self.reduce_pass(array, kind, mean)?);
        // central moments do not depend on the shift; only the mean does
        acc.mean += mean;
        Ok(acc)
    }

    /// One chunked + tree reduction of `array - shift` and readback of the record
    pub(crate) fn reduce_pass(
        &self,
        array: &DeviceArray<B>,
        kind: AccumulatorKind,
        shift: f64,
    ) -> StatResult<Record> {
        let plan = ChunkPlan::new(array.len(), &self.tuning);
        let record_bytes = kind.record_bytes();
        tracing::trace!("reduce_pass '{}': {:?}, shift={}", kind.name(), plan, shift);

        let partials = self
            .ctx
            .alloc(plan.num_groups * record_bytes, kind.partials_tag())?;
        let result = self.ctx.alloc(record_bytes, kind.result_tag())?;

        let chunked = [
            KernelArg::Buffer(array.buffer().handle().clone()),
            KernelArg::U64(plan.n as u64),
            KernelArg::U64(plan.per_thread_elements as u64),
            KernelArg::F64(shift),
            KernelArg::Buffer(partials.handle().clone()),
            KernelArg::LocalScratch(plan.group_size * record_bytes),
        ];
        let config = LaunchConfig::linear(plan.num_groups, plan.group_size).with_scratch_from(&chunked);
        self.ctx.launch(KernelKind::ChunkedReduce(kind), &config, &chunked)?;

        let tree_width = self.tuning.num_groups;
        let tree = [
            KernelArg::Buffer(partials.handle().clone()),
            KernelArg::U64(plan.num_groups as u64),
            KernelArg::Buffer(result.handle().clone()),
            KernelArg::LocalScratch(tree_width * record_bytes),
        ];
        let config = LaunchConfig::linear(1, tree_width).with_scratch_from(&tree);
        self.ctx.launch(KernelKind::TreeReduce(kind), &config, &tree)?;

        let mut out = [0.0; MAX_RECORD_WIDTH];
        result.read_f64s(0, &mut out[..kind.width()])?;
        Ok(kind.load(&out))
    }
}
