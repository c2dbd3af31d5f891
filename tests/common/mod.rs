//! Shared fixtures for the integration tests
//!
//! `SIM_FIXTURE` is one software device shared by every test in a binary.
//! Tests that assert on driver counters build their own context with
//! [`fresh_context`] so other tests cannot disturb the numbers.

#![allow(dead_code)]

use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rocmstat::{
    DeviceArray, DeviceContext, ReductionTuning, SimBackend, SimConfig, SimMonitor, StatisticsEngine,
};
pub use serial_test::serial;

/// Shared software device and engine (CPU-class defaults)
pub struct SimFixture {
    pub ctx: DeviceContext<SimBackend>,
    pub engine: StatisticsEngine<SimBackend>,
}

pub static SIM_FIXTURE: Lazy<SimFixture> = Lazy::new(|| {
    let ctx = DeviceContext::new(SimBackend::new(SimConfig::default().with_name("shared-sim")));
    let tuning = ReductionTuning::for_class(ctx.limits().class);
    let engine = StatisticsEngine::with_tuning(ctx.clone(), tuning)
        .expect("default tuning is valid");
    SimFixture { ctx, engine }
});

impl SimFixture {
    pub fn upload(&self, data: &[f64]) -> DeviceArray<SimBackend> {
        DeviceArray::from_host(&self.ctx, data).expect("upload to shared sim")
    }
}

/// A private context plus a monitor over its driver counters
pub fn fresh_context(config: SimConfig) -> (DeviceContext<SimBackend>, SimMonitor) {
    let backend = SimBackend::new(config);
    let monitor = backend.monitor();
    (DeviceContext::new(backend), monitor)
}

/// Engine with explicit tunables on a private default device
pub fn engine_with(group_size: usize, num_groups: usize) -> StatisticsEngine<SimBackend> {
    let (ctx, _) = fresh_context(SimConfig::default());
    let tuning = ReductionTuning::for_class(ctx.limits().class)
        .with_group_size(group_size)
        .with_num_groups(num_groups);
    StatisticsEngine::with_tuning(ctx, tuning).expect("valid tuning")
}

/// Reproducible samples in `[lo, hi)`
pub fn seeded_data(seed: u64, n: usize, lo: f64, hi: f64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(lo..hi)).collect()
}

/// Host reference: (mean, sample variance, skewness, kurtosis) by direct two-pass sums
pub fn reference_stats(data: &[f64]) -> (f64, f64, f64, f64) {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for &x in data {
        let d = x - mean;
        m2 += d * d;
        m3 += d * d * d;
        m4 += d * d * d * d;
    }
    let variance = m2 / (n - 1.0);
    let skewness = n.sqrt() * m3 / m2.powf(1.5);
    let kurtosis = n * m4 / (m2 * m2);
    (mean, variance, skewness, kurtosis)
}

pub fn assert_close(actual: f64, expected: f64, rel: f64) {
    let scale = expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= rel * scale,
        "expected {} within {} (relative), got {}",
        expected,
        rel,
        actual
    );
}
