//! End-to-end statistics on the software device

mod common;

use common::{assert_close, engine_with, fresh_context, reference_stats, seeded_data, SIM_FIXTURE};
use rocmstat::{
    BackendError, ContextConfig, DeviceArray, DeviceContext, MomentOrder, SimBackend, SimConfig,
    StatError, Statistic, StatisticsEngine,
};

const SAMPLE: [f64; 8] = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];

#[test]
fn test_sum_of_small_array() {
    let fixture = &*SIM_FIXTURE;
    let data = fixture.upload(&[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(fixture.engine.sum(&data).unwrap(), 10.0);
}

#[test]
fn test_textbook_sample() {
    let fixture = &*SIM_FIXTURE;
    let data = fixture.upload(&SAMPLE);

    assert_close(fixture.engine.mean(&data).unwrap(), 5.0, 1e-12);
    assert_close(fixture.engine.variance(&data).unwrap(), 32.0 / 7.0, 1e-12);
    assert_close(fixture.engine.stddev(&data).unwrap(), (32.0f64 / 7.0).sqrt(), 1e-12);
    assert!((fixture.engine.stddev(&data).unwrap() - 2.1381).abs() < 1e-4);

    let (_, _, skew, kurt) = reference_stats(&SAMPLE);
    assert_close(fixture.engine.skewness(&data).unwrap(), skew, 1e-10);
    assert_close(fixture.engine.kurtosis(&data).unwrap(), kurt, 1e-10);
}

#[test]
fn test_statistic_dispatch_matches_named_calls() {
    let fixture = &*SIM_FIXTURE;
    let data = fixture.upload(&SAMPLE);
    assert_eq!(
        fixture.engine.statistic(Statistic::Variance, &data).unwrap(),
        fixture.engine.variance(&data).unwrap()
    );
    assert_eq!(
        fixture.engine.statistic(Statistic::Sum, &data).unwrap(),
        fixture.engine.sum(&data).unwrap()
    );
}

#[test]
fn test_empty_array() {
    let fixture = &*SIM_FIXTURE;
    let data = fixture.upload(&[]);

    assert_eq!(fixture.engine.sum(&data).unwrap(), 0.0);
    let err = fixture.engine.mean(&data).unwrap_err();
    assert!(matches!(
        err,
        StatError::InsufficientSamples { statistic: Statistic::Mean, required: 1, actual: 0 }
    ));
    assert!(err.is_user_error());

    let acc = fixture.engine.moments(&data, MomentOrder::Second).unwrap();
    assert_eq!(acc.count, 0.0);
}

#[test]
fn test_single_sample() {
    let fixture = &*SIM_FIXTURE;
    let data = fixture.upload(&[42.0]);

    assert_eq!(fixture.engine.mean(&data).unwrap(), 42.0);
    for stat in [Statistic::Variance, Statistic::StdDev, Statistic::Skewness, Statistic::Kurtosis] {
        let err = fixture.engine.statistic(stat, &data).unwrap_err();
        assert!(
            matches!(err, StatError::InsufficientSamples { required: 2, actual: 1, .. }),
            "{}: {:?}",
            stat,
            err
        );
    }
}

#[test]
fn test_constant_data_has_zero_spread() {
    let fixture = &*SIM_FIXTURE;
    let data = fixture.upload(&[3.5; 100]);

    assert_eq!(fixture.engine.variance(&data).unwrap(), 0.0);
    assert!(fixture.engine.skewness(&data).unwrap().is_nan());
    assert!(fixture.engine.kurtosis(&data).unwrap().is_nan());
}

#[test]
fn test_large_random_array_matches_reference() {
    let fixture = &*SIM_FIXTURE;
    let values = seeded_data(7, 100_003, -50.0, 150.0);
    let data = fixture.upload(&values);
    let (mean, variance, skew, kurt) = reference_stats(&values);

    assert_close(fixture.engine.sum(&data).unwrap(), values.iter().sum(), 1e-9);
    assert_close(fixture.engine.mean(&data).unwrap(), mean, 1e-9);
    assert_close(fixture.engine.variance(&data).unwrap(), variance, 1e-9);
    assert_close(fixture.engine.skewness(&data).unwrap(), skew, 1e-8);
    assert_close(fixture.engine.kurtosis(&data).unwrap(), kurt, 1e-9);
}

#[test]
fn test_offset_data_stays_accurate() {
    // large common offset: the centered pass must not lose the spread
    let fixture = &*SIM_FIXTURE;
    let values: Vec<f64> = seeded_data(11, 10_000, 0.0, 1.0)
        .into_iter()
        .map(|x| 1.0e9 + x)
        .collect();
    let data = fixture.upload(&values);
    let (_, variance, _, _) = reference_stats(&values);
    assert_close(fixture.engine.variance(&data).unwrap(), variance, 1e-6);
}

#[test]
fn test_results_independent_of_partitioning() {
    let values = seeded_data(3, 5_000, -1.0, 1.0);
    let (_, variance, skew, kurt) = reference_stats(&values);

    // power-of-two and odd group widths, capped and uncapped group counts
    for (group_size, num_groups) in [(1, 1), (7, 3), (32, 32), (64, 1), (100, 7), (256, 256)] {
        let engine = engine_with(group_size, num_groups);
        let data = DeviceArray::from_host(engine.context(), &values).unwrap();
        assert_close(engine.variance(&data).unwrap(), variance, 1e-9);
        assert_close(engine.skewness(&data).unwrap(), skew, 1e-8);
        assert_close(engine.kurtosis(&data).unwrap(), kurt, 1e-9);
    }
}

#[test]
fn test_moments_accumulator() {
    let fixture = &*SIM_FIXTURE;
    let data = fixture.upload(&SAMPLE);

    let mean_only = fixture.engine.moments(&data, MomentOrder::Mean).unwrap();
    assert_eq!(mean_only.count, 8.0);
    assert_close(mean_only.mean, 5.0, 1e-12);
    assert_eq!(mean_only.m2, 0.0);

    let acc = fixture.engine.moments(&data, MomentOrder::Fourth).unwrap();
    assert_eq!(acc.count, 8.0);
    assert_close(acc.mean, 5.0, 1e-12);
    assert_close(acc.m2, 32.0, 1e-12);
    assert_close(acc.variance(), 32.0 / 7.0, 1e-12);
}

#[test]
fn test_array_from_other_context_is_rejected() {
    let fixture = &*SIM_FIXTURE;
    let (other, _) = fresh_context(SimConfig::default());
    let foreign = DeviceArray::from_host(&other, &SAMPLE).unwrap();

    let err = fixture.engine.mean(&foreign).unwrap_err();
    assert!(matches!(err, StatError::ContextMismatch));
}

#[test]
fn test_injected_launch_failure_propagates() {
    let (ctx, _) = fresh_context(SimConfig::default().with_fail_launch_at(0));
    let engine = StatisticsEngine::with_tuning(
        ctx.clone(),
        rocmstat::ReductionTuning::for_class(ctx.limits().class),
    )
    .unwrap();
    let data = DeviceArray::from_host(&ctx, &SAMPLE).unwrap();

    let err = engine.sum(&data).unwrap_err();
    assert!(matches!(err, StatError::Backend(_)), "{:?}", err);
    assert!(!err.is_recoverable());

    // later launches are unaffected
    assert_eq!(engine.sum(&data).unwrap(), 40.0);
}

fn blocking_context(config: SimConfig) -> (DeviceContext<SimBackend>, rocmstat::SimMonitor) {
    let backend = SimBackend::new(config);
    let monitor = backend.monitor();
    let ctx = DeviceContext::with_config(backend, ContextConfig::new().with_sync_after_launch(true));
    (ctx, monitor)
}

#[test]
fn test_sync_after_launch_waits_on_every_launch() {
    let (ctx, monitor) = blocking_context(SimConfig::default());
    let engine = StatisticsEngine::new(ctx.clone()).unwrap();
    let data = DeviceArray::from_host(&ctx, &[1.0, 2.0, 3.0, 4.0]).unwrap();

    assert_eq!(engine.sum(&data).unwrap(), 10.0);
    let stats = monitor.stats();
    assert_eq!(stats.launches, 2);
    assert_eq!(stats.finishes, stats.launches);
}

#[test]
fn test_sync_after_launch_reports_kernel_fault_at_the_launch() {
    let (ctx, monitor) = blocking_context(SimConfig::default().with_fail_execute_at(0));
    let engine = StatisticsEngine::new(ctx.clone()).unwrap();
    let data = DeviceArray::from_host(&ctx, &SAMPLE).unwrap();
    let reads_before = monitor.stats().reads;

    let err = engine.sum(&data).unwrap_err();
    assert!(
        matches!(&err, StatError::Backend(BackendError::KernelLaunchFailed(msg)) if msg.contains("launch 0")),
        "{:?}",
        err
    );
    // the tree pass was never enqueued and nothing was read back
    assert_eq!(monitor.stats().launches, 1);
    assert_eq!(monitor.stats().reads, reads_before);
}

#[test]
fn test_without_sync_kernel_fault_surfaces_at_readback() {
    let (ctx, monitor) = fresh_context(SimConfig::default().with_fail_execute_at(0));
    let engine = StatisticsEngine::new(ctx.clone()).unwrap();
    let data = DeviceArray::from_host(&ctx, &SAMPLE).unwrap();
    let reads_before = monitor.stats().reads;

    assert!(matches!(engine.sum(&data).unwrap_err(), StatError::Backend(_)));
    assert_eq!(monitor.stats().launches, 2);
    assert_eq!(monitor.stats().finishes, 0);
    assert_eq!(monitor.stats().reads, reads_before + 1);
}
