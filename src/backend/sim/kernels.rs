//! Reduction kernels of the software device
//!
//! Each launch runs work-group by work-group. Within a group every worker
//! runs one phase to completion before any worker starts the next, which is
//! what a group-wide barrier guarantees on real hardware. Group-local scratch
//! is a `Vec` sized from the launch's `LocalScratch` argument.

use crate::backend::sim::{SimHandle, SimMemory};
use crate::backend::{BackendError, BackendResult, KernelArg, KernelKind, LaunchConfig};
use crate::reduction::kernels::{chunked_args, tree_args, AccumulatorKind, Record};

/// Run one launch to completion against device memory
pub(crate) fn execute(
    kind: KernelKind,
    config: &LaunchConfig,
    args: &[KernelArg<SimHandle>],
    memory: &mut SimMemory,
) -> BackendResult<()> {
    if args.len() != kind.arg_count() {
        return Err(launch_error(
            kind,
            format!("expected {} arguments, got {}", kind.arg_count(), args.len()),
        ));
    }
    for arg in args {
        if let KernelArg::Buffer(handle) = arg {
            memory.materialize(*handle)?;
        }
    }

    match kind {
        KernelKind::ChunkedReduce(acc) => chunked_reduce(kind, acc, config, args, memory),
        KernelKind::TreeReduce(acc) => tree_reduce(kind, acc, config, args, memory),
    }
}

fn chunked_reduce(
    kind: KernelKind,
    acc: AccumulatorKind,
    config: &LaunchConfig,
    args: &[KernelArg<SimHandle>],
    memory: &mut SimMemory,
) -> BackendResult<()> {
    let input = buffer_arg(kind, args, chunked_args::INPUT)?;
    let n = u64_arg(kind, args, chunked_args::LEN)? as usize;
    let per_thread = u64_arg(kind, args, chunked_args::PER_THREAD)? as usize;
    let shift = f64_arg(kind, args, chunked_args::SHIFT)?;
    let partials = buffer_arg(kind, args, chunked_args::PARTIALS)?;
    let scratch_bytes = scratch_arg(kind, args, chunked_args::SCRATCH)?;

    let groups = config.grid.0 as usize;
    let group_size = config.block.0 as usize;
    check_scratch(kind, acc, group_size, scratch_bytes)?;

    let values = memory.f64s(input)?;
    if values.len() < n {
        return Err(launch_error(
            kind,
            format!("input holds {} elements, launch covers {}", values.len(), n),
        ));
    }

    let mut results = Vec::with_capacity(groups);
    let mut scratch = vec![acc.identity(); group_size];
    for group in 0..groups {
        // phase 1: each worker folds its contiguous slice
        for (lid, slot) in scratch.iter_mut().enumerate() {
            let gid = group * group_size + lid;
            let start = (gid * per_thread).min(n);
            let end = (start + per_thread).min(n);
            let mut record = acc.identity();
            for &x in &values[start..end] {
                acc.accumulate(&mut record, x - shift);
            }
            *slot = record;
        }
        // barrier, then phase 2: in-group tree merge
        tree_merge(acc, &mut scratch);
        results.push(scratch[0]);
    }

    store_records(kind, acc, memory, partials, &results)
}

fn tree_reduce(
    kind: KernelKind,
    acc: AccumulatorKind,
    config: &LaunchConfig,
    args: &[KernelArg<SimHandle>],
    memory: &mut SimMemory,
) -> BackendResult<()> {
    let partials = buffer_arg(kind, args, tree_args::PARTIALS)?;
    let num_groups = u64_arg(kind, args, tree_args::NUM_GROUPS)? as usize;
    let result = buffer_arg(kind, args, tree_args::RESULT)?;
    let scratch_bytes = scratch_arg(kind, args, tree_args::SCRATCH)?;

    let group_size = config.block.0 as usize;
    if config.grid.0 != 1 {
        return Err(launch_error(kind, format!("expects one work-group, got {}", config.grid.0)));
    }
    if num_groups > group_size {
        return Err(launch_error(
            kind,
            format!("{} partials exceed work-group size {}", num_groups, group_size),
        ));
    }
    check_scratch(kind, acc, group_size, scratch_bytes)?;

    let width = acc.width();
    let values = memory.f64s(partials)?;
    if values.len() < num_groups * width {
        return Err(launch_error(
            kind,
            format!("partials buffer holds fewer than {} records", num_groups),
        ));
    }

    // workers past the last partial load the identity
    let mut scratch: Vec<Record> = (0..group_size)
        .map(|lid| {
            if lid < num_groups {
                acc.load(&values[lid * width..])
            } else {
                acc.identity()
            }
        })
        .collect();
    tree_merge(acc, &mut scratch);

    store_records(kind, acc, memory, result, &scratch[..1])
}

/// Pairwise merge with doubling stride; slot 0 ends up holding the whole group.
///
/// Each stride level is one barrier phase. Merges keep left-to-right order.
pub(crate) fn tree_merge(acc: AccumulatorKind, scratch: &mut [Record]) {
    let len = scratch.len();
    let mut stride = 1;
    while stride < len {
        let mut lid = 0;
        while lid + stride < len {
            scratch[lid] = acc.merge(&scratch[lid], &scratch[lid + stride]);
            lid += 2 * stride;
        }
        stride *= 2;
    }
}

fn store_records(
    kind: KernelKind,
    acc: AccumulatorKind,
    memory: &mut SimMemory,
    dst: SimHandle,
    records: &[Record],
) -> BackendResult<()> {
    let width = acc.width();
    let out = memory.f64s_mut(dst)?;
    if out.len() < records.len() * width {
        return Err(launch_error(
            kind,
            format!("output buffer holds fewer than {} records", records.len()),
        ));
    }
    for (record, chunk) in records.iter().zip(out.chunks_exact_mut(width)) {
        acc.store(record, chunk);
    }
    Ok(())
}

fn check_scratch(
    kind: KernelKind,
    acc: AccumulatorKind,
    group_size: usize,
    scratch_bytes: usize,
) -> BackendResult<()> {
    let needed = group_size * acc.record_bytes();
    if scratch_bytes < needed {
        return Err(launch_error(
            kind,
            format!("local scratch {} bytes, {} needed", scratch_bytes, needed),
        ));
    }
    Ok(())
}

fn launch_error(kind: KernelKind, msg: String) -> BackendError {
    BackendError::KernelLaunchFailed(format!("{}: {}", kind.symbol(), msg))
}

fn buffer_arg(kind: KernelKind, args: &[KernelArg<SimHandle>], slot: usize) -> BackendResult<SimHandle> {
    match args.get(slot) {
        Some(KernelArg::Buffer(handle)) => Ok(*handle),
        other => Err(launch_error(kind, format!("argument {} must be a buffer, got {:?}", slot, other))),
    }
}

fn u64_arg(kind: KernelKind, args: &[KernelArg<SimHandle>], slot: usize) -> BackendResult<u64> {
    match args.get(slot) {
        Some(KernelArg::U64(value)) => Ok(*value),
        other => Err(launch_error(kind, format!("argument {} must be u64, got {:?}", slot, other))),
    }
}

fn f64_arg(kind: KernelKind, args: &[KernelArg<SimHandle>], slot: usize) -> BackendResult<f64> {
    match args.get(slot) {
        Some(KernelArg::F64(value)) => Ok(*value),
        other => Err(launch_error(kind, format!("argument {} must be f64, got {:?}", slot, other))),
    }
}

fn scratch_arg(kind: KernelKind, args: &[KernelArg<SimHandle>], slot: usize) -> BackendResult<usize> {
    match args.get(slot) {
        Some(KernelArg::LocalScratch(bytes)) => Ok(*bytes),
        other => Err(launch_error(
            kind,
            format!("argument {} must be local scratch, got {:?}", slot, other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ComputeBackend, SimBackend};

    fn upload(backend: &mut SimBackend, values: &[f64]) -> SimHandle {
        let handle = backend.raw_alloc(values.len().max(1) * 8).unwrap();
        backend.write(&handle, 0, bytemuck::cast_slice(values)).unwrap();
        handle
    }

    fn download(backend: &mut SimBackend, handle: &SimHandle, count: usize) -> Vec<f64> {
        let mut out = vec![0.0f64; count];
        backend.read(handle, 0, bytemuck::cast_slice_mut(&mut out)).unwrap();
        out
    }

    #[test]
    fn test_tree_merge_sum() {
        let acc = AccumulatorKind::Sum;
        let mut scratch: Vec<Record> = (1..=5)
            .map(|i| {
                let mut r = acc.identity();
                r[0] = i as f64;
                r
            })
            .collect();
        tree_merge(acc, &mut scratch);
        assert_eq!(scratch[0][0], 15.0);
    }

    #[test]
    fn test_chunked_reduce_sum_per_group() {
        let mut backend = SimBackend::default();
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let input = upload(&mut backend, &values);
        let partials = backend.raw_alloc(2 * 8).unwrap();

        let kind = KernelKind::ChunkedReduce(AccumulatorKind::Sum);
        let kernel = backend.kernel(kind).unwrap();
        // 2 groups of 2 workers, 3 elements per worker
        let args = vec![
            KernelArg::Buffer(input),
            KernelArg::U64(10),
            KernelArg::U64(3),
            KernelArg::F64(0.0),
            KernelArg::Buffer(partials),
            KernelArg::LocalScratch(2 * 8),
        ];
        let config = LaunchConfig::linear(2, 2).with_scratch_from(&args);
        backend.launch(&kernel, &config, &args).unwrap();
        assert_eq!(backend.queued(), 1);

        let out = download(&mut backend, &partials, 2);
        assert_eq!(out, vec![21.0, 34.0]);
        assert_eq!(backend.queued(), 0);
    }

    #[test]
    fn test_tree_reduce_pads_with_identity() {
        let mut backend = SimBackend::default();
        let kind = AccumulatorKind::Mean;
        // partials: {n=2, mean=1}, {n=2, mean=3}, {n=4, mean=6}
        let partials = upload(&mut backend, &[2.0, 1.0, 2.0, 3.0, 4.0, 6.0]);
        let result = backend.raw_alloc(2 * 8).unwrap();

        let kernel = backend.kernel(KernelKind::TreeReduce(kind)).unwrap();
        let args = vec![
            KernelArg::Buffer(partials),
            KernelArg::U64(3),
            KernelArg::Buffer(result),
            KernelArg::LocalScratch(8 * kind.record_bytes()),
        ];
        let config = LaunchConfig::linear(1, 8).with_scratch_from(&args);
        backend.launch(&kernel, &config, &args).unwrap();

        let out = download(&mut backend, &result, 2);
        assert_eq!(out, vec![8.0, 4.0]);
    }

    #[test]
    fn test_insufficient_scratch_fails_at_drain() {
        let mut backend = SimBackend::default();
        let partials = upload(&mut backend, &[1.0]);
        let result = backend.raw_alloc(8).unwrap();
        let kernel = backend
            .kernel(KernelKind::TreeReduce(AccumulatorKind::Sum))
            .unwrap();
        let args = vec![
            KernelArg::Buffer(partials),
            KernelArg::U64(1),
            KernelArg::Buffer(result),
            KernelArg::LocalScratch(8),
        ];
        backend
            .launch(&kernel, &LaunchConfig::linear(1, 4), &args)
            .unwrap();

        let err = backend.finish().unwrap_err();
        assert!(err.to_string().contains("local scratch"));
        assert_eq!(backend.queued(), 0);
    }

    #[test]
    fn test_wrong_argument_type() {
        let mut backend = SimBackend::default();
        let result = backend.raw_alloc(8).unwrap();
        let kernel = backend
            .kernel(KernelKind::TreeReduce(AccumulatorKind::Sum))
            .unwrap();
        let args = vec![
            KernelArg::U64(0),
            KernelArg::U64(1),
            KernelArg::Buffer(result),
            KernelArg::LocalScratch(8),
        ];
        backend
            .launch(&kernel, &LaunchConfig::linear(1, 1), &args)
            .unwrap();
        let err = backend.finish().unwrap_err();
        assert!(err.to_string().contains("must be a buffer"));
    }
}
