//! Reduction kernel catalogue and accumulator record layout
//!
//! Accumulators travel through device memory as records of `width`
//! consecutive `f64`s:
//!
//! | kind           | record                        |
//! |----------------|-------------------------------|
//! | `Sum`          | `[sum]`                       |
//! | `Mean`         | `[count, mean]`               |
//! | `SecondMoment` | `[count, mean, M2]`           |
//! | `ThirdMoment`  | `[count, mean, M2, M3]`       |
//! | `FourthMoment` | `[count, mean, M2, M3, M4]`   |
//!
//! Launch argument order for each kernel (shared by the software device and
//! `kernels/statistics.hip`):
//!
//! - `chunked_reduce_*`: `input, n, per_thread_elements, shift, partials, scratch`
//! - `tree_reduce_*`: `partials, num_groups, result, scratch`

use crate::memory::Tag;
use crate::reduction::moments::{MomentAccumulator, MomentOrder};

/// Widest accumulator record, in `f64`s
pub const MAX_RECORD_WIDTH: usize = 5;

/// Fixed-size storage for one accumulator record; only `width()` slots are meaningful
pub type Record = [f64; MAX_RECORD_WIDTH];

/// Argument slots of the chunked partial-reduction kernel
pub mod chunked_args {
    pub const INPUT: usize = 0;
    pub const LEN: usize = 1;
    pub const PER_THREAD: usize = 2;
    pub const SHIFT: usize = 3;
    pub const PARTIALS: usize = 4;
    pub const SCRATCH: usize = 5;
    pub const COUNT: usize = 6;
}

/// Argument slots of the tree-reduction kernel
pub mod tree_args {
    pub const PARTIALS: usize = 0;
    pub const NUM_GROUPS: usize = 1;
    pub const RESULT: usize = 2;
    pub const SCRATCH: usize = 3;
    pub const COUNT: usize = 4;
}

/// What a worker accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorKind {
    Sum,
    Mean,
    SecondMoment,
    ThirdMoment,
    FourthMoment,
}

impl AccumulatorKind {
    pub const ALL: [AccumulatorKind; 5] = [
        AccumulatorKind::Sum,
        AccumulatorKind::Mean,
        AccumulatorKind::SecondMoment,
        AccumulatorKind::ThirdMoment,
        AccumulatorKind::FourthMoment,
    ];

    /// Record width in `f64`s
    pub const fn width(self) -> usize {
        match self {
            AccumulatorKind::Sum => 1,
            AccumulatorKind::Mean => 2,
            AccumulatorKind::SecondMoment => 3,
            AccumulatorKind::ThirdMoment => 4,
            AccumulatorKind::FourthMoment => 5,
        }
    }

    /// Record width in bytes
    pub const fn record_bytes(self) -> usize {
        self.width() * std::mem::size_of::<f64>()
    }

    /// Moment order for the moment kinds, `None` for `Sum`
    pub fn order(self) -> Option<MomentOrder> {
        match self {
            AccumulatorKind::Sum => None,
            AccumulatorKind::Mean => Some(MomentOrder::Mean),
            AccumulatorKind::SecondMoment => Some(MomentOrder::Second),
            AccumulatorKind::ThirdMoment => Some(MomentOrder::Third),
            AccumulatorKind::FourthMoment => Some(MomentOrder::Fourth),
        }
    }

    /// Short name used in kernel symbols and tags
    pub const fn name(self) -> &'static str {
        match self {
            AccumulatorKind::Sum => "sum",
            AccumulatorKind::Mean => "mean",
            AccumulatorKind::SecondMoment => "m2",
            AccumulatorKind::ThirdMoment => "m3",
            AccumulatorKind::FourthMoment => "m4",
        }
    }

    /// Free-list tag of the per-group partials buffer
    pub const fn partials_tag(self) -> Tag {
        match self {
            AccumulatorKind::Sum => Tag::new("partials:sum"),
            AccumulatorKind::Mean => Tag::new("partials:mean"),
            AccumulatorKind::SecondMoment => Tag::new("partials:m2"),
            AccumulatorKind::ThirdMoment => Tag::new("partials:m3"),
            AccumulatorKind::FourthMoment => Tag::new("partials:m4"),
        }
    }

    /// Free-list tag of the single-record result buffer
    pub const fn result_tag(self) -> Tag {
        match self {
            AccumulatorKind::Sum => Tag::new("result:sum"),
            AccumulatorKind::Mean => Tag::new("result:mean"),
            AccumulatorKind::SecondMoment => Tag::new("result:m2"),
            AccumulatorKind::ThirdMoment => Tag::new("result:m3"),
            AccumulatorKind::FourthMoment => Tag::new("result:m4"),
        }
    }

    /// Record of the empty accumulator (zero padding in the tree kernel)
    pub fn identity(self) -> Record {
        [0.0; MAX_RECORD_WIDTH]
    }

    /// Fold one (already shifted) sample into a record
    pub fn accumulate(self, record: &mut Record, x: f64) {
        match self.order() {
            None => record[0] += x,
            Some(order) => {
                let mut acc = decode_moments(record);
                acc.push(x, order);
                *record = encode_moments(&acc);
            }
        }
    }

    /// Merge two records, `a` on the left
    pub fn merge(self, a: &Record, b: &Record) -> Record {
        match self.order() {
            None => {
                let mut out = self.identity();
                out[0] = a[0] + b[0];
                out
            }
            Some(order) => {
                let merged = decode_moments(a).combine(&decode_moments(b), order);
                let mut out = encode_moments(&merged);
                out[self.width()..].iter_mut().for_each(|slot| *slot = 0.0);
                out
            }
        }
    }

    /// Read a record from `width()` consecutive values
    pub fn load(self, values: &[f64]) -> Record {
        let mut record = self.identity();
        record[..self.width()].copy_from_slice(&values[..self.width()]);
        record
    }

    /// Write the meaningful slots of a record
    pub fn store(self, record: &Record, out: &mut [f64]) {
        out[..self.width()].copy_from_slice(&record[..self.width()]);
    }
}

/// View a moment record as an accumulator (unused trailing slots are zero)
pub fn decode_moments(record: &Record) -> MomentAccumulator {
    MomentAccumulator {
        count: record[0],
        mean: record[1],
        m2: record[2],
        m3: record[3],
        m4: record[4],
    }
}

/// Lay an accumulator out as a full-width record
pub fn encode_moments(acc: &MomentAccumulator) -> Record {
    [acc.count, acc.mean, acc.m2, acc.m3, acc.m4]
}

/// The kernels a reduction pipeline launches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// Per-worker slice accumulation, then in-group tree merge to one partial per group
    ChunkedReduce(AccumulatorKind),
    /// Single work-group merge of all group partials into one record
    TreeReduce(AccumulatorKind),
}

impl KernelKind {
    /// Accumulator the kernel operates on
    pub fn accumulator(&self) -> AccumulatorKind {
        match self {
            KernelKind::ChunkedReduce(kind) | KernelKind::TreeReduce(kind) => *kind,
        }
    }

    /// Number of launch arguments the kernel expects
    pub fn arg_count(&self) -> usize {
        match self {
            KernelKind::ChunkedReduce(_) => chunked_args::COUNT,
            KernelKind::TreeReduce(_) => tree_args::COUNT,
        }
    }

    /// Symbol name in the compiled kernel module
    pub fn symbol(&self) -> String {
        match self {
            KernelKind::ChunkedReduce(kind) => format!("chunked_reduce_{}", kind.name()),
            KernelKind::TreeReduce(kind) => format!("tree_reduce_{}", kind.name()),
        }
    }
}
