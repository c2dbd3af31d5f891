//! Work partitioning for the chunked pass

use crate::reduction::tuning::ReductionTuning;

/// How `n` elements are split across workers
///
/// Every worker gets a contiguous slice of `per_thread_elements`; the last
/// slices may be short or empty when `n` does not fill `padded_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub n: usize,
    pub num_groups: usize,
    pub group_size: usize,
    pub num_threads: usize,
    pub per_thread_elements: usize,
    /// Elements covered by one group
    pub per_chunk: usize,
    pub padded_size: usize,
}

impl ChunkPlan {
    pub fn new(n: usize, tuning: &ReductionTuning) -> Self {
        let group_size = tuning.group_size.max(1);
        let num_groups = n.div_ceil(group_size).min(tuning.num_groups).max(1);
        let num_threads = num_groups * group_size;
        let per_thread_elements = n.div_ceil(num_threads);

        ChunkPlan {
            n,
            num_groups,
            group_size,
            num_threads,
            per_thread_elements,
            per_chunk: group_size * per_thread_elements,
            padded_size: num_threads * per_thread_elements,
        }
    }
}
