//! Execution strategy and batch partitioning.

use beamfft_core::types::ShapeKey;

use crate::budget;
use crate::config::BatchConfig;

/// How a call will be executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Every beam in one pass.
    SinglePass,
    /// Beams split into batches across the stream pool.
    Batched,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SinglePass => write!(f, "single-pass"),
            Self::Batched => write!(f, "batched"),
        }
    }
}

/// One contiguous chunk of beams assigned to a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    /// Position of this batch in submission order.
    pub batch_index: usize,
    /// First beam of the chunk.
    pub start_beam: usize,
    /// Number of beams in the chunk.
    pub beam_count: usize,
    /// Stream the chunk is assigned to.
    pub stream: usize,
}

impl BatchPlan {
    /// One past the last beam of the chunk.
    #[must_use]
    pub fn end_beam(&self) -> usize {
        self.start_beam + self.beam_count
    }
}

/// Pick the execution strategy for a shape given available device memory.
///
/// Small workloads always run in one pass; otherwise one pass is used only
/// when the full working set fits the memory budget.
#[must_use]
pub fn choose_strategy(shape: &ShapeKey, available_bytes: u64, config: &BatchConfig) -> Strategy {
    if shape.beam_count < config.min_beams_for_batch {
        return Strategy::SinglePass;
    }
    let required = budget::estimate_bytes(shape);
    if budget::fits_budget(required, available_bytes, config.memory_threshold) {
        Strategy::SinglePass
    } else {
        tracing::debug!(
            required,
            available_bytes,
            threshold = config.memory_threshold,
            "workload exceeds memory budget, batching"
        );
        Strategy::Batched
    }
}

/// Beams per batch: `max(1, floor(total_beams * ratio))`, never more than
/// `total_beams`.
#[must_use]
pub fn compute_batch_size(total_beams: usize, ratio: f64) -> usize {
    ((total_beams as f64 * ratio) as usize).clamp(1, total_beams)
}

/// Split `total_beams` into contiguous chunks of `batch_size` (the last may
/// be smaller), assigned round-robin across `num_streams` so consecutive
/// chunks target different streams.
#[must_use]
pub fn partition(total_beams: usize, batch_size: usize, num_streams: usize) -> Vec<BatchPlan> {
    let batch_size = batch_size.max(1);
    let num_streams = num_streams.max(1);

    let mut plans = Vec::with_capacity(total_beams.div_ceil(batch_size));
    let mut start_beam = 0;
    let mut batch_index = 0;
    while start_beam < total_beams {
        let beam_count = batch_size.min(total_beams - start_beam);
        plans.push(BatchPlan {
            batch_index,
            start_beam,
            beam_count,
            stream: batch_index % num_streams,
        });
        start_beam += beam_count;
        batch_index += 1;
    }
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamfft_core::types::BeamParams;

    fn shape(beams: usize) -> ShapeKey {
        BeamParams::new(beams, 1000, 512, 3).validate().unwrap()
    }

    #[test]
    fn test_batch_size_bounds() {
        for total in [1, 2, 5, 9, 10, 17, 100, 1023] {
            let size = compute_batch_size(total, 0.2);
            assert!(size >= 1, "total={total}");
            assert!(size <= total, "total={total}");
        }
        assert_eq!(compute_batch_size(100, 0.2), 20);
        assert_eq!(compute_batch_size(3, 0.2), 1);
        assert_eq!(compute_batch_size(1, 0.2), 1);
    }

    #[test]
    fn test_partition_covers_every_beam_exactly_once() {
        for total in [1, 2, 7, 10, 64, 100, 101] {
            for batch_size in [1, 3, 10, 64, 200] {
                let plans = partition(total, batch_size, 3);
                let mut covered = vec![0usize; total];
                for plan in &plans {
                    for beam in plan.start_beam..plan.end_beam() {
                        covered[beam] += 1;
                    }
                }
                assert!(
                    covered.iter().all(|&c| c == 1),
                    "total={total} batch_size={batch_size}"
                );
                // Contiguity in submission order.
                for pair in plans.windows(2) {
                    assert_eq!(pair[0].end_beam(), pair[1].start_beam);
                }
            }
        }
    }

    #[test]
    fn test_partition_round_robins_streams() {
        let plans = partition(100, 20, 3);
        let streams: Vec<usize> = plans.iter().map(|p| p.stream).collect();
        assert_eq!(streams, vec![0, 1, 2, 0, 1]);
        // Consecutive chunks never share a stream when more than one exists.
        for pair in plans.windows(2) {
            assert_ne!(pair[0].stream, pair[1].stream);
        }
    }

    #[test]
    fn test_small_workloads_always_single_pass() {
        let config = BatchConfig::default();
        // 5 beams stay single-pass even with no memory at all.
        assert_eq!(
            choose_strategy(&shape(5), 0, &config),
            Strategy::SinglePass
        );
    }

    #[test]
    fn test_strategy_follows_memory_budget() {
        let config = BatchConfig::default();
        let s = shape(64);
        let required = budget::estimate_bytes(&s);

        let roomy = (required as f64 / 0.4) as u64 * 2;
        assert_eq!(choose_strategy(&s, roomy, &config), Strategy::SinglePass);

        let tight = required; // 0.4 * required < required
        assert_eq!(choose_strategy(&s, tight, &config), Strategy::Batched);
    }
}
