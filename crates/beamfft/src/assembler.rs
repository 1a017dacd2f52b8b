//! Deterministic reassembly of per-batch outputs.

use beamfft_core::types::{BeamParams, BeamResult, ShapeKey};

use crate::executor::BatchOutcome;
use crate::profiler::CallProfile;

/// The full result of one `process` call: exactly `beam_count` beam results
/// in beam-index order, plus shape and profiling metadata.
#[derive(Clone, Debug)]
pub struct AggregateResult {
    /// Per-beam results, indexed by beam.
    pub beams: Vec<BeamResult>,
    /// The shape this call executed with.
    pub shape: ShapeKey,
    /// Caller-assigned task identifier.
    pub task_id: String,
    /// Caller-assigned module name.
    pub module_name: String,
    /// Timing profile of the call.
    pub profile: CallProfile,
}

impl AggregateResult {
    /// Number of beams that processed successfully.
    #[must_use]
    pub fn ok_count(&self) -> usize {
        self.beams.iter().filter(|b| b.ok).count()
    }

    /// Indices of beams that failed.
    #[must_use]
    pub fn failed_beams(&self) -> Vec<usize> {
        self.beams
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.ok)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Write each batch's beam vector into a pre-sized aggregate at the batch's
/// start offset. Final ordering is beam-index order regardless of which
/// stream or batch finished first; a failed batch contributes failed
/// placeholder entries carrying its error detail.
pub fn assemble(
    params: &BeamParams,
    shape: ShapeKey,
    outcomes: Vec<BatchOutcome>,
    profile: CallProfile,
) -> AggregateResult {
    let mut beams: Vec<BeamResult> = (0..shape.beam_count)
        .map(|_| BeamResult::failed("beam not covered by any batch"))
        .collect();

    for outcome in outcomes {
        let start = outcome.plan.start_beam;
        match outcome.beams {
            Ok(batch_beams) => {
                for (local, beam) in batch_beams.into_iter().enumerate() {
                    beams[start + local] = beam;
                }
            }
            Err(detail) => {
                for slot in beams.iter_mut().skip(start).take(outcome.plan.beam_count) {
                    *slot = BeamResult::failed(detail.clone());
                }
            }
        }
    }

    AggregateResult {
        beams,
        shape,
        task_id: params.task_id.clone(),
        module_name: params.module_name.clone(),
        profile,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{BatchPlan, Strategy};
    use crate::profiler::{BatchTiming, StageTimes};
    use beamfft_core::types::PeakResult;

    fn outcome(
        batch_index: usize,
        start_beam: usize,
        beam_count: usize,
        beams: std::result::Result<Vec<BeamResult>, String>,
    ) -> BatchOutcome {
        BatchOutcome {
            plan: BatchPlan {
                batch_index,
                start_beam,
                beam_count,
                stream: batch_index % 2,
            },
            timing: BatchTiming {
                batch_index,
                start_beam,
                beam_count,
                stream: batch_index % 2,
                stages: StageTimes::default(),
                failed: beams.is_err(),
            },
            beams,
        }
    }

    fn tagged_beam(tag: usize) -> BeamResult {
        BeamResult {
            peaks: vec![PeakResult {
                bin_index: tag,
                re: 0.0,
                im: 0.0,
                amplitude: 1.0,
                phase_degrees: 0.0,
            }],
            freq_offset: 0.0,
            refined_frequency_hz: 0.0,
            ok: true,
            error: None,
        }
    }

    #[test]
    fn test_assembly_is_independent_of_completion_order() {
        let params = beamfft_core::BeamParams::new(6, 8, 4, 3).with_task_id("t-1");
        let shape = params.validate().unwrap();
        let profile = CallProfile::new(Strategy::Batched, 6, Vec::new(), 1.0);

        // Outcomes arrive out of batch order.
        let outcomes = vec![
            outcome(2, 4, 2, Ok(vec![tagged_beam(4), tagged_beam(5)])),
            outcome(0, 0, 2, Ok(vec![tagged_beam(0), tagged_beam(1)])),
            outcome(1, 2, 2, Ok(vec![tagged_beam(2), tagged_beam(3)])),
        ];

        let result = assemble(&params, shape, outcomes, profile);
        assert_eq!(result.beams.len(), 6);
        assert_eq!(result.task_id, "t-1");
        for (i, beam) in result.beams.iter().enumerate() {
            assert!(beam.ok);
            assert_eq!(beam.peaks[0].bin_index, i);
        }
    }

    #[test]
    fn test_failed_batch_marks_only_its_beams() {
        let params = beamfft_core::BeamParams::new(6, 8, 4, 3);
        let shape = params.validate().unwrap();
        let profile = CallProfile::new(Strategy::Batched, 6, Vec::new(), 1.0);

        let outcomes = vec![
            outcome(0, 0, 2, Ok(vec![tagged_beam(0), tagged_beam(1)])),
            outcome(1, 2, 2, Err("kernel launch rejected".to_string())),
            outcome(2, 4, 2, Ok(vec![tagged_beam(4), tagged_beam(5)])),
        ];

        let result = assemble(&params, shape, outcomes, profile);
        assert_eq!(result.ok_count(), 4);
        assert_eq!(result.failed_beams(), vec![2, 3]);
        let detail = result.beams[2].error.as_deref().unwrap();
        assert!(detail.contains("kernel launch rejected"));
        assert!(result.beams[3].peaks.is_empty());
    }
}
