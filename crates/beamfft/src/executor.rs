//! Parallel stream executor.
//!
//! Drives the four-stage pipeline (pad -> transform -> post-process ->
//! reduce) for every planned batch on its assigned stream. Submission is
//! non-blocking: each stage carries the previous stage's completion event,
//! intra-stream order is FIFO, and streams run independently. The
//! controlling thread blocks in exactly two places:
//!
//! - the **reuse barrier** — before a stream's working buffers are handed to
//!   a new batch, the previous batch on that stream is waited on and its
//!   output read back;
//! - the **final join** — after the last submission, every stream is drained
//!   and remaining outputs are read.
//!
//! A batch that fails to launch or execute is marked failed and its beams
//! carry the error detail; other batches and streams are unaffected.
//! Failing to allocate a stream's working buffers is fatal for the call.

use std::sync::Arc;

use beamfft_core::cache::ResourceCache;
use beamfft_core::device::{
    read_vec, CompletionEvent, ComputeDevice, DeviceBuffer, DeviceProgram, KernelArg,
};
use beamfft_core::error::{BeamFftError, Result};
use beamfft_core::types::{BeamResult, Complex32, PeakRecord, PeakResult, ShapeKey, SpectralBin};

use crate::kernels;
use crate::planner::BatchPlan;
use crate::profiler::{BatchTiming, StageTimes};
use crate::stream::{BufferArena, BufferRole, PipelineState, Stage, StreamResources};

/// Result of one batch: its timing plus either per-beam results or the
/// failure detail that applies to all of its beams.
pub struct BatchOutcome {
    /// The plan this batch executed.
    pub plan: BatchPlan,
    /// Per-stage device timings.
    pub timing: BatchTiming,
    /// Beam results in local order, or the batch failure detail.
    pub beams: std::result::Result<Vec<BeamResult>, String>,
}

/// Allocation and plan-build counters, exposed so callers can observe that
/// repeated calls with an unchanged shape perform no new device work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutorDiagnostics {
    /// Device buffer allocations across all stream arenas.
    pub buffer_allocations: u64,
    /// Transform plans built.
    pub plan_builds: u64,
    /// Streams with live resources.
    pub active_streams: usize,
}

struct StreamSlot {
    resources: Option<StreamResources>,
    state: PipelineState,
}

/// All submitted stage events of one in-flight batch.
struct InFlight {
    plan: BatchPlan,
    fill: Option<CompletionEvent>,
    pad: CompletionEvent,
    transform: CompletionEvent,
    post: CompletionEvent,
    reduce: CompletionEvent,
}

/// Drives batches through per-stream pipelines.
pub struct StreamExecutor {
    device: Arc<dyn ComputeDevice>,
    cache: Arc<ResourceCache>,
    program: Arc<dyn DeviceProgram>,
    streams: Vec<StreamSlot>,
    plan_builds: u64,
}

impl StreamExecutor {
    /// Create an executor with a fixed stream pool.
    #[must_use]
    pub fn new(
        device: Arc<dyn ComputeDevice>,
        cache: Arc<ResourceCache>,
        program: Arc<dyn DeviceProgram>,
        num_streams: usize,
    ) -> Self {
        let streams = (0..num_streams.max(1))
            .map(|_| StreamSlot {
                resources: None,
                state: PipelineState::Idle,
            })
            .collect();
        Self {
            device,
            cache,
            program,
            streams,
            plan_builds: 0,
        }
    }

    /// Number of streams in the pool.
    #[must_use]
    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    /// Current allocation/plan counters.
    #[must_use]
    pub fn diagnostics(&self) -> ExecutorDiagnostics {
        let buffer_allocations = self
            .streams
            .iter()
            .filter_map(|slot| slot.resources.as_ref())
            .map(|res| res.arena.allocations())
            .sum();
        ExecutorDiagnostics {
            buffer_allocations,
            plan_builds: self.plan_builds,
            active_streams: self
                .streams
                .iter()
                .filter(|slot| slot.resources.is_some())
                .count(),
        }
    }

    /// Release every stream's resources. The next call rebuilds them.
    pub fn reset(&mut self) {
        for slot in &mut self.streams {
            slot.resources = None;
            slot.state = PipelineState::Idle;
        }
        tracing::debug!("released stream resources");
    }

    /// Run all planned batches and return their outcomes in completion
    /// (barrier) order. The result assembler restores beam order.
    pub fn execute(
        &mut self,
        input: &Arc<dyn DeviceBuffer>,
        shape: &ShapeKey,
        bin_hz: f32,
        plans: &[BatchPlan],
    ) -> Result<Vec<BatchOutcome>> {
        let mut in_flight: Vec<Option<InFlight>> =
            (0..self.streams.len()).map(|_| None).collect();
        let mut outcomes = Vec::with_capacity(plans.len());

        for plan in plans {
            let stream = plan.stream;
            if stream >= self.streams.len() {
                return Err(BeamFftError::device(format!(
                    "batch {} assigned to stream {stream}, pool has {}",
                    plan.batch_index,
                    self.streams.len()
                )));
            }

            // Reuse barrier: the previous batch on this stream still owns
            // the working buffers.
            if let Some(previous) = in_flight[stream].take() {
                outcomes.push(self.complete_batch(previous, shape)?);
            }

            self.ensure_stream(stream, plan.beam_count, shape)?;
            match self.submit_batch(input, shape, bin_hz, plan) {
                Ok(batch) => in_flight[stream] = Some(batch),
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(
                        batch = plan.batch_index,
                        stream,
                        error = %e,
                        "batch submission failed, marking its beams failed"
                    );
                    outcomes.push(failed_outcome(plan, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        // Final join: drain every stream and read back remaining outputs.
        for stream in 0..self.streams.len() {
            if let Some(previous) = in_flight[stream].take() {
                outcomes.push(self.complete_batch(previous, shape)?);
            }
        }

        Ok(outcomes)
    }

    /// Create or grow one stream's resources for the given batch width.
    fn ensure_stream(&mut self, index: usize, width: usize, shape: &ShapeKey) -> Result<()> {
        if self.streams[index].resources.is_none() {
            let queue = self.device.create_queue()?;
            let pad_kernel = self.cache.kernel(&self.program, kernels::PAD_KERNEL)?;
            let post_kernel = self.cache.kernel(&self.program, kernels::POST_KERNEL)?;
            let reduce_kernel = self.cache.kernel(&self.program, kernels::REDUCE_KERNEL)?;
            let plan = self
                .device
                .create_transform_plan(shape.transform_size, width)?;
            self.plan_builds += 1;
            tracing::info!(stream = index, width, "initialized stream resources");
            self.streams[index].resources = Some(StreamResources {
                queue,
                plan,
                width,
                pad_kernel,
                post_kernel,
                reduce_kernel,
                arena: BufferArena::new(Arc::clone(&self.device)),
            });
        }

        let rebuild = {
            let res = resources(&self.streams[index])?;
            res.width < width || res.plan.transform_size() != shape.transform_size
        };
        if rebuild {
            let new_width = width.max(resources(&self.streams[index])?.width);
            let plan = self
                .device
                .create_transform_plan(shape.transform_size, new_width)?;
            self.plan_builds += 1;
            let res = resources_mut(&mut self.streams[index])?;
            res.plan = plan;
            res.width = new_width;
            tracing::debug!(stream = index, width = new_width, "rebuilt transform plan");
        }

        let res = resources_mut(&mut self.streams[index])?;
        let width = res.width;
        res.arena.ensure(
            BufferRole::Work,
            width * shape.transform_size * std::mem::size_of::<Complex32>(),
        )?;
        res.arena.ensure(
            BufferRole::Spectrum,
            width * shape.out_points * std::mem::size_of::<SpectralBin>(),
        )?;
        res.arena.ensure(
            BufferRole::Maxima,
            width * shape.max_peaks * std::mem::size_of::<PeakRecord>(),
        )?;
        Ok(())
    }

    /// Submit all four stages of one batch without blocking.
    fn submit_batch(
        &self,
        input: &Arc<dyn DeviceBuffer>,
        shape: &ShapeKey,
        bin_hz: f32,
        plan: &BatchPlan,
    ) -> Result<InFlight> {
        let res = resources(&self.streams[plan.stream])?;
        let work = arena_buffer(res, BufferRole::Work)?;
        let spectrum = arena_buffer(res, BufferRole::Spectrum)?;
        let maxima = arena_buffer(res, BufferRole::Maxima)?;

        // A batch narrower than the plan width transforms zeroed rows.
        let fill = if plan.beam_count < res.width {
            Some(res.queue.enqueue_fill_zero(&work, &[])?)
        } else {
            None
        };
        let pad_wait: Vec<CompletionEvent> = fill.iter().cloned().collect();

        let pad = res.queue.enqueue_kernel(
            &res.pad_kernel,
            plan.beam_count * shape.transform_size,
            vec![
                KernelArg::Buffer(Arc::clone(input)),
                KernelArg::Buffer(Arc::clone(&work)),
                KernelArg::U32(plan.beam_count as u32),
                KernelArg::U32(shape.count_points as u32),
                KernelArg::U32(shape.transform_size as u32),
                KernelArg::U32(plan.start_beam as u32),
            ],
            &pad_wait,
        )?;

        let transform = res
            .queue
            .enqueue_transform(&res.plan, &work, &[pad.clone()])?;

        let post = res.queue.enqueue_kernel(
            &res.post_kernel,
            plan.beam_count * shape.out_points,
            vec![
                KernelArg::Buffer(Arc::clone(&work)),
                KernelArg::Buffer(Arc::clone(&spectrum)),
                KernelArg::U32(plan.beam_count as u32),
                KernelArg::U32(shape.transform_size as u32),
                KernelArg::U32(shape.out_points as u32),
            ],
            &[transform.clone()],
        )?;

        let reduce = res.queue.enqueue_kernel(
            &res.reduce_kernel,
            plan.beam_count,
            vec![
                KernelArg::Buffer(Arc::clone(&spectrum)),
                KernelArg::Buffer(Arc::clone(&maxima)),
                KernelArg::U32(plan.beam_count as u32),
                KernelArg::U32(shape.out_points as u32),
                KernelArg::U32(shape.max_peaks as u32),
                KernelArg::F32(bin_hz),
            ],
            &[post.clone()],
        )?;

        tracing::debug!(
            batch = plan.batch_index,
            stream = plan.stream,
            start = plan.start_beam,
            beams = plan.beam_count,
            "submitted batch"
        );

        Ok(InFlight {
            plan: *plan,
            fill,
            pad,
            transform,
            post,
            reduce,
        })
    }

    /// Wait for one batch, walk the stream's state machine, and read back
    /// its output.
    fn complete_batch(&mut self, batch: InFlight, shape: &ShapeKey) -> Result<BatchOutcome> {
        let plan = batch.plan;
        let mut stages = StageTimes::default();
        let mut failure: Option<String> = None;
        let mut state = self.streams[plan.stream].state;

        let steps: [(Stage, Vec<CompletionEvent>); 4] = [
            (
                Stage::Pad,
                batch.fill.into_iter().chain([batch.pad]).collect(),
            ),
            (Stage::Transform, vec![batch.transform]),
            (Stage::PostProcess, vec![batch.post]),
            (Stage::Reduce, vec![batch.reduce]),
        ];

        'stages: for (stage, events) in steps {
            state = state.begin(stage)?;
            for event in events {
                match event.wait() {
                    Ok(timing) => stages.record(stage, timing.elapsed_ms()),
                    Err(e) => {
                        failure = Some(format!("{stage} stage: {e}"));
                        break 'stages;
                    }
                }
            }
        }

        let beams = match failure {
            Some(detail) => {
                state = state.fail();
                tracing::warn!(
                    batch = plan.batch_index,
                    stream = plan.stream,
                    detail = %detail,
                    "batch failed"
                );
                Err(detail)
            }
            None => {
                state = state.finish()?;
                let res = resources(&self.streams[plan.stream])?;
                let maxima = arena_buffer(res, BufferRole::Maxima)?;
                let records = read_vec::<PeakRecord>(
                    maxima.as_ref(),
                    0,
                    plan.beam_count * shape.max_peaks,
                )?;
                Ok(decode_beams(&records, plan.beam_count, shape))
            }
        };

        self.streams[plan.stream].state = state.reset()?;

        let timing = BatchTiming {
            batch_index: plan.batch_index,
            start_beam: plan.start_beam,
            beam_count: plan.beam_count,
            stream: plan.stream,
            stages,
            failed: beams.is_err(),
        };
        Ok(BatchOutcome {
            plan,
            timing,
            beams,
        })
    }
}

fn resources(slot: &StreamSlot) -> Result<&StreamResources> {
    slot.resources
        .as_ref()
        .ok_or_else(|| BeamFftError::device("stream resources not initialized"))
}

fn resources_mut(slot: &mut StreamSlot) -> Result<&mut StreamResources> {
    slot.resources
        .as_mut()
        .ok_or_else(|| BeamFftError::device("stream resources not initialized"))
}

fn arena_buffer(res: &StreamResources, role: BufferRole) -> Result<Arc<dyn DeviceBuffer>> {
    res.arena
        .get(role)
        .cloned()
        .ok_or_else(|| BeamFftError::device(format!("arena has no {role:?} buffer")))
}

fn failed_outcome(plan: &BatchPlan, detail: String) -> BatchOutcome {
    BatchOutcome {
        plan: *plan,
        timing: BatchTiming {
            batch_index: plan.batch_index,
            start_beam: plan.start_beam,
            beam_count: plan.beam_count,
            stream: plan.stream,
            stages: StageTimes::default(),
            failed: true,
        },
        beams: Err(detail),
    }
}

/// Decode per-beam peak records into beam results.
fn decode_beams(records: &[PeakRecord], beam_count: usize, shape: &ShapeKey) -> Vec<BeamResult> {
    let per_beam = shape.peaks_per_beam();
    (0..beam_count)
        .map(|beam| {
            let row = &records[beam * shape.max_peaks..][..per_beam];
            let peaks: Vec<PeakResult> = row
                .iter()
                .map(|r| PeakResult {
                    bin_index: r.bin_index as usize,
                    re: r.re,
                    im: r.im,
                    amplitude: r.magnitude,
                    phase_degrees: r.phase_degrees,
                })
                .collect();
            let (freq_offset, refined_frequency_hz) = row
                .first()
                .map(|r| (r.freq_offset, r.refined_frequency))
                .unwrap_or((0.0, 0.0));
            BeamResult {
                peaks,
                freq_offset,
                refined_frequency_hz,
                ok: true,
                error: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::partition;
    use beamfft_core::device::write_slice;
    use beamfft_core::types::BeamParams;
    use beamfft_host::HostDevice;

    fn setup(
        device: Arc<HostDevice>,
        num_streams: usize,
    ) -> (StreamExecutor, Arc<ResourceCache>) {
        let dyn_device: Arc<dyn ComputeDevice> = device;
        let cache = Arc::new(ResourceCache::new(Arc::clone(&dyn_device)));
        let program = cache.compile_or_get(kernels::PROGRAM_SOURCE).unwrap();
        (
            StreamExecutor::new(dyn_device, Arc::clone(&cache), program, num_streams),
            cache,
        )
    }

    fn upload_tones(
        device: &Arc<HostDevice>,
        shape: &ShapeKey,
    ) -> Arc<dyn DeviceBuffer> {
        // Beam b carries a complex exponential at transform bin b + 1.
        let mut samples =
            Vec::with_capacity(shape.beam_count * shape.count_points);
        for beam in 0..shape.beam_count {
            let bin = (beam + 1) as f32;
            for n in 0..shape.count_points {
                let angle =
                    2.0 * std::f32::consts::PI * bin * n as f32 / shape.transform_size as f32;
                samples.push(Complex32::new(angle.cos(), angle.sin()));
            }
        }
        let buffer = device
            .alloc_buffer(shape.input_bytes(), beamfft_core::AccessMode::ReadOnly)
            .unwrap();
        write_slice(buffer.as_ref(), 0, &samples).unwrap();
        buffer
    }

    #[test]
    fn test_reuse_barrier_keeps_batches_on_one_stream_distinct() {
        let device = Arc::new(HostDevice::new());
        let (mut executor, _cache) = setup(Arc::clone(&device), 1);
        let shape = BeamParams::new(8, 100, 64, 3).validate().unwrap();
        let input = upload_tones(&device, &shape);

        // Four batches of two beams, all forced onto stream 0.
        let plans = partition(8, 2, 1);
        let outcomes = executor.execute(&input, &shape, 1.0, &plans).unwrap();
        assert_eq!(outcomes.len(), 4);

        for outcome in &outcomes {
            let beams = outcome.beams.as_ref().unwrap();
            for (local, beam) in beams.iter().enumerate() {
                let global = outcome.plan.start_beam + local;
                let expected = shape.out_points / 2 + global + 1;
                assert_eq!(
                    beam.peaks[0].bin_index, expected,
                    "beam {global} got someone else's spectrum"
                );
            }
        }
    }

    #[test]
    fn test_repeated_execution_reuses_buffers_and_plans() {
        let device = Arc::new(HostDevice::new());
        let (mut executor, cache) = setup(Arc::clone(&device), 2);
        let shape = BeamParams::new(12, 100, 64, 3).validate().unwrap();
        let input = upload_tones(&device, &shape);
        let plans = partition(12, 3, 2);

        executor.execute(&input, &shape, 1.0, &plans).unwrap();
        let first = executor.diagnostics();
        let first_kernels = cache.stats();

        executor.execute(&input, &shape, 1.0, &plans).unwrap();
        let second = executor.diagnostics();

        assert_eq!(first, second, "steady-state call must not allocate");
        assert_eq!(cache.stats().kernel_misses, first_kernels.kernel_misses);
        assert_eq!(second.active_streams, 2);
    }

    #[test]
    fn test_injected_fault_fails_only_one_batch() {
        let device = Arc::new(HostDevice::new());
        let (mut executor, _cache) = setup(Arc::clone(&device), 2);
        let shape = BeamParams::new(8, 100, 64, 3).validate().unwrap();
        let input = upload_tones(&device, &shape);

        device.fail_next_launch(kernels::REDUCE_KERNEL);
        let plans = partition(8, 2, 2);
        let outcomes = executor.execute(&input, &shape, 1.0, &plans).unwrap();

        let failed: Vec<_> = outcomes.iter().filter(|o| o.beams.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].timing.failed);
        assert!(failed[0].beams.as_ref().unwrap_err().contains("injected"));
        assert_eq!(outcomes.iter().filter(|o| o.beams.is_ok()).count(), 3);

        // The stream that failed is reusable: run again cleanly.
        let outcomes = executor.execute(&input, &shape, 1.0, &plans).unwrap();
        assert!(outcomes.iter().all(|o| o.beams.is_ok()));
    }
}
