//! The public processor API.

use std::sync::Arc;
use std::time::Instant;

use beamfft_core::cache::{CacheStats, ResourceCache};
use beamfft_core::device::{write_slice, AccessMode, ComputeDevice, DeviceBuffer};
use beamfft_core::error::{BeamFftError, Result};
use beamfft_core::types::{BeamParams, Complex32, ShapeKey};

use crate::assembler::{assemble, AggregateResult};
use crate::config::BatchConfig;
use crate::executor::{ExecutorDiagnostics, StreamExecutor};
use crate::kernels;
use crate::planner::{self, Strategy};
use crate::profiler::{CallProfile, Profiler, ProfilerStats};
use crate::{budget, planner::partition};

/// Spectral peak processor over many independent beams.
///
/// Construction validates the parameters, compiles the device program
/// through the resource cache, and sizes the stream pool (requested count
/// capped at the device's reported queue limit). Each [`process`] call
/// estimates the memory footprint, picks single-pass or batched execution,
/// drives the stream pipelines, and reassembles the per-beam results in
/// beam order.
///
/// [`process`]: SpectrumProcessor::process
///
/// # Example
///
/// ```ignore
/// let device: Arc<dyn ComputeDevice> = Arc::new(beamfft_host::HostDevice::new());
/// let params = BeamParams::new(64, 1000, 512, 3).with_task_id("survey-7");
/// let mut processor = SpectrumProcessor::new(device, params)?;
/// let result = processor.process_samples(&samples)?;
/// for (i, beam) in result.beams.iter().enumerate() {
///     if beam.ok {
///         println!("beam {i}: {:.1} Hz", beam.refined_frequency_hz);
///     }
/// }
/// ```
pub struct SpectrumProcessor {
    device: Arc<dyn ComputeDevice>,
    params: BeamParams,
    shape: ShapeKey,
    config: BatchConfig,
    cache: Arc<ResourceCache>,
    executor: StreamExecutor,
    profiler: Profiler,
}

impl SpectrumProcessor {
    /// Create a processor with the default batch configuration.
    pub fn new(device: Arc<dyn ComputeDevice>, params: BeamParams) -> Result<Self> {
        Self::with_config(device, params, BatchConfig::default())
    }

    /// Create a processor with an explicit batch configuration.
    pub fn with_config(
        device: Arc<dyn ComputeDevice>,
        params: BeamParams,
        config: BatchConfig,
    ) -> Result<Self> {
        // Parameter validation happens before any device work.
        let shape = params.validate()?;

        let cache = Arc::new(ResourceCache::new(Arc::clone(&device)));
        let program = cache.compile_or_get(kernels::PROGRAM_SOURCE)?;

        let device_limit = device.max_concurrent_queues().max(1);
        let num_streams = config.num_streams.clamp(1, device_limit);
        if num_streams < config.num_streams {
            tracing::warn!(
                requested = config.num_streams,
                device_limit,
                "stream count capped at the device queue limit"
            );
        }

        let executor = StreamExecutor::new(
            Arc::clone(&device),
            Arc::clone(&cache),
            program,
            num_streams,
        );

        tracing::info!(
            device = device.name(),
            beam_count = shape.beam_count,
            count_points = shape.count_points,
            transform_size = shape.transform_size,
            out_points = shape.out_points,
            max_peaks = shape.max_peaks,
            num_streams,
            "created spectrum processor"
        );

        Ok(Self {
            device,
            params,
            shape,
            config,
            cache,
            executor,
            profiler: Profiler::default(),
        })
    }

    /// Process a device-resident input buffer of
    /// `beam_count x count_points` complex samples (row-major, one beam
    /// contiguous).
    ///
    /// Configuration and resource failures abort the call; per-batch
    /// execution failures are captured in the affected beams' `ok`/`error`
    /// fields, so callers must inspect them even when this returns `Ok`.
    pub fn process(&mut self, input: &Arc<dyn DeviceBuffer>) -> Result<AggregateResult> {
        if input.len_bytes() < self.shape.input_bytes() {
            return Err(BeamFftError::config(format!(
                "input buffer holds {} bytes, shape requires {}",
                input.len_bytes(),
                self.shape.input_bytes()
            )));
        }

        let wall = Instant::now();
        let required = budget::estimate_bytes(&self.shape);
        let available = self.device.available_memory();
        let strategy = planner::choose_strategy(&self.shape, available, &self.config);

        let plans = match strategy {
            Strategy::SinglePass => partition(self.shape.beam_count, self.shape.beam_count, 1),
            Strategy::Batched => {
                let batch_size =
                    planner::compute_batch_size(self.shape.beam_count, self.config.batch_ratio);
                partition(
                    self.shape.beam_count,
                    batch_size,
                    self.executor.num_streams(),
                )
            }
        };

        tracing::info!(
            %strategy,
            required,
            available,
            batches = plans.len(),
            streams = self.executor.num_streams(),
            "processing call"
        );

        let bin_hz = self.shape.bin_spacing_hz(self.params.sample_rate_hz) as f32;
        let outcomes = self
            .executor
            .execute(input, &self.shape, bin_hz, &plans)?;

        let timings = outcomes.iter().map(|o| o.timing.clone()).collect();
        let profile = CallProfile::new(
            strategy,
            self.shape.beam_count,
            timings,
            wall.elapsed().as_secs_f64() * 1000.0,
        );
        self.profiler.record(profile.clone());

        Ok(assemble(&self.params, self.shape, outcomes, profile))
    }

    /// Upload host samples into a fresh device buffer and process them.
    ///
    /// Expects exactly `beam_count x count_points` samples.
    pub fn process_samples(&mut self, samples: &[Complex32]) -> Result<AggregateResult> {
        if samples.len() != self.params.input_samples() {
            return Err(BeamFftError::config(format!(
                "expected {} samples, got {}",
                self.params.input_samples(),
                samples.len()
            )));
        }
        let buffer = self
            .device
            .alloc_buffer(self.shape.input_bytes(), AccessMode::ReadOnly)?;
        write_slice(buffer.as_ref(), 0, samples)?;
        self.process(&buffer)
    }

    /// Replace the parameters. A shape change releases stream resources and
    /// cached plans so the next call rebuilds them; the compiled program
    /// cache is shape-independent and survives.
    pub fn update_params(&mut self, params: BeamParams) -> Result<()> {
        let shape = params.validate()?;
        if shape != self.shape {
            tracing::info!(?shape, "shape changed, releasing stream resources");
            self.executor.reset();
        }
        self.params = params;
        self.shape = shape;
        Ok(())
    }

    /// Current parameters.
    #[must_use]
    pub fn params(&self) -> &BeamParams {
        &self.params
    }

    /// The derived shape key.
    #[must_use]
    pub fn shape(&self) -> ShapeKey {
        self.shape
    }

    /// Streams in the executor pool.
    #[must_use]
    pub fn num_streams(&self) -> usize {
        self.executor.num_streams()
    }

    /// Program/kernel cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Buffer/plan counters from the executor.
    #[must_use]
    pub fn diagnostics(&self) -> ExecutorDiagnostics {
        self.executor.diagnostics()
    }

    /// Profile of the most recent call.
    #[must_use]
    pub fn last_profile(&self) -> Option<&CallProfile> {
        self.profiler.last_call()
    }

    /// Cumulative profiling statistics.
    #[must_use]
    pub fn profiler_stats(&self) -> ProfilerStats {
        self.profiler.stats()
    }
}
