//! Per-stream resources and the pipeline state machine.

use std::collections::HashMap;
use std::sync::Arc;

use beamfft_core::device::{
    AccessMode, CommandQueue, ComputeDevice, DeviceBuffer, DeviceKernel, TransformPlan,
};
use beamfft_core::error::{BeamFftError, Result};

/// The four pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Zero-padded copy of the batch's beams into the working buffer.
    Pad,
    /// In-place forward transform.
    Transform,
    /// Shifted window with magnitude and phase per bin.
    PostProcess,
    /// Top-K selection and sub-bin refinement.
    Reduce,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pad => write!(f, "pad"),
            Self::Transform => write!(f, "transform"),
            Self::PostProcess => write!(f, "post-process"),
            Self::Reduce => write!(f, "reduce"),
        }
    }
}

/// Lifecycle of one batch on one stream.
///
/// `Failed` is terminal for the batch; the stream itself returns to `Idle`
/// for the next batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineState {
    /// No batch in flight.
    #[default]
    Idle,
    /// Padding the batch into the working buffer.
    Padding,
    /// Running the forward transform.
    Transforming,
    /// Computing the shifted spectral window.
    PostProcessing,
    /// Selecting and refining peaks.
    Reducing,
    /// Batch completed successfully.
    Done,
    /// Batch failed; its beams are marked failed in the result.
    Failed,
}

impl PipelineState {
    /// Enter the given stage. Legal only in execution order.
    pub fn begin(self, stage: Stage) -> Result<Self> {
        let next = match (self, stage) {
            (Self::Idle, Stage::Pad) => Self::Padding,
            (Self::Padding, Stage::Transform) => Self::Transforming,
            (Self::Transforming, Stage::PostProcess) => Self::PostProcessing,
            (Self::PostProcessing, Stage::Reduce) => Self::Reducing,
            (state, stage) => {
                return Err(BeamFftError::device(format!(
                    "illegal pipeline transition {state:?} -> {stage}"
                )))
            }
        };
        Ok(next)
    }

    /// Finish the batch after the reduce stage.
    pub fn finish(self) -> Result<Self> {
        match self {
            Self::Reducing => Ok(Self::Done),
            state => Err(BeamFftError::device(format!(
                "illegal pipeline transition {state:?} -> Done"
            ))),
        }
    }

    /// Mark the in-flight batch failed. Legal from any active state.
    #[must_use]
    pub fn fail(self) -> Self {
        Self::Failed
    }

    /// Return to idle so the stream can take the next batch.
    pub fn reset(self) -> Result<Self> {
        match self {
            Self::Done | Self::Failed | Self::Idle => Ok(Self::Idle),
            state => Err(BeamFftError::device(format!(
                "illegal pipeline transition {state:?} -> Idle"
            ))),
        }
    }
}

/// Role of a buffer in a stream's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Padded transform input/output, `width x transform_size` complex.
    Work,
    /// Shifted spectral window, `width x out_points` bins.
    Spectrum,
    /// Selected peaks, `width x max_peaks` records.
    Maxima,
}

/// Role-indexed ownership table of one stream's device buffers.
///
/// Buffers grow but never shrink: a request that fits the current
/// allocation reuses it, so repeated calls with an unchanged shape perform
/// no allocations.
pub struct BufferArena {
    device: Arc<dyn ComputeDevice>,
    slots: HashMap<BufferRole, Arc<dyn DeviceBuffer>>,
    allocations: u64,
}

impl BufferArena {
    /// Create an empty arena on a device.
    #[must_use]
    pub fn new(device: Arc<dyn ComputeDevice>) -> Self {
        Self {
            device,
            slots: HashMap::new(),
            allocations: 0,
        }
    }

    /// Get the buffer for a role, allocating or growing it as needed.
    pub fn ensure(&mut self, role: BufferRole, len_bytes: usize) -> Result<Arc<dyn DeviceBuffer>> {
        if let Some(existing) = self.slots.get(&role) {
            if existing.len_bytes() >= len_bytes {
                return Ok(Arc::clone(existing));
            }
            tracing::debug!(
                ?role,
                have = existing.len_bytes(),
                need = len_bytes,
                "growing arena buffer"
            );
        }
        let buffer = self.device.alloc_buffer(len_bytes, AccessMode::ReadWrite)?;
        self.allocations += 1;
        self.slots.insert(role, Arc::clone(&buffer));
        Ok(buffer)
    }

    /// The buffer currently held for a role, if any.
    #[must_use]
    pub fn get(&self, role: BufferRole) -> Option<&Arc<dyn DeviceBuffer>> {
        self.slots.get(&role)
    }

    /// Number of device allocations performed by this arena.
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

/// Everything one stream needs to run batches: a dedicated queue, the
/// transform plan for its width, kernel handles, and its buffer arena.
pub struct StreamResources {
    /// Dedicated command queue.
    pub queue: Arc<dyn CommandQueue>,
    /// Transform plan built for `width` rows.
    pub plan: Arc<dyn TransformPlan>,
    /// Batch width the plan and buffers are sized for.
    pub width: usize,
    /// Pad kernel handle.
    pub pad_kernel: Arc<dyn DeviceKernel>,
    /// Post-process kernel handle.
    pub post_kernel: Arc<dyn DeviceKernel>,
    /// Reduction kernel handle.
    pub reduce_kernel: Arc<dyn DeviceKernel>,
    /// Role-indexed working buffers.
    pub arena: BufferArena,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_happy_path() {
        let mut state = PipelineState::Idle;
        for stage in [Stage::Pad, Stage::Transform, Stage::PostProcess, Stage::Reduce] {
            state = state.begin(stage).unwrap();
        }
        assert_eq!(state, PipelineState::Reducing);
        let state = state.finish().unwrap();
        assert_eq!(state, PipelineState::Done);
        assert_eq!(state.reset().unwrap(), PipelineState::Idle);
    }

    #[test]
    fn test_fsm_rejects_out_of_order_stages() {
        assert!(PipelineState::Idle.begin(Stage::Transform).is_err());
        assert!(PipelineState::Padding.begin(Stage::Reduce).is_err());
        assert!(PipelineState::Done.begin(Stage::Pad).is_err());
        assert!(PipelineState::Padding.finish().is_err());
        assert!(PipelineState::Transforming.reset().is_err());
    }

    #[test]
    fn test_fsm_failure_is_terminal_for_the_batch() {
        let state = PipelineState::Transforming.fail();
        assert_eq!(state, PipelineState::Failed);
        // The stream itself recovers for the next batch.
        assert_eq!(state.reset().unwrap(), PipelineState::Idle);
        assert!(state.begin(Stage::PostProcess).is_err());
    }
}
