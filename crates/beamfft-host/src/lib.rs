//! Host reference backend for the beamfft device seam.
//!
//! `HostDevice` implements [`beamfft_core::ComputeDevice`] entirely on the
//! CPU:
//!
//! - each command queue is a worker thread draining a FIFO of submitted work
//!   items, so intra-queue ordering and completion events behave exactly as
//!   an accelerator stream would;
//! - the forward-transform primitive is a cached `rustfft` plan;
//! - device memory is simulated with a configurable capacity so the budget
//!   and batching paths can be exercised without real device limits;
//! - `fail_next_launch` injects a one-shot kernel fault for
//!   partial-failure testing.
//!
//! The backend exists for tests and CPU-only deployments. It is not tuned
//! for throughput; it is tuned for being obviously correct.

mod kernels;
mod runtime;

pub use runtime::{HostDevice, HostDeviceConfig};
