//! Core types and device abstraction for the beamfft workspace.
//!
//! This crate defines everything the spectral-peak processor and a device
//! backend need to agree on:
//!
//! - [`error`] — the error taxonomy shared across the workspace. Fatal
//!   configuration/resource failures and isolatable per-batch execution
//!   failures are distinct variants so callers can tell them apart.
//! - [`types`] — sample and result types, validated beam parameters, and the
//!   [`types::ShapeKey`] that keys every shape-dependent cache.
//! - [`device`] — the trait seam to the device: program compilation, buffer
//!   allocation, ordered command queues with completion events, and the
//!   opaque forward-transform plan.
//! - [`cache`] — the content-hash keyed program/kernel resource cache.
//!
//! Backends implement the [`device`] traits; the processor crate consumes
//! them. Nothing in this crate touches a concrete device API.

pub mod cache;
pub mod device;
pub mod error;
pub mod types;

pub use cache::{CacheStats, ResourceCache};
pub use device::{
    AccessMode, CommandQueue, CompletionEvent, ComputeDevice, DeviceBuffer, DeviceKernel,
    DeviceProgram, EventSignal, KernelArg, StageTiming, TransformPlan,
};
pub use error::{BeamFftError, Result};
pub use types::{
    transform_size, BeamParams, BeamResult, Complex32, PeakRecord, PeakResult, ShapeKey,
    SpectralBin,
};
