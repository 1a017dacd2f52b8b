//! Adaptive batched, multi-stream spectral peak extraction.
//!
//! For each of many independent beams of complex samples, beamfft runs a
//! zero-padded forward transform and extracts the K strongest spectral peaks
//! with sub-bin-refined frequency and phase. The interesting part is not the
//! transform (an opaque device primitive) but the scheduler around it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       SpectrumProcessor                          │
//! │                                                                  │
//! │  budget ──► planner ──► executor ────────────► assembler         │
//! │  (fits in     (single      │                    (beam order)     │
//! │   memory?)     pass or     ▼                                     │
//! │                batched)  stream 0: pad ► fft ► post ► reduce     │
//! │                          stream 1: pad ► fft ► post ► reduce     │
//! │                          stream 2: pad ► fft ► post ► reduce     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`budget`] estimates the device memory a single pass would need and
//!   checks it against a safety threshold of available memory.
//! - [`planner`] picks single-pass or batched execution and partitions the
//!   beams into contiguous chunks assigned round-robin to streams.
//! - [`executor`] submits each batch's four pipeline stages non-blocking
//!   with event chaining, blocks only at the per-stream reuse barrier and
//!   the final join, and isolates per-batch failures.
//! - [`assembler`] writes every batch's output at its beam offset, so the
//!   result is always in beam order regardless of completion order.
//! - [`profiler`] aggregates device-reported per-stage timings.
//!
//! Device access goes through the trait seam in [`beamfft_core`]; the
//! `beamfft-host` crate provides a CPU reference backend used by the tests
//! and examples.

pub mod assembler;
pub mod budget;
pub mod config;
pub mod executor;
pub mod kernels;
pub mod planner;
pub mod processor;
pub mod profiler;
pub mod stream;

pub use assembler::AggregateResult;
pub use config::BatchConfig;
pub use executor::{BatchOutcome, ExecutorDiagnostics, StreamExecutor};
pub use planner::{BatchPlan, Strategy};
pub use processor::SpectrumProcessor;
pub use profiler::{BatchTiming, CallProfile, Profiler, ProfilerStats, StageTimes};
pub use stream::{PipelineState, Stage};

pub use beamfft_core::{
    AccessMode, BeamFftError, BeamParams, BeamResult, CacheStats, Complex32, ComputeDevice,
    DeviceBuffer, PeakResult, Result, ShapeKey,
};
