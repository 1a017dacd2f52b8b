//! Device memory budget estimation.
//!
//! The estimate deliberately over-counts: it prices the full working set of
//! a single pass (input copy, padded transform buffer plus transform
//! scratch, the post-processed window, and the reduction output) so the
//! scheduler only commits to one pass when there is comfortable headroom for
//! driver overhead and co-resident workloads.

use beamfft_core::types::{Complex32, PeakRecord, ShapeKey, SpectralBin};

/// Bytes a single pass over the full shape would require.
#[must_use]
pub fn estimate_bytes(shape: &ShapeKey) -> u64 {
    let complex = std::mem::size_of::<Complex32>() as u64;
    let beams = shape.beam_count as u64;

    let input = beams * shape.count_points as u64 * complex;
    // Padded transform buffer, doubled to cover the primitive's scratch.
    let work = beams * shape.transform_size as u64 * complex * 2;
    let window = beams * shape.out_points as u64 * std::mem::size_of::<SpectralBin>() as u64;
    let reduce = beams * shape.max_peaks as u64 * std::mem::size_of::<PeakRecord>() as u64;

    input + work + window + reduce
}

/// Whether `required` bytes fit within `threshold` of `available` bytes.
#[must_use]
pub fn fits_budget(required: u64, available: u64, threshold: f64) -> bool {
    required as f64 <= threshold * available as f64
}
