//! Sample, parameter, and result types.
//!
//! The POD types in this module ([`Complex32`], [`SpectralBin`],
//! [`PeakRecord`]) are wire formats: they are written by device kernels and
//! read back by the host, so their layout is fixed (`#[repr(C)]`, 32-bit
//! fields, no padding) and they implement `bytemuck::Pod` for buffer views.

use bytemuck::{Pod, Zeroable};

use crate::error::{BeamFftError, Result};

/// An interleaved complex sample (single precision).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Complex32 {
    /// Real part.
    pub re: f32,
    /// Imaginary part.
    pub im: f32,
}

impl Complex32 {
    /// The additive zero.
    pub const ZERO: Self = Self { re: 0.0, im: 0.0 };

    /// Create a sample from real and imaginary parts.
    #[must_use]
    pub const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    /// Magnitude of the sample.
    #[must_use]
    pub fn magnitude(self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }

    /// Phase of the sample in degrees.
    #[must_use]
    pub fn phase_degrees(self) -> f32 {
        self.im.atan2(self.re).to_degrees()
    }
}

/// One post-processed output bin: complex value plus derived magnitude and
/// phase, in the spectrally shifted window. 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpectralBin {
    /// Real part of the bin.
    pub re: f32,
    /// Imaginary part of the bin.
    pub im: f32,
    /// Magnitude, the quantity ranked by the reduction.
    pub magnitude: f32,
    /// Phase in degrees.
    pub phase_degrees: f32,
}

/// One selected peak as written by the reduction kernel. 32 bytes.
///
/// `freq_offset` and `refined_frequency` are populated for the strongest
/// peak of each beam only; the remaining peaks carry the unrefined bin
/// frequency.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PeakRecord {
    /// Bin index in the exposed (shifted) window.
    pub bin_index: u32,
    /// Real part of the peak bin.
    pub re: f32,
    /// Imaginary part of the peak bin.
    pub im: f32,
    /// Magnitude of the peak bin.
    pub magnitude: f32,
    /// Phase in degrees.
    pub phase_degrees: f32,
    /// Sub-bin offset from parabolic interpolation, in [-0.5, 0.5].
    pub freq_offset: f32,
    /// Refined physical frequency in Hz.
    pub refined_frequency: f32,
    /// Alignment padding; always zero.
    pub reserved: u32,
}

/// Default sampling rate used for bin spacing, in Hz.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 12.0e6;

/// Caller-facing parameters for one processor instance.
#[derive(Clone, Debug)]
pub struct BeamParams {
    /// Number of independent beams in the input buffer.
    pub beam_count: usize,
    /// Samples per beam in the input buffer.
    pub count_points: usize,
    /// Width of the exposed spectral window, in bins.
    pub out_points: usize,
    /// Number of peaks to extract per beam; must be in [3, 5].
    pub max_peaks: usize,
    /// Sampling rate in Hz; determines bin spacing.
    pub sample_rate_hz: f64,
    /// Caller-assigned task identifier, carried through to the result.
    pub task_id: String,
    /// Caller-assigned module name, carried through to the result.
    pub module_name: String,
}

impl BeamParams {
    /// Create parameters with the default sample rate and empty task tags.
    #[must_use]
    pub fn new(beam_count: usize, count_points: usize, out_points: usize, max_peaks: usize) -> Self {
        Self {
            beam_count,
            count_points,
            out_points,
            max_peaks,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            task_id: String::new(),
            module_name: String::new(),
        }
    }

    /// Set the sampling rate.
    #[must_use]
    pub fn with_sample_rate(mut self, hz: f64) -> Self {
        self.sample_rate_hz = hz;
        self
    }

    /// Set the task identifier.
    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Set the module name.
    #[must_use]
    pub fn with_module_name(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = module_name.into();
        self
    }

    /// Validate the parameters and derive the shape key.
    ///
    /// Fails with a configuration error before any device work is issued.
    pub fn validate(&self) -> Result<ShapeKey> {
        if self.beam_count == 0 {
            return Err(BeamFftError::config("beam_count must be greater than zero"));
        }
        if self.count_points == 0 {
            return Err(BeamFftError::config("count_points must be greater than zero"));
        }
        if self.out_points == 0 {
            return Err(BeamFftError::config("out_points must be greater than zero"));
        }
        if !(3..=5).contains(&self.max_peaks) {
            return Err(BeamFftError::config(format!(
                "max_peaks must be in [3, 5], got {}",
                self.max_peaks
            )));
        }
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(BeamFftError::config(format!(
                "sample_rate_hz must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        let transform_size = transform_size(self.count_points);
        if self.out_points > transform_size {
            return Err(BeamFftError::config(format!(
                "out_points ({}) exceeds transform size ({})",
                self.out_points, transform_size
            )));
        }
        Ok(ShapeKey {
            beam_count: self.beam_count,
            count_points: self.count_points,
            transform_size,
            out_points: self.out_points,
            max_peaks: self.max_peaks,
        })
    }

    /// Expected input buffer length in samples.
    #[must_use]
    pub fn input_samples(&self) -> usize {
        self.beam_count * self.count_points
    }
}

/// Transform length for a given per-beam sample count: the smallest power of
/// two not below `count_points`, doubled for zero-padding margin.
#[must_use]
pub fn transform_size(count_points: usize) -> usize {
    count_points.next_power_of_two() * 2
}

/// Identifies one processing configuration.
///
/// Every shape-dependent cache (transform plans, stream working buffers) is
/// keyed by this value; changing it via a parameter update invalidates those
/// caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    /// Number of beams.
    pub beam_count: usize,
    /// Samples per beam.
    pub count_points: usize,
    /// Zero-padded transform length.
    pub transform_size: usize,
    /// Exposed spectral window width in bins.
    pub out_points: usize,
    /// Peaks extracted per beam.
    pub max_peaks: usize,
}

impl ShapeKey {
    /// Bin spacing in Hz for a given sampling rate.
    #[must_use]
    pub fn bin_spacing_hz(&self, sample_rate_hz: f64) -> f64 {
        sample_rate_hz / self.transform_size as f64
    }

    /// Input buffer size in bytes.
    #[must_use]
    pub fn input_bytes(&self) -> usize {
        self.beam_count * self.count_points * std::mem::size_of::<Complex32>()
    }

    /// Peaks actually produced per beam: `min(max_peaks, out_points)`.
    #[must_use]
    pub fn peaks_per_beam(&self) -> usize {
        self.max_peaks.min(self.out_points)
    }
}

/// One extracted spectral peak.
#[derive(Clone, Debug, PartialEq)]
pub struct PeakResult {
    /// Bin index in the exposed (shifted) window.
    pub bin_index: usize,
    /// Real part of the peak bin.
    pub re: f32,
    /// Imaginary part of the peak bin.
    pub im: f32,
    /// Magnitude of the peak bin.
    pub amplitude: f32,
    /// Phase in degrees.
    pub phase_degrees: f32,
}

/// Per-beam result: up to `max_peaks` peaks in descending amplitude order,
/// plus the refined frequency of the strongest peak.
#[derive(Clone, Debug)]
pub struct BeamResult {
    /// Extracted peaks, strongest first.
    pub peaks: Vec<PeakResult>,
    /// Sub-bin offset of the strongest peak, in [-0.5, 0.5].
    pub freq_offset: f32,
    /// Refined physical frequency of the strongest peak in Hz.
    pub refined_frequency_hz: f32,
    /// Whether this beam was processed successfully.
    pub ok: bool,
    /// Failure detail when `ok` is false.
    pub error: Option<String>,
}

impl BeamResult {
    /// A failed placeholder carrying an error detail.
    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            peaks: Vec::new(),
            freq_offset: 0.0,
            refined_frequency_hz: 0.0,
            ok: false,
            error: Some(detail.into()),
        }
    }

    /// The strongest peak, if the beam succeeded.
    #[must_use]
    pub fn top_peak(&self) -> Option<&PeakResult> {
        self.peaks.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_size_rounds_up_then_doubles() {
        assert_eq!(transform_size(1000), 2048);
        assert_eq!(transform_size(1), 2);
        assert_eq!(transform_size(3), 8);
        assert_eq!(transform_size(1024), 2048);
        assert_eq!(transform_size(1025), 4096);
    }

    #[test]
    fn test_record_layouts_are_fixed() {
        assert_eq!(std::mem::size_of::<Complex32>(), 8);
        assert_eq!(std::mem::size_of::<SpectralBin>(), 16);
        assert_eq!(std::mem::size_of::<PeakRecord>(), 32);
    }

    #[test]
    fn test_params_validation_rejects_bad_shapes() {
        assert!(BeamParams::new(0, 1000, 512, 3).validate().is_err());
        assert!(BeamParams::new(4, 0, 512, 3).validate().is_err());
        assert!(BeamParams::new(4, 1000, 0, 3).validate().is_err());
        assert!(BeamParams::new(4, 1000, 512, 2).validate().is_err());
        assert!(BeamParams::new(4, 1000, 512, 6).validate().is_err());
        // Window wider than the transform output.
        assert!(BeamParams::new(4, 1000, 4096, 3).validate().is_err());
        assert!(BeamParams::new(4, 1000, 512, 3)
            .with_sample_rate(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_params_validation_derives_shape() {
        let shape = BeamParams::new(16, 1000, 512, 3).validate().unwrap();
        assert_eq!(shape.transform_size, 2048);
        assert_eq!(shape.input_bytes(), 16 * 1000 * 8);
        assert_eq!(shape.peaks_per_beam(), 3);
        let spacing = shape.bin_spacing_hz(12.0e6);
        assert!((spacing - 5859.375).abs() < 1e-9);
    }

    #[test]
    fn test_complex_magnitude_and_phase() {
        let c = Complex32::new(0.0, 2.0);
        assert!((c.magnitude() - 2.0).abs() < 1e-6);
        assert!((c.phase_degrees() - 90.0).abs() < 1e-4);
    }
}
