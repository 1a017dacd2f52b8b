//! Reference implementations of the device program entry points.
//!
//! The scheduler hands the backend an opaque program text; the host backend
//! executes these routines for the entry points it recognises. Semantics
//! (windowed spectral shift, top-K selection with lower-index tie-breaking,
//! parabolic refinement of the strongest peak) are the contract the
//! processor's tests pin down.

use beamfft_core::device::KernelArg;
use beamfft_core::error::{BeamFftError, Result};
use beamfft_core::types::{Complex32, PeakRecord, SpectralBin};

use crate::runtime::HostBuffer;

/// Entry points this backend can execute.
const KNOWN_KERNELS: [&str; 3] = ["pad_beams", "shift_spectrum", "select_peaks"];

/// Argument kinds, used for binding validation at enqueue time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArgKind {
    Buffer,
    U32,
    F32,
}

fn signature(name: &str) -> Option<&'static [ArgKind]> {
    use ArgKind::{Buffer, F32, U32};
    match name {
        "pad_beams" => Some(&[Buffer, Buffer, U32, U32, U32, U32]),
        "shift_spectrum" => Some(&[Buffer, Buffer, U32, U32, U32]),
        "select_peaks" => Some(&[Buffer, Buffer, U32, U32, U32, F32]),
        _ => None,
    }
}

/// Whether the backend implements the named entry point.
pub(crate) fn is_known(name: &str) -> bool {
    KNOWN_KERNELS.contains(&name)
}

/// Validate argument count and kinds against the kernel's signature.
pub(crate) fn validate_args(name: &str, args: &[KernelArg]) -> Result<()> {
    let expected = signature(name)
        .ok_or_else(|| BeamFftError::execution(format!("unknown kernel '{name}'")))?;
    if args.len() != expected.len() {
        return Err(BeamFftError::execution(format!(
            "kernel '{name}' expects {} arguments, got {}",
            expected.len(),
            args.len()
        )));
    }
    for (idx, (arg, kind)) in args.iter().zip(expected).enumerate() {
        let actual = match arg {
            KernelArg::Buffer(_) => ArgKind::Buffer,
            KernelArg::U32(_) => ArgKind::U32,
            KernelArg::F32(_) => ArgKind::F32,
        };
        if actual != *kind {
            return Err(BeamFftError::execution(format!(
                "kernel '{name}': argument {idx} must be {kind:?}, got {actual:?}"
            )));
        }
    }
    Ok(())
}

/// Execute the named entry point.
pub(crate) fn dispatch(name: &str, _global_size: usize, args: &[KernelArg]) -> Result<()> {
    match name {
        "pad_beams" => pad_beams(args),
        "shift_spectrum" => shift_spectrum(args),
        "select_peaks" => select_peaks(args),
        other => Err(BeamFftError::execution(format!("unknown kernel '{other}'"))),
    }
}

fn buffer<'a>(args: &'a [KernelArg], idx: usize) -> Result<&'a HostBuffer> {
    match &args[idx] {
        KernelArg::Buffer(b) => b
            .as_any()
            .downcast_ref::<HostBuffer>()
            .ok_or_else(|| BeamFftError::execution("buffer belongs to a different backend")),
        _ => Err(BeamFftError::execution("expected a buffer argument")),
    }
}

fn scalar_u32(args: &[KernelArg], idx: usize) -> usize {
    match args[idx] {
        KernelArg::U32(v) => v as usize,
        _ => 0,
    }
}

fn scalar_f32(args: &[KernelArg], idx: usize) -> f32 {
    match args[idx] {
        KernelArg::F32(v) => v,
        _ => 0.0,
    }
}

/// Copy each beam's samples from the shared input at a beam offset and
/// zero-fill the tail up to the transform length.
fn pad_beams(args: &[KernelArg]) -> Result<()> {
    let input = buffer(args, 0)?;
    let work = buffer(args, 1)?;
    let batch_beams = scalar_u32(args, 2);
    let count_points = scalar_u32(args, 3);
    let nfft = scalar_u32(args, 4);
    let beam_offset = scalar_u32(args, 5);

    let input_words = input.words();
    let mut work_words = work.words_mut();
    let src: &[Complex32] = bytemuck::cast_slice(input_words.as_slice());
    let dst: &mut [Complex32] = bytemuck::cast_slice_mut(work_words.as_mut_slice());

    if (beam_offset + batch_beams) * count_points > src.len() {
        return Err(BeamFftError::execution(
            "pad_beams: batch range exceeds the input buffer",
        ));
    }
    if batch_beams * nfft > dst.len() || count_points > nfft {
        return Err(BeamFftError::execution(
            "pad_beams: working buffer too small for the batch",
        ));
    }

    for beam in 0..batch_beams {
        let src_row = &src[(beam_offset + beam) * count_points..][..count_points];
        let dst_row = &mut dst[beam * nfft..][..nfft];
        dst_row[..count_points].copy_from_slice(src_row);
        dst_row[count_points..].fill(Complex32::ZERO);
    }
    Ok(())
}

/// Write the spectrally shifted window of `out_points` bins per beam,
/// with magnitude and phase computed per bin.
///
/// The window is centred on zero frequency: exposed bin `k < out/2` holds
/// the negative-frequency bin `nfft - out/2 + k`, exposed bin `k >= out/2`
/// holds the non-negative bin `k - out/2`.
fn shift_spectrum(args: &[KernelArg]) -> Result<()> {
    let work = buffer(args, 0)?;
    let spectrum = buffer(args, 1)?;
    let batch_beams = scalar_u32(args, 2);
    let nfft = scalar_u32(args, 3);
    let out_points = scalar_u32(args, 4);

    let work_words = work.words();
    let mut spectrum_words = spectrum.words_mut();
    let src: &[Complex32] = bytemuck::cast_slice(work_words.as_slice());
    let dst: &mut [SpectralBin] = bytemuck::cast_slice_mut(spectrum_words.as_mut_slice());

    if out_points > nfft || batch_beams * nfft > src.len() || batch_beams * out_points > dst.len() {
        return Err(BeamFftError::execution(
            "shift_spectrum: buffer sizes do not match the batch shape",
        ));
    }

    let half = out_points / 2;
    for beam in 0..batch_beams {
        let row = &src[beam * nfft..][..nfft];
        let out = &mut dst[beam * out_points..][..out_points];
        for (k, bin) in out.iter_mut().enumerate() {
            let src_idx = if k < half { nfft - half + k } else { k - half };
            let c = row[src_idx];
            *bin = SpectralBin {
                re: c.re,
                im: c.im,
                magnitude: c.magnitude(),
                phase_degrees: c.phase_degrees(),
            };
        }
    }
    Ok(())
}

/// Select the top `max_peaks` bins per beam by magnitude (ties prefer the
/// lower bin index) and refine the strongest peak by three-point parabolic
/// interpolation.
fn select_peaks(args: &[KernelArg]) -> Result<()> {
    let spectrum = buffer(args, 0)?;
    let maxima = buffer(args, 1)?;
    let batch_beams = scalar_u32(args, 2);
    let out_points = scalar_u32(args, 3);
    let max_peaks = scalar_u32(args, 4);
    let bin_hz = scalar_f32(args, 5);

    let spectrum_words = spectrum.words();
    let mut maxima_words = maxima.words_mut();
    let src: &[SpectralBin] = bytemuck::cast_slice(spectrum_words.as_slice());
    let dst: &mut [PeakRecord] = bytemuck::cast_slice_mut(maxima_words.as_mut_slice());

    if batch_beams * out_points > src.len() || batch_beams * max_peaks > dst.len() {
        return Err(BeamFftError::execution(
            "select_peaks: buffer sizes do not match the batch shape",
        ));
    }

    let half = out_points / 2;
    let selected = max_peaks.min(out_points);

    for beam in 0..batch_beams {
        let row = &src[beam * out_points..][..out_points];
        let peaks = &mut dst[beam * max_peaks..][..max_peaks];

        let mut order: Vec<usize> = (0..out_points).collect();
        order.sort_unstable_by(|&a, &b| {
            row[b]
                .magnitude
                .total_cmp(&row[a].magnitude)
                .then(a.cmp(&b))
        });

        for (rank, record) in peaks.iter_mut().enumerate() {
            if rank >= selected {
                *record = PeakRecord::default();
                continue;
            }
            let idx = order[rank];
            let bin = row[idx];
            let signed_bin = idx as f32 - half as f32;
            let mut peak = PeakRecord {
                bin_index: idx as u32,
                re: bin.re,
                im: bin.im,
                magnitude: bin.magnitude,
                phase_degrees: bin.phase_degrees,
                freq_offset: 0.0,
                refined_frequency: signed_bin * bin_hz,
                reserved: 0,
            };

            // Sub-bin refinement for the strongest peak only, when both
            // neighbours exist inside the window.
            if rank == 0 && idx > 0 && idx + 1 < out_points {
                let y_left = row[idx - 1].magnitude;
                let y_center = bin.magnitude;
                let y_right = row[idx + 1].magnitude;
                let denom = y_left - 2.0 * y_center + y_right;
                if denom.abs() > 1e-12 {
                    let offset = (0.5 * (y_left - y_right) / denom).clamp(-0.5, 0.5);
                    peak.freq_offset = offset;
                    peak.refined_frequency = (signed_bin + offset) * bin_hz;
                }
            }
            *record = peak;
        }
    }
    Ok(())
}
