//! End-to-end pipeline tests against the host reference backend.

use std::sync::Arc;

use beamfft::{BeamParams, Complex32, ComputeDevice, SpectrumProcessor, Strategy};
use beamfft_host::HostDevice;

/// Synthesize one complex exponential per beam at `tone(beam)` =
/// (transform bin, amplitude, phase in radians).
fn tone_samples(
    beam_count: usize,
    count_points: usize,
    transform_size: usize,
    tone: impl Fn(usize) -> (f32, f32, f32),
) -> Vec<Complex32> {
    let mut samples = Vec::with_capacity(beam_count * count_points);
    for beam in 0..beam_count {
        let (bin, amplitude, phase) = tone(beam);
        for n in 0..count_points {
            let angle =
                2.0 * std::f32::consts::PI * bin * n as f32 / transform_size as f32 + phase;
            samples.push(Complex32::new(
                amplitude * angle.cos(),
                amplitude * angle.sin(),
            ));
        }
    }
    samples
}

/// A device small enough that a 64-beam call must batch, but roomy enough
/// for the per-stream working sets.
fn constrained_device() -> Arc<HostDevice> {
    Arc::new(HostDevice::with_memory(6 * 1024 * 1024))
}

#[test]
fn test_single_pass_extracts_known_tones() {
    let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
    let params = BeamParams::new(5, 1000, 512, 3).with_task_id("tones");
    let mut processor = SpectrumProcessor::new(device, params).unwrap();

    let shape = processor.shape();
    assert_eq!(shape.transform_size, 2048);
    let half = shape.out_points / 2;
    let bin_hz = shape.bin_spacing_hz(12.0e6) as f32;

    let phase_deg = 30.0f32;
    let samples = tone_samples(5, 1000, 2048, |beam| {
        ((beam + 3) as f32, 1.0, phase_deg.to_radians())
    });
    let result = processor.process_samples(&samples).unwrap();

    assert_eq!(result.beams.len(), 5);
    assert_eq!(result.task_id, "tones");
    assert_eq!(
        processor.last_profile().unwrap().strategy,
        Strategy::SinglePass
    );

    for (beam_index, beam) in result.beams.iter().enumerate() {
        assert!(beam.ok, "beam {beam_index} failed: {:?}", beam.error);
        assert_eq!(beam.peaks.len(), 3);

        let top = &beam.peaks[0];
        let tone_bin = beam_index + 3;
        assert_eq!(top.bin_index, half + tone_bin);

        // 1000 unit samples at an exact bin sum coherently.
        let rel_err = (top.amplitude - 1000.0).abs() / 1000.0;
        assert!(rel_err < 1e-3, "beam {beam_index} amplitude {}", top.amplitude);
        assert!((top.phase_degrees - phase_deg).abs() < 0.5);

        // Integer-bin tone: leakage is symmetric, so the refinement stays
        // on the bin.
        let expected_hz = tone_bin as f32 * bin_hz;
        assert!((beam.refined_frequency_hz - expected_hz).abs() < 0.05 * bin_hz);

        // Strictly sorted by descending amplitude.
        for pair in beam.peaks.windows(2) {
            assert!(pair[0].amplitude >= pair[1].amplitude);
        }
    }
}

#[test]
fn test_batched_and_single_pass_agree() {
    let beam_count = 64;
    let params = BeamParams::new(beam_count, 1000, 512, 3);
    let tone = |beam: usize| {
        (
            (5 + (beam * 3) % 200) as f32,
            1.0 + beam as f32 * 0.01,
            (beam as f32 * 0.1).sin(),
        )
    };
    let samples = tone_samples(beam_count, 1000, 2048, tone);

    // Roomy device: one pass.
    let roomy: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
    let mut single = SpectrumProcessor::new(roomy, params.clone()).unwrap();
    let single_result = single.process_samples(&samples).unwrap();
    assert_eq!(
        single.last_profile().unwrap().strategy,
        Strategy::SinglePass
    );

    // Constrained device: the same workload must batch.
    let tight: Arc<dyn ComputeDevice> = constrained_device();
    let mut batched = SpectrumProcessor::new(tight, params).unwrap();
    let batched_result = batched.process_samples(&samples).unwrap();
    let profile = batched.last_profile().unwrap();
    assert_eq!(profile.strategy, Strategy::Batched);
    assert!(profile.batches.len() > 1);

    // Identical per-beam peaks within floating tolerance.
    for beam in 0..beam_count {
        let a = &single_result.beams[beam];
        let b = &batched_result.beams[beam];
        assert!(a.ok && b.ok, "beam {beam}");
        assert_eq!(a.peaks.len(), b.peaks.len());
        assert_eq!(a.peaks[0].bin_index, b.peaks[0].bin_index, "beam {beam}");

        for (pa, pb) in a.peaks.iter().zip(&b.peaks) {
            let rel = (pa.amplitude - pb.amplitude).abs() / pa.amplitude.max(1e-6);
            assert!(rel < 1e-3, "beam {beam}: {} vs {}", pa.amplitude, pb.amplitude);
        }
        assert!((a.refined_frequency_hz - b.refined_frequency_hz).abs() < 1.0);
    }
}

#[test]
fn test_batched_results_stay_in_beam_order() {
    let beam_count = 64;
    let device: Arc<dyn ComputeDevice> = constrained_device();
    let mut processor =
        SpectrumProcessor::new(device, BeamParams::new(beam_count, 1000, 512, 3)).unwrap();
    let half = processor.shape().out_points / 2;

    // Beam b's tone lands on transform bin b + 7, so every beam's expected
    // top peak identifies it uniquely.
    let samples = tone_samples(beam_count, 1000, 2048, |beam| ((beam + 7) as f32, 1.0, 0.0));
    let result = processor.process_samples(&samples).unwrap();

    assert_eq!(processor.last_profile().unwrap().strategy, Strategy::Batched);
    assert_eq!(result.beams.len(), beam_count);
    for (beam_index, beam) in result.beams.iter().enumerate() {
        assert!(beam.ok);
        assert_eq!(
            beam.peaks[0].bin_index,
            half + beam_index + 7,
            "beam {beam_index} out of order"
        );
    }
}

#[test]
fn test_injected_fault_fails_exactly_one_batch() {
    let beam_count = 64;
    let device = constrained_device();
    let dyn_device: Arc<dyn ComputeDevice> = device.clone();
    let mut processor =
        SpectrumProcessor::new(dyn_device, BeamParams::new(beam_count, 1000, 512, 3)).unwrap();

    let samples = tone_samples(beam_count, 1000, 2048, |beam| ((beam + 7) as f32, 1.0, 0.0));

    device.fail_next_launch(beamfft::kernels::REDUCE_KERNEL);
    let result = processor.process_samples(&samples).unwrap();

    let failed = result.failed_beams();
    assert!(!failed.is_empty(), "fault was never consumed");
    // The failed beams are exactly one contiguous batch.
    let batch_size = failed.len();
    assert!(batch_size == 12 || batch_size == 4, "failed {failed:?}");
    for pair in failed.windows(2) {
        assert_eq!(pair[0] + 1, pair[1], "failure leaked across batches");
    }
    assert_eq!(failed[0] % 12, 0);
    assert!(result.beams[failed[0]]
        .error
        .as_deref()
        .unwrap()
        .contains("injected"));

    // Every other beam processed normally.
    assert_eq!(result.ok_count(), beam_count - batch_size);
    for (beam_index, beam) in result.beams.iter().enumerate() {
        if !failed.contains(&beam_index) {
            assert!(beam.ok);
            assert!(!beam.peaks.is_empty());
        }
    }

    // The pool recovers: the next call succeeds everywhere.
    let result = processor.process_samples(&samples).unwrap();
    assert_eq!(result.ok_count(), beam_count);
}

#[test]
fn test_unchanged_shape_reuses_buffers_and_plans() {
    let device: Arc<dyn ComputeDevice> = constrained_device();
    let mut processor =
        SpectrumProcessor::new(device, BeamParams::new(64, 1000, 512, 3)).unwrap();
    let samples = tone_samples(64, 1000, 2048, |beam| ((beam + 7) as f32, 1.0, 0.0));

    processor.process_samples(&samples).unwrap();
    let diag_first = processor.diagnostics();
    let cache_first = processor.cache_stats();
    assert_eq!(cache_first.program_misses, 1);
    assert_eq!(cache_first.kernel_misses, 3);
    assert!(diag_first.buffer_allocations > 0);
    assert!(diag_first.plan_builds > 0);

    processor.process_samples(&samples).unwrap();
    processor.process_samples(&samples).unwrap();

    let diag_after = processor.diagnostics();
    assert_eq!(diag_first, diag_after, "steady state must not reallocate");
    let cache_after = processor.cache_stats();
    assert_eq!(cache_after.program_misses, 1);
    assert_eq!(cache_after.kernel_misses, 3);

    let stats = processor.profiler_stats();
    assert_eq!(stats.calls, 3);
    assert!(stats.totals.transform_ms >= 0.0);
}

#[test]
fn test_sub_bin_tone_refines_toward_true_frequency() {
    let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
    let mut processor =
        SpectrumProcessor::new(device, BeamParams::new(1, 1000, 512, 3)).unwrap();
    let shape = processor.shape();
    let bin_hz = shape.bin_spacing_hz(12.0e6) as f32;
    let half = shape.out_points / 2;

    let true_bin = 40.25f32;
    let samples = tone_samples(1, 1000, 2048, |_| (true_bin, 1.0, 0.0));
    let result = processor.process_samples(&samples).unwrap();

    let beam = &result.beams[0];
    assert!(beam.ok);
    assert_eq!(beam.peaks[0].bin_index, half + 40);

    // Parabolic refinement over the leakage kernel is biased, but it must
    // move in the right direction and beat the raw bin estimate.
    let true_hz = true_bin * bin_hz;
    let raw_hz = 40.0 * bin_hz;
    assert!(beam.freq_offset > 0.05 && beam.freq_offset < 0.5);
    assert!(
        (beam.refined_frequency_hz - true_hz).abs() < (raw_hz - true_hz).abs(),
        "refinement did not improve on the bin estimate"
    );
}

#[test]
fn test_peak_list_length_is_min_of_peaks_and_window() {
    let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
    // Window narrower than the requested peak count.
    let mut processor = SpectrumProcessor::new(device, BeamParams::new(4, 16, 4, 5)).unwrap();

    let shape = processor.shape();
    assert_eq!(shape.peaks_per_beam(), 4);
    let samples = tone_samples(4, 16, shape.transform_size, |_| (1.0, 1.0, 0.0));
    let result = processor.process_samples(&samples).unwrap();

    for beam in &result.beams {
        assert!(beam.ok);
        assert_eq!(beam.peaks.len(), 4);
    }
}
