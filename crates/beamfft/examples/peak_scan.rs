//! Scan a handful of synthetic beams and print their strongest peaks.
//!
//! Run with: `cargo run --example peak_scan`

use std::sync::Arc;

use beamfft::{BeamParams, Complex32, ComputeDevice, SpectrumProcessor};
use beamfft_host::HostDevice;

fn main() -> beamfft::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let beam_count = 8;
    let count_points = 1000;
    let sample_rate_hz = 12.0e6;

    let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
    let params = BeamParams::new(beam_count, count_points, 512, 3)
        .with_sample_rate(sample_rate_hz)
        .with_task_id("peak-scan")
        .with_module_name("example");
    let mut processor = SpectrumProcessor::new(device, params)?;

    let shape = processor.shape();
    let bin_hz = shape.bin_spacing_hz(sample_rate_hz);

    // Each beam carries one tone, offset from its neighbours by 11.37 bins
    // so the refinement has sub-bin work to do.
    let mut samples = Vec::with_capacity(beam_count * count_points);
    for beam in 0..beam_count {
        let tone_bin = 20.0 + beam as f32 * 11.37;
        for n in 0..count_points {
            let angle =
                2.0 * std::f32::consts::PI * tone_bin * n as f32 / shape.transform_size as f32;
            samples.push(Complex32::new(angle.cos(), angle.sin()));
        }
    }

    let result = processor.process_samples(&samples)?;

    println!(
        "beam | top bin | amplitude | phase (deg) | refined freq (kHz)"
    );
    for (beam_index, beam) in result.beams.iter().enumerate() {
        match beam.top_peak() {
            Some(peak) if beam.ok => println!(
                "{beam_index:>4} | {:>7} | {:>9.1} | {:>11.2} | {:>18.3}",
                peak.bin_index,
                peak.amplitude,
                peak.phase_degrees,
                beam.refined_frequency_hz / 1e3,
            ),
            _ => println!(
                "{beam_index:>4} | failed: {}",
                beam.error.as_deref().unwrap_or("unknown")
            ),
        }
    }

    if let Some(profile) = processor.last_profile() {
        println!("\n{profile}");
    }
    println!("expected tone spacing: {:.3} kHz per 11.37 bins", 11.37 * bin_hz / 1e3);

    Ok(())
}
