//! Device program source and entry-point names.
//!
//! The program text is an opaque asset from the scheduler's point of view:
//! it is handed to the resource cache, which compiles it at most once per
//! content hash. Backends decide how to execute the entry points; the host
//! backend ships reference implementations under the same names.

/// Entry point that pads each beam up to the transform length.
pub const PAD_KERNEL: &str = "pad_beams";

/// Entry point that writes the shifted spectral window with magnitude and
/// phase per bin.
pub const POST_KERNEL: &str = "shift_spectrum";

/// Entry point that selects the top-K peaks per beam and refines the
/// strongest one.
pub const REDUCE_KERNEL: &str = "select_peaks";

/// OpenCL C source for the three pipeline kernels.
pub const PROGRAM_SOURCE: &str = r#"
typedef struct {
    float re;
    float im;
    float magnitude;
    float phase_degrees;
} spectral_bin_t;

typedef struct {
    uint  bin_index;
    float re;
    float im;
    float magnitude;
    float phase_degrees;
    float freq_offset;
    float refined_frequency;
    uint  reserved;
} peak_record_t;

/* One work-item per output sample. Reads the batch's beams straight from
 * the shared input buffer at beam_offset and zero-fills the tail. */
__kernel void pad_beams(
    __global const float2* input,
    __global float2* work,
    uint batch_beams,
    uint count_points,
    uint nfft,
    uint beam_offset)
{
    uint gid = get_global_id(0);
    uint beam = gid / nfft;
    uint pos = gid % nfft;
    if (beam >= batch_beams) {
        return;
    }
    if (pos < count_points) {
        work[gid] = input[(beam_offset + beam) * count_points + pos];
    } else {
        work[gid] = (float2)(0.0f, 0.0f);
    }
}

/* One work-item per window bin. The exposed window is centred on zero
 * frequency: bins below out_points/2 come from the top of the transform
 * output (negative frequencies), the rest from the bottom. */
__kernel void shift_spectrum(
    __global const float2* work,
    __global spectral_bin_t* spectrum,
    uint batch_beams,
    uint nfft,
    uint out_points)
{
    uint gid = get_global_id(0);
    uint beam = gid / out_points;
    uint k = gid % out_points;
    if (beam >= batch_beams) {
        return;
    }

    uint half_window = out_points / 2;
    uint src = (k < half_window) ? (nfft - half_window + k) : (k - half_window);
    float2 c = work[beam * nfft + src];

    spectral_bin_t bin;
    bin.re = c.x;
    bin.im = c.y;
    bin.magnitude = sqrt(c.x * c.x + c.y * c.y);
    bin.phase_degrees = atan2(c.y, c.x) * 57.29577951308232f;
    spectrum[gid] = bin;
}

/* One work-group per beam. Each work-item scans a stride of the window for
 * its local maximum; work-item 0 then extracts the top max_peaks bins,
 * preferring the lower index on exact magnitude ties, and refines the
 * strongest peak with three-point parabolic interpolation. */
__kernel void select_peaks(
    __global const spectral_bin_t* spectrum,
    __global peak_record_t* maxima,
    uint batch_beams,
    uint out_points,
    uint max_peaks,
    float bin_hz)
{
    uint beam = get_group_id(0);
    uint lid = get_local_id(0);
    uint local_size = get_local_size(0);
    if (beam >= batch_beams) {
        return;
    }

    __local float local_mag[256];
    __local uint  local_idx[256];

    __global const spectral_bin_t* row = spectrum + beam * out_points;

    float best_mag = -1.0f;
    uint best_idx = 0;
    for (uint i = lid; i < out_points; i += local_size) {
        float m = row[i].magnitude;
        if (m > best_mag || (m == best_mag && i < best_idx)) {
            best_mag = m;
            best_idx = i;
        }
    }
    local_mag[lid] = best_mag;
    local_idx[lid] = best_idx;
    barrier(CLK_LOCAL_MEM_FENCE);

    if (lid != 0) {
        return;
    }

    uint selected = (max_peaks < out_points) ? max_peaks : out_points;
    uint half_window = out_points / 2;

    for (uint rank = 0; rank < max_peaks; ++rank) {
        peak_record_t rec;
        rec.bin_index = 0;
        rec.re = 0.0f;
        rec.im = 0.0f;
        rec.magnitude = 0.0f;
        rec.phase_degrees = 0.0f;
        rec.freq_offset = 0.0f;
        rec.refined_frequency = 0.0f;
        rec.reserved = 0;

        if (rank < selected) {
            float top_mag = -1.0f;
            uint top_idx = 0;
            uint top_slot = 0;
            for (uint j = 0; j < local_size; ++j) {
                float m = local_mag[j];
                if (m > top_mag || (m == top_mag && local_idx[j] < top_idx)) {
                    top_mag = m;
                    top_idx = local_idx[j];
                    top_slot = j;
                }
            }

            /* Rescan the winning slot's stride for its next-best bin. */
            float next_mag = -1.0f;
            uint next_idx = 0;
            for (uint i = top_slot; i < out_points; i += local_size) {
                float m = row[i].magnitude;
                if (i == top_idx) {
                    continue;
                }
                if (m > next_mag || (m == next_mag && i < next_idx)) {
                    next_mag = m;
                    next_idx = i;
                }
            }
            local_mag[top_slot] = next_mag;
            local_idx[top_slot] = next_idx;

            float signed_bin = (float)top_idx - (float)half_window;
            rec.bin_index = top_idx;
            rec.re = row[top_idx].re;
            rec.im = row[top_idx].im;
            rec.magnitude = row[top_idx].magnitude;
            rec.phase_degrees = row[top_idx].phase_degrees;
            rec.refined_frequency = signed_bin * bin_hz;

            if (rank == 0 && top_idx > 0 && top_idx + 1 < out_points) {
                float y_left = row[top_idx - 1].magnitude;
                float y_center = row[top_idx].magnitude;
                float y_right = row[top_idx + 1].magnitude;
                float denom = y_left - 2.0f * y_center + y_right;
                if (fabs(denom) > 1e-12f) {
                    float offset = clamp(0.5f * (y_left - y_right) / denom, -0.5f, 0.5f);
                    rec.freq_offset = offset;
                    rec.refined_frequency = (signed_bin + offset) * bin_hz;
                }
            }
        }

        maxima[beam * max_peaks + rank] = rec;
    }
}
"#;
