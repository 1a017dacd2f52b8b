//! Per-stage timing capture and aggregation.
//!
//! Completion events carry device-reported start/end timestamps; the
//! executor folds them into per-batch [`BatchTiming`] values and the
//! processor records one [`CallProfile`] per call. The [`Profiler`] keeps
//! the last call's breakdown and running totals across all calls.

use crate::planner::Strategy;
use crate::stream::Stage;

/// Accumulated milliseconds per pipeline stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTimes {
    /// Padding (including any zero-fill for narrow batches).
    pub pad_ms: f64,
    /// Forward transform.
    pub transform_ms: f64,
    /// Shifted-window post-processing.
    pub post_ms: f64,
    /// Top-K reduction.
    pub reduce_ms: f64,
}

impl StageTimes {
    /// Add elapsed time to one stage.
    pub fn record(&mut self, stage: Stage, elapsed_ms: f64) {
        match stage {
            Stage::Pad => self.pad_ms += elapsed_ms,
            Stage::Transform => self.transform_ms += elapsed_ms,
            Stage::PostProcess => self.post_ms += elapsed_ms,
            Stage::Reduce => self.reduce_ms += elapsed_ms,
        }
    }

    /// Fold another accumulation into this one.
    pub fn accumulate(&mut self, other: &StageTimes) {
        self.pad_ms += other.pad_ms;
        self.transform_ms += other.transform_ms;
        self.post_ms += other.post_ms;
        self.reduce_ms += other.reduce_ms;
    }

    /// Total across all stages.
    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.pad_ms + self.transform_ms + self.post_ms + self.reduce_ms
    }
}

impl std::fmt::Display for StageTimes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pad {:.3} ms, transform {:.3} ms, post {:.3} ms, reduce {:.3} ms",
            self.pad_ms, self.transform_ms, self.post_ms, self.reduce_ms
        )
    }
}

/// Device timings for one batch.
#[derive(Clone, Debug)]
pub struct BatchTiming {
    /// Position of the batch in submission order.
    pub batch_index: usize,
    /// First beam of the batch.
    pub start_beam: usize,
    /// Beams in the batch.
    pub beam_count: usize,
    /// Stream the batch ran on.
    pub stream: usize,
    /// Per-stage device time.
    pub stages: StageTimes,
    /// Whether the batch failed.
    pub failed: bool,
}

/// Profile of one `process` call.
#[derive(Clone, Debug)]
pub struct CallProfile {
    /// Strategy the call executed with.
    pub strategy: Strategy,
    /// Beams processed.
    pub beam_count: usize,
    /// Per-batch breakdown in submission order.
    pub batches: Vec<BatchTiming>,
    /// Per-stage totals across all batches.
    pub totals: StageTimes,
    /// Wall-clock time of the whole call.
    pub wall_ms: f64,
}

impl CallProfile {
    /// Build a profile from per-batch timings.
    #[must_use]
    pub fn new(
        strategy: Strategy,
        beam_count: usize,
        batches: Vec<BatchTiming>,
        wall_ms: f64,
    ) -> Self {
        let mut totals = StageTimes::default();
        for batch in &batches {
            totals.accumulate(&batch.stages);
        }
        Self {
            strategy,
            beam_count,
            batches,
            totals,
            wall_ms,
        }
    }

    /// Throughput of the call in beams per second.
    #[must_use]
    pub fn beams_per_sec(&self) -> f64 {
        if self.wall_ms > 0.0 {
            self.beam_count as f64 * 1000.0 / self.wall_ms
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for CallProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} call: {} beams in {} batches, {:.3} ms wall ({:.1} beams/s); {}",
            self.strategy,
            self.beam_count,
            self.batches.len(),
            self.wall_ms,
            self.beams_per_sec(),
            self.totals,
        )
    }
}

/// Cumulative statistics across calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProfilerStats {
    /// Calls recorded.
    pub calls: u64,
    /// Batches recorded.
    pub batches: u64,
    /// Beams recorded.
    pub beams: u64,
    /// Per-stage totals across all calls.
    pub totals: StageTimes,
    /// Wall-clock total across all calls.
    pub wall_ms: f64,
}

impl ProfilerStats {
    /// Average wall-clock time per call.
    #[must_use]
    pub fn avg_call_ms(&self) -> f64 {
        if self.calls > 0 {
            self.wall_ms / self.calls as f64
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for ProfilerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} calls ({} batches, {} beams), {:.3} ms avg/call; {}",
            self.calls,
            self.batches,
            self.beams,
            self.avg_call_ms(),
            self.totals,
        )
    }
}

/// Retains the last call's profile and accumulates cumulative statistics.
#[derive(Default)]
pub struct Profiler {
    last: Option<CallProfile>,
    stats: ProfilerStats,
}

impl Profiler {
    /// Record one completed call.
    pub fn record(&mut self, profile: CallProfile) {
        self.stats.calls += 1;
        self.stats.batches += profile.batches.len() as u64;
        self.stats.beams += profile.beam_count as u64;
        self.stats.totals.accumulate(&profile.totals);
        self.stats.wall_ms += profile.wall_ms;
        tracing::debug!(%profile, "recorded call profile");
        self.last = Some(profile);
    }

    /// The most recent call's profile.
    #[must_use]
    pub fn last_call(&self) -> Option<&CallProfile> {
        self.last.as_ref()
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> ProfilerStats {
        self.stats
    }
}
