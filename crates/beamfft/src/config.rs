//! Batch scheduling configuration.

/// Tunables for the batch scheduler.
///
/// With the defaults, a call that needs more than 40% of available device
/// memory is split into batches of roughly 20% of the beams each, spread
/// over three streams.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Fraction of available device memory a single pass may consume.
    pub memory_threshold: f64,
    /// Fraction of the beams per batch when batching.
    pub batch_ratio: f64,
    /// Below this beam count a single pass is always used.
    pub min_beams_for_batch: usize,
    /// Requested number of execution streams. Capped at the device's
    /// reported maximum concurrent queue count.
    pub num_streams: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            memory_threshold: 0.4,
            batch_ratio: 0.2,
            min_beams_for_batch: 10,
            num_streams: 3,
        }
    }
}

impl BatchConfig {
    /// Set the memory threshold.
    #[must_use]
    pub fn with_memory_threshold(mut self, threshold: f64) -> Self {
        self.memory_threshold = threshold;
        self
    }

    /// Set the batch ratio.
    #[must_use]
    pub fn with_batch_ratio(mut self, ratio: f64) -> Self {
        self.batch_ratio = ratio;
        self
    }

    /// Set the single-pass beam-count floor.
    #[must_use]
    pub fn with_min_beams_for_batch(mut self, min: usize) -> Self {
        self.min_beams_for_batch = min;
        self
    }

    /// Set the requested stream count.
    #[must_use]
    pub fn with_num_streams(mut self, streams: usize) -> Self {
        self.num_streams = streams.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let config = BatchConfig::default();
        assert_eq!(config.memory_threshold, 0.4);
        assert_eq!(config.batch_ratio, 0.2);
        assert_eq!(config.min_beams_for_batch, 10);
        assert_eq!(config.num_streams, 3);
    }

    #[test]
    fn test_builder_floors_stream_count() {
        let config = BatchConfig::default().with_num_streams(0);
        assert_eq!(config.num_streams, 1);
    }
}
