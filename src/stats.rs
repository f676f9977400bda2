//! Throughput sampling: every `worker_stats_command_count` successful
//! commands, compute commands-per-second over the interval since the
//! previous sample and log the running average.

use std::time::Instant;

pub(crate) struct ThroughputSampler {
    samples_per_second: Vec<f64>,
    last_sample_at: Instant,
    commands_since_last_sample: u64,
}

impl ThroughputSampler {
    pub(crate) fn new() -> Self {
        Self {
            samples_per_second: Vec::new(),
            last_sample_at: Instant::now(),
            commands_since_last_sample: 0,
        }
    }

    /// Call once per successfully executed command. Returns `Some(average)`
    /// when a new sample was taken.
    pub(crate) fn record_success(&mut self, sample_every: u64) -> Option<f64> {
        self.commands_since_last_sample += 1;
        if self.commands_since_last_sample < sample_every {
            return None;
        }

        let elapsed = self.last_sample_at.elapsed().as_secs_f64();
        let commands_per_second = if elapsed > 0.0 {
            self.commands_since_last_sample as f64 / elapsed
        } else {
            0.0
        };
        self.samples_per_second.push(commands_per_second);
        self.commands_since_last_sample = 0;
        self.last_sample_at = Instant::now();

        let average = self.samples_per_second.iter().sum::<f64>() / self.samples_per_second.len() as f64;
        Some(average)
    }
}

impl Default for ThroughputSampler {
    fn default() -> Self {
        Self::new()
    }
}
