//! Tunables for the pipeline, with environment-variable overrides for
//! deployment without a recompile.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::BatchSchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub queue_check_interval_ms: u64,
    pub max_queue_size: usize,
    /// Caps how many batches may be in flight across all workers at once.
    pub max_concurrent_batches: usize,
    pub first_segment_priority: u8,
    pub normal_segment_priority: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            batch_timeout_ms: 200,
            queue_check_interval_ms: 50,
            max_queue_size: 1024,
            max_concurrent_batches: 2,
            first_segment_priority: 10,
            normal_segment_priority: 1,
        }
    }
}

impl PipelineConfig {
    pub fn batch_scheduler_config(&self) -> BatchSchedulerConfig {
        BatchSchedulerConfig {
            batch_size: self.batch_size,
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
            queue_check_interval: Duration::from_millis(self.queue_check_interval_ms),
        }
    }

    /// Overrides defaults from `TRANSCRIBE_PIPELINE_*` environment
    /// variables, falling back silently to the existing value on a
    /// missing or unparseable variable.
    pub fn from_env(&self) -> Self {
        let mut config = self.clone();
        macro_rules! override_from_env {
            ($field:ident, $var:literal) => {
                if let Ok(raw) = std::env::var($var) {
                    if let Ok(value) = raw.parse() {
                        config.$field = value;
                    }
                }
            };
        }
        override_from_env!(batch_size, "TRANSCRIBE_PIPELINE_BATCH_SIZE");
        override_from_env!(batch_timeout_ms, "TRANSCRIBE_PIPELINE_BATCH_TIMEOUT_MS");
        override_from_env!(
            queue_check_interval_ms,
            "TRANSCRIBE_PIPELINE_QUEUE_CHECK_INTERVAL_MS"
        );
        override_from_env!(max_queue_size, "TRANSCRIBE_PIPELINE_MAX_QUEUE_SIZE");
        override_from_env!(
            max_concurrent_batches,
            "TRANSCRIBE_PIPELINE_MAX_CONCURRENT_BATCHES"
        );
        override_from_env!(first_segment_priority, "TRANSCRIBE_PIPELINE_FIRST_SEGMENT_PRIORITY");
        override_from_env!(
            normal_segment_priority,
            "TRANSCRIBE_PIPELINE_NORMAL_SEGMENT_PRIORITY"
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_scheduler_config_matches_pipeline_defaults() {
        let config = PipelineConfig::default();
        let scheduler_config = config.batch_scheduler_config();
        assert_eq!(scheduler_config.batch_size, 128);
        assert_eq!(scheduler_config.batch_timeout, Duration::from_millis(200));
    }

    #[test]
    fn env_override_applies_only_to_set_vars() {
        unsafe {
            std::env::set_var("TRANSCRIBE_PIPELINE_BATCH_SIZE", "64");
            std::env::remove_var("TRANSCRIBE_PIPELINE_MAX_QUEUE_SIZE");
        }
        let config = PipelineConfig::default().from_env();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.max_queue_size, 1024);
        unsafe {
            std::env::remove_var("TRANSCRIBE_PIPELINE_BATCH_SIZE");
        }
    }
}
