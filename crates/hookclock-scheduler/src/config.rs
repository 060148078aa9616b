//! Engine loop settings.

use hookclock_core::HookclockConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the generator tops up cron event buffers.
    pub generator_interval: Duration,
    /// How often the processor polls for due events.
    pub processor_interval: Duration,
    /// Webhook calls in flight at once within one batch. 1 = sequential.
    pub max_concurrent_dispatches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generator_interval: Duration::from_secs(60),
            processor_interval: Duration::from_secs(10),
            max_concurrent_dispatches: 1,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator_interval(mut self, interval: Duration) -> Self {
        self.generator_interval = interval;
        self
    }

    pub fn with_processor_interval(mut self, interval: Duration) -> Self {
        self.processor_interval = interval;
        self
    }

    /// Values below 1 are treated as 1.
    pub fn with_max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.max_concurrent_dispatches = max.max(1);
        self
    }
}

impl From<&HookclockConfig> for EngineConfig {
    fn from(config: &HookclockConfig) -> Self {
        Self::new()
            .with_generator_interval(Duration::from_secs(config.generator.interval_secs.max(1)))
            .with_processor_interval(Duration::from_secs(config.processor.interval_secs.max(1)))
            .with_max_concurrent_dispatches(config.processor.max_concurrent_dispatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file_config() {
        let mut file = HookclockConfig::default();
        file.processor.interval_secs = 0;
        file.processor.max_concurrent_dispatches = 0;
        file.generator.interval_secs = 120;

        let config = EngineConfig::from(&file);
        assert_eq!(config.generator_interval, Duration::from_secs(120));
        assert_eq!(config.processor_interval, Duration::from_secs(1));
        assert_eq!(config.max_concurrent_dispatches, 1);
    }
}
