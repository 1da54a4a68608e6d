//! Engine configuration.
//!
//! The buffer, spill, and threshold sizes are documented defaults rather
//! than derived values; callers tune them per deployment.

use std::time::Duration;

use derive_builder::Builder;

/// Configuration for the execution engine.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Maximum number of concurrently running activations.
    #[builder(default = "10")]
    pub max_concurrent_activations: usize,

    /// Worker-pool ceiling shared by operation bodies and pipeline
    /// traversals. Defaults to the number of available execution units.
    #[builder(default = "EngineConfig::default_worker_ceiling()")]
    pub worker_ceiling: usize,

    /// Deadline for one activation; elapsing cancels it.
    #[builder(default = "Duration::from_secs(3600)")]
    pub default_timeout: Duration,

    /// Ring-buffer capacity per tee consumer, in elements.
    #[builder(default = "64")]
    pub tee_buffer_capacity: usize,

    /// In-memory element budget per barrier before spilling; each spilled
    /// partition holds at most this many elements.
    #[builder(default = "8192")]
    pub spill_threshold: usize,

    /// Element sources below this size are materialized up front under
    /// `StreamingMode::Auto`; larger sources always stream.
    #[builder(default = "1024")]
    pub eager_threshold: usize,
}

impl EngineConfig {
    /// Returns a builder for the configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    fn default_worker_ceiling() -> usize {
        std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
    }
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.max_concurrent_activations {
            return Err("max_concurrent_activations must be at least 1".into());
        }
        if let Some(0) = self.worker_ceiling {
            return Err("worker_ceiling must be at least 1".into());
        }
        if let Some(0) = self.tee_buffer_capacity {
            return Err("tee_buffer_capacity must be at least 1".into());
        }
        if let Some(0) = self.spill_threshold {
            return Err("spill_threshold must be at least 1".into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_activations: 10,
            worker_ceiling: Self::default_worker_ceiling(),
            default_timeout: Duration::from_secs(3600),
            tee_buffer_capacity: 64,
            spill_threshold: 8192,
            eager_threshold: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_activations, 10);
        assert_eq!(config.tee_buffer_capacity, 64);
        assert_eq!(config.spill_threshold, 8192);
        assert_eq!(config.eager_threshold, 1024);
        assert!(config.worker_ceiling >= 1);
    }

    #[test]
    fn test_builder_rejects_zero_ceiling() {
        let result = EngineConfig::builder()
            .worker_ceiling(0usize)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = EngineConfig::builder()
            .tee_buffer_capacity(8usize)
            .spill_threshold(16usize)
            .build()
            .unwrap();
        assert_eq!(config.tee_buffer_capacity, 8);
        assert_eq!(config.spill_threshold, 16);
        assert_eq!(config.max_concurrent_activations, 10);
    }
}
