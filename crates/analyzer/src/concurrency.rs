//! Concurrency planning module for the stream analyzer
//!
//! Derives executor pool size and queue capacity from CPU core count and configuration.

use crate::config::Config;

const MAX_DERIVED_EXECUTORS: u32 = 8;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Number of inference executors (and so of in-flight requests)
    pub executors: u32,
    /// Capacity of every bounded queue in the pipeline
    pub queue_capacity: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus
    /// - executors: explicit when non-zero, otherwise half the cores clamped to [1, 8]
    /// - queue_capacity: explicit when non-zero, otherwise twice the executor count
    pub fn derive(cfg: &Config) -> Self {
        Self::derive_with_cores(cfg, num_cpus::get() as u32)
    }

    pub fn derive_with_cores(cfg: &Config, total_cores: u32) -> Self {
        let executors = if cfg.pipeline.executors > 0 {
            cfg.pipeline.executors
        } else {
            derive_executors(total_cores)
        };

        let queue_capacity = if cfg.pipeline.buffer_size > 0 {
            cfg.pipeline.buffer_size
        } else {
            executors * 2
        };

        Self {
            total_cores,
            executors,
            queue_capacity,
        }
    }
}

fn derive_executors(cores: u32) -> u32 {
    (cores / 2).clamp(1, MAX_DERIVED_EXECUTORS)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use proptest::prelude::*;

    fn config_with(executors: u32, buffer_size: u32) -> Config {
        Config {
            pipeline: PipelineConfig {
                executors,
                buffer_size,
                ..PipelineConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_derive_uses_detected_cores() {
        let plan = derive_plan(&config_with(0, 0));
        assert_eq!(plan.total_cores, num_cpus::get() as u32);
        assert!(plan.executors >= 1 && plan.executors <= MAX_DERIVED_EXECUTORS);
        assert_eq!(plan.queue_capacity, plan.executors * 2);
    }

    // For any core count with nothing set explicitly, the pool is half the
    // cores within [1, 8] and the queues hold two tasks per executor.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_concurrency_derivation(cores in 1u32..256) {
            let plan = ConcurrencyPlan::derive_with_cores(&config_with(0, 0), cores);

            prop_assert_eq!(plan.total_cores, cores);

            let expected = (cores / 2).max(1).min(8);
            prop_assert_eq!(
                plan.executors, expected,
                "For {} cores, expected {} executors but got {}",
                cores, expected, plan.executors
            );
            prop_assert_eq!(plan.queue_capacity, expected * 2);
        }
    }

    // Explicit non-zero values are used unchanged.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_explicit_config_override(
            cores in 1u32..256,
            explicit_executors in 1u32..64,
            explicit_buffer in 1u32..512,
        ) {
            let plan = ConcurrencyPlan::derive_with_cores(
                &config_with(explicit_executors, explicit_buffer),
                cores,
            );
            prop_assert_eq!(plan.executors, explicit_executors);
            prop_assert_eq!(plan.queue_capacity, explicit_buffer);

            let derived_buffer = ConcurrencyPlan::derive_with_cores(
                &config_with(explicit_executors, 0),
                cores,
            );
            prop_assert_eq!(derived_buffer.queue_capacity, explicit_executors * 2);
        }
    }
}
