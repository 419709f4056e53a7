//! Stream analyzer main loop
//!
//! Reads frames, schedules them for inference, consumes whatever results are
//! ready and consults the supervisor at every health window boundary. The loop
//! never blocks on the pipeline: a full input queue drops the frame and an
//! empty output queue simply means nothing to postprocess yet.

use crate::client::{ClientError, InferenceClient};
use crate::concurrency::derive_plan;
use crate::config::{Config, ConfigError};
use crate::hooks::FrameProcessor;
use crate::manager::{InferenceManager, ManagerSettings};
use crate::metrics::{now_unix_ms, SharedMetrics, SystemSampler};
use crate::startup::StartupError;
use crate::stream_reader::StreamReader;
use crate::supervisor::{PerformanceReport, ProcessingSupervisor, StreamHealth};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error type for analyzer operations
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// The inference client could not be built
    #[error("Inference client error: {0}")]
    Client(#[from] ClientError),

    /// The stream could not be opened at all
    #[error("Stream '{0}' could not be opened")]
    StreamUnavailable(String),
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The external cancellation token fired
    Cancelled,
    /// The stream kept failing after every allowed retry
    StreamUnrecoverable,
    /// An executor hit a fatal error
    ExecutorAbort,
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// Pause before reopening an unhealthy stream
    pub recovery_wait: Duration,
    /// Model label reported in metrics
    pub model: String,
}

impl AnalyzerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let version = match cfg.inference.model_version {
            0 => "latest".to_string(),
            v => v.to_string(),
        };
        Self {
            recovery_wait: Duration::from_millis(cfg.supervisor.recovery_wait_ms),
            model: format!("{}:{}", cfg.inference.model_name, version),
        }
    }
}

pub struct StreamAnalyzer<R, P> {
    reader: R,
    processor: P,
    manager: InferenceManager,
    supervisor: ProcessingSupervisor,
    settings: AnalyzerSettings,
    metrics: SharedMetrics,
    windows_checked: u64,
    retry_cycles: u64,
    system: SystemSampler,
}

impl<R: StreamReader, P: FrameProcessor> StreamAnalyzer<R, P> {
    pub fn new(
        reader: R,
        processor: P,
        manager: InferenceManager,
        supervisor: ProcessingSupervisor,
        settings: AnalyzerSettings,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            reader,
            processor,
            manager,
            supervisor,
            settings,
            metrics,
            windows_checked: 0,
            retry_cycles: 0,
            system: SystemSampler::new(),
        }
    }

    /// Wire the pipeline from configuration
    pub fn from_config(
        cfg: &Config,
        reader: R,
        processor: P,
        client: Arc<dyn InferenceClient>,
        metrics: SharedMetrics,
    ) -> Self {
        let plan = derive_plan(cfg);
        info!(
            cores = plan.total_cores,
            executors = plan.executors,
            queue_capacity = plan.queue_capacity,
            "Concurrency plan"
        );
        let manager = InferenceManager::new(client, ManagerSettings::from_config(cfg, &plan));
        let supervisor = ProcessingSupervisor::from_config(&cfg.supervisor);
        Self::new(
            reader,
            processor,
            manager,
            supervisor,
            AnalyzerSettings::from_config(cfg),
            metrics,
        )
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Run until cancelled, until the stream is given up, or until an executor aborts
    ///
    /// The inference manager is always shut down before returning.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ExitReason, AnalyzerError> {
        if !self.reader.initialize().await {
            return Err(AnalyzerError::StreamUnavailable(self.reader.url().to_string()));
        }

        self.manager.initialize();
        {
            let mut snapshot = self.metrics.write().await;
            snapshot.stream_url = self.reader.url().to_string();
            snapshot.model = self.settings.model.clone();
            snapshot.executors = self.manager.executor_count();
            snapshot.queue_capacity = self.manager.queue_capacity();
        }
        info!(url = %self.reader.url(), model = %self.settings.model, "Stream analysis started");

        let reason = self.process(&cancel).await;

        self.manager.shutdown().await;
        self.publish_counters().await;

        match reason {
            ExitReason::Cancelled => info!("Stream analysis cancelled"),
            ExitReason::StreamUnrecoverable => {
                error!(url = %self.reader.url(), "Stream unrecoverable, shutting down")
            }
            ExitReason::ExecutorAbort => error!("Inference executor aborted, shutting down"),
        }
        Ok(reason)
    }

    async fn process(&mut self, cancel: &CancellationToken) -> ExitReason {
        loop {
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                return ExitReason::Cancelled;
            }
            if self.manager.is_aborted() {
                return ExitReason::ExecutorAbort;
            }

            if self.supervisor.is_check_due() {
                match self.check_health().await {
                    StreamHealth::Ok => {}
                    StreamHealth::Retry => {
                        if !self.recover(cancel).await {
                            return ExitReason::Cancelled;
                        }
                        continue;
                    }
                    StreamHealth::Close => return ExitReason::StreamUnrecoverable,
                }
            }

            self.supervisor.iteration();
            let Some(frame) = self.reader.get_frame().await else {
                self.supervisor.frame_failed_to_read();
                continue;
            };
            self.supervisor.frame_received();

            let frame = self.processor.preprocess(frame);
            // A dropped frame still gives pending results a chance to drain;
            // with both queues full nothing else would.
            if !self.manager.schedule_inference(frame) {
                self.supervisor.frame_dropped();
            }

            if let Some(result) = self.manager.pull_result() {
                match result.outcome {
                    Ok(outputs) => {
                        self.processor.postprocess(result.frame, outputs);
                        self.supervisor.frame_processed();
                    }
                    Err(e) => {
                        debug!(sequence = result.frame.sequence, error = %e, "Frame has no inference result");
                        self.supervisor.inference_failed();
                    }
                }
            }
        }
    }

    async fn check_health(&mut self) -> StreamHealth {
        let health = self.supervisor.check_stream_reader_health();
        let pipeline_healthy = self.supervisor.check_processing_pipeline_health();
        let report = self.supervisor.report_performance();
        self.windows_checked += 1;
        self.publish_window(health, pipeline_healthy, &report).await;
        self.supervisor.reset_window();
        health
    }

    /// Pause, then reopen the stream; false if cancelled while waiting
    async fn recover(&mut self, cancel: &CancellationToken) -> bool {
        warn!(
            wait = ?self.settings.recovery_wait,
            retries = self.supervisor.retries(),
            "Stream unhealthy, reopening after recovery wait"
        );
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(self.settings.recovery_wait) => {}
        }

        self.retry_cycles += 1;
        if self.reader.initialize().await {
            info!(url = %self.reader.url(), "Stream reopened");
        } else {
            warn!(url = %self.reader.url(), "Stream reopen failed");
        }
        self.supervisor.reset_window();
        true
    }

    async fn publish_window(
        &mut self,
        health: StreamHealth,
        pipeline_healthy: bool,
        report: &PerformanceReport,
    ) {
        {
            let mut snapshot = self.metrics.write().await;
            snapshot.fps = report.fps;
            snapshot.last_stream_health = Some(health);
            snapshot.pipeline_healthy = pipeline_healthy;
        }
        self.publish_counters().await;
    }

    async fn publish_counters(&mut self) {
        let system = self.system.sample();
        let mut snapshot = self.metrics.write().await;
        snapshot.timestamp_unix_ms = now_unix_ms();
        snapshot.totals = *self.supervisor.totals();
        snapshot.retries = self.supervisor.retries();
        snapshot.windows_checked = self.windows_checked;
        snapshot.retry_cycles = self.retry_cycles;
        snapshot.aborted = self.manager.is_aborted();
        snapshot.system = system;
    }
}
