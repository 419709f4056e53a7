//! Processing supervisor
//!
//! Counts what happens to frames over a health window of main loop iterations
//! and turns those counts into decisions: whether the stream is healthy, needs
//! a pause-and-reopen, or should be given up, and whether the pipeline keeps
//! up with the stream.

use crate::config::SupervisorConfig;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Verdict on the stream reader for the last window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamHealth {
    Ok,
    /// Pause, reopen the stream and keep going
    Retry,
    /// Retries exhausted, stop
    Close,
}

/// Frame counters for one window (or for the whole run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounters {
    pub iterations: u64,
    pub frames_received: u64,
    pub frames_failed_to_read: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub inference_failures: u64,
}

/// Throughput summary of one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub fps: f64,
    pub frames_received: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub frames_failed_to_read: u64,
    pub inference_failures: u64,
    pub window_secs: f64,
}

#[derive(Debug)]
pub struct ProcessingSupervisor {
    check_interval: u64,
    retry_limit: u32,
    retries: u32,
    window: HealthCounters,
    totals: HealthCounters,
    window_started: Instant,
}

impl ProcessingSupervisor {
    pub fn new(check_interval: u64, retry_limit: u32) -> Self {
        Self {
            check_interval: check_interval.max(1),
            retry_limit,
            retries: 0,
            window: HealthCounters::default(),
            totals: HealthCounters::default(),
            window_started: Instant::now(),
        }
    }

    pub fn from_config(cfg: &SupervisorConfig) -> Self {
        Self::new(u64::from(cfg.check_interval), cfg.retry_limit)
    }

    fn bump(&mut self, counter: impl Fn(&mut HealthCounters)) {
        counter(&mut self.window);
        counter(&mut self.totals);
    }

    pub fn iteration(&mut self) {
        self.bump(|c| c.iterations += 1);
    }

    pub fn frame_received(&mut self) {
        self.bump(|c| c.frames_received += 1);
    }

    pub fn frame_failed_to_read(&mut self) {
        self.bump(|c| c.frames_failed_to_read += 1);
    }

    pub fn frame_dropped(&mut self) {
        self.bump(|c| c.frames_dropped += 1);
    }

    pub fn frame_processed(&mut self) {
        self.bump(|c| c.frames_processed += 1);
    }

    pub fn inference_failed(&mut self) {
        self.bump(|c| c.inference_failures += 1);
    }

    /// True once the current window holds a full check interval of iterations
    pub fn is_check_due(&self) -> bool {
        self.window.iterations >= self.check_interval
    }

    /// Judge the stream reader on the current window
    ///
    /// More than half of the window's reads failing counts as one retry.
    /// The retry that exceeds the limit yields `Close` and clears the retry
    /// count; a healthy window after retries clears it as well.
    pub fn check_stream_reader_health(&mut self) -> StreamHealth {
        if self.window.frames_failed_to_read * 2 > self.window.iterations {
            self.retries += 1;
            if self.retries > self.retry_limit {
                warn!(
                    failed = self.window.frames_failed_to_read,
                    iterations = self.window.iterations,
                    retry_limit = self.retry_limit,
                    "Stream reader retries exhausted"
                );
                self.retries = 0;
                return StreamHealth::Close;
            }
            warn!(
                failed = self.window.frames_failed_to_read,
                iterations = self.window.iterations,
                retry = self.retries,
                retry_limit = self.retry_limit,
                "Stream reader unhealthy"
            );
            return StreamHealth::Retry;
        }

        if self.retries > 0 {
            info!(after_retries = self.retries, "Stream reader recovered");
            self.retries = 0;
        }
        StreamHealth::Ok
    }

    /// Whether the pipeline keeps up; false when most received frames were dropped
    pub fn check_processing_pipeline_health(&self) -> bool {
        if self.window.frames_dropped * 2 > self.window.frames_received {
            warn!(
                dropped = self.window.frames_dropped,
                received = self.window.frames_received,
                "More than half of the frames were dropped; inference cannot keep up with the stream"
            );
            return false;
        }
        true
    }

    pub fn report_performance(&self) -> PerformanceReport {
        let window_secs = self.window_started.elapsed().as_secs_f64();
        let fps = if window_secs > 0.0 {
            self.window.frames_processed as f64 / window_secs
        } else {
            0.0
        };
        let report = PerformanceReport {
            fps,
            frames_received: self.window.frames_received,
            frames_processed: self.window.frames_processed,
            frames_dropped: self.window.frames_dropped,
            frames_failed_to_read: self.window.frames_failed_to_read,
            inference_failures: self.window.inference_failures,
            window_secs,
        };
        info!(
            fps = report.fps,
            received = report.frames_received,
            processed = report.frames_processed,
            dropped = report.frames_dropped,
            failed_reads = report.frames_failed_to_read,
            inference_failures = report.inference_failures,
            "Performance report"
        );
        report
    }

    /// Start a new window; the retry count carries over
    pub fn reset_window(&mut self) {
        self.window = HealthCounters::default();
        self.window_started = Instant::now();
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn window(&self) -> &HealthCounters {
        &self.window
    }

    pub fn totals(&self) -> &HealthCounters {
        &self.totals
    }
}
