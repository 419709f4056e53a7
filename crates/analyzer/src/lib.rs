//! Real-time stream analyzer
//!
//! Reads frames from a live source, fans them out to a bounded pool of remote
//! inference executors without ever blocking ingestion, and supervises both
//! the stream and the pipeline.

pub mod analyzer;
pub mod client;
pub mod concurrency;
pub mod executor;
pub mod frame;
pub mod hooks;
pub mod manager;
pub mod metrics;
pub mod metrics_server;
pub mod pipeline_handler;
pub mod startup;
pub mod stream_reader;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use analyzer::{AnalyzerError, AnalyzerSettings, ExitReason, StreamAnalyzer};
pub use client::{ClientError, InferenceClient, InferenceInput, InputMap, KServeClient};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use executor::{encode_frame, spawn_executor, ExecutorHandle, ExecutorSettings, InputEncoding};
pub use frame::{Frame, InferenceResult, TensorMap};
pub use hooks::{FrameProcessor, LoggingProcessor, PassthroughProcessor};
pub use manager::{InferenceManager, ManagerSettings};
pub use metrics::{
    new_shared_metrics, MetricsSnapshot, SharedMetrics, SystemMetrics, SystemSampler,
};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use pipeline_handler::{InferencePipelineHandler, PipelineState, PipelineStep};
pub use startup::{check_model_ready, run_startup_checks, validate_config, StartupError};
pub use stream_analyzer_config as config;
pub use stream_analyzer_config::Config;
pub use stream_reader::{RawFrameReader, StreamReader};
pub use supervisor::{HealthCounters, PerformanceReport, ProcessingSupervisor, StreamHealth};
