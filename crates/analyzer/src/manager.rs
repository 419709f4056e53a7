//! Inference manager
//!
//! Owns the executor pool, the global bounded input and output queues, the
//! pipeline driver task that round-robins the state machine over every
//! executor, and the monitoring task that turns any executor abort into a
//! manager-wide abort.

use crate::client::InferenceClient;
use crate::concurrency::ConcurrencyPlan;
use crate::config::Config;
use crate::executor::{spawn_executor, ExecutorHandle, ExecutorSettings, InputEncoding};
use crate::frame::{Frame, InferenceResult};
use crate::pipeline_handler::{InferencePipelineHandler, PipelineState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runtime settings for an [`InferenceManager`]
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub executors: usize,
    pub queue_capacity: usize,
    pub executor: ExecutorSettings,
    /// Upper bound on every queue wait inside the driver
    pub poll_timeout: Duration,
    pub monitor_interval: Duration,
}

impl ManagerSettings {
    pub fn from_config(cfg: &Config, plan: &ConcurrencyPlan) -> Self {
        let queue_capacity = plan.queue_capacity.max(1) as usize;
        Self {
            executors: plan.executors.max(1) as usize,
            queue_capacity,
            executor: ExecutorSettings {
                input_name: cfg.inference.input_name.clone(),
                encoding: InputEncoding::from_binary_flag(cfg.inference.binary_input),
                channel_capacity: queue_capacity,
            },
            poll_timeout: Duration::from_millis(cfg.pipeline.poll_timeout_ms.max(1)),
            monitor_interval: Duration::from_millis(cfg.pipeline.monitor_interval_ms.max(1)),
        }
    }
}

/// Queue ends the background tasks take over on initialize
struct PendingPipeline {
    inputs: mpsc::Receiver<Frame>,
    results: mpsc::Sender<InferenceResult>,
}

pub struct InferenceManager {
    settings: ManagerSettings,
    client: Arc<dyn InferenceClient>,
    inputs: mpsc::Sender<Frame>,
    results: mpsc::Receiver<InferenceResult>,
    pending: Option<PendingPipeline>,
    exit: CancellationToken,
    abort: CancellationToken,
    driver: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    executors: Vec<JoinHandle<()>>,
}

impl InferenceManager {
    /// Create the queues; nothing runs until [`initialize`](Self::initialize)
    pub fn new(client: Arc<dyn InferenceClient>, settings: ManagerSettings) -> Self {
        let capacity = settings.queue_capacity.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        Self {
            settings,
            client,
            inputs: input_tx,
            results: result_rx,
            pending: Some(PendingPipeline {
                inputs: input_rx,
                results: result_tx,
            }),
            exit: CancellationToken::new(),
            abort: CancellationToken::new(),
            driver: None,
            monitor: None,
            executors: Vec::new(),
        }
    }

    /// Start the executors, the pipeline driver and the monitor
    ///
    /// Must be called from within a tokio runtime. Calling it again is a no-op.
    pub fn initialize(&mut self) {
        let Some(pending) = self.pending.take() else {
            warn!("Inference manager already initialized");
            return;
        };

        let count = self.settings.executors.max(1);
        let mut handles = Vec::with_capacity(count);
        let mut abort_signals = Vec::with_capacity(count);
        for id in 0..count {
            let (handle, join) = spawn_executor(
                id,
                Arc::clone(&self.client),
                &self.settings.executor,
                self.exit.child_token(),
            );
            abort_signals.push(handle.abort_signal());
            handles.push(handle);
            self.executors.push(join);
        }

        let handler = InferencePipelineHandler::new(
            pending.inputs,
            pending.results,
            self.settings.poll_timeout,
        );
        self.driver = Some(tokio::spawn(drive_pipeline(
            handler,
            handles,
            self.exit.clone(),
            self.settings.poll_timeout,
        )));
        self.monitor = Some(tokio::spawn(monitor_executors(
            abort_signals,
            self.abort.clone(),
            self.exit.clone(),
            self.settings.monitor_interval,
        )));

        info!(
            executors = count,
            queue_capacity = self.settings.queue_capacity,
            "Inference manager started"
        );
    }

    /// Queue a frame for inference without waiting
    ///
    /// Returns false when the input queue is full; the frame is dropped.
    pub fn schedule_inference(&self, frame: Frame) -> bool {
        match self.inputs.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                debug!(sequence = e.into_inner().sequence, "Input queue full, frame dropped");
                false
            }
        }
    }

    /// Take a finished result if one is ready
    pub fn pull_result(&mut self) -> Option<InferenceResult> {
        self.results.try_recv().ok()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn abort_signal(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn queue_capacity(&self) -> usize {
        self.settings.queue_capacity
    }

    pub fn executor_count(&self) -> usize {
        self.settings.executors
    }

    /// Stop the driver and monitor, then every executor
    pub async fn shutdown(&mut self) {
        self.exit.cancel();

        for (name, task) in [("driver", self.driver.take()), ("monitor", self.monitor.take())] {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(task = name, error = %e, "Pipeline task ended abnormally");
                }
            }
        }
        for (id, join) in self.executors.drain(..).enumerate() {
            if let Err(e) = join.await {
                warn!(executor = id, error = %e, "Executor task ended abnormally");
            }
        }
        info!("Inference manager stopped");
    }
}

impl Drop for InferenceManager {
    fn drop(&mut self) {
        self.exit.cancel();
    }
}

async fn drive_pipeline(
    mut handler: InferencePipelineHandler,
    mut executors: Vec<ExecutorHandle>,
    exit: CancellationToken,
    poll_timeout: Duration,
) {
    if executors.is_empty() {
        return;
    }
    let mut states: Vec<PipelineState> = executors.iter().map(|_| PipelineState::PullResult).collect();

    // Every executor needs one task in flight before pulling results means anything
    for (executor, state) in executors.iter_mut().zip(states.iter_mut()) {
        let frame = loop {
            if exit.is_cancelled() {
                return;
            }
            if let Some(frame) = handler.pull_input(poll_timeout).await {
                break frame;
            }
        };
        match executor.try_push(frame) {
            Ok(()) => executor.initialized = true,
            Err(frame) => *state = PipelineState::PushInput(frame),
        }
    }
    debug!(executors = executors.len(), "Initial fill complete");

    let mut index = 0;
    while !exit.is_cancelled() {
        let state = std::mem::take(&mut states[index]);
        states[index] = match handler.run(&mut executors[index], state).await {
            PipelineState::Finished => PipelineState::PullResult,
            held => held,
        };

        index = (index + 1) % executors.len();
        if index == 0 {
            tokio::task::yield_now().await;
        }
    }
    debug!("Pipeline driver stopped");
}

async fn monitor_executors(
    executor_aborts: Vec<CancellationToken>,
    abort: CancellationToken,
    exit: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = exit.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if abort.is_cancelled() {
            continue;
        }
        if let Some(id) = executor_aborts.iter().position(|a| a.is_cancelled()) {
            error!(executor = id, "Executor aborted, raising pipeline abort");
            abort.cancel();
        }
    }
    debug!("Executor monitor stopped");
}
