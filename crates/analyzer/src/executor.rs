//! Inference executors
//!
//! Each executor is an isolated tokio task owning a pair of bounded channels.
//! It takes one frame at a time, performs the remote call and hands the result
//! back. A fatal endpoint error raises the executor's abort token and stops
//! the task; a panic inside the task is turned into the same abort signal.

use crate::client::{ClientError, InferenceClient, InferenceInput, InputMap};
use crate::frame::{Frame, InferenceResult};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const JPEG_QUALITY: u8 = 90;

/// How frames are handed to the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEncoding {
    /// NHWC FP32 tensor
    Structured,
    /// JPEG bytes through the binary extension
    Binary,
}

impl InputEncoding {
    pub fn from_binary_flag(binary: bool) -> Self {
        if binary {
            InputEncoding::Binary
        } else {
            InputEncoding::Structured
        }
    }
}

/// Build the request inputs for one frame
pub fn encode_frame(
    frame: &Frame,
    input_name: &str,
    encoding: InputEncoding,
) -> Result<InputMap, ClientError> {
    let input = match encoding {
        InputEncoding::Structured => InferenceInput::Tensor(
            frame
                .to_tensor()
                .map_err(|e| ClientError::Encode(e.to_string()))?,
        ),
        InputEncoding::Binary => InferenceInput::Encoded(encode_jpeg(frame)?),
    };
    Ok(HashMap::from([(input_name.to_string(), input)]))
}

fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, ClientError> {
    let color = match frame.channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        n => {
            return Err(ClientError::Encode(format!(
                "JPEG input needs 1 or 3 channels, frame has {}",
                n
            )))
        }
    };
    let expected = Frame::byte_len(frame.width, frame.height, frame.channels);
    if frame.data.len() != expected {
        return Err(ClientError::Encode(format!(
            "frame holds {} bytes, geometry needs {}",
            frame.data.len(),
            expected
        )));
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .write_image(&frame.data, frame.width, frame.height, color)
        .map_err(|e| ClientError::Encode(e.to_string()))?;
    Ok(jpeg)
}

/// Settings shared by every executor in a pool
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub input_name: String,
    pub encoding: InputEncoding,
    /// Capacity of each executor's task and result channels
    pub channel_capacity: usize,
}

/// The manager's side of one executor
#[derive(Debug)]
pub struct ExecutorHandle {
    pub id: usize,
    tasks: mpsc::Sender<Frame>,
    results: mpsc::Receiver<InferenceResult>,
    /// Set once the executor has been given its first task
    pub initialized: bool,
    abort: CancellationToken,
}

impl ExecutorHandle {
    /// Hand a task to the executor without waiting; gives the frame back if it cannot take it
    pub fn try_push(&self, frame: Frame) -> Result<(), Frame> {
        self.tasks.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) | TrySendError::Closed(frame) => frame,
        })
    }

    /// Take a finished result, waiting at most `wait`
    pub async fn pull(&mut self, wait: Duration) -> Option<InferenceResult> {
        match tokio::time::timeout(wait, self.results.recv()).await {
            Ok(result) => result,
            Err(_) => None,
        }
    }

    /// A fresh handle plus the executor-side channel ends
    pub(crate) fn channels(
        id: usize,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>, mpsc::Sender<InferenceResult>) {
        let capacity = capacity.max(1);
        let (task_tx, task_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        let handle = Self {
            id,
            tasks: task_tx,
            results: result_rx,
            initialized: false,
            abort: CancellationToken::new(),
        };
        (handle, task_rx, result_tx)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn abort_signal(&self) -> CancellationToken {
        self.abort.clone()
    }
}

struct InferenceExecutor {
    id: usize,
    client: Arc<dyn InferenceClient>,
    input_name: String,
    encoding: InputEncoding,
    tasks: mpsc::Receiver<Frame>,
    results: mpsc::Sender<InferenceResult>,
    shutdown: CancellationToken,
    abort: CancellationToken,
}

impl InferenceExecutor {
    async fn run(mut self) {
        info!(executor = self.id, "Executor started");
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = self.tasks.recv() => match task {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let sequence = frame.sequence;
            let outcome = match encode_frame(&frame, &self.input_name, self.encoding) {
                Ok(inputs) => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    outcome = self.client.predict(inputs) => outcome,
                },
                Err(e) => Err(e),
            };

            match &outcome {
                Ok(_) => debug!(executor = self.id, sequence, "Inference complete"),
                Err(e) if e.is_fatal() => {
                    error!(executor = self.id, sequence, error = %e, "Fatal inference error, aborting executor");
                    self.abort.cancel();
                    break;
                }
                Err(e) => warn!(executor = self.id, sequence, error = %e, "Inference failed"),
            }

            let result = InferenceResult {
                executor: self.id,
                frame,
                outcome,
            };
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                sent = self.results.send(result) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        info!(executor = self.id, "Executor stopped");
    }
}

/// Start one executor task
///
/// The returned join handle completes once the executor has stopped, whether
/// by shutdown, abort or panic.
pub fn spawn_executor(
    id: usize,
    client: Arc<dyn InferenceClient>,
    settings: &ExecutorSettings,
    shutdown: CancellationToken,
) -> (ExecutorHandle, JoinHandle<()>) {
    let (handle, task_rx, result_tx) = ExecutorHandle::channels(id, settings.channel_capacity);
    let abort = handle.abort_signal();

    let executor = InferenceExecutor {
        id,
        client,
        input_name: settings.input_name.clone(),
        encoding: settings.encoding,
        tasks: task_rx,
        results: result_tx,
        shutdown,
        abort: abort.clone(),
    };

    let inner = tokio::spawn(executor.run());
    let join = tokio::spawn(async move {
        if let Err(e) = inner.await {
            if e.is_panic() {
                error!(executor = id, "Executor panicked, aborting");
                abort.cancel();
            }
        }
    });
    (handle, join)
}
