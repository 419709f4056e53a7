//! Cooperative per-executor pipeline state machine
//!
//! One call to [`InferencePipelineHandler::run`] advances a single executor as
//! far as it can without blocking: pull its result, forward it to the global
//! output queue, take the next task from the global input queue and hand it to
//! the executor. Any step that cannot complete returns the current state with
//! its payload so the driver can move on to the next executor and resume here
//! on its next pass.

use crate::executor::ExecutorHandle;
use crate::frame::{Frame, InferenceResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Payload-free view of a [`PipelineState`], ordered by progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStep {
    PullResult,
    PushResult,
    PullInput,
    PushInput,
    Finished,
}

/// Progress of one executor's cycle, carrying whatever it currently holds
#[derive(Debug, Default)]
pub enum PipelineState {
    #[default]
    PullResult,
    PushResult(InferenceResult),
    PullInput,
    PushInput(Frame),
    Finished,
}

impl PipelineState {
    pub fn step(&self) -> PipelineStep {
        match self {
            PipelineState::PullResult => PipelineStep::PullResult,
            PipelineState::PushResult(_) => PipelineStep::PushResult,
            PipelineState::PullInput => PipelineStep::PullInput,
            PipelineState::PushInput(_) => PipelineStep::PushInput,
            PipelineState::Finished => PipelineStep::Finished,
        }
    }
}

/// Moves work between the global queues and individual executors
#[derive(Debug)]
pub struct InferencePipelineHandler {
    inputs: mpsc::Receiver<Frame>,
    results: mpsc::Sender<InferenceResult>,
    poll_timeout: Duration,
}

impl InferencePipelineHandler {
    pub fn new(
        inputs: mpsc::Receiver<Frame>,
        results: mpsc::Sender<InferenceResult>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            inputs,
            results,
            poll_timeout,
        }
    }

    /// Take the next task from the global input queue, waiting at most `wait`
    pub async fn pull_input(&mut self, wait: Duration) -> Option<Frame> {
        match tokio::time::timeout(wait, self.inputs.recv()).await {
            Ok(frame) => frame,
            Err(_) => None,
        }
    }

    /// Advance `executor` from `state` until a step fails or the cycle finishes
    ///
    /// Never goes backwards: the returned state is the input state when the
    /// first step could not complete, a later state otherwise, and
    /// [`PipelineState::Finished`] once the next task has been handed over.
    pub async fn run(
        &mut self,
        executor: &mut ExecutorHandle,
        mut state: PipelineState,
    ) -> PipelineState {
        loop {
            state = match state {
                // An executor that has never been given a task has nothing to return
                PipelineState::PullResult if !executor.initialized => PipelineState::PullInput,
                PipelineState::PullResult => match executor.pull(self.poll_timeout).await {
                    Some(result) => PipelineState::PushResult(result),
                    None => return PipelineState::PullResult,
                },
                PipelineState::PushResult(result) => match self.results.try_send(result) {
                    Ok(()) => PipelineState::PullInput,
                    Err(TrySendError::Full(result)) | Err(TrySendError::Closed(result)) => {
                        return PipelineState::PushResult(result)
                    }
                },
                PipelineState::PullInput => match self.pull_input(self.poll_timeout).await {
                    Some(frame) => PipelineState::PushInput(frame),
                    None => return PipelineState::PullInput,
                },
                PipelineState::PushInput(frame) => match executor.try_push(frame) {
                    Ok(()) => {
                        executor.initialized = true;
                        PipelineState::Finished
                    }
                    Err(frame) => return PipelineState::PushInput(frame),
                },
                PipelineState::Finished => return PipelineState::Finished,
            };
        }
    }
}
