//! Test doubles shared by the unit tests

use crate::client::{ClientError, InferenceClient, InputMap};
use crate::frame::{Frame, TensorMap};
use crate::stream_reader::StreamReader;
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum MockBehavior {
    Succeed,
    /// Succeed after sleeping
    Delay(Duration),
    FailTransient,
    FailFatal,
    Panic,
}

#[derive(Debug)]
pub struct MockClient {
    behavior: MockBehavior,
    ready: bool,
    calls: AtomicUsize,
    ready_checks: AtomicUsize,
}

impl MockClient {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ready: true,
            calls: AtomicUsize::new(0),
            ready_checks: AtomicUsize::new(0),
        }
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn ready_checks(&self) -> usize {
        self.ready_checks.load(Ordering::SeqCst)
    }

    fn outputs() -> TensorMap {
        TensorMap::from([("scores".to_string(), ArrayD::zeros(IxDyn(&[1, 2])))])
    }
}

#[async_trait]
impl InferenceClient for MockClient {
    async fn predict(&self, _inputs: InputMap) -> Result<TensorMap, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Succeed => Ok(Self::outputs()),
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Self::outputs())
            }
            MockBehavior::FailTransient => Err(ClientError::Server {
                status: 503,
                message: "overloaded".to_string(),
            }),
            MockBehavior::FailFatal => Err(ClientError::ModelNotFound("mock".to_string())),
            MockBehavior::Panic => panic!("mock client panicked"),
        }
    }

    async fn model_ready(&self) -> Result<bool, ClientError> {
        self.ready_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.ready)
    }
}

/// Reader whose reads start succeeding after a number of `initialize` calls
#[derive(Debug)]
pub struct ScriptedReader {
    succeed_after_init: usize,
    opens: bool,
    inits: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    next_sequence: u64,
}

impl ScriptedReader {
    fn with_threshold(succeed_after_init: usize) -> Self {
        Self {
            succeed_after_init,
            opens: true,
            inits: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
            next_sequence: 0,
        }
    }

    pub fn healthy() -> Self {
        Self::with_threshold(1)
    }

    /// Fails every read until it has been reopened once
    pub fn failing_until_reinit() -> Self {
        Self::with_threshold(2)
    }

    pub fn always_failing() -> Self {
        Self::with_threshold(usize::MAX)
    }

    /// Cannot even be opened
    pub fn unavailable() -> Self {
        Self {
            opens: false,
            ..Self::always_failing()
        }
    }

    pub fn init_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inits)
    }

    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

#[async_trait]
impl StreamReader for ScriptedReader {
    async fn initialize(&mut self) -> bool {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.opens
    }

    async fn get_frame(&mut self) -> Option<Frame> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.inits.load(Ordering::SeqCst) < self.succeed_after_init {
            return None;
        }
        let frame = Frame::new(self.next_sequence, 2, 2, 3, vec![64; 12]);
        self.next_sequence += 1;
        Some(frame)
    }

    fn url(&self) -> &str {
        "scripted://test"
    }
}
