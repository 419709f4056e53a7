//! Per-use-case frame processing hooks

use crate::frame::{Frame, TensorMap};
use tracing::{debug, info};

/// Pre/postprocessing invoked inline by the analyzer loop
pub trait FrameProcessor: Send {
    fn preprocess(&mut self, frame: Frame) -> Frame;

    fn postprocess(&mut self, frame: Frame, outputs: TensorMap);
}

/// Forwards frames unchanged and discards outputs
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughProcessor;

impl FrameProcessor for PassthroughProcessor {
    fn preprocess(&mut self, frame: Frame) -> Frame {
        frame
    }

    fn postprocess(&mut self, _frame: Frame, _outputs: TensorMap) {}
}

/// Logs the output tensor shapes of every processed frame
#[derive(Debug, Default)]
pub struct LoggingProcessor {
    processed: u64,
}

impl LoggingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl FrameProcessor for LoggingProcessor {
    fn preprocess(&mut self, frame: Frame) -> Frame {
        frame
    }

    fn postprocess(&mut self, frame: Frame, outputs: TensorMap) {
        self.processed += 1;
        let mut names: Vec<&String> = outputs.keys().collect();
        names.sort();
        for name in names {
            debug!(
                sequence = frame.sequence,
                output = %name,
                shape = ?outputs[name].shape(),
                "Inference output"
            );
        }
        if self.processed % 100 == 0 {
            info!(processed = self.processed, "Results postprocessed");
        }
    }
}
