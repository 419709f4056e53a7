//! Frames and inference results flowing through the pipeline
//!
//! Every value here has exactly one owner at a time; queues hand them off
//! by move and nothing is shared between stages.

use crate::client::ClientError;
use ndarray::{ArrayD, IxDyn, ShapeError};
use std::collections::HashMap;

/// Output tensors returned by the endpoint, keyed by output name
pub type TensorMap = HashMap<String, ArrayD<f32>>;

/// One raw image read from the stream
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Reader-assigned position in the stream, carried through untouched
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Interleaved pixel bytes, row major
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, channels: u32, data: Vec<u8>) -> Self {
        Self {
            sequence,
            width,
            height,
            channels,
            data,
        }
    }

    /// Number of bytes a frame of the given geometry occupies
    pub fn byte_len(width: u32, height: u32, channels: u32) -> usize {
        width as usize * height as usize * channels as usize
    }

    /// Convert to an NHWC `[1, height, width, channels]` FP32 tensor
    pub fn to_tensor(&self) -> Result<ArrayD<f32>, ShapeError> {
        let shape = [
            1,
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        ];
        let values: Vec<f32> = self.data.iter().map(|&b| b as f32).collect();
        ArrayD::from_shape_vec(IxDyn(&shape), values)
    }
}

/// A frame paired with what the endpoint returned for it
///
/// A transient endpoint failure still yields a result (with `Err`) so the
/// executor slot that produced it is released.
#[derive(Debug)]
pub struct InferenceResult {
    /// Index of the executor that ran the request
    pub executor: usize,
    pub frame: Frame,
    pub outcome: Result<TensorMap, ClientError>,
}
