//! Stream sources
//!
//! A reader owns the source handle and hands out one frame per call. Read
//! failures are logged and reported as `None`; they never propagate as errors
//! because the supervisor decides what a failing stream means.

use crate::config::StreamConfig;
use crate::frame::Frame;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Source of frames for the analyzer
#[async_trait]
pub trait StreamReader: Send {
    /// Open (or reopen) the source; safe to call after any failure
    async fn initialize(&mut self) -> bool;

    /// Next frame, or `None` if the read failed or timed out
    async fn get_frame(&mut self) -> Option<Frame>;

    fn url(&self) -> &str;
}

type Source = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Reads fixed-size raw frames from stdin (`-`), a file or FIFO, or `tcp://host:port`
pub struct RawFrameReader {
    url: String,
    width: u32,
    height: u32,
    channels: u32,
    read_timeout: Duration,
    source: Option<Source>,
    next_sequence: u64,
}

impl RawFrameReader {
    pub fn new(
        url: impl Into<String>,
        width: u32,
        height: u32,
        channels: u32,
        read_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            channels,
            read_timeout,
            source: None,
            next_sequence: 0,
        }
    }

    pub fn from_config(cfg: &StreamConfig) -> Self {
        Self::new(
            cfg.url.clone(),
            cfg.width,
            cfg.height,
            cfg.channels,
            cfg.read_timeout(),
        )
    }

    pub fn frame_len(&self) -> usize {
        Frame::byte_len(self.width, self.height, self.channels)
    }

    async fn open(&self) -> std::io::Result<Source> {
        if self.url == "-" {
            return Ok(Box::new(tokio::io::stdin()));
        }
        if let Some(addr) = self.url.strip_prefix("tcp://") {
            let stream = tokio::time::timeout(self.read_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
                })??;
            return Ok(Box::new(stream));
        }
        let file = tokio::fs::File::open(&self.url).await?;
        Ok(Box::new(file))
    }
}

#[async_trait]
impl StreamReader for RawFrameReader {
    async fn initialize(&mut self) -> bool {
        self.source = None;
        match self.open().await {
            Ok(source) => {
                info!(url = %self.url, frame_bytes = self.frame_len(), "Stream opened");
                self.source = Some(source);
                true
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Failed to open stream");
                false
            }
        }
    }

    async fn get_frame(&mut self) -> Option<Frame> {
        let len = self.frame_len();
        let source = self.source.as_mut()?;
        let mut data = vec![0u8; len];

        let outcome = tokio::time::timeout(self.read_timeout, source.read_exact(&mut data)).await;
        match outcome {
            Ok(Ok(_)) => {
                let frame = Frame::new(
                    self.next_sequence,
                    self.width,
                    self.height,
                    self.channels,
                    data,
                );
                self.next_sequence += 1;
                debug!(sequence = frame.sequence, "Frame read");
                Some(frame)
            }
            // A partial read_exact leaves the source mid-frame; only a reopen
            // brings it back to a frame boundary.
            Ok(Err(e)) => {
                warn!(url = %self.url, error = %e, "Frame read failed");
                self.source = None;
                None
            }
            Err(_) => {
                warn!(url = %self.url, timeout = ?self.read_timeout, "Frame read timed out");
                self.source = None;
                None
            }
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}
