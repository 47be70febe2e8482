//! Transport layer
//!
//! A `Channel` is an ordered, reliable, full-duplex stream of opaque frames.
//! It never looks inside a frame; decoding is the dispatcher's job.
//!
//! ## Available Transports
//!
//! - **Stream**: length-prefixed frames over TCP, process stdio or a spawned child
//! - **Memory**: two in-process channels wired back to back

pub mod memory;
pub mod stream;

pub use memory::{MemorySink, MemorySource};
pub use stream::{FrameReader, FrameWriter, StreamTransport};

use crate::error::BridgeResult;
use async_trait::async_trait;

/// Sending half of a channel
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame. Frames are delivered in the order they are sent.
    async fn send(&mut self, frame: Vec<u8>) -> BridgeResult<()>;

    /// Close the sending half; the peer sees a clean end of stream
    async fn close(&mut self) -> BridgeResult<()>;
}

/// Receiving half of a channel
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame, or `None` once the peer closed cleanly
    async fn receive(&mut self) -> BridgeResult<Option<Vec<u8>>>;
}

/// A full-duplex frame channel
pub struct Channel {
    label: String,
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
}

impl Channel {
    /// Build a channel from its two halves
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self::from_boxed(Box::new(sink), Box::new(source))
    }

    /// Build a channel from boxed halves
    pub fn from_boxed(sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self {
            label: "channel".to_string(),
            sink,
            source,
        }
    }

    /// Attach a label used in log lines
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Label used in log lines
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Split into label, sink and source
    pub fn into_parts(self) -> (String, Box<dyn FrameSink>, Box<dyn FrameSource>) {
        (self.label, self.sink, self.source)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
