//! In-process transport
//!
//! Frames travel over unbounded tokio queues, so ordering and delivery are
//! exactly what the queue guarantees. Used by tests and for embedding both
//! sides of a bridge in one process.

use super::{Channel, FrameSink, FrameSource};
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sending end of an in-process pipe
#[derive(Debug)]
pub struct MemorySink {
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// Receiving end of an in-process pipe
#[derive(Debug)]
pub struct MemorySource {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// One-directional in-process pipe
pub fn pipe() -> (MemorySink, MemorySource) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        MemorySink {
            sender: Some(sender),
        },
        MemorySource { receiver },
    )
}

/// Two channels wired back to back: what one sends, the other receives
pub fn pair() -> (Channel, Channel) {
    let (a_sink, b_source) = pipe();
    let (b_sink, a_source) = pipe();
    (
        Channel::new(a_sink, a_source).with_label("memory-a"),
        Channel::new(b_sink, b_source).with_label("memory-b"),
    )
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Vec<u8>) -> BridgeResult<()> {
        let sender = self.sender.as_ref().ok_or(BridgeError::ChannelClosed)?;
        sender.send(frame).map_err(|_| BridgeError::ChannelClosed)
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.sender.take();
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn receive(&mut self) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.receiver.recv().await)
    }
}
