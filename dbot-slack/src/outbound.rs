//! Outbound message frames: build, size-check, and hand to the event loop for writing.

use dbot_core::{DbotError, LoopHandle, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::Frame;

/// Largest serialized frame the RTM endpoint accepts.
pub const MAX_PAYLOAD_BYTES: usize = 16_000;

/// `{"id":1,"type":"message","text":…,"channel":…}`
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a> {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: &'a str,
    pub channel: &'a str,
}

impl<'a> OutboundFrame<'a> {
    pub fn message(channel: &'a str, text: &'a str) -> Self {
        Self {
            id: 1,
            kind: "message",
            text,
            channel,
        }
    }
}

/// Serializes a message frame, rejecting payloads over [`MAX_PAYLOAD_BYTES`].
pub fn encode_message(channel: &str, text: &str) -> Result<String> {
    let payload = serde_json::to_string(&OutboundFrame::message(channel, text))?;
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(DbotError::PayloadTooLarge {
            limit: MAX_PAYLOAD_BYTES,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

/// Validates outbound text and defers the transport write onto the event loop, so callers
/// never block on I/O. No queue of its own: ordering is the loop's FIFO.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    handle: LoopHandle,
    frames: mpsc::UnboundedSender<Frame>,
}

impl OutboundSender {
    pub fn new(handle: LoopHandle, frames: mpsc::UnboundedSender<Frame>) -> Self {
        Self { handle, frames }
    }

    pub fn send(&self, channel: &str, text: &str) -> Result<()> {
        let payload = encode_message(channel, text)?;
        self.submit(payload)
    }

    /// Sends each text in order. Every text is validated before any write is queued, so a
    /// rejected batch writes nothing.
    pub fn send_all<S: AsRef<str>>(&self, channel: &str, texts: &[S]) -> Result<usize> {
        let payloads = texts
            .iter()
            .map(|text| encode_message(channel, text.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let count = payloads.len();
        for payload in payloads {
            self.submit(payload)?;
        }
        debug!(channel = %channel, count, "outbound: queued messages");
        Ok(count)
    }

    fn submit(&self, payload: String) -> Result<()> {
        let frames = self.frames.clone();
        self.handle.defer(move || {
            let bytes = payload.len();
            if frames.send(Frame::Text(payload)).is_err() {
                warn!(bytes, "outbound: transport is gone, dropping frame");
            }
        })
    }
}
