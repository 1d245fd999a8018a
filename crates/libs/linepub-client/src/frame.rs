//! Line framing for the `pub <topic> <payload>\n` protocol.

use std::fmt;

use crate::error::ClientError;

pub const PUBLISH_VERB: &str = "pub";

/// Bytes the receive buffer may hold without seeing a newline before they are
/// thrown away.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// A parsed `pub` frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.topic, self.payload)
    }
}

/// Checks that `topic` is a single non-empty token.
///
/// Applies to both directions: a topic that fails here can neither be sent
/// intact nor ever come out of [`parse_line`].
pub fn validate_topic(topic: &str) -> Result<(), ClientError> {
    if topic.is_empty() {
        return Err(ClientError::invalid_frame("topic is empty"));
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(ClientError::invalid_frame(format!("topic {topic:?} contains whitespace")));
    }
    Ok(())
}

/// Builds the outbound line for a publish, newline included.
///
/// The topic must be a single non-empty token and the payload must fit on one
/// line, otherwise the peer would parse a different frame than the one sent.
pub fn encode_publish(topic: &str, payload: &str) -> Result<String, ClientError> {
    validate_topic(topic)?;
    if payload.contains(['\n', '\r']) {
        return Err(ClientError::invalid_frame("payload contains a line break"));
    }

    let mut line = String::with_capacity(PUBLISH_VERB.len() + topic.len() + payload.len() + 3);
    line.push_str(PUBLISH_VERB);
    line.push(' ');
    line.push_str(topic);
    line.push(' ');
    line.push_str(payload);
    line.push('\n');
    Ok(line)
}

/// Parses one received line (without its terminator).
///
/// Returns `None` for anything that is not `pub <topic> <payload>`: blank
/// lines, other verbs, missing fields or an empty topic. The payload is
/// everything after the second space, inner spaces included.
pub fn parse_line(line: &str) -> Option<Message> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut fields = line.splitn(3, ' ');
    let verb = fields.next()?;
    let topic = fields.next()?;
    let payload = fields.next()?;

    if verb != PUBLISH_VERB || topic.is_empty() {
        return None;
    }

    Some(Message::new(topic, payload))
}

/// Accumulates raw socket reads and hands back complete lines.
///
/// Works on bytes so a multi-byte character split across two reads is only
/// decoded once its line is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Removes and returns the first complete line, without its `\n`.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        Some(line)
    }

    /// Drops the pending bytes once they exceed [`MAX_PENDING_BYTES`].
    /// Call after draining complete lines. Returns how many bytes were lost.
    pub fn discard_overflow(&mut self) -> Option<usize> {
        if self.pending.len() <= MAX_PENDING_BYTES {
            return None;
        }
        let dropped = self.pending.len();
        self.pending.clear();
        Some(dropped)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
