//! Mount bridge wire protocol.
//!
//! A connection carries exactly one exchange: the client writes the raw
//! command text, the daemon answers with one reply frame and closes. There is
//! no length prefix or terminator; each side reads at most
//! [`MAX_FRAME_SIZE`] bytes.
//!
//! Reply frames:
//! - `Success:<stdout>`
//! - `Fail: <command>, error: <error text>`
//!
//! Anything not starting with [`SUCCESS_MARKER`] is a failure whose entire
//! text is the error detail.

use thiserror::Error;

/// Upper bound on both command and reply frames.
pub const MAX_FRAME_SIZE: usize = 2048;

/// Prefix of a successful reply.
pub const SUCCESS_MARKER: &str = "Success:";

/// Prefix of a failed reply.
pub const FAIL_MARKER: &str = "Fail: ";

const _: () = {
    assert!(SUCCESS_MARKER.len() == 8);
    assert!(MAX_FRAME_SIZE > SUCCESS_MARKER.len());
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("command is {len} bytes, frame limit is {max}", max = MAX_FRAME_SIZE)]
    FrameTooLarge { len: usize },
}

/// Validate a command and return the bytes to put on the wire.
pub fn encode_command(command: &str) -> Result<&[u8], ProtocolError> {
    if command.trim().is_empty() {
        return Err(ProtocolError::EmptyCommand);
    }
    if command.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { len: command.len() });
    }
    Ok(command.as_bytes())
}

/// A reply frame, as produced by the daemon or parsed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command exited zero; carries its stdout.
    Success(String),
    /// Anything else; carries the full reply text.
    Failure(String),
}

impl Reply {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self::Success(stdout.into())
    }

    pub fn failure(command: &str, error: impl std::fmt::Display) -> Self {
        Self::Failure(format!("{FAIL_MARKER}{command}, error: {error}"))
    }

    /// Serialize to a frame, truncated to [`MAX_FRAME_SIZE`] on a char boundary.
    pub fn encode(&self) -> Vec<u8> {
        let text = match self {
            Self::Success(out) => format!("{SUCCESS_MARKER}{out}"),
            Self::Failure(text) => text.clone(),
        };
        truncate_to_frame(text).into_bytes()
    }

    /// Interpret a received frame.
    pub fn parse(frame: &[u8]) -> Self {
        let text = String::from_utf8_lossy(frame);
        match text.strip_prefix(SUCCESS_MARKER) {
            Some(rest) => Self::Success(rest.to_string()),
            None => Self::Failure(text.into_owned()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn truncate_to_frame(mut text: String) -> String {
    if text.len() <= MAX_FRAME_SIZE {
        return text;
    }
    let mut end = MAX_FRAME_SIZE;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}
