//! Messages exchanged between contexts over the bus.
//!
//! Every message is a variant of [`TransferMessage`], serialized as a JSON
//! object with an explicit `type` discriminant:
//!
//! ```text
//! {"type":"ready","fileName":"video.mp4"}
//! {"type":"progress","progress":0.4}
//! {"type":"status","status":"failed","retry":true}
//! {"type":"heartBeat"}
//! {"type":"heartBeatAck"}
//! {"type":"resumeUpload"}
//! {"type":"terminate"}
//! ```
//!
//! Listeners dispatch on [`MessageKind`]. Nothing may depend on the order in
//! which messages from different publishers arrive.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Status text published when an upload completes.
pub const STATUS_DONE: &str = "done";

/// Status text published when an upload fails at the network level.
pub const STATUS_FAILED: &str = "failed";

/// Status text published by the supervisor once a retry has been scheduled.
pub const STATUS_RETRYING: &str = "Retrying Upload...";

/// The only data unit that crosses context boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferMessage {
    /// The uploader accepted a file and began work.
    Ready {
        /// Name of the file being uploaded
        #[serde(rename = "fileName")]
        file_name: String,
    },

    /// Upload progress for the current attempt.
    Progress {
        /// Fraction of the payload sent, in `[0, 1]`
        #[serde(rename = "progress")]
        fraction: f64,
    },

    /// Terminal or informational state.
    Status {
        /// Human-readable status, rendered verbatim by the controller
        #[serde(rename = "status")]
        text: String,
        /// Set when a transport failure requires resumption
        #[serde(rename = "retry", default)]
        retry_requested: bool,
    },

    /// Supervisor asking whether an uploader is alive right now.
    #[serde(rename = "heartBeat")]
    HeartbeatProbe,

    /// A live uploader's answer to a probe.
    #[serde(rename = "heartBeatAck")]
    HeartbeatAck,

    /// Supervisor telling an uploader to resume from durable state.
    #[serde(rename = "resumeUpload")]
    ResumeCommand,

    /// Request that a worker end its own lifetime.
    Terminate,
}

/// Fieldless discriminant of [`TransferMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`TransferMessage::Ready`]
    Ready,
    /// [`TransferMessage::Progress`]
    Progress,
    /// [`TransferMessage::Status`]
    Status,
    /// [`TransferMessage::HeartbeatProbe`]
    HeartbeatProbe,
    /// [`TransferMessage::HeartbeatAck`]
    HeartbeatAck,
    /// [`TransferMessage::ResumeCommand`]
    ResumeCommand,
    /// [`TransferMessage::Terminate`]
    Terminate,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Progress => "progress",
            Self::Status => "status",
            Self::HeartbeatProbe => "heartBeat",
            Self::HeartbeatAck => "heartBeatAck",
            Self::ResumeCommand => "resumeUpload",
            Self::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

impl TransferMessage {
    /// Create a `Ready` message.
    pub fn ready(file_name: impl Into<String>) -> Self {
        Self::Ready {
            file_name: file_name.into(),
        }
    }

    /// Create a `Progress` message, clamping the fraction into `[0, 1]`.
    ///
    /// NaN is reported as no progress.
    pub fn progress(fraction: f64) -> Self {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        Self::Progress { fraction }
    }

    /// Create a `Status` message.
    pub fn status(text: impl Into<String>, retry_requested: bool) -> Self {
        Self::Status {
            text: text.into(),
            retry_requested,
        }
    }

    /// Get the discriminant of this message.
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Ready { .. } => MessageKind::Ready,
            Self::Progress { .. } => MessageKind::Progress,
            Self::Status { .. } => MessageKind::Status,
            Self::HeartbeatProbe => MessageKind::HeartbeatProbe,
            Self::HeartbeatAck => MessageKind::HeartbeatAck,
            Self::ResumeCommand => MessageKind::ResumeCommand,
            Self::Terminate => MessageKind::Terminate,
        }
    }

    /// Whether this is a status asking for the transfer to be resumed.
    pub const fn is_retry_request(&self) -> bool {
        matches!(
            self,
            Self::Status {
                retry_requested: true,
                ..
            }
        )
    }

    /// Encode the message as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a message from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a known message.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
