//! In-stream status labels and the chat response sink.
//!
//! The chat response is a single text stream mixing progress notices with
//! model output. A notice is wrapped in a tag named after its label kind,
//! `<success>No tool calls detected</success>`, optionally followed by
//! `<br>`; the browser client styles each kind differently.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of an in-stream status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    /// Completed step.
    Success,
    /// Failed step (advisory).
    Error,
    /// Work in progress.
    Orange,
    /// Highlighted notice.
    Yellow,
    /// Persona hand-off greeting.
    Enhancement,
    /// Unrecognized routing argument.
    Bug,
    /// Pipeline step marker.
    Step,
    /// Neutral notice.
    White,
    /// Topic colour.
    Pink,
    /// Topic colour.
    Red,
    /// Topic colour.
    Warning,
    /// Informational notice.
    Info,
}

impl StatusLabel {
    /// Tag name written to the stream.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Orange => "orange",
            Self::Yellow => "yellow",
            Self::Enhancement => "enhancement",
            Self::Bug => "bug",
            Self::Step => "step",
            Self::White => "white",
            Self::Pink => "pink",
            Self::Red => "red",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl std::fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a label without a trailing line break.
pub fn label(kind: StatusLabel, text: &str) -> String {
    format!("<{kind}>{text}</{kind}>")
}

/// Render a label followed by `<br>`.
pub fn label_line(kind: StatusLabel, text: &str) -> String {
    format!("<{kind}>{text}</{kind}><br>")
}

/// Write half of a streamed chat response.
///
/// Every write is forwarded immediately; nothing is buffered on this side.
/// Writes after the client went away are dropped silently, and
/// [`ChatSink::is_closed`] lets the pipeline notice the disconnect.
#[derive(Debug, Clone)]
pub struct ChatSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChatSink {
    /// Create a sink and the receiver feeding the response body.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit a status label.
    pub fn label(&self, kind: StatusLabel, text: &str) {
        self.send(label(kind, text));
    }

    /// Emit a status label followed by a line break.
    pub fn label_line(&self, kind: StatusLabel, text: &str) {
        self.send(label_line(kind, text));
    }

    /// Emit raw model output.
    pub fn text(&self, fragment: &str) {
        self.send(fragment.to_owned());
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    fn send(&self, chunk: String) {
        if self.tx.send(chunk).is_err() {
            tracing::trace!("chat sink closed, dropping chunk");
        }
    }
}
