use crate::backend::ElementId;

/// Failure of an element or decoder play request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    /// The request was superseded by a newer one (station switch, quick
    /// pause).  Expected; never surfaced.
    #[error("play request aborted")]
    Aborted,
    #[error("unsupported stream: {0}")]
    Unsupported(String),
    #[error("playback rejected: {0}")]
    Rejected(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl PlaybackError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, PlaybackError::Aborted)
    }
}

/// Structured cause reported by a metadata decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderErrorKind {
    /// Read access to the stream was refused by origin policy.
    CrossOrigin,
    /// Connect/fetch failed or the connection dropped.
    Network,
    /// Upstream answered with a non-success status.
    Http(u16),
    /// Stream bytes could not be decoded.
    Decode,
    /// The decoder could not say; classification falls back to the message.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct DecoderError {
    pub kind: DecoderErrorKind,
    pub message: String,
    /// Text of the underlying cause, if any.
    pub cause: Option<String>,
}

impl DecoderError {
    pub fn new(kind: DecoderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("analysis graph not initialised")]
    NotInitialized,
    #[error("element content is cross-origin restricted")]
    CrossOrigin,
    /// A source was already bound to this element once; it can never be
    /// bound again.
    #[error("element {0:?} already carried a source node")]
    Tainted(ElementId),
    #[error("analysis unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("player loop has shut down")]
    Closed,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Decoder(#[from] DecoderError),
}
