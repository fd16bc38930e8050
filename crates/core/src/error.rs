/// Result alias that carries the crate-wide [`StudioError`] type.
pub type Result<T> = std::result::Result<T, StudioError>;

/// Common error type for the editing and export pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    /// Input bytes could not be decoded into PCM audio.
    #[error("could not decode audio: {0}")]
    Decode(String),
    /// A remote intro/outro asset could not be retrieved.
    #[error("could not fetch `{url}`: {reason}")]
    Fetch { url: String, reason: String },
    /// Enhancement or concatenation failed.
    #[error("render failed: {0}")]
    Render(String),
    /// The rendered buffer could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(String),
    /// Tag metadata could not be embedded into the encoded container.
    #[error("metadata embedding failed: {0}")]
    MetadataEmbed(String),
    /// The stored draft exists but cannot be read back.
    #[error("draft is corrupt: {0}")]
    DraftCorrupt(String),
    /// The operation was rejected because it would break an invariant.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no segment with id {0}")]
    UnknownSegment(String),
    #[error("export was cancelled")]
    Cancelled,
    /// A shared resource was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl StudioError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the session stays editable after this error.
    ///
    /// Only a poisoned shared resource leaves the session unusable; every
    /// taxonomy error is recoverable for editing even when it is fatal to an
    /// export attempt.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Poisoned(_))
    }

    /// Whether this error aborts an in-progress export.
    pub fn is_fatal_to_export(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Encode(_) | Self::Render(_) | Self::Cancelled | Self::Io(_)
        )
    }
}

impl From<&str> for StudioError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for StudioError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<hound::Error> for StudioError {
    fn from(value: hound::Error) -> Self {
        Self::Encode(value.to_string())
    }
}
