//! Codec error types.

/// Errors raised while framing or converting wire messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A frame announced (or was about to carry) more bytes than allowed.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The protobuf bytes could not be parsed or written.
    #[error("protobuf error: {0}")]
    Protobuf(#[from] quick_protobuf::Error),

    /// A field required by the domain type was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field was present but its content is not acceptable.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Shorthand for [`CodecError::InvalidField`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
