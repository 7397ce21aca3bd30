//! Error types for message encoding.

use std::fmt;
use std::io;

/// Result type alias for encoding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Part of the message being written when an I/O error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Top-level message headers.
    Headers,
    /// The `multipart/mixed` envelope (opening or closing delimiter).
    Envelope,
    /// The `multipart/alternative` body section.
    Body,
    /// An attachment part.
    Attachment {
        /// Position of the attachment in the message.
        index: usize,
        /// Attachment file name as registered.
        filename: String,
    },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Headers => f.write_str("headers"),
            Self::Envelope => f.write_str("multipart envelope"),
            Self::Body => f.write_str("body"),
            Self::Attachment { index, filename } => {
                write!(f, "attachment #{index} ({filename})")
            }
        }
    }
}

/// Encoding error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A boundary could not be generated. Nothing was written.
    #[error("Cannot generate boundary: {0}")]
    Entropy(#[source] mimer_mime::Error),

    /// The sink or an attachment source failed.
    #[error("I/O error while writing {stage}: {source}")]
    Io {
        /// Stage that failed.
        stage: Stage,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Creates an I/O error for the given stage.
    #[must_use]
    pub const fn io(stage: Stage, source: io::Error) -> Self {
        Self::Io { stage, source }
    }

    /// Returns the stage that failed, if this is an I/O error.
    #[must_use]
    pub const fn stage(&self) -> Option<&Stage> {
        match self {
            Self::Io { stage, .. } => Some(stage),
            Self::Entropy(_) => None,
        }
    }

    /// Returns true if boundary generation failed.
    #[must_use]
    pub const fn is_entropy(&self) -> bool {
        matches!(self, Self::Entropy(_))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Headers.to_string(), "headers");
        assert_eq!(
            Stage::Attachment {
                index: 2,
                filename: "logo.png".into()
            }
            .to_string(),
            "attachment #2 (logo.png)"
        );
    }

    #[test]
    fn test_io_error_context() {
        let err = Error::io(Stage::Body, io::Error::other("disk full"));
        assert_eq!(err.stage(), Some(&Stage::Body));
        assert!(!err.is_entropy());
        assert_eq!(err.to_string(), "I/O error while writing body: disk full");
    }
}
