use std::path::PathBuf;

/// Everything that can terminate a conversion.
///
/// Any of these raised inside the video pump is terminal for the whole
/// session; `UserCancelled` is the one kind that returns the session to
/// `Queued` instead of `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("frame buffer has {actual} bytes, expected {expected} for its dimensions")]
    BufferAccess { expected: usize, actual: usize },

    #[error("tile output count mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("tile output {index} is missing or malformed")]
    InvalidOutput { index: usize },

    #[error("inference failed")]
    InferenceFailed(#[source] anyhow::Error),

    #[error("track reader failed")]
    Reader(#[source] anyhow::Error),

    #[error("track writer failed")]
    Writer(#[source] anyhow::Error),

    #[error("cannot replace existing output at {path}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source is missing a required video or audio track")]
    TracksNotFound,

    #[error("conversion cancelled")]
    UserCancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_counts() {
        let err = ConvertError::SizeMismatch {
            expected: 15,
            actual: 14,
        };
        assert_eq!(
            err.to_string(),
            "tile output count mismatch: expected 15, got 14"
        );

        let err = ConvertError::BufferAccess {
            expected: 24,
            actual: 20,
        };
        assert!(err.to_string().contains("20 bytes"));
    }

    #[test]
    fn cancellation_reads_as_cancelled_not_failed() {
        assert_eq!(
            ConvertError::UserCancelled.to_string(),
            "conversion cancelled"
        );
        assert!(std::error::Error::source(&ConvertError::UserCancelled).is_none());
    }

    #[test]
    fn reader_error_preserves_cause() {
        let err = ConvertError::Reader(anyhow::anyhow!("pipe closed"));
        let source = std::error::Error::source(&err).expect("cause retained");
        assert_eq!(source.to_string(), "pipe closed");
    }
}
