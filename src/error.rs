//! Error types for capture sessions and transcript access.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors raised by the capture engine and the transcript store.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The terminal emulator could not be started. No session exists.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The terminal process group did not exit after `SIGTERM` in time. It is
    /// killed instead; this is only ever logged.
    #[error("process group {pgid} still alive after {waited:?}")]
    TerminationTimeout { pgid: u32, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transcript not found: {0}")]
    NotFound(String),

    /// The requested transcript name is not a plain file name inside the
    /// transcript directory.
    #[error("invalid transcript name: {0}")]
    InvalidName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::NotFound("POSTCODE_LOG_x.txt".into());
        assert_eq!(err.to_string(), "transcript not found: POSTCODE_LOG_x.txt");
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        use std::error::Error as _;

        let err = CaptureError::Spawn {
            program: "minicom".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().starts_with("failed to spawn `minicom`"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: CaptureError = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert!(matches!(err, CaptureError::Io(_)));
    }
}
