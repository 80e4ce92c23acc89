//! Setup-time error types shared by the server binary.
//!
//! Session-level failures never surface as errors; they drain the affected
//! session and stay inside it. The only errors that propagate are the ones
//! the process cannot recover from: a bad listen address or a listener that
//! cannot be bound. Those map to a non-zero exit code in `main`.

use std::fmt;

#[derive(Debug)]
pub enum SetupError {
    /// The listener could not be bound to the configured address.
    Bind { addr: String, source: std::io::Error },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Bind { addr, source } => {
                write!(f, "failed to bind {addr}: {source}")
            }
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Bind { source, .. } => Some(source),
        }
    }
}
