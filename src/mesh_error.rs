//! DecompositionError: unified error type for the decomposition tracker.
//!
//! Every variant carries the rank that detected the problem so a failure can be
//! attributed after the run has been torn down. Configuration, consistency and
//! bounds errors are fatal: the tracker aborts the communicator before returning
//! them.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`DecompositionError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Configuration,
    Consistency,
    Bounds,
    Communication,
    Io,
}

/// Unified error type for decomposition operations.
#[derive(Debug, Error)]
pub enum DecompositionError {
    /// Connectivity or derived state used before it exists, set twice, or set
    /// with inconsistent arguments. Also raised when the bound mesh was dropped.
    #[error("rank {rank}: configuration error in {operation}: {reason}")]
    Configuration {
        rank: usize,
        operation: &'static str,
        reason: String,
    },
    /// Cross-rank disagreement detected while matching.
    #[error("rank {rank}: consistency error in {operation}: {detail}")]
    Consistency {
        rank: usize,
        operation: &'static str,
        detail: String,
    },
    /// Accessor called with an index outside of its valid range.
    #[error("rank {rank}: {operation} index {index} out of bounds (len {len})")]
    Bounds {
        rank: usize,
        operation: &'static str,
        index: usize,
        len: usize,
    },
    /// The substrate failed to deliver or decode a message.
    #[error("rank {rank}: communication error with rank {peer}: {detail}")]
    Communication {
        rank: usize,
        peer: usize,
        detail: String,
    },
    /// Another rank failed and tore the run down.
    #[error("rank {rank}: run aborted by rank {origin}: {reason}")]
    Aborted {
        rank: usize,
        origin: usize,
        reason: String,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Malformed content in a global-number dump.
    #[error("{path:?}: line {line}: cannot parse {content:?} as a global id")]
    Parse {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

impl DecompositionError {
    pub fn configuration(rank: usize, operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            rank,
            operation,
            reason: reason.into(),
        }
    }

    pub fn consistency(rank: usize, operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Consistency {
            rank,
            operation,
            detail: detail.into(),
        }
    }

    pub fn bounds(rank: usize, operation: &'static str, index: usize, len: usize) -> Self {
        Self::Bounds {
            rank,
            operation,
            index,
            len,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Consistency { .. } => ErrorKind::Consistency,
            Self::Bounds { .. } => ErrorKind::Bounds,
            Self::Communication { .. } | Self::Aborted { .. } => ErrorKind::Communication,
            Self::Io { .. } | Self::Serialization(_) | Self::Parse { .. } => ErrorKind::Io,
        }
    }

    /// True for errors that must tear down every rank of the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_rank_and_operation() {
        let err = DecompositionError::bounds(3, "get_neighbour", 7, 2);
        let msg = err.to_string();
        assert!(msg.contains("rank 3"));
        assert!(msg.contains("get_neighbour"));
        assert!(msg.contains("index 7"));
        assert_eq!(err.kind(), ErrorKind::Bounds);
    }

    #[test]
    fn io_errors_are_not_fatal() {
        let err = DecompositionError::Io {
            path: PathBuf::from("/nowhere"),
            source: std::io::Error::other("boom"),
        };
        assert!(!err.is_fatal());
        assert!(DecompositionError::consistency(0, "map", "x").is_fatal());
    }
}
