//! Terminal error types.
//!
//! Most failure modes in repomap are recoverable and travel as
//! [`Warning`](crate::diagnostics::Warning)s on the diagnostic channel.
//! Only the conditions below reach the caller as errors.

use std::path::PathBuf;

/// Irrecoverable map-generation failures.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("no input files: nothing to map")]
    NoFiles,

    #[error("no repository map could be generated")]
    NoOutput,

    #[error("ranking still exceeds scale limits after trimming to {files} files (limit: {limit})")]
    ScaleLimit { files: usize, limit: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type MapResult<T> = std::result::Result<T, MapError>;

/// Why a ranking pass could not produce scores.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    /// Empty graph, zero total weight, or a power iteration that never settled
    #[error("degenerate ranking: {0}")]
    Degenerate(String),

    /// The reference graph is too large to rank within bounds
    #[error("reference graph too large: {nodes} nodes, {edges} edges")]
    ScaleLimit { nodes: usize, edges: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(MapError::NoFiles.to_string(), "no input files: nothing to map");

        let err = MapError::Io {
            path: PathBuf::from("/x/y"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/x/y"));

        let rank = RankError::ScaleLimit { nodes: 10, edges: 20 };
        assert_eq!(rank.to_string(), "reference graph too large: 10 nodes, 20 edges");
    }
}
