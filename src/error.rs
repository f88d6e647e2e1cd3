use std::io;

use thiserror::Error;

/// Everything that can stop a conversion. All variants other than `Io` carry the 1-based line
/// number of the input where the problem was noticed.
///
/// A non-invertible lattice is deliberately absent: it's stored as a sentinel on the
/// [`Lattice`](crate::Lattice), not raised.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O operation failed: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("malformed run header: {details} (at line ~{line})")]
    MalformedHeader { line: usize, details: String },

    #[error("input ended inside {context} (at line {line})")]
    UnexpectedEndOfStream { line: usize, context: &'static str },

    #[error("could not parse '{token}' as {expected} (at line {line})")]
    NumericParse {
        line: usize,
        token: String,
        expected: &'static str,
    },

    #[error("{section} table has {found} rows; expected one per atom ({expected}) (at line {line})")]
    RowCountMismatch {
        line: usize,
        section: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("malformed trajectory data: {details} (at line ~{line})")]
    MalformedTrajectory { line: usize, details: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The input line the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Io { .. } => None,
            Self::MalformedHeader { line, .. }
            | Self::UnexpectedEndOfStream { line, .. }
            | Self::NumericParse { line, .. }
            | Self::RowCountMismatch { line, .. }
            | Self::MalformedTrajectory { line, .. } => Some(*line),
        }
    }
}
