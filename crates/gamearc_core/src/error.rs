//! Error types that can be emitted from this library

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
///
/// A low signature score is not an error: scoring returns a
/// [`crate::signature::Confidence`] and the caller moves on to the next candidate.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// A value read from the archive failed a bounds check
    #[error("{what} of {value} exceeds the limit of {limit}")]
    #[diagnostic(
        code(gamearc::structural_violation),
        help("the archive is truncated or corrupt")
    )]
    StructuralViolation {
        /// The field that was checked
        what: &'static str,
        /// The value read from the archive
        value: u64,
        /// The largest value the field may hold at that point
        limit: u64,
    },

    /// A folder record was reached twice while walking a directory tree
    #[error("folder at {0:#x} is referenced more than once")]
    #[diagnostic(code(gamearc::directory_cycle))]
    DirectoryCycle(u64),

    /// The archive uses a sub-variant this decoder does not know about
    #[error("unexpected format variant: {0}")]
    #[diagnostic(code(gamearc::unexpected_variant))]
    UnexpectedFormatVariant(String),

    /// An archive file or a part of a spanned archive could not be opened
    #[error("unable to access {}", path.display())]
    #[diagnostic(code(gamearc::resource_failure))]
    ResourceFailure {
        /// The file that failed
        path: PathBuf,
        /// The underlying failure
        #[source]
        source: std::io::Error,
    },

    /// unable to find requested file
    #[error("unable to find requested file")]
    FileNotFound(#[from] FileNotFoundError),

    /// The format has no encoder
    #[error("the {0} format cannot be written")]
    ReadOnlyFormat(&'static str),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    /// Shorthand for [`Error::StructuralViolation`]
    pub fn structural(what: &'static str, value: u64, limit: u64) -> Self {
        Error::StructuralViolation { what, value, limit }
    }

    /// Shorthand for [`Error::UnexpectedFormatVariant`]
    pub fn variant(description: impl Into<String>) -> Self {
        Error::UnexpectedFormatVariant(description.into())
    }
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested file")]
pub enum FileNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by name {0}
    #[error("by name {0}")]
    Name(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
