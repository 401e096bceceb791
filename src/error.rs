//! Error taxonomy for the parsing engine.
//!
//! Tokenizing is tolerant: malformed quoting and per-row field-count
//! mismatches are recorded as [`RowError`] entries on the handle and parsing
//! continues. Only construction failures (open, oversized source, invalid
//! configuration) are fatal and surface as [`EngineError`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors. Anything past construction is tolerated and recorded
/// as a [`RowError`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The source file could not be opened or read.
    #[error("cannot open \"{}\"", .path.display())]
    CannotOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Field spans are 32-bit offsets; sources past 4 GiB cannot be indexed.
    #[error("source is {0} bytes, exceeding the 4 GiB span limit")]
    SourceTooLarge(u64),

    /// The configuration violates a structural invariant.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Non-fatal error kinds recorded during tokenizing and detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A quote byte appeared inside an unquoted field; treated as a literal.
    InvalidQuotes,
    /// End of input was reached inside a quoted field; the field is emitted
    /// through end-of-input.
    MissingQuotes,
    /// A row carried fewer fields than the header.
    TooFewFields,
    /// A row carried more fields than the header.
    TooManyFields,
    /// The delimiter sample produced no discriminating candidate; the first
    /// candidate was used.
    UndetectableDelimiter,
}

/// A tolerated per-row error. `row` is the 0-based data-row index
/// (the header, when present, is not counted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowError {
    pub kind: ErrorKind,
    pub row: u64,
}

impl RowError {
    pub fn new(kind: ErrorKind, row: u64) -> Self {
        Self { kind, row }
    }
}
