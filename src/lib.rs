//! vectorcsv: a vectorized, zero-copy CSV parsing engine.
//!
//! The engine accepts a CSV byte source (file path, caller-retained
//! buffer, or pre-collected bytes), memory-maps files when it can, and
//! emits a lazy sequence of rows whose fields are `(offset, length,
//! needs-unescape)` spans into the source. Eager batch and whole-file
//! projections serialize a parse into contiguous arenas shaped to
//! minimize foreign-call crossings, and a parallel chunked parser splits
//! the input at quote-safe row boundaries.
//!
//! # Architecture
//!
//! Source View → Scanner → Tokenizer → (Field Cache on demand) →
//! (Projection Builders or per-row accessors) → Foreign Call Surface.
//! The parallel parser wraps Scanner + Tokenizer behind a merge stage.
//!
//! - [`source`]: read-only byte views (mmap / borrowed / owned)
//! - [`detect`]: byte-order marks and delimiter sniffing
//! - [`simd`]: vectorized interesting-byte scanner with scalar fallback
//! - [`tokenizer`]: the quote-aware row state machine
//! - [`cache`]: bounded cache for unescaped field values
//! - [`projection`]: structured / delimited / position arenas
//! - [`parallel`]: quote-safe chunking over a rayon pool
//! - [`parser`]: the owning handle tying everything together
//! - [`writer`]: modification replay and the byte-exact quoting rule
//! - [`ffi`]: the `extern "C"` surface over boxed handles

pub mod cache;
pub mod config;
pub mod detect;
pub mod error;
pub mod ffi;
pub mod parallel;
pub mod parser;
pub mod projection;
pub mod simd;
pub mod source;
pub mod tokenizer;
pub mod writer;

pub use cache::{CacheStatus, FieldCache};
pub use config::ParserConfig;
pub use error::{EngineError, ErrorKind, RowError};
pub use parallel::{optimal_chunk_count, ParallelParser};
pub use parser::{ParseStats, Parser, RowBatch};
pub use projection::{FieldPosition, PositionProjection, StructuredProjection};
pub use source::SourceView;
pub use tokenizer::{FieldSpan, ParsedIndex, RowDescriptor, Tokenizer};
pub use writer::ModificationLog;

#[cfg(test)]
mod tests;
