//! The owning parser handle.
//!
//! A [`Parser`] binds a source view, a configuration, the streaming
//! tokenizer, the field cache, and the projection arenas into one object.
//! Everything the foreign surface exposes is a thin shim over methods
//! here; raw pointers never appear below this level and each arena lives
//! on its handle rather than in any global.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{CacheStatus, FieldCache};
use crate::config::ParserConfig;
use crate::error::{EngineError, ErrorKind, RowError};
use crate::projection::{
    build_delimited, build_positions, build_structured, PositionProjection, StructuredProjection,
};
use crate::source::SourceView;
use crate::tokenizer::{parse_index, unescape_field, FieldSpan, ParsedIndex, Tokenizer};

/// Monotonic counters describing parse progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub rows_emitted: u64,
    pub error_count: u64,
    pub cache_bytes: u64,
}

/// Field capacity of one [`RowBatch`].
pub const ROW_BATCH_FIELDS: usize = 64;

/// Caller-visible batched row access: one call loads pointers, lengths,
/// and flags for up to [`ROW_BATCH_FIELDS`] fields of the current row.
#[repr(C)]
pub struct RowBatch {
    pub field_count: u32,
    pub pad: u32,
    pub ptrs: [usize; ROW_BATCH_FIELDS],
    pub lens: [u32; ROW_BATCH_FIELDS],
    pub flags: [u8; ROW_BATCH_FIELDS],
}

impl RowBatch {
    pub fn new() -> Self {
        Self {
            field_count: 0,
            pad: 0,
            ptrs: [0; ROW_BATCH_FIELDS],
            lens: [0; ROW_BATCH_FIELDS],
            flags: [0; ROW_BATCH_FIELDS],
        }
    }
}

impl Default for RowBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key used for the header row, which has no data-row index.
const HEADER_ROW_KEY: u64 = u64::MAX;

/// Lazy, zero-copy CSV parser over one source.
///
/// A handle is not safe for concurrent mutation from multiple threads;
/// distinct handles on distinct sources are independent.
pub struct Parser {
    source: SourceView,
    config: ParserConfig,
    tokenizer: Tokenizer,
    current: Vec<FieldSpan>,
    current_is_header: bool,
    row_index: u64,
    header: Option<Vec<FieldSpan>>,
    errors: Vec<RowError>,
    cache: FieldCache,
    full: Option<StructuredProjection>,
    batch: Option<StructuredProjection>,
    batch_cursor: Option<Tokenizer>,
    fast: Option<(Vec<u8>, u64)>,
    positions: Option<PositionProjection>,
    paused: AtomicBool,
    aborted: AtomicBool,
}

impl Parser {
    /// Open a file with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::open_with_config(path, ParserConfig::default())
    }

    /// Open a file with explicit options.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: ParserConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::with_source(SourceView::open(path)?, config))
    }

    /// Parse bytes the host hands over.
    pub fn from_owned(bytes: Vec<u8>, config: ParserConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::with_source(SourceView::from_owned(bytes)?, config))
    }

    /// Parse a caller-retained buffer without copying.
    ///
    /// # Safety
    ///
    /// Same contract as [`SourceView::from_raw_parts`].
    pub unsafe fn from_raw_parts(
        ptr: *const u8,
        len: usize,
        config: ParserConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::with_source(SourceView::from_raw_parts(ptr, len)?, config))
    }

    fn with_source(source: SourceView, config: ParserConfig) -> Self {
        let tokenizer = Tokenizer::new(source.bytes(), config);
        Self {
            source,
            config,
            tokenizer,
            current: Vec::new(),
            current_is_header: false,
            row_index: 0,
            header: None,
            errors: Vec::new(),
            cache: FieldCache::new(),
            full: None,
            batch: None,
            batch_cursor: None,
            fast: None,
            positions: None,
            paused: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn source_bytes(&self) -> &[u8] {
        self.source.bytes()
    }

    // ------------------------------------------------------------------
    // Row iteration
    // ------------------------------------------------------------------

    /// Advance to the next emitted record. When `has_header` is set the
    /// first emitted record is the header row; it is retained for schema
    /// checks and does not count toward preview or the data-row index.
    /// Returns `false` at end of input, while paused, or after an abort.
    pub fn next_row(&mut self) -> bool {
        if self.aborted.load(Ordering::Relaxed) || self.paused.load(Ordering::Relaxed) {
            return false;
        }
        let header_pending = self.tokenizer.header_pending();
        let advanced = self
            .tokenizer
            .next_record(self.source.bytes(), &mut self.current);
        self.errors.append(&mut self.tokenizer.errors);
        if !advanced {
            return false;
        }

        if header_pending {
            self.current_is_header = true;
            self.header = Some(self.current.clone());
        } else {
            self.current_is_header = false;
            self.row_index = self.tokenizer.data_rows() - 1;
            if let Some(header) = &self.header {
                if self.current.len() < header.len() {
                    self.errors
                        .push(RowError::new(ErrorKind::TooFewFields, self.row_index));
                } else if self.current.len() > header.len() {
                    self.errors
                        .push(RowError::new(ErrorKind::TooManyFields, self.row_index));
                }
            }
        }
        true
    }

    /// Fields of the current row.
    pub fn current_fields(&self) -> &[FieldSpan] {
        &self.current
    }

    pub fn field_count(&self) -> usize {
        self.current.len()
    }

    pub fn field_span(&self, col: usize) -> Option<FieldSpan> {
        self.current.get(col).copied()
    }

    /// Raw bytes of a field in the current row, surrounding quotes
    /// included.
    pub fn field_raw(&self, col: usize) -> Option<&[u8]> {
        self.current
            .get(col)
            .map(|span| span.slice(self.source.bytes()))
    }

    pub fn field_needs_unescape(&self, col: usize) -> bool {
        self.current.get(col).is_some_and(FieldSpan::needs_unescape)
    }

    /// Logical value of a field in the current row. Unquoted fields are
    /// sliced straight from the source; quoted fields come from the cache.
    /// Returns `None` for an out-of-range column or when the hard cache
    /// limit refuses the entry (the host then slices the raw bytes
    /// itself).
    pub fn field_unescaped(&mut self, col: usize) -> Option<&[u8]> {
        let span = *self.current.get(col)?;
        if !span.needs_unescape() {
            return Some(span.slice(self.source.bytes()));
        }
        let row_key = if self.current_is_header {
            HEADER_ROW_KEY
        } else {
            self.row_index
        };
        let input = self.source.bytes();
        let (quote, escape) = (self.config.quote, self.config.escape);
        self.cache.get_or_insert_with(row_key, col as u32, || {
            unescape_field(span.slice(input), quote, escape).into_owned()
        })
    }

    /// Load pointers, lengths, and flags of the current row into `batch`.
    pub fn fill_row_batch(&self, batch: &mut RowBatch) {
        let bytes = self.source.bytes();
        let count = self.current.len().min(ROW_BATCH_FIELDS);
        batch.field_count = count as u32;
        batch.pad = 0;
        for (i, span) in self.current.iter().take(count).enumerate() {
            batch.ptrs[i] = bytes[span.start as usize..].as_ptr() as usize;
            batch.lens[i] = span.len;
            batch.flags[i] = span.flags;
        }
    }

    /// The retained header row, when `has_header` is set and the header
    /// has been consumed.
    pub fn headers(&self) -> Option<&[FieldSpan]> {
        self.header.as_deref()
    }

    /// Tolerated errors recorded so far.
    pub fn errors(&self) -> &[RowError] {
        &self.errors
    }

    pub fn stats(&self) -> ParseStats {
        ParseStats {
            bytes_processed: self.tokenizer.pos() as u64,
            total_bytes: self.source.len() as u64,
            rows_emitted: self.tokenizer.data_rows(),
            error_count: self.errors.len() as u64,
            cache_bytes: self.cache.used_bytes() as u64,
        }
    }

    // ------------------------------------------------------------------
    // Cache control
    // ------------------------------------------------------------------

    pub fn cache_size(&self) -> usize {
        self.cache.used_bytes()
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache.status()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn set_soft_cache_limit(&mut self, bytes: usize) {
        self.cache.set_soft_limit(bytes);
    }

    pub fn set_hard_cache_limit(&mut self, bytes: usize) {
        self.cache.set_hard_limit(bytes);
    }

    // ------------------------------------------------------------------
    // Eager projections
    // ------------------------------------------------------------------
    //
    // One projection arena is live at a time: building one frees the
    // others. Each free method is idempotent.

    fn full_index(&self) -> ParsedIndex {
        parse_index(self.source.bytes(), self.config)
    }

    /// Whole-file structured projection.
    pub fn parse_all(&mut self) -> &StructuredProjection {
        let index = self.full_index();
        let projection = build_structured(self.source.bytes(), &self.config, &index, false);
        self.fast = None;
        self.positions = None;
        self.batch = None;
        self.full.insert(projection)
    }

    pub fn full_projection(&self) -> Option<&StructuredProjection> {
        self.full.as_ref()
    }

    pub fn free_full_parse(&mut self) {
        self.full = None;
    }

    /// Bounded structured projection: up to `max_rows` records per call,
    /// continuing where the previous batch stopped.
    pub fn parse_batch(&mut self, max_rows: u64) -> &StructuredProjection {
        let config = self.config;
        let input = self.source.bytes();
        let cursor = self
            .batch_cursor
            .get_or_insert_with(|| Tokenizer::new(input, config));

        let mut index = ParsedIndex::default();
        let mut fields = Vec::new();
        let mut taken = 0u64;
        while taken < max_rows && cursor.next_record(input, &mut fields) {
            index.push_row(&fields);
            taken += 1;
        }
        let has_more = !cursor.is_done();
        self.errors.append(&mut cursor.errors);

        let projection = build_structured(input, &config, &index, has_more);
        self.full = None;
        self.fast = None;
        self.positions = None;
        self.batch.insert(projection)
    }

    pub fn batch_projection(&self) -> Option<&StructuredProjection> {
        self.batch.as_ref()
    }

    /// Whole-file delimited projection: `\x00` between fields, `\x01`
    /// after each row.
    pub fn parse_all_fast(&mut self) -> &[u8] {
        let index = self.full_index();
        let rows = index.rows.len() as u64;
        let buf = build_delimited(self.source.bytes(), &self.config, &index);
        self.full = None;
        self.positions = None;
        self.batch = None;
        &self.fast.insert((buf, rows)).0
    }

    pub fn fast_projection(&self) -> Option<&[u8]> {
        self.fast.as_ref().map(|(buf, _)| buf.as_slice())
    }

    pub fn fast_rows(&self) -> u64 {
        self.fast.as_ref().map_or(0, |(_, rows)| *rows)
    }

    pub fn free_fast_parse(&mut self) {
        self.fast = None;
    }

    /// Whole-file positions projection; the host slices the original
    /// bytes.
    pub fn parse_positions(&mut self) -> &PositionProjection {
        let index = self.full_index();
        let projection = build_positions(&index);
        self.full = None;
        self.fast = None;
        self.batch = None;
        self.positions.insert(projection)
    }

    pub fn positions_projection(&self) -> Option<&PositionProjection> {
        self.positions.as_ref()
    }

    pub fn free_positions(&mut self) {
        self.positions = None;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop producing rows until [`Parser::resume`]. Idempotent.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Undo [`Parser::pause`]. Idempotent.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Cooperative cancellation, checked at row boundaries.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    /// Re-stat a file origin and report whether it changed since open.
    pub fn check_modified(&self) -> bool {
        self.source.modified_since_open()
    }
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("source", &self.source)
            .field("rows_emitted", &self.tokenizer.data_rows())
            .field("errors", &self.errors.len())
            .finish()
    }
}
