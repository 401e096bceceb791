//! Foreign call surface.
//!
//! A small, fixed set of `extern "C"` entry points over opaque handles.
//! Handles are boxed [`Parser`] / [`ParallelParser`] objects; every
//! returned pointer is non-owning and stays valid only until the next
//! mutation on the same handle or until the matching close call. Raw
//! pointers exist only in this module; everything below works in spans
//! and slices.
//!
//! All entry points tolerate null handles, and closing a null handle is a
//! no-op, so double-close sequences that null the handle out are safe.

use std::ffi::{c_char, CStr};
use std::path::PathBuf;

use crate::config::ParserConfig;
use crate::detect::{detect_bom, detect_delimiter, detect_encoding};
use crate::parallel::{optimal_chunk_count, ParallelParser};
use crate::parser::{Parser, RowBatch};
use crate::projection::FieldPosition;

/// Borrow a parser handle, tolerating null.
///
/// # Safety
///
/// `handle` must be null or a pointer returned by one of the `vcsv_init*`
/// entry points that has not been closed.
unsafe fn parser_ref<'a>(handle: *mut Parser) -> Option<&'a mut Parser> {
    handle.as_mut()
}

unsafe fn parallel_ref<'a>(handle: *mut ParallelParser) -> Option<&'a mut ParallelParser> {
    handle.as_mut()
}

fn path_from_cstr(path: *const c_char) -> Option<PathBuf> {
    if path.is_null() {
        return None;
    }
    // SAFETY: caller passes a NUL-terminated string per the C contract.
    let cstr = unsafe { CStr::from_ptr(path) };
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Some(PathBuf::from(std::ffi::OsStr::from_bytes(cstr.to_bytes())))
    }
    #[cfg(not(unix))]
    {
        cstr.to_str().ok().map(PathBuf::from)
    }
}

#[allow(clippy::too_many_arguments)]
fn config_from_parts(
    delimiter: u8,
    quote: u8,
    escape: u8,
    has_header: bool,
    skip_empty_rows: bool,
    comment_byte: u8,
    preview: u64,
    skip_first_n_lines: u64,
) -> ParserConfig {
    ParserConfig {
        delimiter,
        quote,
        escape,
        has_header,
        skip_empty_rows,
        comment_byte,
        preview,
        skip_first_n_lines,
    }
}

fn into_handle(parser: Result<Parser, crate::error::EngineError>) -> *mut Parser {
    match parser {
        Ok(parser) => Box::into_raw(Box::new(parser)),
        Err(err) => {
            log::debug!("parser construction failed: {err}");
            std::ptr::null_mut()
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Open `path` with default options. Returns null on failure.
#[no_mangle]
pub extern "C" fn vcsv_init(path: *const c_char) -> *mut Parser {
    match path_from_cstr(path) {
        Some(path) => into_handle(Parser::open(path)),
        None => std::ptr::null_mut(),
    }
}

/// Open `path` with explicit options. Returns null on failure.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn vcsv_init_with_config(
    path: *const c_char,
    delimiter: u8,
    quote: u8,
    escape: u8,
    has_header: bool,
    skip_empty_rows: bool,
    comment_byte: u8,
    preview: u64,
    skip_first_n_lines: u64,
) -> *mut Parser {
    let config = config_from_parts(
        delimiter,
        quote,
        escape,
        has_header,
        skip_empty_rows,
        comment_byte,
        preview,
        skip_first_n_lines,
    );
    match path_from_cstr(path) {
        Some(path) => into_handle(Parser::open_with_config(path, config)),
        None => std::ptr::null_mut(),
    }
}

/// Parse a caller-retained buffer with default options. The caller keeps
/// ownership of the buffer and must keep it alive and unmodified until
/// close.
///
/// # Safety
///
/// `ptr` must point to `len` readable bytes for the handle's lifetime.
#[no_mangle]
pub unsafe extern "C" fn vcsv_init_buffer(ptr: *const u8, len: usize) -> *mut Parser {
    into_handle(Parser::from_raw_parts(ptr, len, ParserConfig::default()))
}

/// Parse a caller-retained buffer with explicit options.
///
/// # Safety
///
/// Same contract as [`vcsv_init_buffer`].
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn vcsv_init_buffer_with_config(
    ptr: *const u8,
    len: usize,
    delimiter: u8,
    quote: u8,
    escape: u8,
    has_header: bool,
    skip_empty_rows: bool,
    comment_byte: u8,
    preview: u64,
    skip_first_n_lines: u64,
) -> *mut Parser {
    let config = config_from_parts(
        delimiter,
        quote,
        escape,
        has_header,
        skip_empty_rows,
        comment_byte,
        preview,
        skip_first_n_lines,
    );
    into_handle(Parser::from_raw_parts(ptr, len, config))
}

// ---------------------------------------------------------------------------
// Row iteration
// ---------------------------------------------------------------------------

/// Advance to the next emitted record; false on end.
#[no_mangle]
pub unsafe extern "C" fn vcsv_next_row(handle: *mut Parser) -> bool {
    parser_ref(handle).is_some_and(|p| p.next_row())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_field_count(handle: *mut Parser) -> u64 {
    parser_ref(handle).map_or(0, |p| p.field_count() as u64)
}

/// Raw span pointer of a field in the current row, surrounding quotes
/// included. Null for an out-of-range column.
#[no_mangle]
pub unsafe extern "C" fn vcsv_field_ptr(handle: *mut Parser, col: u64) -> *const u8 {
    parser_ref(handle)
        .and_then(|p| p.field_raw(col as usize))
        .map_or(std::ptr::null(), <[u8]>::as_ptr)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_field_len(handle: *mut Parser, col: u64) -> u64 {
    parser_ref(handle)
        .and_then(|p| p.field_span(col as usize))
        .map_or(0, |span| span.len as u64)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_field_needs_unescape(handle: *mut Parser, col: u64) -> bool {
    parser_ref(handle).is_some_and(|p| p.field_needs_unescape(col as usize))
}

/// Cache-backed logical value of a field. Writes the byte length through
/// `out_len` and returns the value pointer, or null when the column is out
/// of range or the hard cache limit refuses the entry (slice the raw span
/// instead).
#[no_mangle]
pub unsafe extern "C" fn vcsv_field_unescaped(
    handle: *mut Parser,
    col: u64,
    out_len: *mut u64,
) -> *const u8 {
    let Some(parser) = parser_ref(handle) else {
        return std::ptr::null();
    };
    match parser.field_unescaped(col as usize) {
        Some(value) => {
            if !out_len.is_null() {
                *out_len = value.len() as u64;
            }
            value.as_ptr()
        }
        None => {
            if !out_len.is_null() {
                *out_len = 0;
            }
            std::ptr::null()
        }
    }
}

/// Load pointers, lengths, and flags for up to 64 fields of the current
/// row into `batch` with a single call.
#[no_mangle]
pub unsafe extern "C" fn vcsv_load_row_batch(handle: *mut Parser, batch: *mut RowBatch) -> bool {
    let Some(parser) = parser_ref(handle) else {
        return false;
    };
    let Some(batch) = batch.as_mut() else {
        return false;
    };
    parser.fill_row_batch(batch);
    true
}

// ---------------------------------------------------------------------------
// Eager projections
// ---------------------------------------------------------------------------

/// Bounded structured projection: parse up to `max_rows` records,
/// continuing from the previous batch. Returns the arena pointer.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parse_batch(handle: *mut Parser, max_rows: u64) -> *const u8 {
    parser_ref(handle).map_or(std::ptr::null(), |p| {
        p.parse_batch(max_rows).as_bytes().as_ptr()
    })
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_batch_rows(handle: *mut Parser) -> u64 {
    parser_ref(handle)
        .and_then(|p| p.batch_projection())
        .map_or(0, |b| b.rows() as u64)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_batch_fields(handle: *mut Parser) -> u64 {
    parser_ref(handle)
        .and_then(|p| p.batch_projection())
        .map_or(0, |b| b.fields() as u64)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_batch_has_more(handle: *mut Parser) -> bool {
    parser_ref(handle)
        .and_then(|p| p.batch_projection())
        .is_some_and(|b| b.has_more())
}

/// Whole-file structured projection. Returns the arena pointer.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parse_all(handle: *mut Parser) -> *const u8 {
    parser_ref(handle).map_or(std::ptr::null(), |p| p.parse_all().as_bytes().as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_full_parse_buffer(handle: *mut Parser) -> *const u8 {
    parser_ref(handle)
        .and_then(|p| p.full_projection())
        .map_or(std::ptr::null(), |proj| proj.as_bytes().as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_free_full_parse(handle: *mut Parser) {
    if let Some(parser) = parser_ref(handle) {
        parser.free_full_parse();
    }
}

/// Whole-file delimited projection: `\x00` between fields, `\x01` after
/// each row. Returns the arena pointer.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parse_all_fast(handle: *mut Parser) -> *const u8 {
    parser_ref(handle).map_or(std::ptr::null(), |p| p.parse_all_fast().as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_fast_parse_len(handle: *mut Parser) -> u64 {
    parser_ref(handle)
        .and_then(|p| p.fast_projection())
        .map_or(0, |buf| buf.len() as u64)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_fast_parse_rows(handle: *mut Parser) -> u64 {
    parser_ref(handle).map_or(0, |p| p.fast_rows())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_free_fast_parse(handle: *mut Parser) {
    if let Some(parser) = parser_ref(handle) {
        parser.free_fast_parse();
    }
}

/// Whole-file positions projection; the host holds the original bytes and
/// slices.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parse_positions(handle: *mut Parser) -> bool {
    match parser_ref(handle) {
        Some(parser) => {
            parser.parse_positions();
            true
        }
        None => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_positions_ptr(handle: *mut Parser) -> *const FieldPosition {
    parser_ref(handle)
        .and_then(|p| p.positions_projection())
        .map_or(std::ptr::null(), |proj| proj.positions().as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_row_counts_ptr(handle: *mut Parser) -> *const u16 {
    parser_ref(handle)
        .and_then(|p| p.positions_projection())
        .map_or(std::ptr::null(), |proj| proj.row_counts().as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_positions_row_count(handle: *mut Parser) -> u64 {
    parser_ref(handle)
        .and_then(|p| p.positions_projection())
        .map_or(0, |proj| proj.row_count() as u64)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_positions_field_count(handle: *mut Parser) -> u64 {
    parser_ref(handle)
        .and_then(|p| p.positions_projection())
        .map_or(0, |proj| proj.field_count() as u64)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_free_positions(handle: *mut Parser) {
    if let Some(parser) = parser_ref(handle) {
        parser.free_positions();
    }
}

// ---------------------------------------------------------------------------
// Cache control
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn vcsv_get_cache_size(handle: *mut Parser) -> u64 {
    parser_ref(handle).map_or(0, |p| p.cache_size() as u64)
}

/// 0 = OK, 1 = soft limit exceeded, 2 = hard limit exceeded.
#[no_mangle]
pub unsafe extern "C" fn vcsv_get_cache_status(handle: *mut Parser) -> u8 {
    parser_ref(handle).map_or(0, |p| p.cache_status() as u8)
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_clear_cache(handle: *mut Parser) {
    if let Some(parser) = parser_ref(handle) {
        parser.clear_cache();
    }
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_set_soft_cache_limit(handle: *mut Parser, bytes: u64) {
    if let Some(parser) = parser_ref(handle) {
        parser.set_soft_cache_limit(bytes as usize);
    }
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_set_hard_cache_limit(handle: *mut Parser, bytes: u64) {
    if let Some(parser) = parser_ref(handle) {
        parser.set_hard_cache_limit(bytes as usize);
    }
}

// ---------------------------------------------------------------------------
// Parallel chunked parsing
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vcsv_optimal_thread_count(data_len: u64) -> usize {
    optimal_chunk_count(data_len as usize)
}

/// Wrap a caller-retained buffer for parallel parsing. `thread_count == 0`
/// selects the size heuristic. Returns null on failure.
///
/// # Safety
///
/// `ptr` must point to `len` readable bytes for the handle's lifetime.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parallel_init(
    ptr: *const u8,
    len: usize,
    thread_count: usize,
) -> *mut ParallelParser {
    match ParallelParser::from_raw_parts(ptr, len, thread_count) {
        Ok(parser) => Box::into_raw(Box::new(parser)),
        Err(err) => {
            log::debug!("parallel parser construction failed: {err}");
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_parallel_process(handle: *mut ParallelParser) -> bool {
    parallel_ref(handle).is_some_and(|p| p.process())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_parallel_row_count(handle: *mut ParallelParser) -> u64 {
    parallel_ref(handle).map_or(0, |p| p.row_count())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_parallel_bytes_processed(handle: *mut ParallelParser) -> u64 {
    parallel_ref(handle).map_or(0, |p| p.bytes_processed())
}

#[no_mangle]
pub unsafe extern "C" fn vcsv_parallel_chunk_count(handle: *mut ParallelParser) -> u64 {
    parallel_ref(handle).map_or(0, |p| p.chunk_count() as u64)
}

/// Release a parallel handle. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn vcsv_parallel_close(handle: *mut ParallelParser) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// ---------------------------------------------------------------------------
// Detection helpers
// ---------------------------------------------------------------------------

/// Classify by byte-order mark: 0 UTF-8, 1 UTF-8 BOM, 2 UTF-16LE,
/// 3 UTF-16BE, 4 UTF-32LE, 5 UTF-32BE.
///
/// # Safety
///
/// `ptr` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vcsv_detect_encoding(ptr: *const u8, len: usize) -> u8 {
    detect_encoding(raw_slice(ptr, len)) as u8
}

/// Byte length of a recognized byte-order mark, 0 if none.
///
/// # Safety
///
/// `ptr` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vcsv_detect_bom(ptr: *const u8, len: usize) -> u64 {
    detect_bom(raw_slice(ptr, len)) as u64
}

/// Score delimiter candidates over the sample and return the winner, the
/// first candidate winning ties and serving as the fallback.
///
/// # Safety
///
/// `ptr` and `candidates_ptr` must point to `len` and `num_candidates`
/// readable bytes respectively.
#[no_mangle]
pub unsafe extern "C" fn vcsv_detect_delimiter(
    ptr: *const u8,
    len: usize,
    candidates_ptr: *const u8,
    num_candidates: usize,
    quote_byte: u8,
) -> u8 {
    let input = raw_slice(ptr, len);
    let candidates = raw_slice(candidates_ptr, num_candidates);
    detect_delimiter(input, candidates, quote_byte).delimiter
}

unsafe fn raw_slice<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Stop producing rows until resume. Idempotent.
#[no_mangle]
pub unsafe extern "C" fn vcsv_pause(handle: *mut Parser) {
    if let Some(parser) = parser_ref(handle) {
        parser.pause();
    }
}

/// Undo a pause. Idempotent.
#[no_mangle]
pub unsafe extern "C" fn vcsv_resume(handle: *mut Parser) {
    if let Some(parser) = parser_ref(handle) {
        parser.resume();
    }
}

/// Set the cooperative abort flag, checked at row boundaries.
#[no_mangle]
pub unsafe extern "C" fn vcsv_abort(handle: *mut Parser) {
    if let Some(parser) = parser_ref(handle) {
        parser.abort();
    }
}

/// Re-stat a file origin; true when size or mtime changed since open.
#[no_mangle]
pub unsafe extern "C" fn vcsv_check_modified(handle: *mut Parser) -> bool {
    parser_ref(handle).is_some_and(|p| p.check_modified())
}

/// Release a parser handle and everything it owns: the source view, the
/// field cache, and any live projection arena. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn vcsv_close(handle: *mut Parser) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}
