//! Parallel chunked parsing.
//!
//! The input is split into equal spans, each span's start is repaired to
//! the next record terminator outside any quoted region, the spans are
//! tokenized independently on a rayon pool, and the per-chunk results are
//! concatenated with their field indices rebased. Workers share only the
//! read-only input slice; they are joined before the entry point returns.
//!
//! The merged row sequence equals a single-threaded parse of the same
//! bytes whenever the tokenizer's tolerance rules are position
//! independent. Cancellation is cooperative and checked at chunk
//! boundaries only.

use std::sync::atomic::{AtomicBool, Ordering};

use memchr::memchr_iter;
use rayon::prelude::*;

use crate::config::ParserConfig;
use crate::error::{EngineError, RowError};
use crate::source::SourceView;
use crate::tokenizer::{parse_index, ParsedIndex, RowDescriptor};

/// Chunk-count heuristic by data size.
pub fn optimal_chunk_count(data_len: usize) -> usize {
    const MIB: usize = 1024 * 1024;
    if data_len < 10 * MIB {
        1
    } else if data_len < 100 * MIB {
        2
    } else if data_len < 500 * MIB {
        4
    } else {
        8
    }
}

/// Toggle quote parity over `input[from..to]`. With a distinct escape
/// byte, quotes preceded by it stay literal; doubled-quote escapes toggle
/// twice and cancel on their own.
fn advance_parity(input: &[u8], from: usize, to: usize, config: &ParserConfig, parity: bool) -> bool {
    let mut parity = parity;
    for i in memchr_iter(config.quote, &input[from..to]) {
        let at = from + i;
        if config.escape != config.quote && at > 0 && input[at - 1] == config.escape {
            continue;
        }
        parity = !parity;
    }
    parity
}

/// Split the input into up to `chunks` quote-safe ranges. Every range but
/// the first starts just past a record terminator that sits outside any
/// quoted region, so each range is independently parsable.
pub fn chunk_ranges(input: &[u8], config: &ParserConfig, chunks: usize) -> Vec<(usize, usize)> {
    let len = input.len();
    let step = if chunks > 1 { len / chunks } else { 0 };
    if step == 0 {
        return vec![(0, len)];
    }

    let mut starts = vec![0usize];
    let mut parity = false;
    let mut scanned_to = 0usize;

    for k in 1..chunks {
        let naive = (k * step).max(scanned_to);
        if naive >= len {
            break;
        }
        parity = advance_parity(input, scanned_to, naive, config, parity);

        // Boundary repair: advance to the byte after the next terminator
        // outside quotes.
        let mut pos = naive;
        while pos < len {
            let byte = input[pos];
            if byte == config.quote {
                if !(config.escape != config.quote && pos > 0 && input[pos - 1] == config.escape) {
                    parity = !parity;
                }
            } else if byte == b'\n' && !parity {
                pos += 1;
                break;
            }
            pos += 1;
        }
        scanned_to = pos;
        if pos < len && starts.last().is_some_and(|&s| pos > s) {
            starts.push(pos);
        }
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(len);
        ranges.push((start, end));
    }
    ranges
}

/// Tokenize one window, shifting spans to absolute offsets.
fn parse_window(input: &[u8], start: usize, end: usize, config: ParserConfig) -> ParsedIndex {
    let window = &input[start..end];
    let mut index = parse_index(window, config);
    for span in &mut index.fields {
        span.start += start as u32;
    }
    index
}

/// Parse with quote-safe chunking, merging per-chunk results in order.
/// Returns the merged index and the number of chunks actually used.
pub fn parse_chunked(
    input: &[u8],
    config: ParserConfig,
    chunk_count: usize,
    abort: Option<&AtomicBool>,
) -> (ParsedIndex, usize) {
    let ranges = chunk_ranges(input, &config, chunk_count.max(1));
    let used = ranges.len();
    if used == 1 {
        return (parse_index(input, config), 1);
    }

    let partials: Vec<ParsedIndex> = ranges
        .par_iter()
        .enumerate()
        .map(|(i, &(start, end))| {
            if abort.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                return ParsedIndex::default();
            }
            let chunk_config = if i == 0 {
                config
            } else {
                // Preamble, header, and preview belong to the head of the
                // file; later chunks see plain records.
                ParserConfig {
                    has_header: false,
                    skip_first_n_lines: 0,
                    preview: 0,
                    ..config
                }
            };
            parse_window(input, start, end, chunk_config)
        })
        .collect();

    let mut merged = merge(partials, &config);
    if config.preview != 0 {
        truncate_to_preview(&mut merged, &config);
    }
    (merged, used)
}

/// Concatenate chunk results in order, rebasing field indices and error
/// row numbers.
fn merge(partials: Vec<ParsedIndex>, config: &ParserConfig) -> ParsedIndex {
    let mut out = ParsedIndex::default();
    let mut row_base = 0u64;
    for (i, part) in partials.into_iter().enumerate() {
        let field_base = out.fields.len() as u32;
        out.rows.extend(part.rows.iter().map(|row| RowDescriptor {
            field_start: row.field_start + field_base,
            field_count: row.field_count,
        }));
        out.fields.extend_from_slice(&part.fields);
        out.errors
            .extend(part.errors.iter().map(|e| RowError::new(e.kind, e.row + row_base)));

        let mut data_rows = part.rows.len() as u64;
        if i == 0 && config.has_header && data_rows > 0 {
            data_rows -= 1;
        }
        row_base += data_rows;
    }
    out
}

/// Apply the preview cap across the merged result; the header, when
/// present, is exempt.
fn truncate_to_preview(index: &mut ParsedIndex, config: &ParserConfig) {
    let cap = config.preview as usize + config.has_header as usize;
    if index.rows.len() <= cap {
        return;
    }
    index.rows.truncate(cap);
    let field_len: usize = index.rows.iter().map(|r| r.field_count as usize).sum();
    index.fields.truncate(field_len);
    index.errors.retain(|e| e.row < config.preview);
}

/// A parallel parse over a caller-supplied buffer. Worker threads never
/// escape [`ParallelParser::process`]; distinct instances are independent.
pub struct ParallelParser {
    source: SourceView,
    config: ParserConfig,
    thread_count: usize,
    chunk_count: usize,
    index: Option<ParsedIndex>,
    aborted: AtomicBool,
}

impl ParallelParser {
    /// Wrap a caller-retained buffer. `thread_count == 0` selects the size
    /// heuristic.
    ///
    /// # Safety
    ///
    /// Same contract as [`SourceView::from_raw_parts`].
    pub unsafe fn from_raw_parts(
        ptr: *const u8,
        len: usize,
        thread_count: usize,
    ) -> Result<Self, EngineError> {
        Ok(Self::with_source(
            SourceView::from_raw_parts(ptr, len)?,
            thread_count,
        ))
    }

    /// Take ownership of pre-collected bytes.
    pub fn from_owned(bytes: Vec<u8>, thread_count: usize) -> Result<Self, EngineError> {
        Ok(Self::with_source(SourceView::from_owned(bytes)?, thread_count))
    }

    fn with_source(source: SourceView, thread_count: usize) -> Self {
        Self {
            source,
            config: ParserConfig::default(),
            thread_count,
            chunk_count: 0,
            index: None,
            aborted: AtomicBool::new(false),
        }
    }

    /// Override the default configuration before processing.
    pub fn set_config(&mut self, config: ParserConfig) {
        self.config = config;
    }

    /// Run the chunked parse. Returns `false` when aborted.
    pub fn process(&mut self) -> bool {
        if self.aborted.load(Ordering::Relaxed) {
            return false;
        }
        let chunks = if self.thread_count == 0 {
            optimal_chunk_count(self.source.len())
        } else {
            self.thread_count
        };

        let input = self.source.bytes();
        let config = self.config;
        let aborted = &self.aborted;
        let (index, used) = match rayon::ThreadPoolBuilder::new().num_threads(chunks).build() {
            Ok(pool) => pool.install(|| parse_chunked(input, config, chunks, Some(aborted))),
            // Pool construction failure degrades to the shared global pool.
            Err(_) => parse_chunked(input, config, chunks, Some(aborted)),
        };
        if self.aborted.load(Ordering::Relaxed) {
            return false;
        }
        self.chunk_count = used;
        self.index = Some(index);
        true
    }

    pub fn row_count(&self) -> u64 {
        self.index.as_ref().map_or(0, |index| index.rows.len() as u64)
    }

    pub fn bytes_processed(&self) -> u64 {
        if self.index.is_some() {
            self.source.len() as u64
        } else {
            0
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    pub fn index(&self) -> Option<&ParsedIndex> {
        self.index.as_ref()
    }
}
