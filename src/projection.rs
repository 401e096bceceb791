//! Eager projections: one-shot serializations of a parse into contiguous
//! arenas, shaped to minimize foreign-call crossings.
//!
//! Three layouts are produced, each traversing the source exactly once:
//!
//! - **Structured**: 16-byte header, per-row field counts, per-field
//!   offsets and lengths, then packed unescaped field data.
//! - **Delimited**: one byte stream with `\x00` between fields and `\x01`
//!   terminating each row.
//! - **Positions**: fixed-width position records into the original bytes;
//!   the host slices itself. Lowest overhead, lossy above 64 KiB fields.
//!
//! The layouts are compatibility-critical; tests pin widths and offsets.

use crate::config::ParserConfig;
use crate::tokenizer::{unescape_field, ParsedIndex};

/// Byte size of the structured projection header.
pub const STRUCTURED_HEADER_SIZE: usize = 16;

/// Whole-parse arena in the structured layout.
#[derive(Debug)]
pub struct StructuredProjection {
    buf: Vec<u8>,
    rows: u32,
    fields: u32,
    has_more: bool,
}

impl StructuredProjection {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn fields(&self) -> u32 {
        self.fields
    }

    /// Only meaningful for batch builds: further rows remain after this one.
    pub fn has_more(&self) -> bool {
        self.has_more
    }
}

/// Build the structured layout from a parsed index.
///
/// Layout, all integers little-endian u32:
/// `{total_rows, total_fields, data_size, pad}` header, then
/// `total_rows` field counts, then `total_fields` offsets into the data
/// segment, then `total_fields` lengths, then `data_size` bytes of packed
/// unescaped field data. Null and empty fields have length 0.
pub fn build_structured(
    input: &[u8],
    config: &ParserConfig,
    index: &ParsedIndex,
    has_more: bool,
) -> StructuredProjection {
    let total_rows = index.rows.len() as u32;
    let total_fields = index.fields.len() as u32;

    let mut offsets = Vec::with_capacity(index.fields.len());
    let mut lens = Vec::with_capacity(index.fields.len());
    let mut data = Vec::new();
    for span in &index.fields {
        let raw = span.slice(input);
        let value = if span.needs_unescape() {
            unescape_field(raw, config.quote, config.escape)
        } else {
            std::borrow::Cow::Borrowed(raw)
        };
        offsets.push(data.len() as u32);
        lens.push(value.len() as u32);
        data.extend_from_slice(&value);
    }

    let mut buf = Vec::with_capacity(
        STRUCTURED_HEADER_SIZE + index.rows.len() * 4 + index.fields.len() * 8 + data.len(),
    );
    buf.extend_from_slice(&total_rows.to_le_bytes());
    buf.extend_from_slice(&total_fields.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    for row in &index.rows {
        buf.extend_from_slice(&(row.field_count as u32).to_le_bytes());
    }
    for offset in &offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    for len in &lens {
        buf.extend_from_slice(&len.to_le_bytes());
    }
    buf.extend_from_slice(&data);

    StructuredProjection {
        buf,
        rows: total_rows,
        fields: total_fields,
        has_more,
    }
}

/// Build the delimited layout: unescaped fields separated by `\x00`, each
/// row terminated by `\x01`. Null fields appear as the empty sequence
/// between two separators.
pub fn build_delimited(input: &[u8], config: &ParserConfig, index: &ParsedIndex) -> Vec<u8> {
    // Rough guess: raw size plus one separator per field.
    let mut out = Vec::with_capacity(input.len() + index.fields.len());
    for row in 0..index.rows.len() {
        let fields = index.row_fields(row);
        for (i, span) in fields.iter().enumerate() {
            if i > 0 {
                out.push(0x00);
            }
            let raw = span.slice(input);
            if span.needs_unescape() {
                out.extend_from_slice(&unescape_field(raw, config.quote, config.escape));
            } else {
                out.extend_from_slice(raw);
            }
        }
        out.push(0x01);
    }
    out
}

/// One field position in the positions layout. `len` saturates at
/// `u16::MAX`; the structured projection is the lossless path for longer
/// fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPosition {
    pub start: u32,
    pub len: u16,
    pub needs_unescape: u8,
    pub pad: u8,
}

/// Positions-only projection: the host holds the original bytes and
/// slices.
#[derive(Debug)]
pub struct PositionProjection {
    positions: Vec<FieldPosition>,
    row_counts: Vec<u16>,
}

impl PositionProjection {
    pub fn positions(&self) -> &[FieldPosition] {
        &self.positions
    }

    pub fn row_counts(&self) -> &[u16] {
        &self.row_counts
    }

    pub fn row_count(&self) -> usize {
        self.row_counts.len()
    }

    pub fn field_count(&self) -> usize {
        self.positions.len()
    }
}

/// Build the positions layout from a parsed index.
pub fn build_positions(index: &ParsedIndex) -> PositionProjection {
    let positions = index
        .fields
        .iter()
        .map(|span| FieldPosition {
            start: span.start,
            len: span.len.min(u16::MAX as u32) as u16,
            needs_unescape: span.needs_unescape() as u8,
            pad: 0,
        })
        .collect();
    let row_counts = index.rows.iter().map(|row| row.field_count).collect();
    PositionProjection {
        positions,
        row_counts,
    }
}
