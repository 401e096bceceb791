//! Quote-aware row tokenizer.
//!
//! The tokenizer consumes interesting-byte positions from the scanner and
//! emits field spans and row boundaries. It moves through five states:
//! field start, unquoted, quoted, possible-escape after a quote, and end of
//! record. All transitions happen at interesting bytes, so the tokenizer
//! jumps between scanner hits instead of walking every byte.
//!
//! Tokenizing is tolerant. A quote inside an unquoted field is kept as a
//! literal (`InvalidQuotes`), end of input inside a quoted field emits the
//! field through end-of-input (`MissingQuotes`), and when `escape` differs
//! from `quote`, an escape byte followed by a non-quote inside a quoted
//! field is kept as a literal. Schema checks happen one level up.

use std::borrow::Cow;

use memchr::memchr;

use crate::config::ParserConfig;
use crate::detect::detect_bom;
use crate::error::{ErrorKind, RowError};
use crate::simd::{ByteScanner, InterestCursor};

/// The field's raw bytes include surrounding quotes and possibly escapes;
/// the logical value requires [`unescape_field`].
pub const FLAG_NEEDS_UNESCAPE: u8 = 1 << 0;
/// The field is empty and unquoted.
pub const FLAG_NULL_SENTINEL: u8 = 1 << 1;

/// One raw CSV field as an (offset, length) pair into the source bytes.
/// Quoted fields include their surrounding quote bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub start: u32,
    pub len: u32,
    pub flags: u8,
}

impl FieldSpan {
    #[inline]
    pub fn needs_unescape(&self) -> bool {
        self.flags & FLAG_NEEDS_UNESCAPE != 0
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.flags & FLAG_NULL_SENTINEL != 0
    }

    /// The raw bytes of this field.
    #[inline]
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.start as usize..(self.start + self.len) as usize]
    }
}

/// One row as a window into a flat field array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowDescriptor {
    /// Index of the row's first field in the flat array.
    pub field_start: u32,
    pub field_count: u16,
}

/// Flat parse result: row descriptors over a shared field array.
#[derive(Debug, Default)]
pub struct ParsedIndex {
    pub rows: Vec<RowDescriptor>,
    pub fields: Vec<FieldSpan>,
    pub errors: Vec<RowError>,
}

impl ParsedIndex {
    pub fn push_row(&mut self, fields: &[FieldSpan]) {
        let count = fields.len().min(u16::MAX as usize);
        self.rows.push(RowDescriptor {
            field_start: self.fields.len() as u32,
            field_count: count as u16,
        });
        self.fields.extend_from_slice(&fields[..count]);
    }

    pub fn row_fields(&self, row: usize) -> &[FieldSpan] {
        let desc = &self.rows[row];
        let start = desc.field_start as usize;
        &self.fields[start..start + desc.field_count as usize]
    }
}

/// Streaming record tokenizer. Holds positions and counters only; the
/// input slice is passed to every call so the owner of the bytes can also
/// own the tokenizer. Every call must receive the same bytes the tokenizer
/// was created with.
#[derive(Debug)]
pub struct Tokenizer {
    config: ParserConfig,
    scanner: ByteScanner,
    cursor: InterestCursor,
    pos: usize,
    data_rows: u64,
    header_emitted: bool,
    done: bool,
    pub(crate) errors: Vec<RowError>,
}

impl Tokenizer {
    /// Position the tokenizer past the byte-order mark and the preamble.
    /// The order is fixed: BOM strip first, then `skip_first_n_lines` over
    /// raw post-BOM lines, then tokenizing.
    pub fn new(input: &[u8], config: ParserConfig) -> Self {
        let mut pos = detect_bom(input);
        for _ in 0..config.skip_first_n_lines {
            match memchr(b'\n', &input[pos..]) {
                Some(i) => pos += i + 1,
                None => {
                    pos = input.len();
                    break;
                }
            }
        }
        Self {
            config,
            scanner: ByteScanner::new(config.delimiter, config.quote),
            cursor: InterestCursor::new(),
            pos,
            data_rows: 0,
            header_emitted: false,
            done: false,
            errors: Vec::new(),
        }
    }

    /// Same as [`Tokenizer::new`] but pinned to the scalar scanner path.
    pub fn new_scalar(input: &[u8], config: ParserConfig) -> Self {
        let mut tokenizer = Self::new(input, config);
        tokenizer.scanner = ByteScanner::scalar(config.delimiter, config.quote);
        tokenizer
    }

    /// Current byte position of the cursor.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Emitted data records so far (the header does not count).
    pub fn data_rows(&self) -> u64 {
        self.data_rows
    }

    /// Natural lane width of the underlying scanner.
    pub fn lane_width(&self) -> usize {
        self.scanner.lane_width()
    }

    /// Whether the first emitted record of the next call would be the
    /// header row.
    pub fn header_pending(&self) -> bool {
        self.config.has_header && !self.header_emitted
    }

    /// The tokenizer has reached end of input or the preview cap.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Advance to the next emitted record, filling `out` with its field
    /// spans. Returns `false` at end of input or once the preview cap is
    /// reached. Comment lines and (when configured) empty rows are skipped;
    /// when `has_header` is set the first emitted record is the header and
    /// is exempt from the preview cap.
    pub fn next_record(&mut self, input: &[u8], out: &mut Vec<FieldSpan>) -> bool {
        out.clear();
        if self.done {
            return false;
        }
        let header_pending = self.header_pending();
        if !header_pending && self.config.preview != 0 && self.data_rows >= self.config.preview {
            self.done = true;
            return false;
        }

        loop {
            if self.pos >= input.len() {
                self.done = true;
                return false;
            }
            if self.config.comment_byte != 0 && input[self.pos] == self.config.comment_byte {
                self.skip_comment_line(input);
                continue;
            }
            out.clear();
            if !self.parse_record(input, out) {
                self.done = true;
                return false;
            }
            if self.config.skip_empty_rows && out.len() == 1 && out[0].is_null() {
                continue;
            }
            break;
        }

        if header_pending {
            self.header_emitted = true;
        } else {
            self.data_rows += 1;
        }
        true
    }

    /// 0-based data-row index attached to tolerated errors.
    fn current_row_index(&self) -> u64 {
        if self.header_pending() {
            0
        } else {
            self.data_rows
        }
    }

    /// Discard bytes through the next record terminator.
    fn skip_comment_line(&mut self, input: &[u8]) {
        match memchr(b'\n', &input[self.pos..]) {
            Some(i) => self.pos += i + 1,
            None => self.pos = input.len(),
        }
    }

    /// Tokenize one record starting at `self.pos`. Returns `false` when the
    /// input is exhausted without producing a record.
    fn parse_record(&mut self, input: &[u8], out: &mut Vec<FieldSpan>) -> bool {
        let len = input.len();
        let config = self.config;
        let mut field_begin = self.pos;
        let mut quoted = false;
        let mut in_quotes = false;

        loop {
            let Some(i) = self.cursor.next_at(&self.scanner, input, self.pos) else {
                // End of input. Emit whatever is pending; a quoted field
                // that never closed is emitted through end-of-input.
                if in_quotes {
                    let row = self.current_row_index();
                    self.errors.push(RowError::new(ErrorKind::MissingQuotes, row));
                }
                self.pos = len;
                if len > field_begin || !out.is_empty() {
                    push_field(out, field_begin, len, quoted);
                    return true;
                }
                return false;
            };

            let byte = input[i];
            if in_quotes {
                if byte == config.quote {
                    if config.doubled_quote_escape() {
                        if i + 1 < len && input[i + 1] == config.quote {
                            // Doubled quote is a literal quote.
                            self.pos = i + 2;
                            continue;
                        }
                    } else if i > field_begin && input[i - 1] == config.escape {
                        // Escape byte keeps the quote literal.
                        self.pos = i + 1;
                        continue;
                    }
                    in_quotes = false;
                }
                // Delimiters and line terminators inside quotes are data.
                self.pos = i + 1;
                continue;
            }

            if byte == config.delimiter {
                push_field(out, field_begin, i, quoted);
                field_begin = i + 1;
                quoted = false;
                self.pos = i + 1;
                continue;
            }
            if byte == config.quote {
                if i == field_begin && !quoted {
                    quoted = true;
                    in_quotes = true;
                    self.pos = i + 1;
                    continue;
                }
                // Quote inside an unquoted field, or stray bytes after a
                // closing quote: tolerated as literals.
                let row = self.current_row_index();
                self.errors.push(RowError::new(ErrorKind::InvalidQuotes, row));
                self.pos = i + 1;
                continue;
            }

            // CR or LF terminates the record; CRLF counts once.
            push_field(out, field_begin, i, quoted);
            self.pos = i + 1;
            if byte == b'\r' && self.pos < len && input[self.pos] == b'\n' {
                self.pos += 1;
            }
            return true;
        }
    }
}

#[inline]
fn push_field(out: &mut Vec<FieldSpan>, begin: usize, end: usize, quoted: bool) {
    let len = end - begin;
    let mut flags = 0u8;
    if quoted {
        flags |= FLAG_NEEDS_UNESCAPE;
    }
    if len == 0 && !quoted {
        flags |= FLAG_NULL_SENTINEL;
    }
    out.push(FieldSpan {
        start: begin as u32,
        len: len as u32,
        flags,
    });
}

/// Parse the whole input single-threaded into a flat index.
pub fn parse_index(input: &[u8], config: ParserConfig) -> ParsedIndex {
    let mut tokenizer = Tokenizer::new(input, config);
    let mut index = ParsedIndex::default();
    let mut fields = Vec::new();
    while tokenizer.next_record(input, &mut fields) {
        index.push_row(&fields);
    }
    index.errors = std::mem::take(&mut tokenizer.errors);
    index
}

/// Decode a raw field to its logical value.
///
/// Removes one pair of surrounding quote bytes and collapses escapes:
/// doubled quotes when `escape == quote`, otherwise escape-then-quote
/// pairs. Fields that are not fully quoted come back unchanged, which also
/// covers the tolerated malformed shapes.
pub fn unescape_field<'a>(field: &'a [u8], quote: u8, escape: u8) -> Cow<'a, [u8]> {
    if field.len() < 2 || field[0] != quote || field[field.len() - 1] != quote {
        return Cow::Borrowed(field);
    }
    let inner = &field[1..field.len() - 1];
    let marker = if escape == quote { quote } else { escape };
    if !inner.contains(&marker) {
        return Cow::Borrowed(inner);
    }

    let mut result = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] == marker && i + 1 < inner.len() && inner[i + 1] == quote {
            result.push(quote);
            i += 2;
        } else {
            result.push(inner[i]);
            i += 1;
        }
    }
    Cow::Owned(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_rows(input: &[u8], config: ParserConfig) -> Vec<Vec<Vec<u8>>> {
        let index = parse_index(input, config);
        (0..index.rows.len())
            .map(|r| {
                index
                    .row_fields(r)
                    .iter()
                    .map(|span| {
                        unescape_field(span.slice(input), config.quote, config.escape).into_owned()
                    })
                    .collect()
            })
            .collect()
    }

    fn row(fields: &[&str]) -> Vec<Vec<u8>> {
        fields.iter().map(|f| f.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_simple_csv() {
        let rows = parse_rows(b"name,age\nAlice,30\nBob,25\n", ParserConfig::default());
        assert_eq!(
            rows,
            vec![row(&["name", "age"]), row(&["Alice", "30"]), row(&["Bob", "25"])]
        );
    }

    #[test]
    fn test_quoted_embedded_comma_and_doubled_quote() {
        let rows = parse_rows(b"a,b\n\"x,y\",\"say \"\"hi\"\"\"\n", ParserConfig::default());
        assert_eq!(rows[1], row(&["x,y", "say \"hi\""]));
    }

    #[test]
    fn test_spans_include_surrounding_quotes() {
        let input = b"\"x,y\",z\n";
        let index = parse_index(input, ParserConfig::default());
        let fields = index.row_fields(0);
        assert_eq!(fields[0].slice(input), b"\"x,y\"");
        assert!(fields[0].needs_unescape());
        assert_eq!(fields[1].slice(input), b"z");
        assert!(!fields[1].needs_unescape());
    }

    #[test]
    fn test_crlf_folds_to_one_terminator() {
        let rows = parse_rows(b"a,b\r\n1,2\r\n", ParserConfig::default());
        assert_eq!(rows, vec![row(&["a", "b"]), row(&["1", "2"])]);
    }

    #[test]
    fn test_bare_cr_terminates_record() {
        let rows = parse_rows(b"a,b\r1,2\n", ParserConfig::default());
        assert_eq!(rows, vec![row(&["a", "b"]), row(&["1", "2"])]);
    }

    #[test]
    fn test_quoted_newline_stays_in_field() {
        let rows = parse_rows(b"a,\"line1\nline2\",c\n", ParserConfig::default());
        assert_eq!(rows, vec![row(&["a", "line1\nline2", "c"])]);
    }

    #[test]
    fn test_quoted_crlf_stays_in_field() {
        let rows = parse_rows(b"a,\"x\r\ny\",b\n", ParserConfig::default());
        assert_eq!(rows, vec![row(&["a", "x\r\ny", "b"])]);
    }

    #[test]
    fn test_empty_fields_and_null_sentinel() {
        let input = b"a,,c\n";
        let index = parse_index(input, ParserConfig::default());
        let fields = index.row_fields(0);
        assert_eq!(fields.len(), 3);
        assert!(fields[1].is_null());
        assert!(!fields[0].is_null());
    }

    #[test]
    fn test_quoted_empty_field_is_not_null() {
        let input = b"a,\"\",c\n";
        let index = parse_index(input, ParserConfig::default());
        let fields = index.row_fields(0);
        assert_eq!(fields[1].slice(input), b"\"\"");
        assert!(!fields[1].is_null());
        assert!(fields[1].needs_unescape());
    }

    #[test]
    fn test_trailing_record_without_newline() {
        let rows = parse_rows(b"a,b\n1,2", ParserConfig::default());
        assert_eq!(rows, vec![row(&["a", "b"]), row(&["1", "2"])]);
    }

    #[test]
    fn test_trailing_delimiter_yields_empty_field() {
        let rows = parse_rows(b"a,\n", ParserConfig::default());
        assert_eq!(rows, vec![row(&["a", ""])]);
    }

    #[test]
    fn test_skip_empty_rows() {
        let config = ParserConfig {
            skip_empty_rows: true,
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"a,b\r\n1,2\r\n\r\n3,4\r\n", config);
        assert_eq!(rows, vec![row(&["a", "b"]), row(&["1", "2"]), row(&["3", "4"])]);
    }

    #[test]
    fn test_empty_rows_kept_by_default() {
        let rows = parse_rows(b"a\n\nb\n", ParserConfig::default());
        assert_eq!(rows, vec![row(&["a"]), row(&[""]), row(&["b"])]);
    }

    #[test]
    fn test_comment_lines_discarded() {
        let config = ParserConfig {
            comment_byte: b'#',
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"name,age\n# skip\nAlice,30\n", config);
        assert_eq!(rows, vec![row(&["name", "age"]), row(&["Alice", "30"])]);
    }

    #[test]
    fn test_comment_byte_inside_record_is_data() {
        let config = ParserConfig {
            comment_byte: b'#',
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"a,#b\n", config);
        assert_eq!(rows, vec![row(&["a", "#b"])]);
    }

    #[test]
    fn test_preamble_skip_with_tab_delimiter() {
        let config = ParserConfig {
            delimiter: b'\t',
            skip_first_n_lines: 1,
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"metadata\nname\tage\nAlice\t30\n", config);
        assert_eq!(rows, vec![row(&["name", "age"]), row(&["Alice", "30"])]);
    }

    #[test]
    fn test_preamble_counts_crlf_as_one_line() {
        let config = ParserConfig {
            skip_first_n_lines: 2,
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"junk\r\nmore junk\na,b\n", config);
        assert_eq!(rows, vec![row(&["a", "b"])]);
    }

    #[test]
    fn test_preamble_ignores_quotes() {
        // The preamble is raw text: an unbalanced quote does not extend it.
        let config = ParserConfig {
            skip_first_n_lines: 1,
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"bad \" line\na,b\n", config);
        assert_eq!(rows, vec![row(&["a", "b"])]);
    }

    #[test]
    fn test_bom_stripped_before_preamble() {
        let config = ParserConfig {
            skip_first_n_lines: 1,
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"\xEF\xBB\xBFpreamble\na,b\n", config);
        assert_eq!(rows, vec![row(&["a", "b"])]);
    }

    #[test]
    fn test_preview_caps_data_rows() {
        let config = ParserConfig {
            preview: 2,
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"a\nb\nc\nd\n", config);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_preview_excludes_header() {
        let config = ParserConfig {
            has_header: true,
            preview: 2,
            ..ParserConfig::default()
        };
        // Header plus two data rows survive the cap.
        let rows = parse_rows(b"h1,h2\n1,2\n3,4\n5,6\n", config);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], row(&["h1", "h2"]));
        assert_eq!(rows[2], row(&["3", "4"]));
    }

    #[test]
    fn test_invalid_quotes_tolerated_as_literal() {
        let input = b"a\"b,c\n";
        let index = parse_index(input, ParserConfig::default());
        assert_eq!(index.row_fields(0)[0].slice(input), b"a\"b");
        assert_eq!(index.errors.len(), 1);
        assert_eq!(index.errors[0].kind, ErrorKind::InvalidQuotes);
        assert_eq!(index.errors[0].row, 0);
    }

    #[test]
    fn test_missing_close_quote_emits_through_eof() {
        let input = b"a,\"unterminated";
        let index = parse_index(input, ParserConfig::default());
        assert_eq!(index.rows.len(), 1);
        assert_eq!(index.row_fields(0)[1].slice(input), b"\"unterminated");
        assert!(index
            .errors
            .iter()
            .any(|e| e.kind == ErrorKind::MissingQuotes));
    }

    #[test]
    fn test_stray_bytes_after_closing_quote_tolerated() {
        let input = b"\"ab\"cd,e\n";
        let index = parse_index(input, ParserConfig::default());
        let fields = index.row_fields(0);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].slice(input), b"\"ab\"cd");
        assert_eq!(fields[1].slice(input), b"e");
    }

    #[test]
    fn test_distinct_escape_byte() {
        let config = ParserConfig {
            escape: b'\\',
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"a,\"x\\\"y\",b\n", config);
        assert_eq!(rows[0], row(&["a", "x\"y", "b"]));
    }

    #[test]
    fn test_distinct_escape_before_non_quote_is_literal() {
        let config = ParserConfig {
            escape: b'\\',
            ..ParserConfig::default()
        };
        let rows = parse_rows(b"\"a\\b\",c\n", config);
        assert_eq!(rows[0], row(&["a\\b", "c"]));
    }

    #[test]
    fn test_span_bounds_stay_inside_source() {
        let input = b"a,\"b\nc\",dd\r\ne,f";
        let index = parse_index(input, ParserConfig::default());
        for span in &index.fields {
            assert!((span.start + span.len) as usize <= input.len());
        }
    }

    #[test]
    fn test_field_counts_sum_to_flat_length() {
        let input = b"a,b,c\n1,2\n3,4,5,6\n";
        let index = parse_index(input, ParserConfig::default());
        let sum: usize = index.rows.iter().map(|r| r.field_count as usize).sum();
        assert_eq!(sum, index.fields.len());
        assert!(index.rows.iter().all(|r| r.field_count >= 1));
    }

    #[test]
    fn test_unescape_plain_and_quoted() {
        assert_eq!(&*unescape_field(b"hello", b'"', b'"'), b"hello");
        assert_eq!(&*unescape_field(b"\"hello\"", b'"', b'"'), b"hello");
        assert_eq!(
            &*unescape_field(b"\"say \"\"hi\"\"\"", b'"', b'"'),
            b"say \"hi\""
        );
        assert_eq!(&*unescape_field(b"\"a\\\"b\"", b'"', b'\\'), b"a\"b");
    }

    #[test]
    fn test_unescape_borrows_when_possible() {
        assert!(matches!(
            unescape_field(b"\"plain\"", b'"', b'"'),
            Cow::Borrowed(_)
        ));
        assert!(matches!(
            unescape_field(b"\"a\"\"b\"", b'"', b'"'),
            Cow::Owned(_)
        ));
    }

    #[test]
    fn test_scalar_tokenizer_matches_vector_tokenizer() {
        let input = b"a,\"b,c\"\n\"x\"\"y\",z\r\nlong,unquoted,tail,row\n#not a comment\n";
        let config = ParserConfig::default();

        let mut vector = Tokenizer::new(input, config);
        let mut scalar = Tokenizer::new_scalar(input, config);
        let mut fields_v = Vec::new();
        let mut fields_s = Vec::new();
        loop {
            let more_v = vector.next_record(input, &mut fields_v);
            let more_s = scalar.next_record(input, &mut fields_s);
            assert_eq!(more_v, more_s);
            assert_eq!(fields_v, fields_s);
            if !more_v {
                break;
            }
        }
    }
}
