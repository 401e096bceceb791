//! Parser configuration.

use crate::error::EngineError;

/// Tokenizing options.
///
/// `escape` defaults to the quote byte, which selects doubled-quote escaping
/// (`""` inside a quoted field). When `escape` differs from `quote`, an
/// escape byte followed by a quote inside a quoted field is an escaped quote;
/// an escape byte followed by anything else is kept as a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Quote byte.
    pub quote: u8,
    /// Escape byte; equal to `quote` selects doubled-quote escaping.
    pub escape: u8,
    /// When set, the first non-skipped record becomes the header.
    pub has_header: bool,
    /// Suppress records whose only field is empty and unquoted.
    pub skip_empty_rows: bool,
    /// Records starting with this byte are discarded; `0` disables.
    pub comment_byte: u8,
    /// Cap on emitted data records; `0` is unlimited. The header does not
    /// count toward the cap.
    pub preview: u64,
    /// Raw lines consumed before tokenizing begins. Both `\n` and `\r\n`
    /// advance the count; quoting inside the preamble is not honored.
    pub skip_first_n_lines: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: b'"',
            has_header: false,
            skip_empty_rows: false,
            comment_byte: 0,
            preview: 0,
            skip_first_n_lines: 0,
        }
    }
}

impl ParserConfig {
    /// Check the structural invariants: none of delimiter, quote, or escape
    /// may collide with a line terminator, and delimiter must differ from
    /// quote.
    pub fn validate(&self) -> Result<(), EngineError> {
        for byte in [self.delimiter, self.quote, self.escape] {
            if byte == b'\n' || byte == b'\r' {
                return Err(EngineError::InvalidConfig(
                    "delimiter, quote, and escape must not be CR or LF",
                ));
            }
        }
        if self.delimiter == self.quote {
            return Err(EngineError::InvalidConfig(
                "delimiter and quote must differ",
            ));
        }
        Ok(())
    }

    /// Doubled-quote escaping is in effect.
    #[inline]
    pub(crate) fn doubled_quote_escape(&self) -> bool {
        self.escape == self.quote
    }
}
