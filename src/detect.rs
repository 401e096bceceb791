//! Byte-order-mark recognition and delimiter sniffing.
//!
//! Detection never transcodes: the BOM routines only report how many bytes
//! to skip, and the delimiter sniffer scores candidates over a bounded
//! sample of the input.

use memchr::memchr;

/// How many leading bytes the delimiter sniffer inspects.
pub const SAMPLE_LIMIT: usize = 8192;

/// How many logical lines of the sample are scored.
const SAMPLE_LINES: usize = 8;

/// Default delimiter candidates, in tie-break order.
pub const DEFAULT_CANDIDATES: [u8; 4] = [b',', b'\t', b'|', b';'];

/// Recognized source encodings. Only the BOM is inspected; no conversion
/// is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Utf8 = 0,
    Utf8Bom = 1,
    Utf16Le = 2,
    Utf16Be = 3,
    Utf32Le = 4,
    Utf32Be = 5,
}

/// Byte length of a recognized byte-order mark at the start of `bytes`,
/// or 0 when none is present.
///
/// UTF-32 marks are checked before UTF-16 because `FF FE 00 00` begins
/// with the UTF-16LE mark.
pub fn detect_bom(bytes: &[u8]) -> usize {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return 3;
    }
    if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) || bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF])
    {
        return 4;
    }
    if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        return 2;
    }
    0
}

/// Classify the source by its byte-order mark. Absence of a mark reports
/// plain UTF-8.
pub fn detect_encoding(bytes: &[u8]) -> Encoding {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Encoding::Utf8Bom
    } else if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        Encoding::Utf32Le
    } else if bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        Encoding::Utf32Be
    } else if bytes.starts_with(&[0xFF, 0xFE]) {
        Encoding::Utf16Le
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        Encoding::Utf16Be
    } else {
        Encoding::Utf8
    }
}

/// Outcome of delimiter sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterGuess {
    pub delimiter: u8,
    /// Set when no candidate produced any split and the first candidate was
    /// used as a fallback.
    pub undetectable: bool,
}

/// Split the sample into logical line ranges, ignoring newlines inside
/// paired quote bytes. Returns at most `SAMPLE_LINES` non-empty lines.
fn sample_lines(sample: &[u8], quote: u8) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut line_start = 0usize;
    let mut in_quotes = false;

    for (i, &byte) in sample.iter().enumerate() {
        if byte == quote {
            in_quotes = !in_quotes;
        } else if byte == b'\n' && !in_quotes {
            let mut end = i;
            if end > line_start && sample[end - 1] == b'\r' {
                end -= 1;
            }
            if end > line_start {
                lines.push(&sample[line_start..end]);
                if lines.len() >= SAMPLE_LINES {
                    return lines;
                }
            }
            line_start = i + 1;
        }
    }
    if line_start < sample.len() {
        lines.push(&sample[line_start..]);
    }
    lines
}

/// Count occurrences of `candidate` outside quoted regions.
fn count_outside_quotes(line: &[u8], candidate: u8, quote: u8) -> usize {
    let mut count = 0;
    let mut in_quotes = false;
    for &byte in line {
        if byte == quote {
            in_quotes = !in_quotes;
        } else if byte == candidate && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Score one candidate: the number of lines whose occurrence count equals
/// the modal non-zero count, weighted by that mode. A candidate that never
/// splits any line scores zero.
fn score_candidate(lines: &[&[u8]], candidate: u8, quote: u8) -> usize {
    let counts: Vec<usize> = lines
        .iter()
        .map(|line| count_outside_quotes(line, candidate, quote))
        .collect();

    let mut mode = 0usize;
    let mut mode_freq = 0usize;
    for &value in &counts {
        if value == 0 {
            continue;
        }
        let freq = counts.iter().filter(|&&c| c == value).count();
        if freq > mode_freq || (freq == mode_freq && value > mode) {
            mode = value;
            mode_freq = freq;
        }
    }
    mode_freq * mode
}

/// Pick the most likely delimiter from `candidates` by sampling the first
/// [`SAMPLE_LIMIT`] bytes past any byte-order mark. Ties resolve to the
/// earliest candidate; when nothing splits, the first candidate is
/// returned with `undetectable` set.
pub fn detect_delimiter(input: &[u8], candidates: &[u8], quote: u8) -> DelimiterGuess {
    let fallback = candidates.first().copied().unwrap_or(b',');
    let body = &input[detect_bom(input)..];

    // Skip leading blank lines so the sample starts at the first record.
    let mut start = 0usize;
    while start < body.len() {
        match body[start] {
            b'\n' | b'\r' => start += 1,
            _ => break,
        }
    }
    let sample = &body[start..(start + SAMPLE_LIMIT).min(body.len())];

    // Truncate to whole lines when the sample was cut mid-record, keeping
    // at least one line.
    let sample = match memchr(b'\n', sample) {
        Some(_) if sample.len() == SAMPLE_LIMIT => {
            let last_nl = sample.iter().rposition(|&b| b == b'\n').unwrap_or(0);
            &sample[..=last_nl]
        }
        _ => sample,
    };

    let lines = sample_lines(sample, quote);
    if lines.is_empty() {
        return DelimiterGuess {
            delimiter: fallback,
            undetectable: true,
        };
    }

    let mut best_score = 0usize;
    let mut best = fallback;
    for &candidate in candidates {
        let score = score_candidate(&lines, candidate, quote);
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }

    DelimiterGuess {
        delimiter: best,
        undetectable: best_score == 0,
    }
}
