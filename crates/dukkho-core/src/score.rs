// Score-tag extraction over a streamed model response.
//
// The persona prompt makes the model end each reply with `||SCORE: n||`.
// The relay streams that text verbatim, so the client has to find the tag
// while the response is still arriving and keep it out of the display text.
// `ResponseAccumulator` does that: it decodes chunks incrementally (holding
// back code points split across chunk boundaries), keeps the raw buffer
// intact, and re-derives the display string from the whole buffer after
// every chunk so a tag split across chunks is still caught.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Tag matching
// ---------------------------------------------------------------------------

/// ASCII digits only; a localized digit run is not a score.
const SCORE_TAG_PATTERN: &str = r"\|\|SCORE:\s*([0-9]+)\|\|";

static SCORE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SCORE_TAG_PATTERN).expect("score tag pattern compiles"));

/// A score tag located in a text buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTag {
    /// The captured integer. Values too large for `u64` saturate.
    pub score: u64,
    /// Byte range of the whole tag, delimiters included.
    pub range: Range<usize>,
}

/// Find the first well-formed score tag in `text`.
pub fn find_score_tag(text: &str) -> Option<ScoreTag> {
    let caps = SCORE_TAG_RE.captures(text)?;
    let whole = caps.get(0)?;
    let digits = caps.get(1)?.as_str();
    Some(ScoreTag {
        score: digits.parse().unwrap_or(u64::MAX),
        range: whole.range(),
    })
}

/// Remove the first score tag from `text`, returning the cleaned text and
/// the captured score. Text without a tag is returned unchanged.
pub fn strip_score_tag(text: &str) -> (String, Option<u64>) {
    match find_score_tag(text) {
        Some(tag) => {
            let mut cleaned = String::with_capacity(text.len() - tag.range.len());
            cleaned.push_str(&text[..tag.range.start]);
            cleaned.push_str(&text[tag.range.end..]);
            (cleaned, Some(tag.score))
        }
        None => (text.to_string(), None),
    }
}

/// Add a turn's score to a chat's running total. Turns without a tag leave
/// the total untouched; the sum saturates instead of wrapping.
pub fn accumulate(total: u64, turn_score: Option<u64>) -> u64 {
    match turn_score {
        Some(score) => total.saturating_add(score),
        None => total,
    }
}

// ---------------------------------------------------------------------------
// ResponseAccumulator
// ---------------------------------------------------------------------------

/// Final result of consuming a response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResponse {
    /// Display text with the tag removed; this is what gets persisted.
    pub text: String,
    /// Score captured from the tag, if one ever appeared.
    pub score: Option<u64>,
}

/// Incremental consumer of a streamed model response.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Everything decoded so far, tag included.
    buffer: String,
    /// `buffer` with the first tag match excised.
    display: String,
    score: Option<u64>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk and return the updated display text.
    pub fn push(&mut self, chunk: &[u8]) -> &str {
        self.decode(chunk);
        self.refresh();
        &self.display
    }

    /// Append already-decoded text and return the updated display text.
    pub fn push_str(&mut self, chunk: &str) -> &str {
        self.push(chunk.as_bytes())
    }

    /// The raw accumulated text, tag included.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// The text to show the user right now.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// The score captured so far, if any.
    pub fn score(&self) -> Option<u64> {
        self.score
    }

    /// End of stream. A dangling partial code point becomes U+FFFD.
    pub fn finish(mut self) -> CompletedResponse {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.buffer.push(char::REPLACEMENT_CHARACTER);
            self.refresh();
        }
        CompletedResponse {
            text: self.display,
            score: self.score,
        }
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut consumed = 0;
        while consumed < self.pending.len() {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
    }

    fn refresh(&mut self) {
        match find_score_tag(&self.buffer) {
            Some(tag) => {
                self.score = Some(tag.score);
                self.display.clear();
                self.display.push_str(&self.buffer[..tag.range.start]);
                self.display.push_str(&self.buffer[tag.range.end..]);
            }
            None => {
                self.display.clear();
                self.display.push_str(&self.buffer);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
