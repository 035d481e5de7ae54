//! Shared text arena backing every classified line.
//!
//! All line text lives in one contiguous byte buffer; records reference it
//! through `(offset, len)` spans instead of owning strings. The buffer never
//! grows past its construction-time capacity and an append that would exceed
//! it fails without touching the stored bytes.

use crate::StoreError;

/// View into the arena. Offsets are stable for the lifetime of a parse pass
/// (the arena is only ever appended to or cleared wholesale).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: u32,
    pub len: u32,
}

impl Span {
    pub const EMPTY: Span = Span { offset: 0, len: 0 };

    pub fn new(offset: usize, len: usize) -> Self {
        Self {
            offset: offset as u32,
            len: len as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.offset as usize + self.len as usize
    }
}

#[derive(Debug)]
pub struct TextArena {
    buf: Vec<u8>,
    capacity: usize,
    /// Per-line truncation limit applied before capacity checking.
    max_line_bytes: usize,
}

impl TextArena {
    pub fn new(capacity: usize, max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            max_line_bytes,
        }
    }

    pub fn used(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one line of text, truncated to the per-line maximum on a UTF-8
    /// character boundary. Fails with `ArenaFull` (no partial write) when the
    /// truncated text would not fit.
    pub fn append(&mut self, text: &str) -> Result<Span, StoreError> {
        let clipped = clip_to_boundary(text, self.max_line_bytes);
        if self.buf.len() + clipped.len() > self.capacity {
            return Err(StoreError::ArenaFull);
        }
        let offset = self.buf.len();
        self.buf.extend_from_slice(clipped.as_bytes());
        Ok(Span::new(offset, clipped.len()))
    }

    /// Resolve a span back to text. Spans handed out by `append` always point
    /// at valid UTF-8; a span outside the used region yields the empty string
    /// rather than panicking.
    pub fn text(&self, span: Span) -> &str {
        let start = span.offset as usize;
        let end = span.end();
        if end > self.buf.len() || start > end {
            return "";
        }
        std::str::from_utf8(&self.buf[start..end]).unwrap_or("")
    }

    /// Reset the running length. Keeps the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Stable identity of the backing allocation, used by tests to verify
    /// `clear` does not reallocate.
    pub fn base_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }
}

/// Truncate `text` to at most `max` bytes without splitting a UTF-8 sequence.
fn clip_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
