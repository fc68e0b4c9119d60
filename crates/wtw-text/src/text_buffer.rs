#![forbid(unsafe_code)]

//! Frame text storage.
//!
//! A [`TextBuffer`] holds the lines of the frame being collected as
//! NUL-terminated byte strings laid out back to back. Its logical capacity
//! starts at [`INITIAL_CAPACITY`] and doubles whenever a line would not fit
//! together with room for the delimiter, a newline and a terminator, so the
//! reader never has to grow mid-line.

use std::collections::TryReserveError;

use memchr::memchr;

/// Capacity after the first growth step.
pub const INITIAL_CAPACITY: usize = 2;

/// Growable store of NUL-terminated lines.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    bytes: Vec<u8>,
    len: usize,
    cap: usize,
    reserve: usize,
}

impl TextBuffer {
    /// Create an empty buffer that keeps room for a delimiter of
    /// `delimiter_len` bytes plus newline and terminator.
    pub fn new(delimiter_len: usize) -> Self {
        Self {
            bytes: Vec::new(),
            len: 0,
            cap: 0,
            reserve: delimiter_len.saturating_add(2),
        }
    }

    /// Logical length in bytes, terminators included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no lines.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Logical capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Forget all lines. Capacity is kept.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append one line (without its newline) and a terminator.
    ///
    /// Grows by doubling until the line fits and the delimiter headroom is
    /// still available. On allocation failure the buffer is unchanged.
    pub fn push_line(&mut self, line: &[u8]) -> Result<(), TryReserveError> {
        let need = line.len().saturating_add(1).max(self.reserve);
        self.grow_to(self.len.saturating_add(need))?;

        let end = self.len + line.len();
        self.bytes[self.len..end].copy_from_slice(line);
        self.bytes[end] = 0;
        self.len = end + 1;
        Ok(())
    }

    fn grow_to(&mut self, required: usize) -> Result<(), TryReserveError> {
        if required <= self.cap {
            return Ok(());
        }
        let mut cap = if self.cap == 0 {
            INITIAL_CAPACITY
        } else {
            self.cap
        };
        while cap < required {
            cap = cap.saturating_mul(2);
        }
        self.bytes.try_reserve_exact(cap - self.bytes.len())?;
        self.bytes.resize(cap, 0);
        self.cap = cap;
        tracing::trace!(capacity = cap, len = self.len, "text buffer grew");
        Ok(())
    }

    /// Number of stored lines.
    pub fn line_count(&self) -> usize {
        self.lines().count()
    }

    /// Iterate over the stored lines, terminators stripped.
    pub fn lines(&self) -> Lines<'_> {
        Lines {
            rest: &self.bytes[..self.len],
        }
    }
}

/// Iterator returned by [`TextBuffer::lines`].
#[derive(Debug, Clone)]
pub struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match memchr(0, self.rest) {
            Some(end) => {
                let line = &self.rest[..end];
                self.rest = &self.rest[end + 1..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = &[];
                Some(line)
            }
        }
    }
}
