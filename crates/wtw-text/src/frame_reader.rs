#![forbid(unsafe_code)]

//! Splitting child output into frames.
//!
//! The child writes newline-separated lines; a line equal to the delimiter
//! closes the current frame. [`FrameReader`] consumes a non-blocking
//! source in bounded chunks, keeps partial lines across wake-ups, and
//! collects complete lines into a [`TextBuffer`].
//!
//! The buffer is reset lazily, when the first line of the next frame
//! arrives, so the finished frame stays readable until then.

use std::io::{self, ErrorKind, Read};

use memchr::memchr;

use crate::text_buffer::TextBuffer;

/// Bytes requested per `read` call.
pub const READ_CHUNK: usize = 4096;

/// Maximum `read` calls per [`FrameReader::read_from`], so one chatty child
/// cannot starve the rest of the event loop.
pub const MAX_READS_PER_WAKE: usize = 16;

/// Longest line kept, in bytes. Anything past it up to the newline is
/// dropped.
pub const MAX_LINE_LEN: usize = 256 * 1024;

/// Result of one [`FrameReader::read_from`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A frame is complete; its lines are in [`FrameReader::frame`].
    Frame,
    /// No complete frame yet; wait for more readiness.
    Pending,
    /// End of input. `frame` is true when the last line completed a frame.
    Eof { frame: bool },
}

/// Incremental line and frame splitter.
#[derive(Debug)]
pub struct FrameReader {
    delimiter: Vec<u8>,
    pending: Vec<u8>,
    /// Prefix of `pending` known to hold no newline.
    scanned: usize,
    max_line: usize,
    /// Dropping the rest of an overlong line.
    overlong: bool,
    text: TextBuffer,
    reset_on_next_line: bool,
    skipping: bool,
    frames: u64,
}

impl FrameReader {
    /// Create a reader that ends frames on lines equal to `delimiter`.
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        let delimiter = delimiter.into();
        let text = TextBuffer::new(delimiter.len());
        let max_line = MAX_LINE_LEN.max(delimiter.len() + 1);
        Self {
            delimiter,
            pending: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
            max_line,
            overlong: false,
            text,
            reset_on_next_line: false,
            skipping: false,
            frames: 0,
        }
    }

    /// Cap lines at `len` bytes; never below the delimiter length plus one,
    /// so a cut line cannot turn into a delimiter.
    pub fn with_max_line(mut self, len: usize) -> Self {
        self.max_line = len.max(self.delimiter.len() + 1);
        self
    }

    /// Lines of the most recent frame (or of the frame in progress).
    pub fn frame(&self) -> &TextBuffer {
        &self.text
    }

    /// Frames completed so far.
    pub fn frames_completed(&self) -> u64 {
        self.frames
    }

    /// Bytes buffered after the last complete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a complete line is buffered but not yet processed, so the
    /// next [`read_from`](Self::read_from) can make progress without input.
    pub fn has_queued_line(&self) -> bool {
        memchr(b'\n', &self.pending[self.scanned..]).is_some()
    }

    /// Drop buffered state between child runs.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.scanned = 0;
        self.overlong = false;
        self.text.clear();
        self.reset_on_next_line = false;
        self.skipping = false;
    }

    /// Read from `src` until a frame completes, the source would block,
    /// the read budget is spent, or end of input.
    ///
    /// Complete lines left over from an earlier call are processed before
    /// any new bytes are read. Interrupted reads are retried.
    pub fn read_from<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<ReadOutcome> {
        if self.split_pending() {
            return Ok(ReadOutcome::Frame);
        }

        let mut chunk = [0u8; READ_CHUNK];
        let mut reads = 0;
        while reads < MAX_READS_PER_WAKE {
            let n = match src.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Pending);
                }
                Err(err) => return Err(err),
            };
            reads += 1;

            if n == 0 {
                return Ok(ReadOutcome::Eof {
                    frame: self.finish(),
                });
            }
            self.push_bytes(&chunk[..n]);
            if self.split_pending() {
                return Ok(ReadOutcome::Frame);
            }
        }
        Ok(ReadOutcome::Pending)
    }

    /// Feed bytes directly, as if read from a source. Returns true when a
    /// frame completed; further complete lines stay queued.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        self.push_bytes(bytes);
        self.split_pending()
    }

    /// Append input, discarding the tail of an overlong line.
    fn push_bytes(&mut self, bytes: &[u8]) {
        let bytes = if self.overlong {
            match memchr(b'\n', bytes) {
                Some(nl) => {
                    self.overlong = false;
                    &bytes[nl..]
                }
                None => return,
            }
        } else {
            bytes
        };
        self.pending.extend_from_slice(bytes);
    }

    /// Process queued complete lines, stopping after a delimiter line.
    ///
    /// Only bytes past `scanned` are searched, so a long
    /// line arriving in many chunks is scanned once.
    fn split_pending(&mut self) -> bool {
        let mut start = 0;
        let mut from = self.scanned;
        let mut completed = false;
        while let Some(nl) = memchr(b'\n', &self.pending[from..]) {
            let end = from + nl;
            let line = std::mem::take(&mut self.pending);
            completed = self.accept_line(&line[start..end]);
            self.pending = line;
            start = end + 1;
            from = start;
            if completed {
                break;
            }
        }
        self.pending.drain(..start);
        // Stopped at a delimiter: the rest has not been looked at.
        self.scanned = if completed { 0 } else { self.pending.len() };

        if !completed && self.pending.len() > self.max_line {
            tracing::debug!(
                kept = self.max_line,
                "overlong line; dropping bytes up to the next newline"
            );
            self.pending.truncate(self.max_line);
            self.scanned = self.max_line;
            self.overlong = true;
        }
        completed
    }

    /// Handle end of input: the unterminated tail still counts as a line.
    /// A frame left open is discarded.
    fn finish(&mut self) -> bool {
        let mut completed = false;
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            completed = self.accept_line(&tail);
        }
        if !completed && !self.reset_on_next_line && !self.text.is_empty() {
            tracing::debug!(
                lines = self.text.line_count(),
                "input ended mid-frame; partial frame dropped"
            );
            self.text.clear();
        }
        self.pending.clear();
        self.scanned = 0;
        self.overlong = false;
        self.reset_on_next_line = true;
        self.skipping = false;
        completed
    }

    fn accept_line(&mut self, line: &[u8]) -> bool {
        if self.reset_on_next_line {
            self.text.clear();
            self.reset_on_next_line = false;
        }

        if line == self.delimiter.as_slice() {
            self.reset_on_next_line = true;
            if self.skipping {
                self.skipping = false;
                self.text.clear();
                return false;
            }
            self.frames += 1;
            return true;
        }

        if self.skipping {
            return false;
        }
        if let Err(err) = self.text.push_line(line) {
            tracing::warn!(error = %err, len = self.text.len(), "text buffer growth failed; skipping frame");
            self.skipping = true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lines(reader: &FrameReader) -> Vec<String> {
        reader
            .frame()
            .lines()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect()
    }

    /// Yields its script one step at a time, reporting `WouldBlock` for
    /// `None` entries and EOF when exhausted.
    struct Scripted {
        steps: Vec<Option<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                None => Err(ErrorKind::WouldBlock.into()),
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    #[test]
    fn delimiter_line_completes_frame() {
        let mut reader = FrameReader::new("\u{4}");
        let mut src = Cursor::new(b"hello\nworld\n\x04\n".to_vec());
        assert_eq!(reader.read_from(&mut src).unwrap(), ReadOutcome::Frame);
        assert_eq!(lines(&reader), vec!["hello", "world"]);
        assert_eq!(reader.frames_completed(), 1);
    }

    #[test]
    fn partial_lines_survive_would_block() {
        let mut reader = FrameReader::new("--");
        let mut src = Scripted {
            steps: vec![Some(b"hel".to_vec()), None, Some(b"lo\n--\n".to_vec())],
        };
        assert_eq!(reader.read_from(&mut src).unwrap(), ReadOutcome::Pending);
        assert_eq!(reader.pending_len(), 3);
        assert_eq!(reader.read_from(&mut src).unwrap(), ReadOutcome::Frame);
        assert_eq!(lines(&reader), vec!["hello"]);
    }

    #[test]
    fn next_frame_replaces_previous_lazily() {
        let mut reader = FrameReader::new("\u{4}");
        assert!(reader.feed(b"one\n\x04\ntwo\n"));
        assert_eq!(lines(&reader), vec!["one"]);
        assert!(reader.has_queued_line());
        // "two" is queued but not yet applied.
        assert!(!reader.feed(b"three\n"));
        assert_eq!(lines(&reader), vec!["two", "three"]);
        assert!(!reader.has_queued_line());
    }

    #[test]
    fn queued_frames_are_delivered_one_per_call() {
        let mut reader = FrameReader::new("\u{4}");
        let mut src = Cursor::new(b"a\n\x04\nb\n\x04\n".to_vec());
        assert_eq!(reader.read_from(&mut src).unwrap(), ReadOutcome::Frame);
        assert_eq!(lines(&reader), vec!["a"]);
        assert_eq!(reader.read_from(&mut src).unwrap(), ReadOutcome::Frame);
        assert_eq!(lines(&reader), vec!["b"]);
        assert_eq!(
            reader.read_from(&mut src).unwrap(),
            ReadOutcome::Eof { frame: false }
        );
    }

    #[test]
    fn unterminated_delimiter_at_eof_completes_frame() {
        let mut reader = FrameReader::new("\u{4}");
        let mut src = Cursor::new(b"last\n\x04".to_vec());
        assert_eq!(
            reader.read_from(&mut src).unwrap(),
            ReadOutcome::Eof { frame: true }
        );
        assert_eq!(lines(&reader), vec!["last"]);
    }

    #[test]
    fn partial_frame_at_eof_is_dropped() {
        let mut reader = FrameReader::new("\u{4}");
        let mut src = Cursor::new(b"half\nframe".to_vec());
        assert_eq!(
            reader.read_from(&mut src).unwrap(),
            ReadOutcome::Eof { frame: false }
        );
        assert!(reader.frame().is_empty());
    }

    #[test]
    fn frame_survives_eof_until_next_output() {
        let mut reader = FrameReader::new("\u{4}");
        assert!(reader.feed(b"kept\n\x04\n"));
        let mut empty = Cursor::new(Vec::new());
        assert_eq!(
            reader.read_from(&mut empty).unwrap(),
            ReadOutcome::Eof { frame: false }
        );
        assert_eq!(lines(&reader), vec!["kept"]);

        assert!(!reader.feed(b"fresh\n"));
        assert_eq!(lines(&reader), vec!["fresh"]);
    }

    #[test]
    fn empty_frame_is_still_a_frame() {
        let mut reader = FrameReader::new("\u{4}");
        assert!(reader.feed(b"\x04\n"));
        assert!(reader.frame().is_empty());
    }

    #[test]
    fn read_budget_bounds_work_per_call() {
        let mut reader = FrameReader::new("\u{4}");
        let data = vec![b'x'; READ_CHUNK * (MAX_READS_PER_WAKE + 4)];
        let mut src = Cursor::new(data);
        assert_eq!(reader.read_from(&mut src).unwrap(), ReadOutcome::Pending);
        assert_eq!(reader.pending_len(), READ_CHUNK * MAX_READS_PER_WAKE);
    }

    #[test]
    fn delimiter_must_match_whole_line() {
        let mut reader = FrameReader::new("\u{4}");
        assert!(!reader.feed(b"\x04x\n x\x04\n"));
        assert_eq!(reader.frame().line_count(), 2);
    }

    #[test]
    fn line_split_across_many_chunks_is_scanned_once() {
        let mut reader = FrameReader::new("\u{4}");
        for _ in 0..100 {
            assert!(!reader.feed(b"abcdefgh"));
            assert!(!reader.has_queued_line());
            assert_eq!(reader.scanned, reader.pending_len());
        }
        assert!(reader.feed(b"\n\x04\n"));
        assert_eq!(reader.frame().line_count(), 1);
        assert_eq!(reader.frame().lines().next().map(<[u8]>::len), Some(800));
        assert_eq!(reader.pending_len(), 0);
    }

    #[test]
    fn lines_queued_behind_a_frame_are_still_found() {
        let mut reader = FrameReader::new("\u{4}");
        assert!(reader.feed(b"a\n\x04\nb\n\x04\npart"));
        assert!(reader.has_queued_line());
        assert!(reader.feed(b"ial\n"));
        assert_eq!(lines(&reader), vec!["b"]);
        assert!(!reader.feed(b"\x04"));
        assert!(reader.feed(b"\n"));
        assert_eq!(lines(&reader), vec!["partial"]);
    }

    #[test]
    fn overlong_line_is_cut_and_the_rest_dropped() {
        let mut reader = FrameReader::new("\u{4}").with_max_line(16);
        assert!(!reader.feed(&[b'x'; 40]));
        assert_eq!(reader.pending_len(), 16);
        // Still inside the same line: dropped without growing.
        assert!(!reader.feed(&[b'y'; 4096]));
        assert_eq!(reader.pending_len(), 16);

        assert!(reader.feed(b"zz\nnext\n\x04\n"));
        assert_eq!(lines(&reader), vec!["x".repeat(16), "next".to_string()]);
    }

    #[test]
    fn line_cap_stays_above_delimiter_length() {
        let mut reader = FrameReader::new("--end--").with_max_line(2);
        assert!(reader.feed(b"--end--\n"));
        // Cut to eight bytes: one more than the delimiter.
        assert!(!reader.feed(b"--end--and"));
        assert_eq!(reader.pending_len(), 8);
        assert!(!reader.feed(b"-more\n"));
        assert_eq!(lines(&reader), vec!["--end--a"]);
    }
}
