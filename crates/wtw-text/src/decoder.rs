#![forbid(unsafe_code)]

//! Incremental, validating UTF-8 decoder.
//!
//! A table-driven DFA (Björn Höhrmann's construction): the first 256 table
//! entries map a byte to a character class, the rest map
//! `(state, class)` to the next state. States are multiples of 12 so the
//! transition lookup is a single add.
//!
//! The decoder never fails. Malformed input is reported as
//! [`Decoded::Invalid`]; the caller substitutes U+FFFD and re-feeds the
//! offending byte as the start of a new sequence (see [`Codepoints`]).

/// Replacement character emitted for malformed input.
pub const REPLACEMENT: u32 = 0xFFFD;

const ACCEPT: u8 = 0;
const REJECT: u8 = 12;

#[rustfmt::skip]
static UTF8D: [u8; 364] = [
    // byte -> character class
     0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,  0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
     0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,  0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
     0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,  0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
     0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,  0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,
     1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,  9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,
     7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,  7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,
     8,8,2,2,2,2,2,2,2,2,2,2,2,2,2,2,  2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,
    10,3,3,3,3,3,3,3,3,3,3,3,3,4,3,3, 11,6,6,6,5,8,8,8,8,8,8,8,8,8,8,8,
    // (state + class) -> state
     0,12,24,36,60,96,84,12,12,12,48,72, 12,12,12,12,12,12,12,12,12,12,12,12,
    12, 0,12,12,12,12,12, 0,12, 0,12,12, 12,24,12,12,12,12,12,24,12,24,12,12,
    12,12,12,12,12,12,12,24,12,12,12,12, 12,24,12,12,12,12,12,12,12,24,12,12,
    12,12,12,12,12,12,12,36,12,36,12,12, 12,36,12,12,12,12,12,36,12,36,12,12,
    12,36,12,12,12,12,12,12,12,12,12,12,
];

/// Decoder state: DFA state plus the codepoint accumulated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderState {
    state: u8,
    codepoint: u32,
}

impl DecoderState {
    /// The initial state, between sequences.
    pub const ACCEPT: Self = Self {
        state: ACCEPT,
        codepoint: 0,
    };

    /// Whether the decoder sits between sequences.
    #[inline]
    pub const fn is_accept(&self) -> bool {
        self.state == ACCEPT
    }

    /// Whether the last byte made the current sequence malformed.
    #[inline]
    pub const fn is_reject(&self) -> bool {
        self.state == REJECT
    }
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Mid-sequence; feed more bytes.
    Pending,
    /// A complete scalar value.
    Char(u32),
    /// The sequence is malformed.
    Invalid,
}

/// Feed one byte. A pure function of `(state, byte)`.
///
/// After [`Decoded::Invalid`] the returned state is REJECT; callers reset to
/// [`DecoderState::ACCEPT`] before feeding the next byte.
#[inline]
pub fn decode(state: DecoderState, byte: u8) -> (DecoderState, Decoded) {
    let class = UTF8D[byte as usize];
    let codepoint = if state.state != ACCEPT {
        (byte as u32 & 0x3F) | (state.codepoint << 6)
    } else {
        (0xFF_u32 >> class) & byte as u32
    };
    let next = UTF8D[256 + state.state as usize + class as usize];
    let decoded = match next {
        ACCEPT => Decoded::Char(codepoint),
        REJECT => Decoded::Invalid,
        _ => Decoded::Pending,
    };
    (
        DecoderState {
            state: next,
            codepoint,
        },
        decoded,
    )
}

/// Iterator over the codepoints of a byte slice with error recovery.
///
/// - A rejected byte that started a sequence is consumed and yields U+FFFD.
/// - A byte that breaks a sequence already in progress yields U+FFFD and is
///   re-read as the start of the next sequence.
/// - A sequence cut off by the end of input yields one U+FFFD.
///
/// # Example
///
/// ```
/// use wtw_text::decoder::{Codepoints, REPLACEMENT};
///
/// let cps: Vec<u32> = Codepoints::new(b"a\xE2\x80b").collect();
/// assert_eq!(cps, vec!['a' as u32, REPLACEMENT, 'b' as u32]);
/// ```
#[derive(Debug, Clone)]
pub struct Codepoints<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Codepoints<'a> {
    /// Decode `bytes` lazily.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

impl Iterator for Codepoints<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let start = self.pos;
        if start >= self.bytes.len() {
            return None;
        }

        let mut state = DecoderState::ACCEPT;
        while self.pos < self.bytes.len() {
            let byte = self.bytes[self.pos];
            let (next, decoded) = decode(state, byte);
            match decoded {
                Decoded::Char(cp) => {
                    self.pos += 1;
                    return Some(cp);
                }
                Decoded::Invalid => {
                    if self.pos == start {
                        self.pos += 1;
                    }
                    return Some(REPLACEMENT);
                }
                Decoded::Pending => {
                    state = next;
                    self.pos += 1;
                }
            }
        }
        Some(REPLACEMENT)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.bytes.len() - self.pos;
        (left.div_ceil(4), Some(left))
    }
}
