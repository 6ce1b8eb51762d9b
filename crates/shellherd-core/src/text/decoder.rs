//! Incremental UTF-8 decoding of received byte chunks.
//!
//! Transports deliver bytes with no respect for character boundaries, so a
//! multi-byte sequence may be split across two reads. The decoder buffers
//! the incomplete tail and emits it with the next chunk.

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};

/// Incremental UTF-8 decoder.
///
/// In lossy mode (the default) undecodable bytes are replaced with
/// U+FFFD instead of failing, so one corrupt byte cannot stall a
/// connection.
#[derive(Debug)]
pub struct Utf8Decoder {
    pending: BytesMut,
    lossy: bool,
}

impl Default for Utf8Decoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Utf8Decoder {
    /// Creates a decoder; `lossy` selects replacement over failure.
    #[must_use]
    pub fn new(lossy: bool) -> Self {
        Self {
            pending: BytesMut::new(),
            lossy,
        }
    }

    /// Feeds a chunk of bytes, returning the decodable prefix as text.
    ///
    /// An incomplete trailing sequence is kept for the next call. In
    /// strict mode an invalid sequence returns an error and is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] in strict mode when the input contains
    /// bytes that can never form valid UTF-8.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    // Everything before valid_up_to is valid by contract.
                    out.push_str(
                        std::str::from_utf8(&self.pending[..valid_up_to]).unwrap_or(""),
                    );
                    match err.error_len() {
                        None => {
                            // Incomplete sequence at the end; keep it for
                            // the next chunk.
                            self.pending.advance(valid_up_to);
                            return Ok(out);
                        }
                        Some(bad_len) => {
                            if self.lossy {
                                out.push('\u{FFFD}');
                                self.pending.advance(valid_up_to + bad_len);
                            } else {
                                self.pending.clear();
                                return Err(Error::Decode {
                                    connection: String::new(),
                                    reason: format!(
                                        "invalid UTF-8 sequence of {bad_len} byte(s)"
                                    ),
                                });
                            }
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Returns true if a partial multi-byte sequence is buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_ascii() {
        let mut dec = Utf8Decoder::default();
        assert_eq!(dec.feed(b"hello\n").unwrap(), "hello\n");
        assert!(!dec.has_pending());
    }

    #[test]
    fn test_split_multibyte_sequence() {
        // "ź" = 0xC5 0xBA split across two chunks
        let mut dec = Utf8Decoder::default();
        assert_eq!(dec.feed(b"abc\xC5").unwrap(), "abc");
        assert!(dec.has_pending());
        assert_eq!(dec.feed(b"\xBAdef").unwrap(), "\u{17A}def");
        assert!(!dec.has_pending());
    }

    #[test]
    fn test_lossy_replacement() {
        let mut dec = Utf8Decoder::default();
        assert_eq!(dec.feed(b"a\xFFb").unwrap(), "a\u{FFFD}b");
    }

    #[test]
    fn test_strict_mode_fails() {
        let mut dec = Utf8Decoder::new(false);
        assert!(dec.feed(b"a\xFFb").is_err());
    }

    #[test]
    fn test_split_four_byte_sequence() {
        // U+1F600 = F0 9F 98 80, delivered one byte at a time
        let mut dec = Utf8Decoder::default();
        assert_eq!(dec.feed(b"\xF0").unwrap(), "");
        assert_eq!(dec.feed(b"\x9F").unwrap(), "");
        assert_eq!(dec.feed(b"\x98").unwrap(), "");
        assert_eq!(dec.feed(b"\x80").unwrap(), "\u{1F600}");
    }

    proptest! {
        /// Splitting a valid UTF-8 stream at any byte boundary must not
        /// change what comes out.
        #[test]
        fn prop_any_split_decodes_identically(text in "\\PC*", split in 0usize..64) {
            let bytes = text.as_bytes();
            let cut = split.min(bytes.len());

            let mut dec = Utf8Decoder::default();
            let mut out = dec.feed(&bytes[..cut]).unwrap();
            out.push_str(&dec.feed(&bytes[cut..]).unwrap());

            prop_assert_eq!(out, text);
            prop_assert!(!dec.has_pending());
        }

        /// Lossy decoding never fails, whatever the bytes.
        #[test]
        fn prop_lossy_never_fails(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut dec = Utf8Decoder::default();
            prop_assert!(dec.feed(&bytes).is_ok());
        }
    }
}
