//! Incremental UTF-8 decoding of terminal output.

/// Decodes a byte stream chunk by chunk.
///
/// A multi-byte character split across two reads is held back until the
/// rest of it arrives instead of being replaced with U+FFFD. Genuinely
/// invalid bytes are still replaced.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning all complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = &buf[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still held back at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"ls -la\r\n"), "ls -la\r\n");
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_split_multibyte_char() {
        let bytes = "héllo ✓".as_bytes();
        // Split in the middle of the three-byte check mark.
        let cut = bytes.len() - 2;

        let mut decoder = Utf8Decoder::new();
        let first = decoder.decode(&bytes[..cut]);
        let second = decoder.decode(&bytes[cut..]);

        assert_eq!(first, "héllo ");
        assert_eq!(second, "✓");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_truncated_tail() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xE2, 0x9C]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
