//! Console line protocol.
//!
//! Outbound: every write is one UTF-8 line terminated by `\n`.
//! Inbound: raw reads are decoded and handed on as-is. No re-splitting on
//! newline happens here, so one decoded chunk may hold several lines or only
//! part of one. Callers that need whole lines buffer and split themselves.

/// Terminate `text` with a single `\n` unless it already ends with one.
pub fn frame_line(text: &str) -> String {
    if text.ends_with('\n') {
        return text.to_string();
    }
    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text);
    line.push('\n');
    line
}

/// Streaming UTF-8 decoder for console reads.
///
/// A multi-byte character split across two reads is held back and completed
/// by the next chunk instead of being mangled. Invalid sequences decode to
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one read. May return an empty string when the chunk only
    /// contained the start of a character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated sequence at the end of the read
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush whatever is held back, lossily. Used when the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_line_appends_newline() {
        assert_eq!(frame_line("ping"), "ping\n");
    }

    #[test]
    fn test_frame_line_keeps_existing_newline() {
        assert_eq!(frame_line("ping\n"), "ping\n");
    }

    #[test]
    fn test_frame_line_empty() {
        assert_eq!(frame_line(""), "\n");
    }

    #[test]
    fn test_decoder_passes_chunks_through_verbatim() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"one\ntwo\nthr"), "one\ntwo\nthr");
        assert_eq!(decoder.decode(b"ee\n"), "ee\n");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_joins_split_character() {
        let snowman = "\u{2603}".as_bytes();
        let mut decoder = Utf8ChunkDecoder::new();

        let first = decoder.decode(&[b'a', snowman[0], snowman[1]]);
        assert_eq!(first, "a");
        assert_eq!(decoder.pending_len(), 2);

        let second = decoder.decode(&[snowman[2], b'b']);
        assert_eq!(second, "\u{2603}b");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xFF, b'y']), "x\u{FFFD}y");
    }

    #[test]
    fn test_finish_flushes_truncated_tail() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(&[0xE2, 0x98]), "");
        assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
        assert!(decoder.finish().is_none());
    }
}
