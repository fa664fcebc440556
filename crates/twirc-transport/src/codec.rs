//! Line codec for byte-stream transports.
//!
//! Decodes `\n`-terminated lines (a preceding `\r` is stripped) and passes
//! encoded lines through unchanged. Blank lines are skipped.
//!
//! Decoding never fails on content. Invalid UTF-8 is replaced lossily, and a
//! line longer than the limit is discarded up to its `\n` with a warning, so
//! one bad line cannot end the stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::TransportError;

/// Inbound line limit: 8 KiB of tags plus the 512 byte message body.
pub const DEFAULT_MAX_INBOUND: usize = 8192 + 512;

/// Newline-delimited codec with a length limit.
#[derive(Debug)]
pub struct LineCodec {
    /// Offset from which to resume searching for `\n`.
    next_index: usize,
    max_len: usize,
    /// Bytes of an overlong line dropped so far, while skipping to its end.
    discarding: Option<usize>,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_INBOUND)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
            discarding: None,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            if let Some(dropped) = self.discarding {
                match newline {
                    Some(offset) => {
                        let rest = src.split_to(self.next_index + offset + 1);
                        warn!(
                            bytes = dropped + rest.len(),
                            limit = self.max_len,
                            "Discarded overlong inbound line"
                        );
                        self.discarding = None;
                        self.next_index = 0;
                        continue;
                    }
                    None => {
                        self.discarding = Some(dropped + src.len());
                        src.clear();
                        self.next_index = 0;
                        return Ok(None);
                    }
                }
            }

            let Some(offset) = newline else {
                if src.len() > self.max_len {
                    self.discarding = Some(src.len());
                    src.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = src.len();
                }
                return Ok(None);
            };

            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;
            if line.len() > self.max_len {
                warn!(bytes = line.len(), limit = self.max_len, "Discarded overlong inbound line");
                continue;
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = TransportError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), TransportError> {
        dst.extend_from_slice(line.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_lines_across_reads() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PING :tmi.twi");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"tch.tv\r\n\r\nPRIVMSG #a :b\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING :tmi.twitch.tv"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PRIVMSG #a :b"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overlong_line_is_skipped() {
        let mut codec = LineCodec::with_max_len(16);
        let mut buf = BytesMut::from("this line is far too long\nPRIVMSG #a :two\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PRIVMSG #a :two"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overlong_line_skipped_across_reads() {
        let mut codec = LineCodec::with_max_len(16);
        let mut buf = BytesMut::from("no newline in sight yet");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b" still the same line");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b" end\r\nPING :x\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING :x"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #a :one\r\n\xff\xfe\r\nPRIVMSG #a :two\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PRIVMSG #a :one"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("\u{fffd}\u{fffd}"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PRIVMSG #a :two"));
    }

    #[tokio::test]
    async fn test_framed_stream_survives_bad_lines() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let mut input = b"PRIVMSG #a :one\r\n\xff\xfe\r\n".to_vec();
        input.extend(std::iter::repeat_n(b'x', DEFAULT_MAX_INBOUND + 24));
        input.extend_from_slice(b"\r\nPRIVMSG #a :two\r\n");

        let lines: Vec<String> = FramedRead::new(&input[..], LineCodec::new())
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines.first().map(String::as_str), Some("PRIVMSG #a :one"));
        assert_eq!(lines.last().map(String::as_str), Some("PRIVMSG #a :two"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_encode_passes_through() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("PONG :tmi.twitch.tv\r\n".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG :tmi.twitch.tv\r\n");
    }
}
