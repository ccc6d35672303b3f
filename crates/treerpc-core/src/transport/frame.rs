//! Length-prefixed frames carried in HTTP bodies.
//!
//! ```text
//! [u8 flag][u32 BE: len][payload of len]
//! ```
//!
//! Flag `0x00` carries one protobuf message. Flag `0x80` carries the
//! trailer: `name: value` lines with the call status.

use crate::config::TransportConfig;
use crate::error::{BridgeError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Bytes),
    Trailer(Status),
}

/// Final status of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: u32,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: String::new(),
        }
    }

    pub fn from_error(err: &BridgeError) -> Self {
        Self {
            code: err.to_status_code(),
            message: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BridgeError::from_status(self.code, self.message))
        }
    }

    /// Trailer frame payload.
    pub fn to_trailer(&self) -> Bytes {
        let message: String = self
            .message
            .chars()
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect();
        let mut text = format!("{}: {}\r\n", TransportConfig::STATUS_HEADER, self.code);
        if !message.is_empty() {
            text.push_str(&format!("{}: {}\r\n", TransportConfig::MESSAGE_HEADER, message));
        }
        Bytes::from(text)
    }

    /// Parse a trailer payload. A missing status line is malformed.
    pub fn parse_trailer(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)?;
        let mut code = None;
        let mut message = String::new();

        for line in text.split("\r\n").filter(|line| !line.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            if name == TransportConfig::STATUS_HEADER {
                code = value.trim().parse::<u32>().ok();
            } else if name == TransportConfig::MESSAGE_HEADER {
                message = value.trim().to_string();
            }
        }

        match code {
            Some(code) => Ok(Self { code, message }),
            None => Err(BridgeError::Malformed {
                message: format!("trailer without {}", TransportConfig::STATUS_HEADER),
            }),
        }
    }
}

/// Encode one frame.
pub fn encode_frame(flag: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TransportConfig::FRAME_HEADER_LEN + payload.len());
    buf.put_u8(flag);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn message_frame(message: &[u8]) -> Bytes {
    encode_frame(TransportConfig::FLAG_MESSAGE, message)
}

pub fn trailer_frame(status: &Status) -> Bytes {
    encode_frame(TransportConfig::FLAG_TRAILER, &status.to_trailer())
}

/// Incremental decoder: feed body chunks, take complete frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(TransportConfig::MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// True when no partial frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let header_len = TransportConfig::FRAME_HEADER_LEN;
        if self.buf.len() < header_len {
            return Ok(None);
        }

        let flag = self.buf[0];
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > self.max_frame_size {
            return Err(BridgeError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        if self.buf.len() < header_len + len {
            return Ok(None);
        }

        self.buf.advance(header_len);
        let payload = self.buf.split_to(len).freeze();

        if flag & TransportConfig::FLAG_TRAILER != 0 {
            Ok(Some(Frame::Trailer(Status::parse_trailer(&payload)?)))
        } else if flag == TransportConfig::FLAG_MESSAGE {
            Ok(Some(Frame::Message(payload)))
        } else {
            Err(BridgeError::Malformed {
                message: format!("unsupported frame flag {:#04x}", flag),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_layout() {
        let frame = message_frame(b"abc");
        assert_eq!(&frame[..], &[0x00, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&message_frame(b"first"));
        bytes.extend_from_slice(&message_frame(b""));
        bytes.extend_from_slice(&trailer_frame(&Status::ok()));

        let mut decoder = FrameDecoder::default();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(3) {
            decoder.push(chunk);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        assert!(decoder.is_empty());
        assert_eq!(
            frames,
            vec![
                Frame::Message(Bytes::from_static(b"first")),
                Frame::Message(Bytes::new()),
                Frame::Trailer(Status::ok()),
            ]
        );
    }

    #[test]
    fn test_decoder_rejects_oversized_frame() {
        let mut decoder = FrameDecoder::new(8);
        decoder.push(&[0x00, 0, 0, 0, 9]);
        assert_eq!(
            decoder.next_frame(),
            Err(BridgeError::FrameTooLarge { size: 9, max: 8 })
        );
    }

    #[test]
    fn test_trailer_roundtrip_keeps_status() {
        let err = BridgeError::invocation("not ok\nreally");
        let status = Status::from_error(&err);
        let parsed = Status::parse_trailer(&status.to_trailer()).unwrap();
        assert_eq!(parsed.code, 2);
        assert_eq!(parsed.message, "not ok really");
        assert_eq!(
            parsed.into_result(),
            Err(BridgeError::Remote {
                code: 2,
                message: "not ok really".into()
            })
        );
    }

    #[test]
    fn test_trailer_without_status_is_malformed() {
        assert!(Status::parse_trailer(b"grpc-message: hi\r\n").is_err());
    }
}
