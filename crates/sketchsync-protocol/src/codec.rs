//! Newline-delimited JSON framing

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default maximum frame size (32MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Framing configuration
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted frame, excluding the newline
    pub max_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Incremental frame decoder
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
    /// Dropping the tail of an oversized line up to its newline
    discarding: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_size: config.max_frame_size,
            discarding: false,
        }
    }

    /// Add data to the decoder buffer
    pub fn feed(&mut self, mut data: &[u8]) {
        if self.discarding {
            match data.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    data = &data[pos + 1..];
                    self.discarding = false;
                }
                None => return,
            }
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to decode one complete frame from the buffer.
    ///
    /// Blank lines are skipped. A malformed frame is consumed before the
    /// error is returned, so the caller may report it and keep decoding.
    pub fn decode<T: DeserializeOwned>(&mut self) -> ProtocolResult<Option<T>> {
        loop {
            let line_end = match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None => {
                    if self.buffer.len() > self.max_frame_size {
                        let size = self.buffer.len();
                        self.buffer.clear();
                        self.discarding = true;
                        return Err(ProtocolError::MessageTooLarge {
                            size,
                            max: self.max_frame_size,
                        });
                    }
                    return Ok(None);
                }
            };

            let frame = self.buffer.split_to(line_end + 1);
            let mut line = &frame[..line_end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if line.len() > self.max_frame_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: line.len(),
                    max: self.max_frame_size,
                });
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return serde_json::from_slice(line).map(Some).map_err(ProtocolError::from);
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a message as a single frame
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<BytesMut> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf)
}

/// Encode a message into an existing buffer
pub fn encode_into<T: Serialize>(message: &T, buf: &mut BytesMut) -> ProtocolResult<()> {
    let json = serde_json::to_vec(message)?;
    buf.reserve(json.len() + 1);
    buf.put_slice(&json);
    buf.put_u8(b'\n');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HostMessage, ViewMessage};

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"{\"type\":\"ping\"}\n");

        let msg: ViewMessage = decoder.decode().unwrap().unwrap();
        assert_eq!(msg, ViewMessage::Ping);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_incomplete_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"{\"type\":\"re");
        assert!(decoder.decode::<ViewMessage>().unwrap().is_none());

        decoder.feed(b"ady\"}\r\n");
        assert_eq!(decoder.decode::<ViewMessage>().unwrap(), Some(ViewMessage::Ready));
    }

    #[test]
    fn test_multiple_frames_and_blank_lines() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"{\"type\":\"ping\"}\n\n{\"type\":\"close\"}\n");

        assert_eq!(decoder.decode::<ViewMessage>().unwrap(), Some(ViewMessage::Ping));
        assert_eq!(decoder.decode::<ViewMessage>().unwrap(), Some(ViewMessage::Close));
        assert!(decoder.decode::<ViewMessage>().unwrap().is_none());
    }

    #[test]
    fn test_malformed_frame_is_consumed() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"not json\n{\"type\":\"ping\"}\n");

        assert!(matches!(
            decoder.decode::<ViewMessage>(),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(decoder.decode::<ViewMessage>().unwrap(), Some(ViewMessage::Ping));
    }

    #[test]
    fn test_oversized_frame() {
        let mut decoder = FrameDecoder::with_config(&FrameConfig { max_frame_size: 16 });
        decoder.feed(&[b'x'; 32]);

        let err = decoder.decode::<ViewMessage>().unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { size: 32, max: 16 }));
        assert_eq!(err.code(), crate::codes::FRAME_TOO_LARGE);
    }

    #[test]
    fn test_rest_of_oversized_line_is_dropped() {
        let mut decoder = FrameDecoder::with_config(&FrameConfig { max_frame_size: 30 });
        decoder.feed(&[b'x'; 41]);
        assert!(matches!(
            decoder.decode::<ViewMessage>(),
            Err(ProtocolError::MessageTooLarge { size: 41, max: 30 })
        ));

        // Still the same line: nothing in it may run as a command
        decoder.feed(b"{\"type\":\"request_undo\"}");
        assert!(decoder.decode::<ViewMessage>().unwrap().is_none());
        decoder.feed(b"{\"type\":\"request_undo\"}\n{\"type\":\"ping\"}\n");

        assert_eq!(decoder.decode::<ViewMessage>().unwrap(), Some(ViewMessage::Ping));
        assert!(decoder.decode::<ViewMessage>().unwrap().is_none());
    }

    #[test]
    fn test_encode_is_one_line() {
        let buf = encode(&HostMessage::Pong).unwrap();
        assert_eq!(buf.as_ref(), b"{\"type\":\"pong\"}\n");
    }
}
