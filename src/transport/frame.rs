use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::TransportError;
use crate::models::Envelope;

/// Set on every frame of a message except the last
pub const FLAG_MORE: u8 = 0x01;

/// Flags byte plus big-endian u32 length
const FRAME_HEADER_LEN: usize = 5;

/// Two-frame envelope codec
///
/// Each frame is `flags:u8 | len:u32 | bytes`. The type tag frame carries
/// [`FLAG_MORE`]; the payload frame does not.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_bytes: usize,
}

impl EnvelopeCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    /// Read a frame header at `offset` without consuming anything
    fn peek_header(&self, src: &BytesMut, offset: usize) -> Result<Option<(u8, usize)>, TransportError> {
        if src.len() < offset + FRAME_HEADER_LEN {
            return Ok(None);
        }
        let flags = src[offset];
        if flags & !FLAG_MORE != 0 {
            return Err(TransportError::Protocol(format!("unknown frame flags {:#04x}", flags)));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[offset + 1..offset + FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                size: len,
                limit: self.max_frame_bytes,
            });
        }
        Ok(Some((flags, len)))
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, TransportError> {
        let Some((tag_flags, tag_len)) = self.peek_header(src, 0)? else {
            return Ok(None);
        };
        if tag_flags & FLAG_MORE == 0 {
            return Err(TransportError::Protocol("type tag frame without payload".to_string()));
        }

        let payload_offset = FRAME_HEADER_LEN + tag_len;
        let Some((payload_flags, payload_len)) = self.peek_header(src, payload_offset)? else {
            src.reserve(payload_offset + FRAME_HEADER_LEN - src.len());
            return Ok(None);
        };
        if payload_flags & FLAG_MORE != 0 {
            return Err(TransportError::Protocol("more than two frames in envelope".to_string()));
        }

        let total = payload_offset + FRAME_HEADER_LEN + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let tag = src.split_to(tag_len);
        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();

        // A garbled tag is dispatched as unknown rather than killing the stream
        let type_tag = String::from_utf8_lossy(&tag).into_owned();
        Ok(Some(Envelope::from_frames(type_tag, payload)))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = TransportError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), TransportError> {
        let (type_tag, payload) = envelope.into_parts();
        for len in [type_tag.len(), payload.len()] {
            if len > self.max_frame_bytes {
                return Err(TransportError::FrameTooLarge {
                    size: len,
                    limit: self.max_frame_bytes,
                });
            }
        }

        dst.reserve(2 * FRAME_HEADER_LEN + type_tag.len() + payload.len());
        put_frame(dst, FLAG_MORE, type_tag.as_bytes());
        put_frame(dst, 0, &payload);
        Ok(())
    }
}

fn put_frame(dst: &mut BytesMut, flags: u8, bytes: &[u8]) {
    dst.put_u8(flags);
    dst.put_u32(bytes.len() as u32);
    dst.put_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use bytes::Bytes;

    fn encode_envelope(codec: &mut EnvelopeCodec, envelope: Envelope) -> Result<Bytes, TransportError> {
        let mut buf = BytesMut::new();
        codec.encode(envelope, &mut buf)?;
        Ok(buf.freeze())
    }

    fn envelope() -> Envelope {
        Envelope::new(MessageType::MarketData, Bytes::from_static(b"20250801,rb2510"))
    }

    #[test]
    fn test_partial_input_waits_for_more() {
        let mut codec = EnvelopeCodec::new(1024);
        let wire = encode_envelope(&mut codec, envelope()).unwrap();

        let mut buf = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            buf.put_u8(*byte);
            let decoded = codec.decode(&mut buf).unwrap();
            if i + 1 < wire.len() {
                assert!(decoded.is_none(), "decoded early at byte {}", i);
            } else {
                assert_eq!(decoded, Some(envelope()));
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_envelopes() {
        let mut codec = EnvelopeCodec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(envelope(), &mut buf).unwrap();
        codec
            .encode(Envelope::new(MessageType::TradingAccount, Bytes::from_static(b"a,b")), &mut buf)
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().type_tag(), "MARKET_DATA");
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap().type_tag(),
            "CTP_TRADING_ACCOUNT_UPDATE"
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = EnvelopeCodec::new(8);
        assert!(matches!(
            encode_envelope(&mut codec, envelope()),
            Err(TransportError::FrameTooLarge { .. })
        ));

        let mut buf = BytesMut::new();
        put_frame(&mut buf, FLAG_MORE, &[b'x'; 64]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::FrameTooLarge { size: 64, limit: 8 })
        ));
    }

    #[test]
    fn test_single_frame_message_is_a_protocol_error() {
        let mut codec = EnvelopeCodec::new(1024);
        let mut buf = BytesMut::new();
        put_frame(&mut buf, 0, b"MARKET_DATA");

        assert!(matches!(codec.decode(&mut buf), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_invalid_utf8_tag_is_kept_lossy() {
        let mut codec = EnvelopeCodec::new(1024);
        let mut buf = BytesMut::new();
        put_frame(&mut buf, FLAG_MORE, &[0xff, b'A']);
        put_frame(&mut buf, 0, b"x");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.message_type().is_none());
    }
}
