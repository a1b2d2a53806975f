//! Length-prefixed wire codec for [`Envelope`]s.
//!
//! Frame layout:
//!
//! ```text
//! +----------------+--------+---------------------------+
//! | length: u32 BE | marker | packet body (JSON object) |
//! +----------------+--------+---------------------------+
//! ```
//!
//! `length` counts the marker byte plus the body. The marker is `0x00` for a
//! fresh packet and `b'*'` for one a router has already rebroadcast to its
//! peers. The body is decoded into a typed [`Packet`] (unknown fields are
//! rejected) and then checked with [`Packet::validate`]. Nothing received is
//! ever evaluated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::packet::{Envelope, Packet};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Marker byte for a packet that has not crossed a router-to-router hop.
pub const MARKER_FRESH: u8 = 0x00;

/// Marker byte for a packet already rebroadcast once between routers.
pub const MARKER_REBROADCAST: u8 = b'*';

/// Default upper bound on a frame payload.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Codec error: a framing or validation failure, or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame has zero length")]
    EmptyFrame,
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("unknown rebroadcast marker 0x{0:02x}")]
    UnknownMarker(u8),
    #[error("{0} unexpected bytes after frame")]
    TrailingBytes(usize),
    #[error("malformed packet body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid packet field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// A tokio codec that frames envelopes with a length prefix.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_frame: usize,
}

impl PacketCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for PacketCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len == 0 {
            return Err(CodecError::EmptyFrame);
        }
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }

        let total = LENGTH_PREFIX + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let payload = src.split_to(len);
        decode_payload(&payload).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(envelope) => Ok(Some(envelope)),
            None if buf.is_empty() => Ok(None),
            None => {
                let expected = if buf.len() < LENGTH_PREFIX {
                    LENGTH_PREFIX
                } else {
                    let mut prefix = [0u8; LENGTH_PREFIX];
                    prefix.copy_from_slice(&buf[..LENGTH_PREFIX]);
                    LENGTH_PREFIX + u32::from_be_bytes(prefix) as usize
                };
                Err(CodecError::Truncated {
                    expected,
                    actual: buf.len(),
                })
            }
        }
    }
}

impl Encoder<Envelope> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Envelope>>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a Envelope> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &'a Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.packet.validate()?;
        let body = serde_json::to_vec(&item.packet)?;
        let len = body.len() + 1;
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }

        dst.reserve(LENGTH_PREFIX + len);
        dst.put_u32(len as u32);
        dst.put_u8(if item.rebroadcast {
            MARKER_REBROADCAST
        } else {
            MARKER_FRESH
        });
        dst.extend_from_slice(&body);
        Ok(())
    }
}

fn decode_payload(payload: &[u8]) -> Result<Envelope, CodecError> {
    let (marker, body) = payload.split_first().ok_or(CodecError::EmptyFrame)?;
    let rebroadcast = match *marker {
        MARKER_FRESH => false,
        MARKER_REBROADCAST => true,
        other => return Err(CodecError::UnknownMarker(other)),
    };
    let packet: Packet = serde_json::from_slice(body)?;
    packet.validate()?;
    trace!(sender = %packet.sender_id, bytes = payload.len(), "decoded packet");
    Ok(Envelope {
        rebroadcast,
        packet,
    })
}

/// Encode one envelope into a standalone frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    <PacketCodec as Encoder<&Envelope>>::encode(&mut PacketCodec::default(), envelope, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one frame; anything short or left over is an error.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope, CodecError> {
    decode_frame_with(&mut PacketCodec::default(), frame)
}

/// [`decode_frame`] with an explicit codec (and so an explicit size limit).
pub fn decode_frame_with(codec: &mut PacketCodec, frame: &[u8]) -> Result<Envelope, CodecError> {
    let mut buf = BytesMut::from(frame);
    match codec.decode_eof(&mut buf)? {
        Some(envelope) if buf.is_empty() => Ok(envelope),
        Some(_) => Err(CodecError::TrailingBytes(buf.len())),
        None => Err(CodecError::Truncated {
            expected: LENGTH_PREFIX,
            actual: 0,
        }),
    }
}
