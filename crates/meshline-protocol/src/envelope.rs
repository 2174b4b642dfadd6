//! The envelope: the single framing unit on the wire, and the codec that
//! reads and writes a continuous stream of them without ever re-synchronizing
//! on a stream header.
//!
//! Field order on the wire is fixed: `type`, `flavor`, `compression`,
//! `payloadLength`, `payload`. Strings carry a leading marker byte so that a
//! null value and an empty string never collide.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const NULL_MARKER: u8 = 0;
const PRESENT_MARKER: u8 = 1;

/// The only compression byte this implementation honors. Any other value is
/// corruption until a future revision defines it.
pub const COMPRESSION_IDENTITY: u8 = 0;

/// One self-describing unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Conventionally a fully qualified type name; opaque to the codec.
    pub type_name: String,
    /// `None` means "no flavor" — distinct from an empty-string flavor.
    pub flavor: Option<String>,
    pub compression: u8,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(type_name: impl Into<String>, flavor: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            flavor,
            compression: COMPRESSION_IDENTITY,
            payload,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("envelope `type` field must not be null")]
    NullType,
    #[error("invalid string length marker byte: {0}")]
    BadStringMarker(u8),
    #[error("string payload was not valid UTF-8")]
    InvalidUtf8,
    #[error("negative payload length: {0}")]
    NegativePayloadLength(i32),
    #[error("unsupported compression byte: {0} (only 0/identity is defined)")]
    UnsupportedCompression(u8),
    #[error("payload of {0} bytes exceeds the 32-bit length field")]
    PayloadTooLarge(usize),
}

/// `tokio_util::codec::{Encoder, Decoder}` implementation for [`Envelope`].
///
/// Stateless: every encode/decode call is independent, so a single
/// `EnvelopeCodec` can be shared for the lifetime of a `Framed` stream
/// without resetting anything between values.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_string(dst, &item.type_name);
        write_nullable_string(dst, item.flavor.as_deref());
        dst.put_u8(item.compression);
        let len = i32::try_from(item.payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(item.payload.len()))?;
        dst.put_i32(len);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, Self::Error> {
        let mut cursor = Reader::new(&src[..]);

        let type_name = match cursor.read_nullable_string()? {
            NeedMore::Ready(Some(s)) => s,
            NeedMore::Ready(None) => return Err(ProtocolError::NullType),
            NeedMore::Pending => return Ok(None),
        };
        let flavor = match cursor.read_nullable_string()? {
            NeedMore::Ready(v) => v,
            NeedMore::Pending => return Ok(None),
        };
        let compression = match cursor.read_u8() {
            Some(b) => b,
            None => return Ok(None),
        };
        if compression != COMPRESSION_IDENTITY {
            return Err(ProtocolError::UnsupportedCompression(compression));
        }
        let payload_len = match cursor.read_i32() {
            Some(v) => v,
            None => return Ok(None),
        };
        if payload_len < 0 {
            return Err(ProtocolError::NegativePayloadLength(payload_len));
        }
        let payload = match cursor.read_bytes(payload_len as usize) {
            Some(b) => b.to_vec(),
            None => return Ok(None),
        };

        let consumed = cursor.pos;
        src.advance(consumed);

        Ok(Some(Envelope {
            type_name,
            flavor,
            compression,
            payload,
        }))
    }
}

fn write_string(dst: &mut BytesMut, s: &str) {
    dst.put_u8(PRESENT_MARKER);
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

fn write_nullable_string(dst: &mut BytesMut, s: Option<&str>) {
    match s {
        None => dst.put_u8(NULL_MARKER),
        Some(s) => write_string(dst, s),
    }
}

/// Whether a parse step had enough bytes buffered to complete.
enum NeedMore<T> {
    Ready(T),
    Pending,
}

/// A read-only cursor over a byte slice that never consumes from the
/// underlying buffer — callers only call `BytesMut::advance` once an entire
/// envelope has parsed successfully, so a short read leaves `src` untouched
/// for the next `decode` call.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Some(b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Some(u32::from_be_bytes(b))
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.read_u32().map(|v| v as i32)
    }

    fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }

    fn read_nullable_string(&mut self) -> Result<NeedMore<Option<String>>, ProtocolError> {
        let marker = match self.read_u8() {
            Some(m) => m,
            None => return Ok(NeedMore::Pending),
        };
        match marker {
            NULL_MARKER => Ok(NeedMore::Ready(None)),
            PRESENT_MARKER => {
                let len = match self.read_u32() {
                    Some(l) => l,
                    None => return Ok(NeedMore::Pending),
                };
                let bytes = match self.read_bytes(len as usize) {
                    Some(b) => b,
                    None => return Ok(NeedMore::Pending),
                };
                let s = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(NeedMore::Ready(Some(s.to_owned())))
            }
            other => Err(ProtocolError::BadStringMarker(other)),
        }
    }
}
