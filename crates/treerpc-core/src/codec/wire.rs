//! Cursor over one encoded message, backed by `prost::encoding`.
//!
//! The schema-driven layer in [`super`] decides what each field means; this
//! module only moves keys and raw values on and off the wire.

use crate::error::{BridgeError, Result};
use bytes::BufMut;
use prost::encoding::{
    decode_key, decode_varint, encode_key, encode_varint, fixed32, fixed64, skip_field,
    DecodeContext,
};

pub use prost::encoding::WireType;

/// Key, length prefix and payload of one length-delimited field.
pub fn put_length_delimited(buf: &mut impl BufMut, field_id: u32, payload: &[u8]) {
    encode_key(field_id, WireType::LengthDelimited, buf);
    encode_varint(payload.len() as u64, buf);
    buf.put_slice(payload);
}

#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next field key, or `None` once the input is exhausted.
    pub fn read_key(&mut self) -> Result<Option<(u32, WireType)>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_key(&mut self.buf)?))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        Ok(decode_varint(&mut self.buf)?)
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let mut value = 0;
        fixed32::merge(
            WireType::ThirtyTwoBit,
            &mut value,
            &mut self.buf,
            DecodeContext::default(),
        )?;
        Ok(value)
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let mut value = 0;
        fixed64::merge(
            WireType::SixtyFourBit,
            &mut value,
            &mut self.buf,
            DecodeContext::default(),
        )?;
        Ok(value)
    }

    /// Borrow the payload of a length-delimited value without copying.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8]> {
        let len = decode_varint(&mut self.buf)?;
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= self.buf.len())
            .ok_or_else(|| BridgeError::Malformed {
                message: format!("length {} exceeds remaining {} bytes", len, self.buf.len()),
            })?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Skip the value of a field nobody asked for, groups included.
    pub fn skip(&mut self, field_id: u32, wire_type: WireType) -> Result<()> {
        skip_field(wire_type, field_id, &mut self.buf, DecodeContext::default())?;
        Ok(())
    }
}
