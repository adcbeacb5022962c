use crate::codec::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

pub const TAG_RECEIPTED_MESSAGE_ID: u16 = 0x001E;
pub const TAG_SC_INTERFACE_VERSION: u16 = 0x0210;
pub const TAG_NETWORK_ERROR_CODE: u16 = 0x0423;
pub const TAG_MESSAGE_PAYLOAD: u16 = 0x0424;
pub const TAG_MESSAGE_STATE: u16 = 0x0427;

/// Optional parameter (tag, length, value)
#[derive(Clone, Debug, PartialEq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Bytes,
}

impl Tlv {
    pub fn new(tag: u16, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// A C-octet string value, NUL terminated on the wire
    pub fn cstring(tag: u16, value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        Self::new(tag, bytes)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.tag);
        buf.put_u16(self.value.len() as u16);
        buf.put_slice(&self.value);
    }

    /// Read optional parameters until the body is exhausted
    pub fn decode_all(buf: &mut Cursor<&[u8]>) -> Result<Vec<Tlv>, CodecError> {
        let mut tlvs = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < 4 {
                return Err(CodecError::TlvError(format!(
                    "truncated TLV header: {} trailing bytes",
                    buf.remaining()
                )));
            }
            let tag = buf.get_u16();
            let length = buf.get_u16() as usize;
            if buf.remaining() < length {
                return Err(CodecError::TlvError(format!(
                    "TLV {tag:#06x} declares {length} bytes, {} available",
                    buf.remaining()
                )));
            }
            tlvs.push(Tlv {
                tag,
                value: buf.copy_to_bytes(length),
            });
        }
        Ok(tlvs)
    }

    /// Value as text with any trailing NUL stripped
    pub fn as_string(&self) -> String {
        let raw = self.value.as_ref();
        let trimmed = match raw.iter().position(|&b| b == 0) {
            Some(end) => &raw[..end],
            None => raw,
        };
        String::from_utf8_lossy(trimmed).into_owned()
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.value.first().copied()
    }
}

/// First TLV with the given tag
pub fn find_tlv(tlvs: &[Tlv], tag: u16) -> Option<&Tlv> {
    tlvs.iter().find(|tlv| tlv.tag == tag)
}
