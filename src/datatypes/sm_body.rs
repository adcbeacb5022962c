// ABOUTME: Mandatory body shared by submit_sm and deliver_sm plus their optional parameters
// ABOUTME: Both PDUs use the identical field layout from SMPP v3.4 sections 4.4.1 and 4.6.1

use crate::codec::{CodecError, decode_cstring, decode_octets, decode_u8, encode_cstring};
use crate::datatypes::{
    DataCoding, MAX_ADDRESS_LENGTH, MAX_DATE_LENGTH, MAX_SERVICE_TYPE_LENGTH,
    MAX_SHORT_MESSAGE_LENGTH, NumericPlanIndicator, TAG_MESSAGE_PAYLOAD, Tlv, TypeOfNumber,
    find_tlv,
};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

/// esm_class message type bits (2..5)
const ESM_CLASS_TYPE_MASK: u8 = 0x3C;

/// esm_class message type: SMSC delivery receipt
pub const ESM_CLASS_DELIVERY_RECEIPT: u8 = 0x04;

/// registered_delivery: SMSC delivery receipt requested on final outcome
pub const REGISTERED_DELIVERY_RECEIPT: u8 = 0x01;

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ShortMessageBody {
    /// Set to empty for the SMSC default service
    pub service_type: String,
    pub source_addr_ton: TypeOfNumber,
    pub source_addr_npi: NumericPlanIndicator,
    /// Up to 20 octets
    pub source_addr: String,
    pub dest_addr_ton: TypeOfNumber,
    pub dest_addr_npi: NumericPlanIndicator,
    /// Up to 20 octets
    pub destination_addr: String,
    /// Message mode and type. 0x04 in the type bits marks a delivery receipt.
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    /// User data, at most 254 octets. sm_length is derived from it.
    pub short_message: Bytes,
    pub tlvs: Vec<Tlv>,
}

impl ShortMessageBody {
    pub fn new(source_addr: &str, destination_addr: &str, short_message: Bytes) -> Self {
        let source_addr_ton = TypeOfNumber::for_address(source_addr);
        let dest_addr_ton = TypeOfNumber::for_address(destination_addr);
        Self {
            source_addr_ton,
            source_addr_npi: NumericPlanIndicator::for_ton(source_addr_ton),
            source_addr: source_addr.to_string(),
            dest_addr_ton,
            dest_addr_npi: NumericPlanIndicator::for_ton(dest_addr_ton),
            destination_addr: destination_addr.to_string(),
            short_message,
            ..Default::default()
        }
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let service_type = decode_cstring(buf, MAX_SERVICE_TYPE_LENGTH, "service_type")?;
        let source_addr_ton = TypeOfNumber::from_wire(decode_u8(buf)?);
        let source_addr_npi = NumericPlanIndicator::from_wire(decode_u8(buf)?);
        let source_addr = decode_cstring(buf, MAX_ADDRESS_LENGTH, "source_addr")?;
        let dest_addr_ton = TypeOfNumber::from_wire(decode_u8(buf)?);
        let dest_addr_npi = NumericPlanIndicator::from_wire(decode_u8(buf)?);
        let destination_addr = decode_cstring(buf, MAX_ADDRESS_LENGTH, "destination_addr")?;
        let esm_class = decode_u8(buf)?;
        let protocol_id = decode_u8(buf)?;
        let priority_flag = decode_u8(buf)?;
        let schedule_delivery_time =
            decode_cstring(buf, MAX_DATE_LENGTH, "schedule_delivery_time")?;
        let validity_period = decode_cstring(buf, MAX_DATE_LENGTH, "validity_period")?;
        let registered_delivery = decode_u8(buf)?;
        let replace_if_present_flag = decode_u8(buf)?;
        let data_coding = decode_u8(buf)?;
        let sm_default_msg_id = decode_u8(buf)?;
        let sm_length = decode_u8(buf)? as usize;
        if sm_length > MAX_SHORT_MESSAGE_LENGTH {
            return Err(CodecError::FieldValidation {
                field: "short_message",
                reason: format!("sm_length {sm_length} exceeds {MAX_SHORT_MESSAGE_LENGTH}"),
            });
        }
        let short_message = decode_octets(buf, sm_length, "short_message")?;
        let tlvs = Tlv::decode_all(buf)?;

        Ok(Self {
            service_type,
            source_addr_ton,
            source_addr_npi,
            source_addr,
            dest_addr_ton,
            dest_addr_npi,
            destination_addr,
            esm_class,
            protocol_id,
            priority_flag,
            schedule_delivery_time,
            validity_period,
            registered_delivery,
            replace_if_present_flag,
            data_coding,
            sm_default_msg_id,
            short_message,
            tlvs,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        if self.short_message.len() > MAX_SHORT_MESSAGE_LENGTH {
            return Err(CodecError::FieldValidation {
                field: "short_message",
                reason: format!(
                    "{} octets exceeds {MAX_SHORT_MESSAGE_LENGTH}, use message_payload",
                    self.short_message.len()
                ),
            });
        }

        encode_cstring(buf, &self.service_type, MAX_SERVICE_TYPE_LENGTH);
        buf.put_u8(self.source_addr_ton as u8);
        buf.put_u8(self.source_addr_npi as u8);
        encode_cstring(buf, &self.source_addr, MAX_ADDRESS_LENGTH);
        buf.put_u8(self.dest_addr_ton as u8);
        buf.put_u8(self.dest_addr_npi as u8);
        encode_cstring(buf, &self.destination_addr, MAX_ADDRESS_LENGTH);
        buf.put_u8(self.esm_class);
        buf.put_u8(self.protocol_id);
        buf.put_u8(self.priority_flag);
        encode_cstring(buf, &self.schedule_delivery_time, MAX_DATE_LENGTH);
        encode_cstring(buf, &self.validity_period, MAX_DATE_LENGTH);
        buf.put_u8(self.registered_delivery);
        buf.put_u8(self.replace_if_present_flag);
        buf.put_u8(self.data_coding);
        buf.put_u8(self.sm_default_msg_id);
        buf.put_u8(self.short_message.len() as u8);
        buf.put_slice(&self.short_message);
        for tlv in &self.tlvs {
            tlv.encode(buf);
        }
        Ok(())
    }

    /// User data, taken from message_payload when short_message is empty
    pub fn payload(&self) -> Bytes {
        if self.short_message.is_empty() {
            if let Some(tlv) = find_tlv(&self.tlvs, TAG_MESSAGE_PAYLOAD) {
                return tlv.value.clone();
            }
        }
        self.short_message.clone()
    }

    /// Set user data, moving it to message_payload when it does not fit
    pub fn set_payload(&mut self, data: Bytes) {
        self.tlvs.retain(|tlv| tlv.tag != TAG_MESSAGE_PAYLOAD);
        if data.len() > MAX_SHORT_MESSAGE_LENGTH {
            self.short_message = Bytes::new();
            self.tlvs.push(Tlv::new(TAG_MESSAGE_PAYLOAD, data));
        } else {
            self.short_message = data;
        }
    }

    pub fn coding(&self) -> DataCoding {
        DataCoding::from_byte(self.data_coding)
    }

    /// Decoded text of the user data
    pub fn text(&self) -> String {
        self.coding().decode(&self.payload())
    }

    pub fn is_delivery_receipt(&self) -> bool {
        self.esm_class & ESM_CLASS_TYPE_MASK == ESM_CLASS_DELIVERY_RECEIPT
    }

    pub fn wants_delivery_receipt(&self) -> bool {
        self.registered_delivery & 0x03 == REGISTERED_DELIVERY_RECEIPT
    }

    pub fn tlv(&self, tag: u16) -> Option<&Tlv> {
        find_tlv(&self.tlvs, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    #[test]
    fn test_body_encode_decode() {
        let mut body = ShortMessageBody::new("ACME", "+14155550100", Bytes::from_static(b"hi"));
        body.registered_delivery = REGISTERED_DELIVERY_RECEIPT;

        let mut buf = BytesMut::new();
        body.encode(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf.as_ref());
        let decoded = ShortMessageBody::decode(&mut cursor).unwrap();

        assert_eq!(decoded, body);
        assert!(decoded.wants_delivery_receipt());
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_long_payload_moves_to_tlv() {
        let mut body = ShortMessageBody::new("1000", "2000", Bytes::new());
        body.set_payload(Bytes::from(vec![b'a'; 300]));

        assert!(body.short_message.is_empty());
        assert_eq!(body.payload().len(), 300);

        let mut buf = BytesMut::new();
        body.encode(&mut buf).unwrap();
        let decoded = ShortMessageBody::decode(&mut Cursor::new(buf.as_ref())).unwrap();
        assert_eq!(decoded.payload().len(), 300);
    }

    #[test]
    fn test_oversized_short_message_rejected() {
        let body = ShortMessageBody::new("1000", "2000", Bytes::from(vec![0u8; 255]));
        let mut buf = BytesMut::new();

        assert!(matches!(
            body.encode(&mut buf),
            Err(CodecError::FieldValidation {
                field: "short_message",
                ..
            })
        ));
    }

    #[test]
    fn test_delivery_receipt_flag() {
        let mut body = ShortMessageBody::default();
        assert!(!body.is_delivery_receipt());
        body.esm_class = ESM_CLASS_DELIVERY_RECEIPT;
        assert!(body.is_delivery_receipt());
    }
}
