use crate::codec::{
    CodecError, Decodable, Encodable, PduHeader, decode_cstring, decode_u8, encode_cstring,
};
use crate::datatypes::{
    CommandId, CommandStatus, MAX_ADDRESS_LENGTH, MAX_DATE_LENGTH, MAX_MESSAGE_ID_LENGTH,
    NumericPlanIndicator, TypeOfNumber,
};
use bytes::{Buf, BufMut, BytesMut};
use num_enum::TryFromPrimitive;
use std::io::Cursor;

/// message_state values (SMPP v3.4 section 5.2.28)
#[derive(TryFromPrimitive, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageState {
    Enroute = 1,
    Delivered = 2,
    Expired = 3,
    Deleted = 4,
    Undeliverable = 5,
    Accepted = 6,
    Unknown = 7,
    Rejected = 8,
}

/// query_sm: ask for the current state of a previously submitted message
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySm {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub message_id: String,
    pub source_addr_ton: TypeOfNumber,
    pub source_addr_npi: NumericPlanIndicator,
    pub source_addr: String,
}

impl QuerySm {
    pub fn new(sequence_number: u32, message_id: &str, source_addr: &str) -> Self {
        Self {
            command_status: CommandStatus::Ok,
            sequence_number,
            message_id: message_id.to_string(),
            source_addr_ton: TypeOfNumber::Unknown,
            source_addr_npi: NumericPlanIndicator::Unknown,
            source_addr: source_addr.to_string(),
        }
    }
}

impl Decodable for QuerySm {
    fn command_id() -> CommandId {
        CommandId::QuerySm
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Self::validate_header(&header)?;
        Ok(Self {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            message_id: decode_cstring(buf, MAX_MESSAGE_ID_LENGTH, "message_id")?,
            source_addr_ton: TypeOfNumber::from_wire(decode_u8(buf)?),
            source_addr_npi: NumericPlanIndicator::from_wire(decode_u8(buf)?),
            source_addr: decode_cstring(buf, MAX_ADDRESS_LENGTH, "source_addr")?,
        })
    }
}

impl Encodable for QuerySm {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader {
            command_length: 0,
            command_id: CommandId::QuerySm,
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        }
        .encode(buf)?;
        encode_cstring(buf, &self.message_id, MAX_MESSAGE_ID_LENGTH);
        buf.put_u8(self.source_addr_ton as u8);
        buf.put_u8(self.source_addr_npi as u8);
        encode_cstring(buf, &self.source_addr, MAX_ADDRESS_LENGTH);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuerySmResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub message_id: String,
    /// Empty while the message is not in a final state
    pub final_date: String,
    pub message_state: u8,
    pub error_code: u8,
}

impl QuerySmResponse {
    pub fn new(
        sequence_number: u32,
        message_id: &str,
        final_date: &str,
        message_state: MessageState,
        error_code: u8,
    ) -> Self {
        Self {
            command_status: CommandStatus::Ok,
            sequence_number,
            message_id: message_id.to_string(),
            final_date: final_date.to_string(),
            message_state: message_state as u8,
            error_code,
        }
    }

    pub fn error(sequence_number: u32, status: CommandStatus) -> Self {
        Self {
            command_status: status,
            sequence_number,
            message_id: String::new(),
            final_date: String::new(),
            message_state: MessageState::Unknown as u8,
            error_code: 0,
        }
    }

    pub fn state(&self) -> MessageState {
        MessageState::try_from(self.message_state).unwrap_or(MessageState::Unknown)
    }
}

impl Decodable for QuerySmResponse {
    fn command_id() -> CommandId {
        CommandId::QuerySmResp
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Self::validate_header(&header)?;
        if !buf.has_remaining() {
            return Ok(Self::error(header.sequence_number, header.command_status));
        }
        Ok(Self {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            message_id: decode_cstring(buf, MAX_MESSAGE_ID_LENGTH, "message_id")?,
            final_date: decode_cstring(buf, MAX_DATE_LENGTH, "final_date")?,
            message_state: decode_u8(buf)?,
            error_code: decode_u8(buf)?,
        })
    }
}

impl Encodable for QuerySmResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader {
            command_length: 0,
            command_id: CommandId::QuerySmResp,
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        }
        .encode(buf)?;
        if self.command_status.is_ok() {
            encode_cstring(buf, &self.message_id, MAX_MESSAGE_ID_LENGTH);
            encode_cstring(buf, &self.final_date, MAX_DATE_LENGTH);
            buf.put_u8(self.message_state);
            buf.put_u8(self.error_code);
        }
        Ok(())
    }
}
