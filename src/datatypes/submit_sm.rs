use crate::codec::{
    CodecError, Decodable, Encodable, PduHeader, decode_cstring, encode_cstring,
};
use crate::datatypes::{CommandId, CommandStatus, MAX_MESSAGE_ID_LENGTH, ShortMessageBody};
use bytes::{Buf, BytesMut};
use std::io::Cursor;

/// submit_sm: an ESME hands a short message to the SMSC for delivery
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitSm {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub body: ShortMessageBody,
}

impl SubmitSm {
    pub fn new(sequence_number: u32, body: ShortMessageBody) -> Self {
        Self {
            command_status: CommandStatus::Ok,
            sequence_number,
            body,
        }
    }
}

impl Decodable for SubmitSm {
    fn command_id() -> CommandId {
        CommandId::SubmitSm
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Self::validate_header(&header)?;
        Ok(Self {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            body: ShortMessageBody::decode(buf)?,
        })
    }
}

impl Encodable for SubmitSm {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader {
            command_length: 0,
            command_id: CommandId::SubmitSm,
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        }
        .encode(buf)?;
        self.body.encode(buf)
    }
}

/// submit_sm_resp carries the SMSC-assigned message_id.
///
/// The body is omitted on the wire when command_status is not Ok.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitSmResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub message_id: String,
}

impl SubmitSmResponse {
    pub fn new(sequence_number: u32, message_id: &str) -> Self {
        Self {
            command_status: CommandStatus::Ok,
            sequence_number,
            message_id: message_id.to_string(),
        }
    }

    pub fn error(sequence_number: u32, status: CommandStatus) -> Self {
        Self {
            command_status: status,
            sequence_number,
            message_id: String::new(),
        }
    }
}

impl Decodable for SubmitSmResponse {
    fn command_id() -> CommandId {
        CommandId::SubmitSmResp
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Self::validate_header(&header)?;
        let message_id = if buf.has_remaining() {
            decode_cstring(buf, MAX_MESSAGE_ID_LENGTH, "message_id")?
        } else {
            String::new()
        };
        Ok(Self {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            message_id,
        })
    }
}

impl Encodable for SubmitSmResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader {
            command_length: 0,
            command_id: CommandId::SubmitSmResp,
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        }
        .encode(buf)?;
        if self.command_status.is_ok() {
            encode_cstring(buf, &self.message_id, MAX_MESSAGE_ID_LENGTH);
        }
        Ok(())
    }
}
