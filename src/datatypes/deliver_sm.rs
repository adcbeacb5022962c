use crate::codec::{
    CodecError, Decodable, Encodable, PduHeader, decode_cstring, encode_cstring,
};
use crate::datatypes::{CommandId, CommandStatus, MAX_MESSAGE_ID_LENGTH, ShortMessageBody};
use bytes::{Buf, BytesMut};
use std::io::Cursor;

/// deliver_sm: the SMSC pushes a mobile originated message or a delivery
/// receipt to a bound receiver
#[derive(Clone, Debug, PartialEq)]
pub struct DeliverSm {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub body: ShortMessageBody,
}

impl DeliverSm {
    pub fn new(sequence_number: u32, body: ShortMessageBody) -> Self {
        Self {
            command_status: CommandStatus::Ok,
            sequence_number,
            body,
        }
    }
}

impl Decodable for DeliverSm {
    fn command_id() -> CommandId {
        CommandId::DeliverSm
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

impl Encodable for DeliverSm {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader {
            command_length: 0,
            command_id: CommandId::DeliverSm,
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        }
        .encode(buf)?;
        self.body.encode(buf)
    }
}

/// deliver_sm_resp. message_id is unused and sent as a single NUL.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliverSmResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub message_id: String,
}

impl DeliverSmResponse {
    pub fn new(sequence_number: u32) -> Self {
        Self {
            command_status: CommandStatus::Ok,
            sequence_number,
            message_id: String::new(),
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

impl Decodable for DeliverSmResponse {
    fn command_id() -> CommandId {
        CommandId::DeliverSmResp
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

impl Encodable for DeliverSmResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader {
            command_length: 0,
            command_id: CommandId::DeliverSmResp,
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        }
        .encode(buf)?;
        encode_cstring(buf, &self.message_id, MAX_MESSAGE_ID_LENGTH);
        Ok(())
    }
}
