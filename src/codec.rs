// ABOUTME: SMPP v3.4 wire codec shared by the customer-facing server and the vendor binds
// ABOUTME: Header validation, Encodable/Decodable traits, field helpers and the Frame registry

use crate::datatypes::{
    BindReceiver, BindReceiverResponse, BindTransceiver, BindTransceiverResponse, BindTransmitter,
    BindTransmitterResponse, CommandId, CommandStatus, DeliverSm, DeliverSmResponse, EnquireLink,
    EnquireLinkResponse, GenericNack, QuerySm, QuerySmResponse, SubmitSm, SubmitSmResponse, Unbind,
    UnbindResponse,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum allowed PDU size. Anything larger is treated as a framing error.
pub const MAX_PDU_SIZE: u32 = 65536;

/// SMPP v3.4 PDU Header (16 bytes, common to all PDUs)
#[derive(Debug, Clone, PartialEq)]
pub struct PduHeader {
    pub command_length: u32,
    pub command_id: CommandId,
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

impl PduHeader {
    pub const SIZE: usize = 16;

    /// Decode and validate a PDU header.
    ///
    /// Command statuses outside the known table (vendor specific ranges) are
    /// folded into `CommandStatus::UnknownError` rather than rejected, so a
    /// vendor answering with a private code does not tear the bind down.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < Self::SIZE {
            return Err(CodecError::Incomplete);
        }

        let command_length = buf.get_u32();
        let command_id_raw = buf.get_u32();
        let command_status_raw = buf.get_u32();
        let sequence_number = buf.get_u32();

        validate_length(command_length)?;

        let command_id = CommandId::try_from(command_id_raw)
            .map_err(|_| CodecError::InvalidCommandId(command_id_raw))?;
        let command_status =
            CommandStatus::try_from(command_status_raw).unwrap_or(CommandStatus::UnknownError);

        // Requests must carry command_status = 0
        if !command_id.is_response() && command_status != CommandStatus::Ok {
            return Err(CodecError::InvalidRequestStatus {
                command_id,
                command_status,
            });
        }

        // generic_nack may carry 0 when the offending PDU had no readable sequence
        let nack_without_sequence = command_id == CommandId::GenericNack && sequence_number == 0;
        if (sequence_number == 0 && !nack_without_sequence) || sequence_number == 0xFFFF_FFFF {
            return Err(CodecError::ReservedSequenceNumber(sequence_number));
        }

        Ok(PduHeader {
            command_length,
            command_id,
            command_status,
            sequence_number,
        })
    }

    /// Encode PDU header to buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u32(self.command_length);
        buf.put_u32(self.command_id as u32);
        buf.put_u32(self.command_status as u32);
        buf.put_u32(self.sequence_number);
        Ok(())
    }
}

fn validate_length(command_length: u32) -> Result<(), CodecError> {
    if command_length < PduHeader::SIZE as u32 || command_length > MAX_PDU_SIZE {
        return Err(CodecError::InvalidPduLength {
            length: command_length,
            min: PduHeader::SIZE as u32,
            max: MAX_PDU_SIZE,
        });
    }
    Ok(())
}

/// Trait for types that can be encoded to bytes
pub trait Encodable {
    /// Encode this PDU to the buffer, header included.
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError>;

    /// Encode into a fresh buffer and patch command_length in the first four
    /// bytes once the final size is known.
    fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(64);
        self.encode(&mut buf)?;

        let length = buf.len() as u32;
        validate_length(length)?;
        buf[0..4].copy_from_slice(&length.to_be_bytes());

        Ok(buf.freeze())
    }
}

/// Trait for types that can be decoded from a PDU body.
///
/// The cursor handed to `decode` spans exactly the body of one PDU, so any
/// bytes left over after the mandatory fields are optional parameters.
pub trait Decodable: Sized {
    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;

    fn command_id() -> CommandId;

    fn validate_header(header: &PduHeader) -> Result<(), CodecError> {
        if header.command_id != Self::command_id() {
            return Err(CodecError::UnexpectedCommandId {
                expected: Self::command_id(),
                actual: header.command_id,
            });
        }
        Ok(())
    }
}

/// Codec errors with detailed context for debugging
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Incomplete PDU: need more data")]
    Incomplete,

    #[error("Invalid command_id: {0:#x}")]
    InvalidCommandId(u32),

    #[error("Invalid PDU length: {length}, must be {min}-{max}")]
    InvalidPduLength { length: u32, min: u32, max: u32 },

    #[error("Request PDU {command_id:?} has non-zero status: {command_status:?}")]
    InvalidRequestStatus {
        command_id: CommandId,
        command_status: CommandStatus,
    },

    #[error("Reserved sequence number: {0} (0 and 0xFFFFFFFF are reserved)")]
    ReservedSequenceNumber(u32),

    #[error("Unexpected command_id: expected {expected:?}, got {actual:?}")]
    UnexpectedCommandId {
        expected: CommandId,
        actual: CommandId,
    },

    #[error("Field '{field}' validation failed: {reason}")]
    FieldValidation { field: &'static str, reason: String },

    #[error("TLV parsing error: {0}")]
    TlvError(String),

    #[error("UTF-8 decoding error in field '{field}': {source}")]
    Utf8Error {
        field: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandId {
    /// Check if this command_id represents a response PDU
    pub fn is_response(&self) -> bool {
        (*self as u32) & 0x8000_0000 != 0
    }
}

impl CodecError {
    /// Status to put in a generic_nack or response when decoding fails
    pub fn to_command_status(&self) -> CommandStatus {
        match self {
            CodecError::InvalidPduLength { .. } => CommandStatus::InvalidCommandLength,
            CodecError::InvalidCommandId(_) => CommandStatus::InvalidCommandId,
            CodecError::FieldValidation { field, .. } => match *field {
                "source_addr" => CommandStatus::InvalidSourceAddress,
                "destination_addr" => CommandStatus::InvalidDestinationAddress,
                "short_message" => CommandStatus::InvalidMsgLength,
                "system_id" => CommandStatus::InvalidSystemId,
                "password" => CommandStatus::InvalidPassword,
                _ => CommandStatus::SystemError,
            },
            _ => CommandStatus::SystemError,
        }
    }
}

/// Decode a variable length C-octet string.
///
/// `max_len` is the largest size the field may occupy on the wire, NUL
/// terminator included.
pub fn decode_cstring(
    buf: &mut Cursor<&[u8]>,
    max_len: usize,
    field_name: &'static str,
) -> Result<String, CodecError> {
    let chunk = buf.chunk();
    let window = &chunk[..chunk.len().min(max_len)];

    let Some(end) = window.iter().position(|&b| b == 0) else {
        return Err(CodecError::FieldValidation {
            field: field_name,
            reason: format!("missing NUL terminator within {max_len} octets"),
        });
    };

    let value = String::from_utf8(window[..end].to_vec()).map_err(|e| CodecError::Utf8Error {
        field: field_name,
        source: e,
    })?;
    buf.advance(end + 1);
    Ok(value)
}

/// Decode a single byte
pub fn decode_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u8())
}

/// Decode a 16-bit big-endian integer
pub fn decode_u16(buf: &mut Cursor<&[u8]>) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u16())
}

/// Decode `len` raw octets
pub fn decode_octets(
    buf: &mut Cursor<&[u8]>,
    len: usize,
    field_name: &'static str,
) -> Result<Bytes, CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::FieldValidation {
            field: field_name,
            reason: format!("declared {len} octets, {} available", buf.remaining()),
        });
    }
    Ok(buf.copy_to_bytes(len))
}

/// Encode a C-octet string, truncating to `max_len - 1` bytes of content.
pub fn encode_cstring(buf: &mut BytesMut, value: &str, max_len: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(max_len.saturating_sub(1));
    buf.put_slice(&bytes[..len]);
    buf.put_u8(0);
}

/// Peek at the command_length of the next PDU without advancing
pub fn peek_u32(buf: &Cursor<&[u8]>) -> Result<u32, CodecError> {
    let chunk = buf.chunk();
    if chunk.len() < 4 {
        return Err(CodecError::Incomplete);
    }
    Ok(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// One decoded PDU
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    BindTransmitter(BindTransmitter),
    BindTransmitterResp(BindTransmitterResponse),
    BindReceiver(BindReceiver),
    BindReceiverResp(BindReceiverResponse),
    BindTransceiver(BindTransceiver),
    BindTransceiverResp(BindTransceiverResponse),

    Unbind(Unbind),
    UnbindResp(UnbindResponse),
    EnquireLink(EnquireLink),
    EnquireLinkResp(EnquireLinkResponse),

    SubmitSm(Box<SubmitSm>),
    SubmitSmResp(SubmitSmResponse),
    DeliverSm(Box<DeliverSm>),
    DeliverSmResp(DeliverSmResponse),
    QuerySm(QuerySm),
    QuerySmResp(QuerySmResponse),

    GenericNack(GenericNack),

    /// A PDU the gateway does not handle. The body is kept opaque.
    Unknown {
        command_id: u32,
        command_status: u32,
        sequence_number: u32,
        body: Bytes,
    },
}

type DecoderFn =
    Box<dyn Fn(PduHeader, &mut Cursor<&[u8]>) -> Result<Frame, CodecError> + Send + Sync>;

/// Registry of PDU decoders keyed by command_id
pub struct PduRegistry {
    decoders: HashMap<CommandId, DecoderFn>,
}

static REGISTRY: LazyLock<PduRegistry> = LazyLock::new(PduRegistry::new);

impl PduRegistry {
    /// Create a registry with every PDU the gateway speaks
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };

        registry.register_pdu::<BindTransmitter, _>(Frame::BindTransmitter);
        registry.register_pdu::<BindTransmitterResponse, _>(Frame::BindTransmitterResp);
        registry.register_pdu::<BindReceiver, _>(Frame::BindReceiver);
        registry.register_pdu::<BindReceiverResponse, _>(Frame::BindReceiverResp);
        registry.register_pdu::<BindTransceiver, _>(Frame::BindTransceiver);
        registry.register_pdu::<BindTransceiverResponse, _>(Frame::BindTransceiverResp);

        registry.register_pdu::<Unbind, _>(Frame::Unbind);
        registry.register_pdu::<UnbindResponse, _>(Frame::UnbindResp);
        registry.register_pdu::<EnquireLink, _>(Frame::EnquireLink);
        registry.register_pdu::<EnquireLinkResponse, _>(Frame::EnquireLinkResp);

        registry.register_pdu::<SubmitSm, _>(|pdu| Frame::SubmitSm(Box::new(pdu)));
        registry.register_pdu::<SubmitSmResponse, _>(Frame::SubmitSmResp);
        registry.register_pdu::<DeliverSm, _>(|pdu| Frame::DeliverSm(Box::new(pdu)));
        registry.register_pdu::<DeliverSmResponse, _>(Frame::DeliverSmResp);
        registry.register_pdu::<QuerySm, _>(Frame::QuerySm);
        registry.register_pdu::<QuerySmResponse, _>(Frame::QuerySmResp);

        registry.register_pdu::<GenericNack, _>(Frame::GenericNack);

        registry
    }

    fn register_pdu<T, F>(&mut self, frame_constructor: F)
    where
        T: Decodable + 'static,
        F: Fn(T) -> Frame + Send + Sync + 'static,
    {
        let decoder = Box::new(move |header: PduHeader, buf: &mut Cursor<&[u8]>| {
            let pdu = T::decode(header, buf)?;
            Ok(frame_constructor(pdu))
        });
        self.decoders.insert(T::command_id(), decoder);
    }

    /// Decode a PDU body given its header
    pub fn decode_pdu(
        &self,
        header: PduHeader,
        buf: &mut Cursor<&[u8]>,
    ) -> Result<Frame, CodecError> {
        match self.decoders.get(&header.command_id) {
            Some(decoder) => decoder(header, buf),
            None => Ok(Frame::Unknown {
                command_id: header.command_id as u32,
                command_status: header.command_status as u32,
                sequence_number: header.sequence_number,
                body: buf.copy_to_bytes(buf.remaining()),
            }),
        }
    }

    pub fn is_registered(&self, command_id: CommandId) -> bool {
        self.decoders.contains_key(&command_id)
    }

    pub fn registered_commands(&self) -> Vec<CommandId> {
        self.decoders.keys().copied().collect()
    }
}

impl Default for PduRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Raw command_id of this frame
    pub fn command_id(&self) -> u32 {
        let id = match self {
            Frame::BindTransmitter(_) => CommandId::BindTransmitter,
            Frame::BindTransmitterResp(_) => CommandId::BindTransmitterResp,
            Frame::BindReceiver(_) => CommandId::BindReceiver,
            Frame::BindReceiverResp(_) => CommandId::BindReceiverResp,
            Frame::BindTransceiver(_) => CommandId::BindTransceiver,
            Frame::BindTransceiverResp(_) => CommandId::BindTransceiverResp,
            Frame::Unbind(_) => CommandId::Unbind,
            Frame::UnbindResp(_) => CommandId::UnbindResp,
            Frame::EnquireLink(_) => CommandId::EnquireLink,
            Frame::EnquireLinkResp(_) => CommandId::EnquireLinkResp,
            Frame::SubmitSm(_) => CommandId::SubmitSm,
            Frame::SubmitSmResp(_) => CommandId::SubmitSmResp,
            Frame::DeliverSm(_) => CommandId::DeliverSm,
            Frame::DeliverSmResp(_) => CommandId::DeliverSmResp,
            Frame::QuerySm(_) => CommandId::QuerySm,
            Frame::QuerySmResp(_) => CommandId::QuerySmResp,
            Frame::GenericNack(_) => CommandId::GenericNack,
            Frame::Unknown { command_id, .. } => return *command_id,
        };
        id as u32
    }

    pub fn sequence_number(&self) -> u32 {
        match self {
            Frame::BindTransmitter(pdu) => pdu.sequence_number,
            Frame::BindTransmitterResp(pdu) => pdu.sequence_number,
            Frame::BindReceiver(pdu) => pdu.sequence_number,
            Frame::BindReceiverResp(pdu) => pdu.sequence_number,
            Frame::BindTransceiver(pdu) => pdu.sequence_number,
            Frame::BindTransceiverResp(pdu) => pdu.sequence_number,
            Frame::Unbind(pdu) => pdu.sequence_number,
            Frame::UnbindResp(pdu) => pdu.sequence_number,
            Frame::EnquireLink(pdu) => pdu.sequence_number,
            Frame::EnquireLinkResp(pdu) => pdu.sequence_number,
            Frame::SubmitSm(pdu) => pdu.sequence_number,
            Frame::SubmitSmResp(pdu) => pdu.sequence_number,
            Frame::DeliverSm(pdu) => pdu.sequence_number,
            Frame::DeliverSmResp(pdu) => pdu.sequence_number,
            Frame::QuerySm(pdu) => pdu.sequence_number,
            Frame::QuerySmResp(pdu) => pdu.sequence_number,
            Frame::GenericNack(pdu) => pdu.sequence_number,
            Frame::Unknown {
                sequence_number, ..
            } => *sequence_number,
        }
    }

    pub fn is_response(&self) -> bool {
        self.command_id() & 0x8000_0000 != 0
    }

    /// Check whether `buf` holds at least one complete PDU.
    ///
    /// Returns the PDU length on success. A length prefix outside the allowed
    /// range is reported immediately, before the body has arrived.
    pub fn check(buf: &mut Cursor<&[u8]>) -> Result<usize, CodecError> {
        let command_length = peek_u32(buf)?;
        validate_length(command_length)?;

        if buf.remaining() < command_length as usize {
            return Err(CodecError::Incomplete);
        }
        Ok(command_length as usize)
    }

    /// Parse one complete PDU. `buf` must start at the command_length field.
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Frame, CodecError> {
        let len = Frame::check(buf)?;
        let start = buf.position() as usize;
        let data: &[u8] = *buf.get_ref();
        let pdu = &data[start..start + len];
        buf.set_position((start + len) as u64);

        let raw_id = u32::from_be_bytes([pdu[4], pdu[5], pdu[6], pdu[7]]);
        if CommandId::try_from(raw_id).is_err() {
            return Ok(Frame::Unknown {
                command_id: raw_id,
                command_status: u32::from_be_bytes([pdu[8], pdu[9], pdu[10], pdu[11]]),
                sequence_number: u32::from_be_bytes([pdu[12], pdu[13], pdu[14], pdu[15]]),
                body: Bytes::copy_from_slice(&pdu[PduHeader::SIZE..]),
            });
        }

        let mut header_buf = Cursor::new(&pdu[..PduHeader::SIZE]);
        let header = PduHeader::decode(&mut header_buf)?;

        let mut body = Cursor::new(&pdu[PduHeader::SIZE..]);
        REGISTRY.decode_pdu(header, &mut body)
    }

    /// Serialize this frame, header included
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        match self {
            Frame::BindTransmitter(pdu) => pdu.to_bytes(),
            Frame::BindTransmitterResp(pdu) => pdu.to_bytes(),
            Frame::BindReceiver(pdu) => pdu.to_bytes(),
            Frame::BindReceiverResp(pdu) => pdu.to_bytes(),
            Frame::BindTransceiver(pdu) => pdu.to_bytes(),
            Frame::BindTransceiverResp(pdu) => pdu.to_bytes(),
            Frame::Unbind(pdu) => pdu.to_bytes(),
            Frame::UnbindResp(pdu) => pdu.to_bytes(),
            Frame::EnquireLink(pdu) => pdu.to_bytes(),
            Frame::EnquireLinkResp(pdu) => pdu.to_bytes(),
            Frame::SubmitSm(pdu) => pdu.to_bytes(),
            Frame::SubmitSmResp(pdu) => pdu.to_bytes(),
            Frame::DeliverSm(pdu) => pdu.to_bytes(),
            Frame::DeliverSmResp(pdu) => pdu.to_bytes(),
            Frame::QuerySm(pdu) => pdu.to_bytes(),
            Frame::QuerySmResp(pdu) => pdu.to_bytes(),
            Frame::GenericNack(pdu) => pdu.to_bytes(),
            Frame::Unknown {
                command_id,
                command_status,
                sequence_number,
                body,
            } => {
                let mut buf = BytesMut::with_capacity(PduHeader::SIZE + body.len());
                buf.put_u32((PduHeader::SIZE + body.len()) as u32);
                buf.put_u32(*command_id);
                buf.put_u32(*command_status);
                buf.put_u32(*sequence_number);
                buf.put_slice(body);
                Ok(buf.freeze())
            }
        }
    }
}
