mod address;
mod bind;
mod command_id;
mod command_status;
mod data_coding;
mod deliver_sm;
mod enquire_link;
mod generic_nack;
mod query_sm;
mod sm_body;
mod submit_sm;
mod tlv;
mod unbind;

pub use address::{NumericPlanIndicator, TypeOfNumber};
pub use bind::{
    BindReceiver, BindReceiverResponse, BindTransceiver, BindTransceiverResponse,
    BindTransmitter, BindTransmitterResponse, INTERFACE_VERSION_34,
};
pub use command_id::CommandId;
pub use command_status::CommandStatus;
pub use data_coding::{DataCoding, gsm7_septets, is_gsm7};
pub use deliver_sm::{DeliverSm, DeliverSmResponse};
pub use enquire_link::{EnquireLink, EnquireLinkResponse};
pub use generic_nack::GenericNack;
pub use query_sm::{MessageState, QuerySm, QuerySmResponse};
pub use sm_body::{ESM_CLASS_DELIVERY_RECEIPT, REGISTERED_DELIVERY_RECEIPT, ShortMessageBody};
pub use submit_sm::{SubmitSm, SubmitSmResponse};
pub use tlv::{
    TAG_MESSAGE_PAYLOAD, TAG_MESSAGE_STATE, TAG_NETWORK_ERROR_CODE, TAG_RECEIPTED_MESSAGE_ID,
    TAG_SC_INTERFACE_VERSION, Tlv, find_tlv,
};
pub use unbind::{Unbind, UnbindResponse};

// Field size limits from SMPP v3.4 section 5.2, NUL terminator included
pub const MAX_SYSTEM_ID_LENGTH: usize = 16;
pub const MAX_PASSWORD_LENGTH: usize = 9;
pub const MAX_SYSTEM_TYPE_LENGTH: usize = 13;
pub const MAX_ADDRESS_RANGE_LENGTH: usize = 41;
pub const MAX_SERVICE_TYPE_LENGTH: usize = 6;
pub const MAX_ADDRESS_LENGTH: usize = 21;
pub const MAX_DATE_LENGTH: usize = 17;
pub const MAX_MESSAGE_ID_LENGTH: usize = 65;

/// short_message is limited to 254 octets; longer data travels in message_payload
pub const MAX_SHORT_MESSAGE_LENGTH: usize = 254;
