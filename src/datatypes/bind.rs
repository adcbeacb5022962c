use crate::datatypes::CommandId;
use crate::macros::define_bind_pdu;

/// SMPP interface version 3.4
pub const INTERFACE_VERSION_34: u8 = 0x34;

define_bind_pdu!(
    BindTransmitter,
    CommandId::BindTransmitter,
    BindTransmitterResponse,
    CommandId::BindTransmitterResp
);
define_bind_pdu!(
    BindReceiver,
    CommandId::BindReceiver,
    BindReceiverResponse,
    CommandId::BindReceiverResp
);
define_bind_pdu!(
    BindTransceiver,
    CommandId::BindTransceiver,
    BindTransceiverResponse,
    CommandId::BindTransceiverResp
);
