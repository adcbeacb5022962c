use crate::datatypes::{CommandId, CommandStatus};
use crate::macros::impl_complete_header_only_pdu;

/// generic_nack answers a PDU that could not be processed at all.
///
/// sequence_number is 0 when the offending PDU was too broken to read one.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericNack {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

impl_complete_header_only_pdu!(GenericNack, CommandId::GenericNack);

impl GenericNack {
    pub fn invalid_command_id(sequence_number: u32) -> Self {
        Self::error(sequence_number, CommandStatus::InvalidCommandId)
    }

    pub fn invalid_command_length(sequence_number: u32) -> Self {
        Self::error(sequence_number, CommandStatus::InvalidCommandLength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encodable, Frame};
    use std::io::Cursor;

    #[test]
    fn test_generic_nack_with_unknown_sequence() {
        let bytes = GenericNack::invalid_command_length(0).to_bytes().unwrap();
        let frame = Frame::parse(&mut Cursor::new(bytes.as_ref())).unwrap();

        assert!(matches!(
            frame,
            Frame::GenericNack(ref nack)
                if nack.sequence_number == 0
                    && nack.command_status == CommandStatus::InvalidCommandLength
        ));
    }
}
