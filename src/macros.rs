// ABOUTME: Macros that remove boilerplate from the PDU definitions in datatypes/
// ABOUTME: Covers header-only PDUs and the three bind request/response families

/// Implement Encodable/Decodable for a PDU that is only a header.
///
/// Any body bytes are rejected as a field validation error.
macro_rules! impl_header_only_pdu {
    ($pdu_type:ident, $command_id:expr) => {
        impl $crate::codec::Decodable for $pdu_type {
            fn command_id() -> $crate::datatypes::CommandId {
                $command_id
            }

            fn decode(
                header: $crate::codec::PduHeader,
                buf: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::codec::CodecError> {
                use bytes::Buf;

                Self::validate_header(&header)?;

                if buf.has_remaining() {
                    return Err($crate::codec::CodecError::FieldValidation {
                        field: concat!(stringify!($pdu_type), "_body"),
                        reason: concat!(stringify!($pdu_type), " PDU should have no body")
                            .to_string(),
                    });
                }

                Ok($pdu_type {
                    command_status: header.command_status,
                    sequence_number: header.sequence_number,
                })
            }
        }

        impl $crate::codec::Encodable for $pdu_type {
            fn encode(&self, buf: &mut bytes::BytesMut) -> Result<(), $crate::codec::CodecError> {
                let header = $crate::codec::PduHeader {
                    command_length: $crate::codec::PduHeader::SIZE as u32,
                    command_id: $command_id,
                    command_status: self.command_status,
                    sequence_number: self.sequence_number,
                };
                header.encode(buf)
            }
        }
    };
}

/// `new(seq)` and `error(seq, status)` constructors for header-only PDUs
macro_rules! impl_header_only_constructors {
    ($pdu_type:ident) => {
        impl $pdu_type {
            pub fn new(sequence_number: u32) -> Self {
                Self {
                    command_status: $crate::datatypes::CommandStatus::Ok,
                    sequence_number,
                }
            }

            pub fn error(sequence_number: u32, status: $crate::datatypes::CommandStatus) -> Self {
                Self {
                    command_status: status,
                    sequence_number,
                }
            }
        }
    };
}

/// Header-only codec plus constructors in one go
macro_rules! impl_complete_header_only_pdu {
    ($pdu_type:ident, $command_id:expr) => {
        $crate::macros::impl_header_only_pdu!($pdu_type, $command_id);
        $crate::macros::impl_header_only_constructors!($pdu_type);
    };
}

/// Define a bind request and its response.
///
/// bind_transmitter, bind_receiver and bind_transceiver share one body
/// layout and differ only in command_id, so all three come from here.
macro_rules! define_bind_pdu {
    ($request:ident, $request_id:expr, $response:ident, $response_id:expr) => {
        #[derive(Clone, Debug, PartialEq)]
        pub struct $request {
            pub command_status: $crate::datatypes::CommandStatus,
            pub sequence_number: u32,
            pub system_id: String,
            pub password: String,
            pub system_type: String,
            pub interface_version: u8,
            pub addr_ton: $crate::datatypes::TypeOfNumber,
            pub addr_npi: $crate::datatypes::NumericPlanIndicator,
            pub address_range: String,
        }

        impl $request {
            pub fn new(sequence_number: u32, system_id: &str, password: &str) -> Self {
                Self {
                    command_status: $crate::datatypes::CommandStatus::Ok,
                    sequence_number,
                    system_id: system_id.to_string(),
                    password: password.to_string(),
                    system_type: String::new(),
                    interface_version: $crate::datatypes::INTERFACE_VERSION_34,
                    addr_ton: $crate::datatypes::TypeOfNumber::Unknown,
                    addr_npi: $crate::datatypes::NumericPlanIndicator::Unknown,
                    address_range: String::new(),
                }
            }

            pub fn with_system_type(mut self, system_type: &str) -> Self {
                self.system_type = system_type.to_string();
                self
            }
        }

        impl $crate::codec::Decodable for $request {
            fn command_id() -> $crate::datatypes::CommandId {
                $request_id
            }

            fn decode(
                header: $crate::codec::PduHeader,
                buf: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::codec::CodecError> {
                use $crate::codec::{decode_cstring, decode_u8};
                use $crate::datatypes::{
                    MAX_ADDRESS_RANGE_LENGTH, MAX_PASSWORD_LENGTH, MAX_SYSTEM_ID_LENGTH,
                    MAX_SYSTEM_TYPE_LENGTH,
                };

                Self::validate_header(&header)?;

                Ok(Self {
                    command_status: header.command_status,
                    sequence_number: header.sequence_number,
                    system_id: decode_cstring(buf, MAX_SYSTEM_ID_LENGTH, "system_id")?,
                    password: decode_cstring(buf, MAX_PASSWORD_LENGTH, "password")?,
                    system_type: decode_cstring(buf, MAX_SYSTEM_TYPE_LENGTH, "system_type")?,
                    interface_version: decode_u8(buf)?,
                    addr_ton: $crate::datatypes::TypeOfNumber::from_wire(decode_u8(buf)?),
                    addr_npi: $crate::datatypes::NumericPlanIndicator::from_wire(decode_u8(buf)?),
                    address_range: decode_cstring(
                        buf,
                        MAX_ADDRESS_RANGE_LENGTH,
                        "address_range",
                    )?,
                })
            }
        }

        impl $crate::codec::Encodable for $request {
            fn encode(&self, buf: &mut bytes::BytesMut) -> Result<(), $crate::codec::CodecError> {
                use bytes::BufMut;
                use $crate::codec::encode_cstring;
                use $crate::datatypes::{
                    MAX_ADDRESS_RANGE_LENGTH, MAX_PASSWORD_LENGTH, MAX_SYSTEM_ID_LENGTH,
                    MAX_SYSTEM_TYPE_LENGTH,
                };

                let header = $crate::codec::PduHeader {
                    command_length: 0,
                    command_id: $request_id,
                    command_status: self.command_status,
                    sequence_number: self.sequence_number,
                };
                header.encode(buf)?;

                encode_cstring(buf, &self.system_id, MAX_SYSTEM_ID_LENGTH);
                encode_cstring(buf, &self.password, MAX_PASSWORD_LENGTH);
                encode_cstring(buf, &self.system_type, MAX_SYSTEM_TYPE_LENGTH);
                buf.put_u8(self.interface_version);
                buf.put_u8(self.addr_ton as u8);
                buf.put_u8(self.addr_npi as u8);
                encode_cstring(buf, &self.address_range, MAX_ADDRESS_RANGE_LENGTH);
                Ok(())
            }
        }

        #[derive(Clone, Debug, PartialEq)]
        pub struct $response {
            pub command_status: $crate::datatypes::CommandStatus,
            pub sequence_number: u32,
            pub system_id: String,
            pub sc_interface_version: Option<u8>,
        }

        impl $response {
            pub fn new(sequence_number: u32, system_id: &str) -> Self {
                Self {
                    command_status: $crate::datatypes::CommandStatus::Ok,
                    sequence_number,
                    system_id: system_id.to_string(),
                    sc_interface_version: Some($crate::datatypes::INTERFACE_VERSION_34),
                }
            }

            pub fn error(sequence_number: u32, status: $crate::datatypes::CommandStatus) -> Self {
                Self {
                    command_status: status,
                    sequence_number,
                    system_id: String::new(),
                    sc_interface_version: None,
                }
            }
        }

        impl $crate::codec::Decodable for $response {
            fn command_id() -> $crate::datatypes::CommandId {
                $response_id
            }

            fn decode(
                header: $crate::codec::PduHeader,
                buf: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::codec::CodecError> {
                use bytes::Buf;
                use $crate::datatypes::{Tlv, MAX_SYSTEM_ID_LENGTH, TAG_SC_INTERFACE_VERSION};

                Self::validate_header(&header)?;

                // Error responses may omit the body entirely
                if !buf.has_remaining() {
                    return Ok(Self {
                        command_status: header.command_status,
                        sequence_number: header.sequence_number,
                        system_id: String::new(),
                        sc_interface_version: None,
                    });
                }

                let system_id = $crate::codec::decode_cstring(
                    buf,
                    MAX_SYSTEM_ID_LENGTH,
                    "system_id",
                )?;
                let tlvs = Tlv::decode_all(buf)?;
                let sc_interface_version = tlvs
                    .iter()
                    .find(|tlv| tlv.tag == TAG_SC_INTERFACE_VERSION)
                    .and_then(|tlv| tlv.value.first().copied());

                Ok(Self {
                    command_status: header.command_status,
                    sequence_number: header.sequence_number,
                    system_id,
                    sc_interface_version,
                })
            }
        }

        impl $crate::codec::Encodable for $response {
            fn encode(&self, buf: &mut bytes::BytesMut) -> Result<(), $crate::codec::CodecError> {
                use $crate::datatypes::{Tlv, MAX_SYSTEM_ID_LENGTH, TAG_SC_INTERFACE_VERSION};

                let header = $crate::codec::PduHeader {
                    command_length: 0,
                    command_id: $response_id,
                    command_status: self.command_status,
                    sequence_number: self.sequence_number,
                };
                header.encode(buf)?;

                if self.command_status != $crate::datatypes::CommandStatus::Ok {
                    return Ok(());
                }

                $crate::codec::encode_cstring(buf, &self.system_id, MAX_SYSTEM_ID_LENGTH);
                if let Some(version) = self.sc_interface_version {
                    Tlv::new(TAG_SC_INTERFACE_VERSION, vec![version]).encode(buf);
                }
                Ok(())
            }
        }
    };
}

pub(crate) use {
    define_bind_pdu, impl_complete_header_only_pdu, impl_header_only_constructors,
    impl_header_only_pdu,
};
