// ABOUTME: Type of Number and Numbering Plan Indicator values used in SMPP addresses
// ABOUTME: Unknown wire values decode leniently to Unknown instead of failing the PDU

use num_enum::TryFromPrimitive;

#[derive(TryFromPrimitive, Copy, Clone, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TypeOfNumber {
    #[default]
    Unknown = 0x00,
    International = 0x01,
    National = 0x02,
    NetworkSpecific = 0x03,
    SubscriberNumber = 0x04,
    Alphanumeric = 0x05,
    Abbreviated = 0x06,
}

impl TypeOfNumber {
    pub fn from_wire(value: u8) -> Self {
        Self::try_from(value).unwrap_or(Self::Unknown)
    }

    /// Best guess for an outbound address: alphanumeric sender IDs and
    /// E.164 numbers get their own TON, everything else stays Unknown.
    pub fn for_address(addr: &str) -> Self {
        if addr.is_empty() {
            Self::Unknown
        } else if addr.chars().any(|c| c.is_ascii_alphabetic()) {
            Self::Alphanumeric
        } else if addr.starts_with('+') || addr.len() > 8 {
            Self::International
        } else {
            Self::Unknown
        }
    }
}

#[derive(TryFromPrimitive, Copy, Clone, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NumericPlanIndicator {
    #[default]
    Unknown = 0x00,
    Isdn = 0x01,
    Data = 0x03,
    Telex = 0x04,
    LandMobile = 0x06,
    National = 0x08,
    Private = 0x09,
    Ermes = 0x0A,
    Internet = 0x0E,
    WapClientId = 0x12,
}

impl NumericPlanIndicator {
    pub fn from_wire(value: u8) -> Self {
        Self::try_from(value).unwrap_or(Self::Unknown)
    }

    pub fn for_ton(ton: TypeOfNumber) -> Self {
        match ton {
            TypeOfNumber::International | TypeOfNumber::National => Self::Isdn,
            _ => Self::Unknown,
        }
    }
}
