use num_enum::TryFromPrimitive;

/// command_status values returned in response headers.
///
/// Codes outside this table decode as `UnknownError`.
#[derive(TryFromPrimitive, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandStatus {
    Ok = 0x0000_0000,
    InvalidMsgLength = 0x0000_0001,
    InvalidCommandLength = 0x0000_0002,
    InvalidCommandId = 0x0000_0003,
    /// ESME_RINVBNDSTS: command not allowed in the current bind state
    IncorrectBindStatus = 0x0000_0004,
    /// ESME_RALYBND
    AlreadyBoundState = 0x0000_0005,
    InvalidPriorityFlag = 0x0000_0006,
    InvalidRegisteredDeliveryFlag = 0x0000_0007,
    /// ESME_RSYSERR
    SystemError = 0x0000_0008,
    InvalidSourceAddress = 0x0000_000A,
    InvalidDestinationAddress = 0x0000_000B,
    InvalidMessageId = 0x0000_000C,
    BindFailed = 0x0000_000D,
    /// ESME_RINVPASWD
    InvalidPassword = 0x0000_000E,
    InvalidSystemId = 0x0000_000F,
    CancelSmFailed = 0x0000_0011,
    ReplaceSmFailed = 0x0000_0013,
    MessageQueueFull = 0x0000_0014,
    InvalidServiceType = 0x0000_0015,
    InvalidEsmClassFieldData = 0x0000_0043,
    /// ESME_RSUBMITFAIL
    SubmitFailed = 0x0000_0045,
    InvalidSourceAddressTon = 0x0000_0048,
    InvalidSourceAddressNpi = 0x0000_0049,
    InvalidDestinationAddressTon = 0x0000_0050,
    InvalidDestinationAddressNpi = 0x0000_0051,
    InvalidSystemTypeField = 0x0000_0053,
    /// ESME_RTHROTTLED
    ThrottlingError = 0x0000_0058,
    InvalidScheduledDeliveryTime = 0x0000_0061,
    InvalidExpiryTime = 0x0000_0062,
    ReceiverTemporaryAppError = 0x0000_0064,
    ReceiverPermanentAppError = 0x0000_0065,
    ReceiverRejectMessageError = 0x0000_0066,
    /// ESME_RQUERYFAIL
    QuerySmRequestFailed = 0x0000_0067,
    ErrorInOptionalPartOfPduBody = 0x0000_00C0,
    OptionalParameterNotAllowed = 0x0000_00C1,
    InvalidParameterLength = 0x0000_00C2,
    ExpectedOptionalParameterMissing = 0x0000_00C3,
    InvalidOptionalParameterValue = 0x0000_00C4,
    DeliveryFailed = 0x0000_00FE,
    UnknownError = 0x0000_00FF,
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        *self == CommandStatus::Ok
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({:#010x})", self, *self as u32)
    }
}
