// ABOUTME: Domain types shared across the gateway: vendors, messages, delivery receipts, health
// ABOUTME: Includes delivery receipt text parsing/formatting and SMS segment counting

use crate::datatypes::{
    DataCoding, MessageState, ShortMessageBody, TAG_MESSAGE_STATE, TAG_NETWORK_ERROR_CODE,
    TAG_RECEIPTED_MESSAGE_ID, gsm7_septets,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SMPP bind mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindType {
    #[default]
    Transceiver,
    Transmitter,
    Receiver,
}

impl BindType {
    pub fn can_transmit(&self) -> bool {
        matches!(self, BindType::Transceiver | BindType::Transmitter)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, BindType::Transceiver | BindType::Receiver)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BindType::Transceiver => "transceiver",
            BindType::Transmitter => "transmitter",
            BindType::Receiver => "receiver",
        }
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transceiver" | "trx" => Ok(BindType::Transceiver),
            "transmitter" | "tx" => Ok(BindType::Transmitter),
            "receiver" | "rx" => Ok(BindType::Receiver),
            other => Err(format!("unknown bind type '{other}'")),
        }
    }
}

/// Upstream SMS provider reachable over SMPP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Vendor {
    pub id: String,
    pub instance_name: String,
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub bind_type: BindType,
    /// SMPP system_id; empty for IP-authenticated binds
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub system_type: String,
    /// Messages per second ceiling
    pub throughput: i64,
    pub priority: i32,
    pub is_primary: bool,
    pub is_active: bool,
}

impl Vendor {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Gsm7,
    Ucs2,
}

impl Encoding {
    /// UCS-2 when data_coding says so, GSM-7 for everything else
    pub fn from_data_coding(data_coding: u8) -> Self {
        if DataCoding::from_byte(data_coding).is_unicode() {
            Encoding::Ucs2
        } else {
            Encoding::Gsm7
        }
    }

    pub fn data_coding(&self) -> DataCoding {
        match self {
            Encoding::Gsm7 => DataCoding::SmscDefault,
            Encoding::Ucs2 => DataCoding::Ucs2,
        }
    }
}

/// Number of SMS parts needed for `content`.
///
/// GSM-7 fits 160 septets in one part and 153 per part when concatenated.
/// UCS-2 fits 70 code units, or 67 per concatenated part.
pub fn count_segments(content: &str, encoding: Encoding) -> u32 {
    let (length, single, multi) = match encoding {
        Encoding::Gsm7 => (gsm7_septets(content), 160, 153),
        Encoding::Ucs2 => (content.encode_utf16().count(), 70, 67),
    };
    if length <= single {
        1
    } else {
        length.div_ceil(multi) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Expired,
    Deleted,
    Failed,
    Accepted,
    Unknown,
    Rejected,
}

impl MessageStatus {
    /// Map a receipt `stat:` value onto the message lifecycle
    pub fn from_dlr_status(stat: &str) -> Self {
        match stat.trim().to_uppercase().as_str() {
            "DELIVRD" => MessageStatus::Delivered,
            "EXPIRED" => MessageStatus::Expired,
            "DELETED" => MessageStatus::Deleted,
            "UNDELIV" => MessageStatus::Failed,
            "ACCEPTD" => MessageStatus::Accepted,
            "UNKNOWN" => MessageStatus::Unknown,
            "REJECTD" => MessageStatus::Rejected,
            _ => MessageStatus::Pending,
        }
    }

    pub fn message_state(&self) -> MessageState {
        match self {
            MessageStatus::Pending | MessageStatus::Sent => MessageState::Enroute,
            MessageStatus::Delivered => MessageState::Delivered,
            MessageStatus::Expired => MessageState::Expired,
            MessageStatus::Deleted => MessageState::Deleted,
            MessageStatus::Failed => MessageState::Undeliverable,
            MessageStatus::Accepted => MessageState::Accepted,
            MessageStatus::Unknown => MessageState::Unknown,
            MessageStatus::Rejected => MessageState::Rejected,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, MessageStatus::Pending | MessageStatus::Sent)
    }
}

/// One outbound SMS accepted from a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub source_addr: String,
    pub dest_addr: String,
    pub content: String,
    pub encoding: Encoding,
    pub customer_id: String,
    pub vendor_id: String,
    /// Identifier returned to the customer once the vendor accepted the message
    pub vendor_msg_id: String,
    pub status: MessageStatus,
    pub dlr_status: String,
    pub segments: u32,
    pub registered_delivery: u8,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,
}

impl Message {
    pub fn new(
        customer_id: &str,
        source_addr: &str,
        dest_addr: &str,
        content: String,
        encoding: Encoding,
    ) -> Self {
        let segments = count_segments(&content, encoding);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_addr: source_addr.to_string(),
            dest_addr: dest_addr.to_string(),
            content,
            encoding,
            customer_id: customer_id.to_string(),
            vendor_id: String::new(),
            vendor_msg_id: String::new(),
            status: MessageStatus::Pending,
            dlr_status: String::new(),
            segments,
            registered_delivery: 0,
            submitted_at: Utc::now(),
            delivered_at: None,
            failure_reason: String::new(),
        }
    }

    /// Build from a customer's submit_sm body
    pub fn from_submit(customer_id: &str, body: &ShortMessageBody) -> Self {
        let encoding = Encoding::from_data_coding(body.data_coding);
        let mut message = Message::new(
            customer_id,
            &body.source_addr,
            &body.destination_addr,
            body.text(),
            encoding,
        );
        message.registered_delivery = body.registered_delivery;
        message
    }

    /// Apply a receipt outcome
    pub fn apply_receipt(&mut self, dlr: &DeliveryReceipt) {
        self.dlr_status = dlr.status.clone();
        self.status = MessageStatus::from_dlr_status(&dlr.status);
        if self.status == MessageStatus::Delivered {
            self.delivered_at = Some(dlr.done_date.unwrap_or(dlr.received_at));
        }
        if !dlr.error_code.is_empty() && dlr.error_code != "000" {
            self.failure_reason = format!("Vendor error: {}", dlr.error_code);
        }
    }
}

/// Delivery receipt reported by a vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// ID known to the customer
    pub message_id: String,
    /// ID assigned by the vendor
    pub vendor_msg_id: String,
    /// `stat:` value such as DELIVRD or UNDELIV
    pub status: String,
    pub error_code: String,
    pub submit_date: Option<DateTime<Utc>>,
    pub done_date: Option<DateTime<Utc>>,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

const RECEIPT_KEYS: [&str; 8] = [
    "id:",
    "sub:",
    "dlvrd:",
    "submit date:",
    "done date:",
    "stat:",
    "err:",
    "text:",
];

impl DeliveryReceipt {
    pub fn new(message_id: &str, status: &str, error_code: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            vendor_msg_id: message_id.to_string(),
            status: status.to_string(),
            error_code: error_code.to_string(),
            submit_date: None,
            done_date: None,
            text: String::new(),
            received_at: Utc::now(),
        }
    }

    /// Parse the conventional receipt text
    /// `id:<id> sub:<n> dlvrd:<n> submit date:<YYMMDDhhmm> done date:<YYMMDDhhmm> stat:<STAT> err:<ERR> text:<...>`.
    ///
    /// Returns `None` when neither `id:` nor `stat:` is present.
    pub fn parse(text: &str) -> Option<Self> {
        let id = receipt_field(text, "id:");
        let stat = receipt_field(text, "stat:");
        if id.is_none() && stat.is_none() {
            return None;
        }

        let message_id = id.unwrap_or_default().to_string();
        Some(Self {
            vendor_msg_id: message_id.clone(),
            message_id,
            status: stat.unwrap_or_default().to_uppercase(),
            error_code: receipt_field(text, "err:").unwrap_or("000").to_string(),
            submit_date: receipt_field(text, "submit date:").and_then(parse_receipt_date),
            done_date: receipt_field(text, "done date:").and_then(parse_receipt_date),
            text: text.to_string(),
            received_at: Utc::now(),
        })
    }

    /// Build from an inbound deliver_sm flagged as a receipt, falling back to
    /// the receipted_message_id and message_state TLVs for missing fields.
    pub fn from_deliver_sm(body: &ShortMessageBody) -> Option<Self> {
        let text = body.text();
        let mut dlr = Self::parse(&text).unwrap_or_else(|| Self::new("", "", "000"));
        dlr.text = text;

        if dlr.message_id.is_empty() {
            if let Some(tlv) = body.tlv(TAG_RECEIPTED_MESSAGE_ID) {
                dlr.message_id = tlv.as_string();
                dlr.vendor_msg_id = dlr.message_id.clone();
            }
        }
        if dlr.status.is_empty() {
            if let Some(state) = body.tlv(TAG_MESSAGE_STATE).and_then(|t| t.as_u8()) {
                dlr.status = stat_for_message_state(state).to_string();
            }
        }
        if dlr.error_code == "000" {
            if let Some(tlv) = body.tlv(TAG_NETWORK_ERROR_CODE) {
                // network_error_code: type(1) + code(2)
                if tlv.value.len() == 3 {
                    let code = u16::from_be_bytes([tlv.value[1], tlv.value[2]]);
                    dlr.error_code = format!("{code:03}");
                }
            }
        }

        if dlr.message_id.is_empty() {
            None
        } else {
            Some(dlr)
        }
    }

    /// Customer-facing receipt text in the conventional layout
    pub fn format_text(&self) -> String {
        let submit = self.submit_date.unwrap_or(self.received_at);
        let done = self.done_date.unwrap_or(self.received_at);
        let delivered = if self.status == "DELIVRD" { "001" } else { "000" };
        format!(
            "id:{} sub:001 dlvrd:{} submit date:{} done date:{} stat:{} err:{}",
            self.message_id,
            delivered,
            submit.format("%y%m%d%H%M"),
            done.format("%y%m%d%H%M"),
            self.status,
            self.error_code,
        )
    }
}

fn receipt_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;
    let start = loop {
        let pos = search_from + lower[search_from..].find(key)?;
        // Keys must start a token: "submit date:" must not match "date:" etc.
        if pos == 0 || lower.as_bytes()[pos - 1] == b' ' {
            break pos + key.len();
        }
        search_from = pos + key.len();
    };

    let rest = &text[start..];
    if key == "text:" {
        return Some(rest);
    }

    let end = RECEIPT_KEYS
        .iter()
        .filter_map(|k| lower[start..].find(&format!(" {k}")))
        .min()
        .unwrap_or(rest.len());
    let value = rest[..end].trim();
    let value = value.split_whitespace().next().unwrap_or("");
    Some(value)
}

fn parse_receipt_date(raw: &str) -> Option<DateTime<Utc>> {
    let format = match raw.len() {
        10 => "%y%m%d%H%M",
        12 => "%y%m%d%H%M%S",
        _ => return None,
    };
    NaiveDateTime::parse_from_str(raw, format)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn stat_for_message_state(state: u8) -> &'static str {
    match MessageState::try_from(state) {
        Ok(MessageState::Enroute) => "ENROUTE",
        Ok(MessageState::Delivered) => "DELIVRD",
        Ok(MessageState::Expired) => "EXPIRED",
        Ok(MessageState::Deleted) => "DELETED",
        Ok(MessageState::Undeliverable) => "UNDELIV",
        Ok(MessageState::Accepted) => "ACCEPTD",
        Ok(MessageState::Rejected) => "REJECTD",
        Ok(MessageState::Unknown) | Err(_) => "UNKNOWN",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Point-in-time view of a vendor connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorHealth {
    pub vendor_id: String,
    pub vendor_name: String,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    pub messages_sent: u64,
    pub messages_success: u64,
    pub messages_failed: u64,
    pub dlrs_received: u64,
}
