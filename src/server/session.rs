// ABOUTME: A bound customer session: identity, outbound sequence numbers and the DLR queue
// ABOUTME: Builds the receipt deliver_sm that carries a vendor DLR back to the customer

use crate::codec::Frame;
use crate::connection::FrameWriter;
use crate::datatypes::{
    DataCoding, DeliverSm, ESM_CLASS_DELIVERY_RECEIPT, ShortMessageBody, TAG_MESSAGE_STATE,
    TAG_RECEIPTED_MESSAGE_ID, Tlv,
};
use crate::error::{GatewayError, Result};
use crate::models::{BindType, DeliveryReceipt, MessageStatus};
use crate::transport::Stream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::WriteHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receipts buffered per receive-capable session before enqueueing fails
pub const DLR_QUEUE_CAPACITY: usize = 100;

/// Upper bound on a single PDU write to a customer
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub type SessionWriter = FrameWriter<WriteHalf<Stream>>;

/// Write half shared by a connection's read loop and its DLR delivery task
pub type SharedWriter = Arc<tokio::sync::Mutex<SessionWriter>>;

/// Write one PDU under the shared writer lock, bounded by [`WRITE_TIMEOUT`]
pub async fn write_shared(writer: &SharedWriter, frame: &Frame) -> Result<()> {
    let mut writer = writer.lock().await;
    tokio::time::timeout(WRITE_TIMEOUT, writer.write_frame(frame)).await??;
    Ok(())
}

pub struct Session {
    pub id: String,
    pub system_id: String,
    pub customer_id: String,
    pub bind_type: BindType,
    pub remote_addr: String,
    pub bound_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    sequence: AtomicU32,
    writer: SharedWriter,
    dlr_tx: Option<mpsc::Sender<DeliveryReceipt>>,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session for a successful bind.
    ///
    /// Receive-capable binds also get the receiving end of their DLR queue.
    /// `cancel` is the connection's token: cancelling the session closes it.
    pub fn new(
        system_id: &str,
        bind_type: BindType,
        remote_addr: &str,
        writer: SharedWriter,
        cancel: CancellationToken,
    ) -> (Self, Option<mpsc::Receiver<DeliveryReceipt>>) {
        let (dlr_tx, dlr_rx) = if bind_type.can_receive() {
            let (tx, rx) = mpsc::channel(DLR_QUEUE_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let now = Utc::now();
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            system_id: system_id.to_string(),
            customer_id: system_id.to_string(),
            bind_type,
            remote_addr: remote_addr.to_string(),
            bound_at: now,
            last_activity: Mutex::new(now),
            sequence: AtomicU32::new(0),
            writer,
            dlr_tx,
            cancel,
        };
        (session, dlr_rx)
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    /// Sequence number for a server-initiated PDU, never 0
    pub fn next_sequence(&self) -> u32 {
        let mut current = self.sequence.load(Ordering::Relaxed);
        loop {
            let next = if current >= 0x7FFF_FFFF { 1 } else { current + 1 };
            match self.sequence.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn can_receive(&self) -> bool {
        self.dlr_tx.is_some()
    }

    /// Enqueue a receipt without waiting
    pub fn queue_dlr(&self, dlr: DeliveryReceipt) -> Result<()> {
        let Some(tx) = &self.dlr_tx else {
            return Err(GatewayError::NoReceiverSession(self.customer_id.clone()));
        };
        tx.try_send(dlr).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => GatewayError::DlrQueueFull(self.customer_id.clone()),
            mpsc::error::TrySendError::Closed(_) => {
                GatewayError::NoReceiverSession(self.customer_id.clone())
            }
        })
    }

    /// Send one receipt to the customer as a deliver_sm
    pub async fn send_receipt(&self, dlr: &DeliveryReceipt) -> Result<()> {
        let deliver = receipt_deliver_sm(self.next_sequence(), dlr);
        write_shared(&self.writer, &Frame::DeliverSm(Box::new(deliver))).await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            system_id: self.system_id.clone(),
            customer_id: self.customer_id.clone(),
            bind_type: self.bind_type,
            remote_addr: self.remote_addr.clone(),
            bound_at: self.bound_at,
            last_activity: self.last_activity(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("system_id", &self.system_id)
            .field("bind_type", &self.bind_type)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub system_id: String,
    pub customer_id: String,
    pub bind_type: BindType,
    pub remote_addr: String,
    pub bound_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Receipt deliver_sm: the message ID travels as source_addr (truncated to
/// the address field), in the receipt text and in receipted_message_id.
pub fn receipt_deliver_sm(sequence_number: u32, dlr: &DeliveryReceipt) -> DeliverSm {
    let coding = DataCoding::SmscDefault;
    let mut body = ShortMessageBody::new(&dlr.message_id, "", Bytes::new());
    body.esm_class = ESM_CLASS_DELIVERY_RECEIPT;
    body.data_coding = coding.to_byte();
    body.set_payload(coding.encode(&dlr.format_text()));

    let state = MessageStatus::from_dlr_status(&dlr.status).message_state() as u8;
    body.tlvs.push(Tlv::cstring(TAG_RECEIPTED_MESSAGE_ID, &dlr.message_id));
    body.tlvs.push(Tlv::new(TAG_MESSAGE_STATE, vec![state]));

    DeliverSm::new(sequence_number, body)
}
