// ABOUTME: Delivery receipt tracking: stores submitted messages and applies receipts to them
// ABOUTME: Redis-backed tracker with a seven day TTL, plus an in-memory tracker for tests

use crate::error::{GatewayError, Result};
use crate::models::{DeliveryReceipt, Message, MessageStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MESSAGE_KEY_PREFIX: &str = "msg:";
const DLR_KEY_PREFIX: &str = "dlr:msg:";
const VENDOR_INDEX_PREFIX: &str = "msg:vendor:";

/// Receipts may rewrite a message concurrently with `mark_sent`
const MARK_SENT_ATTEMPTS: usize = 3;

/// SET KEYS[1] to ARGV[2] only while it still holds ARGV[1]
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
"#;

/// How long message and receipt records are kept
pub const DLR_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Correlates delivery receipts with the messages they report on
#[async_trait]
pub trait DlrTracker: Send + Sync {
    /// Track a message. A `vendor_msg_id` already set on it is indexed
    /// too, so receipts can match before [`mark_sent`](DlrTracker::mark_sent).
    async fn store_message(&self, message: &Message) -> Result<()>;

    /// Record the vendor message ID once the vendor accepted the message.
    ///
    /// A status already set by a receipt is kept.
    async fn mark_sent(&self, message_id: &str, vendor_msg_id: &str) -> Result<()>;

    /// Apply a receipt to its message.
    ///
    /// `dlr.message_id` may be either the gateway ID or the vendor message ID.
    /// Returns the updated message, or `None` when nothing correlates.
    async fn handle_dlr(&self, dlr: &DeliveryReceipt) -> Result<Option<Message>>;

    /// Current state of a message by gateway ID or vendor message ID
    async fn message_status(&self, id: &str) -> Result<Option<Message>>;

    /// Last receipt recorded for a message, by gateway ID
    async fn dlr(&self, message_id: &str) -> Result<Option<DeliveryReceipt>>;
}

#[derive(Default)]
struct TrackerState {
    messages: HashMap<String, Message>,
    vendor_index: HashMap<String, String>,
    dlrs: HashMap<String, DeliveryReceipt>,
}

impl TrackerState {
    fn resolve(&self, id: &str) -> Option<String> {
        if let Some(message_id) = self.vendor_index.get(id) {
            return Some(message_id.clone());
        }
        self.messages.contains_key(id).then(|| id.to_string())
    }
}

/// Tracker kept in process memory. Records never expire.
#[derive(Default)]
pub struct MemoryDlrTracker {
    state: Mutex<TrackerState>,
}

impl MemoryDlrTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DlrTracker for MemoryDlrTracker {
    async fn store_message(&self, message: &Message) -> Result<()> {
        let mut state = self.state.lock();
        if !message.vendor_msg_id.is_empty() {
            state
                .vendor_index
                .insert(message.vendor_msg_id.clone(), message.id.clone());
        }
        state.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn mark_sent(&self, message_id: &str, vendor_msg_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let Some(message) = state.messages.get_mut(message_id) else {
            debug!(msg_id = %message_id, "Message not tracked; nothing to mark sent");
            return Ok(());
        };
        message.vendor_msg_id = vendor_msg_id.to_string();
        if !message.status.is_final() {
            message.status = MessageStatus::Sent;
        }
        state
            .vendor_index
            .insert(vendor_msg_id.to_string(), message_id.to_string());
        Ok(())
    }

    async fn handle_dlr(&self, dlr: &DeliveryReceipt) -> Result<Option<Message>> {
        let mut state = self.state.lock();
        let Some(message_id) = state.resolve(&dlr.message_id) else {
            warn!(msg_id = %dlr.message_id, "Message not found for DLR (may have expired)");
            return Ok(None);
        };

        let updated = match state.messages.get_mut(&message_id) {
            Some(message) => {
                message.apply_receipt(dlr);
                message.clone()
            }
            None => return Ok(None),
        };
        state.dlrs.insert(message_id, dlr.clone());
        Ok(Some(updated))
    }

    async fn message_status(&self, id: &str) -> Result<Option<Message>> {
        let state = self.state.lock();
        Ok(state
            .resolve(id)
            .and_then(|message_id| state.messages.get(&message_id).cloned()))
    }

    async fn dlr(&self, message_id: &str) -> Result<Option<DeliveryReceipt>> {
        Ok(self.state.lock().dlrs.get(message_id).cloned())
    }
}

/// Tracker persisted in Redis as JSON under `msg:{id}` and `dlr:msg:{id}`,
/// with the vendor message ID index at `msg:vendor:{vendor_msg_id}`
pub struct RedisDlrTracker {
    connection_manager: redis::aio::ConnectionManager,
    ttl: Duration,
}

impl RedisDlrTracker {
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GatewayError::Tracker(format!("Failed to create Redis client: {e}")))?;
        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                GatewayError::Tracker(format!("Failed to create Redis connection manager: {e}"))
            })?;
        Ok(Self::from_manager(connection_manager))
    }

    pub fn from_manager(connection_manager: redis::aio::ConnectionManager) -> Self {
        Self {
            connection_manager,
            ttl: DLR_TTL,
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(tracker_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(tracker_error)
    }

    /// Replace `key` with `new` unless it changed since it was read as `current`
    async fn compare_and_set(&self, key: &str, current: &str, new: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let swapped: i64 = redis::Script::new(COMPARE_AND_SET)
            .key(key)
            .arg(current)
            .arg(new)
            .arg(self.ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(tracker_error)?;
        Ok(swapped == 1)
    }

    async fn load(&self, message_id: &str) -> Result<Option<Message>> {
        match self.get(&format!("{MESSAGE_KEY_PREFIX}{message_id}")).await? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, message: &Message) -> Result<()> {
        let data = serde_json::to_string(message)?;
        self.set(&format!("{MESSAGE_KEY_PREFIX}{}", message.id), &data)
            .await
    }

    /// Gateway ID for an ID that may be either kind
    async fn resolve(&self, id: &str) -> Result<Option<Message>> {
        if let Some(message_id) = self.get(&format!("{VENDOR_INDEX_PREFIX}{id}")).await? {
            if let Some(message) = self.load(&message_id).await? {
                return Ok(Some(message));
            }
        }
        self.load(id).await
    }
}

#[async_trait]
impl DlrTracker for RedisDlrTracker {
    async fn store_message(&self, message: &Message) -> Result<()> {
        self.save(message).await?;
        if !message.vendor_msg_id.is_empty() {
            self.set(
                &format!("{VENDOR_INDEX_PREFIX}{}", message.vendor_msg_id),
                &message.id,
            )
            .await?;
        }
        debug!(
            msg_id = %message.id,
            vendor_id = %message.vendor_id,
            customer_id = %message.customer_id,
            "Message stored for DLR tracking"
        );
        Ok(())
    }

    async fn mark_sent(&self, message_id: &str, vendor_msg_id: &str) -> Result<()> {
        let key = format!("{MESSAGE_KEY_PREFIX}{message_id}");
        for _ in 0..MARK_SENT_ATTEMPTS {
            let Some(current) = self.get(&key).await? else {
                debug!(msg_id = %message_id, "Message not tracked; nothing to mark sent");
                return Ok(());
            };
            let mut message: Message = serde_json::from_str(&current)?;
            if message.vendor_msg_id != vendor_msg_id {
                self.set(&format!("{VENDOR_INDEX_PREFIX}{vendor_msg_id}"), message_id)
                    .await?;
            }
            if message.status.is_final() && message.vendor_msg_id == vendor_msg_id {
                return Ok(());
            }

            message.vendor_msg_id = vendor_msg_id.to_string();
            if !message.status.is_final() {
                message.status = MessageStatus::Sent;
            }
            let updated = serde_json::to_string(&message)?;
            if self.compare_and_set(&key, &current, &updated).await? {
                return Ok(());
            }
            debug!(msg_id = %message_id, "Message changed while marking sent; retrying");
        }
        Err(GatewayError::Tracker(format!(
            "message {message_id} kept changing while marking sent"
        )))
    }

    async fn handle_dlr(&self, dlr: &DeliveryReceipt) -> Result<Option<Message>> {
        let Some(mut message) = self.resolve(&dlr.message_id).await? else {
            warn!(
                msg_id = %dlr.message_id,
                vendor_msg_id = %dlr.vendor_msg_id,
                "Message not found for DLR (may have expired)"
            );
            return Ok(None);
        };

        message.apply_receipt(dlr);
        self.save(&message).await?;

        let dlr_data = serde_json::to_string(dlr)?;
        if let Err(e) = self
            .set(&format!("{DLR_KEY_PREFIX}{}", message.id), &dlr_data)
            .await
        {
            error!(msg_id = %message.id, error = %e, "Failed to store DLR");
        }

        info!(
            msg_id = %message.id,
            status = %dlr.status,
            final_status = ?message.status,
            "DLR processed and message updated"
        );
        Ok(Some(message))
    }

    async fn message_status(&self, id: &str) -> Result<Option<Message>> {
        self.resolve(id).await
    }

    async fn dlr(&self, message_id: &str) -> Result<Option<DeliveryReceipt>> {
        match self.get(&format!("{DLR_KEY_PREFIX}{message_id}")).await? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

fn tracker_error(err: redis::RedisError) -> GatewayError {
    GatewayError::Tracker(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Encoding;

    fn message() -> Message {
        let mut message = Message::new("acme", "15550001", "15550002", "hi".to_string(), Encoding::Gsm7);
        message.registered_delivery = 1;
        message
    }

    #[tokio::test]
    async fn test_receipt_by_vendor_id_updates_message() {
        let tracker = MemoryDlrTracker::new();
        let message = message();
        tracker.store_message(&message).await.unwrap();
        tracker.mark_sent(&message.id, "sinch-1").await.unwrap();

        let sent = tracker.message_status("sinch-1").await.unwrap().unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);

        let dlr = DeliveryReceipt::new("sinch-1", "DELIVRD", "000");
        let updated = tracker.handle_dlr(&dlr).await.unwrap().unwrap();
        assert_eq!(updated.id, message.id);
        assert_eq!(updated.status, MessageStatus::Delivered);
        assert_eq!(updated.dlr_status, "DELIVRD");
        assert!(updated.delivered_at.is_some());

        let stored = tracker.dlr(&message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "DELIVRD");
    }

    #[tokio::test]
    async fn test_receipt_by_gateway_id() {
        let tracker = MemoryDlrTracker::new();
        let message = message();
        tracker.store_message(&message).await.unwrap();

        let dlr = DeliveryReceipt::new(&message.id, "UNDELIV", "034");
        let updated = tracker.handle_dlr(&dlr).await.unwrap().unwrap();
        assert_eq!(updated.status, MessageStatus::Failed);
        assert_eq!(updated.failure_reason, "Vendor error: 034");
    }

    #[tokio::test]
    async fn test_uncorrelated_receipt_is_none() {
        let tracker = MemoryDlrTracker::new();
        let dlr = DeliveryReceipt::new("nobody", "DELIVRD", "000");
        assert!(tracker.handle_dlr(&dlr).await.unwrap().is_none());
        assert!(tracker.message_status("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receipt_before_mark_sent_matches_issued_id() {
        let tracker = MemoryDlrTracker::new();
        let mut message = message();
        message.vendor_msg_id = "sinch-east-42".to_string();
        tracker.store_message(&message).await.unwrap();

        let dlr = DeliveryReceipt::new("sinch-east-42", "DELIVRD", "000");
        let updated = tracker.handle_dlr(&dlr).await.unwrap().unwrap();
        assert_eq!(updated.id, message.id);

        tracker.mark_sent(&message.id, "sinch-east-42").await.unwrap();
        let current = tracker.message_status(&message.id).await.unwrap().unwrap();
        assert_eq!(current.status, MessageStatus::Delivered);
        assert_eq!(current.vendor_msg_id, "sinch-east-42");
    }

    #[tokio::test]
    async fn test_mark_sent_untracked_is_noop() {
        let tracker = MemoryDlrTracker::new();
        tracker.mark_sent("missing", "v-1").await.unwrap();
        assert!(tracker.is_empty());
    }
}
