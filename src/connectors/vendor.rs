// ABOUTME: VendorConnector: one persistent transceiver bind to an upstream SMS vendor
// ABOUTME: Public connect/send/disconnect/health surface over the owned session task

use crate::codec::Frame;
use crate::connectors::session::{self, LinkState};
use crate::connectors::settings::SessionSettings;
use crate::connectors::DlrHandler;
use crate::datatypes::{
    NumericPlanIndicator, REGISTERED_DELIVERY_RECEIPT, ShortMessageBody, SubmitSm, TypeOfNumber,
};
use crate::error::{GatewayError, Result};
use crate::models::{ConnectionStatus, ConnectorHealth, Message, Vendor};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

/// How long `disconnect` waits for the session task before aborting it
const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Persistent outbound SMPP bind to one vendor.
///
/// After a successful [`connect`](VendorConnector::connect) an owned session
/// task keeps the link alive, answers the vendor and rebinds after link loss.
/// Only [`disconnect`](VendorConnector::disconnect) stops it.
pub struct VendorConnector {
    state: Arc<LinkState>,
    running: Mutex<Option<RunningSession>>,
    // Serialises connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
}

impl VendorConnector {
    pub fn new(vendor: Vendor) -> Self {
        Self::with_settings(vendor, SessionSettings::default())
    }

    pub fn with_settings(vendor: Vendor, settings: SessionSettings) -> Self {
        Self {
            state: Arc::new(LinkState::new(vendor, settings)),
            running: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn vendor(&self) -> &Vendor {
        &self.state.vendor
    }

    pub fn id(&self) -> &str {
        &self.state.vendor.id
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn set_dlr_handler(&self, handler: Arc<dyn DlrHandler>) {
        *self.state.dlr_handler.write() = Some(handler);
    }

    pub fn has_dlr_handler(&self) -> bool {
        self.state.dlr_handler.read().is_some()
    }

    /// Dial and bind; a no-op when already connected.
    ///
    /// On failure `last_error` is recorded and the connector stays
    /// disconnected. A rebind loop left over from an earlier link is replaced.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.stop_session().await;

        let vendor = &self.state.vendor;
        info!(vendor = %vendor.instance_name, host = %vendor.host, port = vendor.port, "Connecting to vendor SMPP server");
        info!(
            smsc = %vendor.address(),
            system_id = %vendor.username,
            password = %mask_password(&vendor.password),
            system_type = %vendor.system_type,
            bind_type = "transceiver",
            tls_enabled = vendor.use_tls,
            "SMPP bind request parameters"
        );

        let (reader, writer) = match session::open(&self.state).await {
            Ok(halves) => halves,
            Err(e) => {
                self.state.record_error(&e);
                error!(
                    vendor = %vendor.instance_name,
                    system_id = %vendor.username,
                    error = %e,
                    "SMPP bind failed"
                );
                return Err(e);
            }
        };
        self.state.attach(writer).await;

        let cancel = CancellationToken::new();
        let span = info_span!("vendor_session", vendor = %vendor.instance_name);
        let handle = tokio::spawn(
            session::run(self.state.clone(), reader, cancel.clone()).instrument(span),
        );
        *self.running.lock() = Some(RunningSession { cancel, handle });

        info!(vendor = %vendor.instance_name, "Successfully bound to vendor");
        Ok(())
    }

    /// A fresh gateway vendor message ID, `{instance_name}-{unix_nanos}`
    pub fn issue_message_id(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{}-{}", self.state.vendor.instance_name, nanos)
    }

    /// Submit a message and wait for the vendor's submit_sm_resp.
    ///
    /// Returns the gateway's vendor message ID: `message.vendor_msg_id` when
    /// already set, otherwise a freshly issued one. The vendor's own ID is
    /// correlated with it as the response is read, so receipts carrying the
    /// vendor's ID are reported under the returned ID.
    pub async fn send(&self, message: &Message) -> Result<String> {
        if !self.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        self.state.messages_sent.fetch_add(1, Ordering::Relaxed);

        let vendor_msg_id = if message.vendor_msg_id.is_empty() {
            self.issue_message_id()
        } else {
            message.vendor_msg_id.clone()
        };

        let sequence_number = self.state.next_sequence();
        let frame = Frame::SubmitSm(Box::new(SubmitSm::new(
            sequence_number,
            submit_body(message),
        )));

        let response = self.state.expect_response(sequence_number, &vendor_msg_id);
        let result = self.submit(&frame, response).await;
        self.state.forget_response(sequence_number);

        let vendor = &self.state.vendor;
        match result {
            Ok(real_id) => {
                self.state.messages_success.fetch_add(1, Ordering::Relaxed);
                info!(
                    vendor = %vendor.instance_name,
                    msg_id = %message.id,
                    vendor_msg_id = %vendor_msg_id,
                    smsc_msg_id = %real_id,
                    "Message submitted to vendor"
                );
                Ok(vendor_msg_id)
            }
            Err(e) => {
                self.state.messages_failed.fetch_add(1, Ordering::Relaxed);
                self.state.record_error(&e);
                error!(
                    vendor = %vendor.instance_name,
                    msg_id = %message.id,
                    error = %e,
                    "Failed to submit message to vendor"
                );
                Err(e)
            }
        }
    }

    async fn submit(
        &self,
        frame: &Frame,
        response: tokio::sync::oneshot::Receiver<session::SubmitOutcome>,
    ) -> Result<String> {
        self.state.write_frame(frame).await?;
        match tokio::time::timeout(self.state.settings.response_timeout, response).await? {
            Ok(Ok(message_id)) => Ok(message_id),
            Ok(Err(status)) => Err(GatewayError::Protocol(status)),
            Err(_) => Err(GatewayError::ConnectionClosed),
        }
    }

    /// Stop the session task, send a best-effort unbind and mark disconnected.
    ///
    /// Safe to call repeatedly and concurrently.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let was_running = self.stop_session().await;
        let was_connected = self.is_connected();
        self.state.detach(true).await;
        if was_running || was_connected {
            info!(vendor = %self.state.vendor.instance_name, "Disconnected from vendor");
        }
        Ok(())
    }

    async fn stop_session(&self) -> bool {
        let running = self.running.lock().take();
        let Some(mut running) = running else {
            return false;
        };
        running.cancel.cancel();
        if tokio::time::timeout(SESSION_STOP_TIMEOUT, &mut running.handle)
            .await
            .is_err()
        {
            warn!(vendor = %self.state.vendor.instance_name, "Session task did not stop in time; aborting");
            running.handle.abort();
        }
        true
    }

    pub fn health(&self) -> ConnectorHealth {
        let state = &self.state;
        ConnectorHealth {
            vendor_id: state.vendor.id.clone(),
            vendor_name: state.vendor.instance_name.clone(),
            status: if state.is_connected() {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            },
            connected_at: *state.connected_at.lock(),
            last_error: state.last_error.lock().clone(),
            messages_sent: state.messages_sent.load(Ordering::Relaxed),
            messages_success: state.messages_success.load(Ordering::Relaxed),
            messages_failed: state.messages_failed.load(Ordering::Relaxed),
            dlrs_received: state.dlrs_received.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for VendorConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorConnector")
            .field("vendor", &self.state.vendor.instance_name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// submit_sm body for a message: international E.164 addressing and a
/// delivery receipt request
fn submit_body(message: &Message) -> ShortMessageBody {
    let coding = message.encoding.data_coding();
    let mut body = ShortMessageBody::new(&message.source_addr, &message.dest_addr, Bytes::new());
    body.source_addr_ton = TypeOfNumber::International;
    body.source_addr_npi = NumericPlanIndicator::Isdn;
    body.dest_addr_ton = TypeOfNumber::International;
    body.dest_addr_npi = NumericPlanIndicator::Isdn;
    body.data_coding = coding.to_byte();
    body.registered_delivery = REGISTERED_DELIVERY_RECEIPT;
    body.set_payload(coding.encode(&message.content));
    body
}

/// Mask a bind password for logs: first two and last two characters only
pub fn mask_password(password: &str) -> String {
    let chars: Vec<char> = password.chars().collect();
    match chars.len() {
        0 => "<empty>".to_string(),
        1..=4 => "***".to_string(),
        n => {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[n - 2..].iter().collect();
            format!("{head}****{tail}")
        }
    }
}
