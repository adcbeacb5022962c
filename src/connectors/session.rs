// ABOUTME: Owned outbound SMPP session to one vendor: dial, bind_transceiver, read loop, rebind
// ABOUTME: Holds the shared link state the connector reads from (writer, pending responses, counters)

use crate::codec::Frame;
use crate::connection::{Connection, FrameReader, FrameWriter};
use crate::connectors::settings::SessionSettings;
use crate::connectors::DlrHandler;
use crate::datatypes::{
    BindTransceiver, CommandStatus, DeliverSmResponse, EnquireLink, EnquireLinkResponse,
    ShortMessageBody, Unbind, UnbindResponse,
};
use crate::error::{GatewayError, Result};
use crate::models::{DeliveryReceipt, Vendor};
use crate::tls;
use crate::transport::Stream;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) type VendorReader = FrameReader<ReadHalf<Stream>>;
pub(crate) type VendorWriter = FrameWriter<WriteHalf<Stream>>;

/// Outcome delivered to a `send` waiting on its submit_sm_resp
pub(crate) type SubmitOutcome = std::result::Result<String, CommandStatus>;

/// Real vendor message IDs kept for DLR correlation
const CORRELATION_CAPACITY: usize = 100_000;

/// Highest sequence number handed out before wrapping back to 1
const MAX_SEQUENCE: u32 = 0x7FFF_FFFF;

/// Maps the vendor's own message ID to the ID the customer was given.
///
/// Bounded; the oldest mapping is evicted first.
#[derive(Debug, Default)]
pub(crate) struct IdCorrelation {
    ids: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl IdCorrelation {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn insert(&mut self, vendor_msg_id: String, gateway_id: String) {
        if self.ids.insert(vendor_msg_id.clone(), gateway_id).is_none() {
            self.order.push_back(vendor_msg_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub(crate) fn resolve(&self, vendor_msg_id: &str) -> Option<&String> {
        self.ids.get(vendor_msg_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

/// A `send` waiting on its submit_sm_resp
struct PendingSubmit {
    waiter: oneshot::Sender<SubmitOutcome>,
    /// Gateway ID the vendor's message ID is correlated with on success
    vendor_msg_id: String,
}

/// State shared between a `VendorConnector` and its session task
pub(crate) struct LinkState {
    pub(crate) vendor: Vendor,
    pub(crate) settings: SessionSettings,
    tls: Option<TlsConnector>,

    connected: AtomicBool,
    writer: tokio::sync::Mutex<Option<VendorWriter>>,
    pending: Mutex<HashMap<u32, PendingSubmit>>,
    sequence: AtomicU32,

    pub(crate) messages_sent: AtomicU64,
    pub(crate) messages_success: AtomicU64,
    pub(crate) messages_failed: AtomicU64,
    pub(crate) dlrs_received: AtomicU64,
    pub(crate) last_error: Mutex<String>,
    pub(crate) connected_at: Mutex<Option<DateTime<Utc>>>,

    pub(crate) dlr_handler: RwLock<Option<Arc<dyn DlrHandler>>>,
    pub(crate) correlation: Mutex<IdCorrelation>,
}

impl LinkState {
    pub(crate) fn new(vendor: Vendor, settings: SessionSettings) -> Self {
        let tls = vendor.use_tls.then(tls::client_connector);
        Self {
            vendor,
            settings,
            tls,
            connected: AtomicBool::new(false),
            writer: tokio::sync::Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicU32::new(0),
            messages_sent: AtomicU64::new(0),
            messages_success: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            dlrs_received: AtomicU64::new(0),
            last_error: Mutex::new(String::new()),
            connected_at: Mutex::new(None),
            dlr_handler: RwLock::new(None),
            correlation: Mutex::new(IdCorrelation::with_capacity(CORRELATION_CAPACITY)),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn next_sequence(&self) -> u32 {
        let mut current = self.sequence.load(Ordering::Relaxed);
        loop {
            let next = if current >= MAX_SEQUENCE { 1 } else { current + 1 };
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

    pub(crate) fn record_error(&self, err: &GatewayError) {
        *self.last_error.lock() = err.to_string();
    }

    /// Register a waiter for the submit_sm_resp carrying `sequence_number`
    pub(crate) fn expect_response(
        &self,
        sequence_number: u32,
        vendor_msg_id: &str,
    ) -> oneshot::Receiver<SubmitOutcome> {
        let (waiter, rx) = oneshot::channel();
        self.pending.lock().insert(
            sequence_number,
            PendingSubmit {
                waiter,
                vendor_msg_id: vendor_msg_id.to_string(),
            },
        );
        rx
    }

    pub(crate) fn forget_response(&self, sequence_number: u32) {
        self.pending.lock().remove(&sequence_number);
    }

    /// Hand a submit outcome to its waiter.
    ///
    /// On success the vendor's message ID is correlated before the waiter
    /// wakes, and before the session task reads the next frame.
    fn complete_response(&self, sequence_number: u32, outcome: SubmitOutcome) {
        let pending = self.pending.lock().remove(&sequence_number);
        match pending {
            Some(pending) => {
                if let Ok(real_id) = &outcome {
                    if !real_id.is_empty() {
                        self.correlation
                            .lock()
                            .insert(real_id.clone(), pending.vendor_msg_id);
                    }
                }
                let _ = pending.waiter.send(outcome);
            }
            None => debug!(
                vendor = %self.vendor.instance_name,
                sequence_number,
                "Response for unknown or expired request"
            ),
        }
    }

    /// Write one PDU under the write deadline
    pub(crate) async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(GatewayError::NotConnected)?;
        tokio::time::timeout(self.settings.write_timeout, writer.write_frame(frame)).await??;
        Ok(())
    }

    /// Install a freshly bound writer and mark the link up
    pub(crate) async fn attach(&self, writer: VendorWriter) {
        *self.writer.lock().await = Some(writer);
        *self.connected_at.lock() = Some(Utc::now());
        self.last_error.lock().clear();
        self.connected.store(true, Ordering::Release);
    }

    /// Tear the link down: mark disconnected, drop waiters, close the writer.
    ///
    /// With `unbind` set a best-effort unbind is written first.
    pub(crate) async fn detach(&self, unbind: bool) {
        self.connected.store(false, Ordering::Release);
        // Dropping the senders wakes every waiting `send` with ConnectionClosed
        self.pending.lock().clear();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if unbind {
                let pdu = Unbind::new(self.next_sequence());
                match tokio::time::timeout(self.settings.write_timeout, writer.write_pdu(&pdu)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(vendor = %self.vendor.instance_name, error = %e, "Unbind not sent")
                    }
                    Err(_) => debug!(vendor = %self.vendor.instance_name, "Unbind write timed out"),
                }
            }
            let _ = writer.shutdown().await;
        }
    }

    async fn handle_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::SubmitSmResp(resp) => {
                let outcome = if resp.command_status.is_ok() {
                    Ok(resp.message_id)
                } else {
                    Err(resp.command_status)
                };
                self.complete_response(resp.sequence_number, outcome);
            }
            Frame::DeliverSm(pdu) => {
                let seq = pdu.sequence_number;
                self.write_frame(&Frame::DeliverSmResp(DeliverSmResponse::new(seq)))
                    .await?;
                self.on_deliver_sm(&pdu.body).await;
            }
            Frame::EnquireLink(pdu) => {
                self.write_frame(&Frame::EnquireLinkResp(EnquireLinkResponse::new(
                    pdu.sequence_number,
                )))
                .await?;
            }
            Frame::EnquireLinkResp(_) => {
                debug!(vendor = %self.vendor.instance_name, "Enquire link response received");
            }
            Frame::GenericNack(nack) => {
                warn!(
                    vendor = %self.vendor.instance_name,
                    sequence_number = nack.sequence_number,
                    status = %nack.command_status,
                    "generic_nack from vendor"
                );
                self.complete_response(nack.sequence_number, Err(nack.command_status));
            }
            Frame::Unbind(pdu) => {
                info!(vendor = %self.vendor.instance_name, "Vendor requested unbind");
                self.write_frame(&Frame::UnbindResp(UnbindResponse::new(pdu.sequence_number)))
                    .await?;
                return Err(GatewayError::ConnectionClosed);
            }
            other => {
                debug!(
                    vendor = %self.vendor.instance_name,
                    command_id = other.command_id(),
                    "Unhandled PDU received"
                );
            }
        }
        Ok(())
    }

    async fn on_deliver_sm(&self, body: &ShortMessageBody) {
        self.dlrs_received.fetch_add(1, Ordering::Relaxed);

        if !body.is_delivery_receipt() {
            info!(
                vendor = %self.vendor.instance_name,
                source = %body.source_addr,
                dest = %body.destination_addr,
                "MO message received (not handled)"
            );
            return;
        }

        let Some(mut dlr) = DeliveryReceipt::from_deliver_sm(body) else {
            warn!(vendor = %self.vendor.instance_name, "Delivery receipt without message id dropped");
            return;
        };
        if let Some(gateway_id) = self.correlation.lock().resolve(&dlr.vendor_msg_id) {
            dlr.message_id = gateway_id.clone();
        }

        info!(
            vendor = %self.vendor.instance_name,
            msg_id = %dlr.message_id,
            status = %dlr.status,
            "DLR received from vendor"
        );

        let handler = self.dlr_handler.read().clone();
        match handler {
            Some(handler) => {
                if let Err(e) = handler.handle_dlr(dlr).await {
                    error!(vendor = %self.vendor.instance_name, error = %e, "Failed to process DLR");
                }
            }
            None => debug!(vendor = %self.vendor.instance_name, "No DLR handler installed"),
        }
    }
}

/// Dial the vendor and complete bind_transceiver
pub(crate) async fn open(state: &LinkState) -> Result<(VendorReader, VendorWriter)> {
    let vendor = &state.vendor;
    let addr = vendor.address();

    let stream = tokio::time::timeout(state.settings.connect_timeout, dial(state, &addr)).await??;

    let mut connection = Connection::new(stream);
    let bind = BindTransceiver::new(state.next_sequence(), &vendor.username, &vendor.password)
        .with_system_type(&vendor.system_type);
    tokio::time::timeout(state.settings.write_timeout, connection.write_pdu(&bind)).await??;

    let response =
        tokio::time::timeout(state.settings.response_timeout, connection.read_frame()).await??;
    match response {
        Some(Frame::BindTransceiverResp(resp)) if resp.command_status.is_ok() => {
            debug!(vendor = %vendor.instance_name, smsc_system_id = %resp.system_id, "Bound");
        }
        Some(Frame::BindTransceiverResp(resp)) => {
            return Err(GatewayError::Protocol(resp.command_status));
        }
        Some(Frame::GenericNack(nack)) => return Err(GatewayError::Protocol(nack.command_status)),
        Some(other) => {
            return Err(GatewayError::UnexpectedPdu {
                expected: "bind_transceiver_resp".to_string(),
                actual: format!("{:#010x}", other.command_id()),
            });
        }
        None => return Err(GatewayError::ConnectionClosed),
    }

    Ok(connection.into_split())
}

async fn dial(state: &LinkState, addr: &str) -> Result<Stream> {
    let tcp = TcpStream::connect(addr).await?;
    tcp.set_nodelay(true)?;
    match &state.tls {
        Some(connector) => {
            debug!(address = %addr, "Initiating TLS connection");
            tls::connect(connector, &state.vendor.host, tcp).await
        }
        None => Ok(Stream::Plain(tcp)),
    }
}

/// Session task body. Only cancellation ends it; link loss leads to rebinding.
pub(crate) async fn run(state: Arc<LinkState>, mut reader: VendorReader, cancel: CancellationToken) {
    loop {
        let reason = tokio::select! {
            _ = cancel.cancelled() => return,
            reason = drive(&state, &mut reader) => reason,
        };

        state.detach(false).await;
        state.record_error(&reason);
        warn!(
            vendor = %state.vendor.instance_name,
            error = %reason,
            "Vendor link lost - will rebind"
        );

        reader = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(state.settings.rebind_interval) => {}
            }

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return,
                attempt = open(&state) => attempt,
            };
            match attempt {
                Ok((reader, writer)) => {
                    state.attach(writer).await;
                    info!(vendor = %state.vendor.instance_name, "Rebound to vendor");
                    break reader;
                }
                Err(e) => {
                    state.record_error(&e);
                    error!(
                        vendor = %state.vendor.instance_name,
                        error = %e,
                        "Rebinding error - will retry"
                    );
                }
            }
        };
    }
}

/// Read and answer PDUs until the link fails; returns why it failed
async fn drive(state: &LinkState, reader: &mut VendorReader) -> GatewayError {
    let interval = state.settings.enquire_link_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + interval, interval);
    let mut last_read = Instant::now();

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                let ping = Frame::EnquireLink(EnquireLink::new(state.next_sequence()));
                if let Err(e) = state.write_frame(&ping).await {
                    return e;
                }
            }
            _ = tokio::time::sleep_until(last_read + state.settings.read_timeout) => {
                return GatewayError::Timeout;
            }
            read = reader.read_frame() => {
                last_read = Instant::now();
                match read {
                    Ok(Some(frame)) => {
                        if let Err(e) = state.handle_frame(frame).await {
                            return e;
                        }
                    }
                    Ok(None) => return GatewayError::ConnectionClosed,
                    Err(e) => return e.into(),
                }
            }
        }
    }
}
