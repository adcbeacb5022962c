// ABOUTME: Per-connection read/dispatch loop for customer SMPP sessions
// ABOUTME: Bind, submit_sm, query_sm, enquire_link and unbind handling, plus the DLR delivery task

use crate::codec::Frame;
use crate::connection::Connection;
use crate::datatypes::{
    BindReceiverResponse, BindTransceiverResponse, BindTransmitterResponse, CommandStatus,
    EnquireLinkResponse, QuerySm, QuerySmResponse, SubmitSm, SubmitSmResponse, UnbindResponse,
};
use crate::error::Result;
use crate::models::{BindType, DeliveryReceipt, Message, MessageStatus};
use crate::server::session::{Session, SharedWriter, write_shared};
use crate::server::{GATEWAY_SYSTEM_ID, SmppServer};
use crate::transport::Stream;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

enum Flow {
    Continue,
    Close,
}

struct ConnectionHandler {
    server: SmppServer,
    writer: SharedWriter,
    remote_addr: String,
    cancel: CancellationToken,
    session: Option<Arc<Session>>,
}

/// Serve one customer connection until it closes, times out or is cancelled
pub(crate) async fn handle_connection(server: SmppServer, stream: Stream, peer: SocketAddr) {
    let (mut reader, writer) = Connection::new(stream).into_split();
    let cancel = server.shutdown_token().child_token();
    let read_timeout = server.settings().read_timeout;

    let mut handler = ConnectionHandler {
        server,
        writer: Arc::new(tokio::sync::Mutex::new(writer)),
        remote_addr: peer.to_string(),
        cancel,
        session: None,
    };

    loop {
        let read = tokio::select! {
            _ = handler.cancel.cancelled() => {
                info!("Session cancelled");
                break;
            }
            read = tokio::time::timeout(read_timeout, reader.read_frame()) => read,
        };

        let frame = match read {
            Err(_) => {
                info!(timeout_secs = read_timeout.as_secs(), "Read timeout; closing connection");
                break;
            }
            Ok(Ok(None)) => {
                info!("Connection closed by client");
                break;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error reading PDU");
                break;
            }
            Ok(Ok(Some(frame))) => frame,
        };

        match handler.dispatch(frame).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(e) => {
                warn!(error = %e, "Failed to write PDU");
                break;
            }
        }
    }

    handler.close().await;
}

impl ConnectionHandler {
    async fn dispatch(&mut self, frame: Frame) -> Result<Flow> {
        match frame {
            Frame::BindTransmitter(bind) => {
                self.bind(BindType::Transmitter, bind.sequence_number, &bind.system_id, &bind.password)
                    .await
            }
            Frame::BindReceiver(bind) => {
                self.bind(BindType::Receiver, bind.sequence_number, &bind.system_id, &bind.password)
                    .await
            }
            Frame::BindTransceiver(bind) => {
                self.bind(BindType::Transceiver, bind.sequence_number, &bind.system_id, &bind.password)
                    .await
            }
            Frame::SubmitSm(submit) => self.submit_sm(*submit).await,
            Frame::QuerySm(query) => self.query_sm(query).await,
            Frame::EnquireLink(link) => {
                self.touch();
                self.respond(&Frame::EnquireLinkResp(EnquireLinkResponse::new(
                    link.sequence_number,
                )))
                .await?;
                Ok(Flow::Continue)
            }
            Frame::Unbind(unbind) => self.unbind(unbind.sequence_number).await,
            response @ (Frame::DeliverSmResp(_)
            | Frame::EnquireLinkResp(_)
            | Frame::GenericNack(_)) => {
                self.touch();
                debug!(
                    command_id = response.command_id(),
                    sequence_number = response.sequence_number(),
                    "Response from customer"
                );
                Ok(Flow::Continue)
            }
            other => {
                warn!(
                    command_id = other.command_id(),
                    sequence_number = other.sequence_number(),
                    "Unhandled PDU"
                );
                Ok(Flow::Continue)
            }
        }
    }

    async fn respond(&self, frame: &Frame) -> Result<()> {
        write_shared(&self.writer, frame).await
    }

    fn touch(&self) {
        if let Some(session) = &self.session {
            session.touch();
        }
    }

    async fn bind(
        &mut self,
        bind_type: BindType,
        sequence_number: u32,
        system_id: &str,
        password: &str,
    ) -> Result<Flow> {
        info!(system_id = %system_id, bind_type = %bind_type, "Bind request");
        self.server.record_bind();

        if !self.server.credentials().authenticate(system_id, password).await {
            warn!(system_id = %system_id, "Authentication failed");
            self.respond(&bind_response(bind_type, sequence_number, CommandStatus::InvalidPassword))
                .await?;
            return Ok(Flow::Continue);
        }

        if let Some(existing) = &self.session {
            warn!(
                system_id = %system_id,
                bound_as = %existing.system_id,
                "Bind on an already bound connection"
            );
            self.respond(&bind_response(bind_type, sequence_number, CommandStatus::AlreadyBoundState))
                .await?;
            return Ok(Flow::Continue);
        }

        let (session, dlr_rx) = Session::new(
            system_id,
            bind_type,
            &self.remote_addr,
            self.writer.clone(),
            self.cancel.clone(),
        );
        let session = Arc::new(session);
        self.server.register_session(session.clone()).await;
        self.session = Some(session.clone());

        self.respond(&bind_response(bind_type, sequence_number, CommandStatus::Ok))
            .await?;
        info!(
            session_id = %session.id,
            system_id = %system_id,
            bind_type = %bind_type,
            "Bind successful"
        );

        if let Some(dlr_rx) = dlr_rx {
            let span = info_span!("dlr_delivery", system_id = %system_id);
            self.server.tasks().spawn(
                deliver_receipts(self.server.clone(), session, dlr_rx).instrument(span),
            );
        }
        Ok(Flow::Continue)
    }

    async fn submit_sm(&mut self, submit: SubmitSm) -> Result<Flow> {
        let sequence_number = submit.sequence_number;
        let response = match self.submit(submit).await {
            Ok(vendor_msg_id) => SubmitSmResponse::new(sequence_number, &vendor_msg_id),
            Err(status) => SubmitSmResponse::error(sequence_number, status),
        };
        self.respond(&Frame::SubmitSmResp(response)).await?;
        Ok(Flow::Continue)
    }

    /// Accept a customer message and hand it to a vendor.
    ///
    /// Returns the vendor message ID for the customer, or the status to
    /// reject the submit_sm with.
    async fn submit(&self, submit: SubmitSm) -> std::result::Result<String, CommandStatus> {
        let Some(session) = &self.session else {
            warn!("submit_sm before bind");
            return Err(CommandStatus::IncorrectBindStatus);
        };
        if !session.bind_type.can_transmit() {
            warn!(system_id = %session.system_id, "submit_sm on a receiver session");
            return Err(CommandStatus::IncorrectBindStatus);
        }

        session.touch();
        self.server.record_submit();

        let body = &submit.body;
        let settings = self.server.settings();
        let limiter = self.server.rate_limiter();

        if let Some(limiter) = &limiter {
            match self
                .server
                .with_store_timeout(
                    "rate_limiter.check_customer_limit",
                    limiter.check_customer_limit(
                        &session.customer_id,
                        settings.customer_rate_limit_per_min,
                    ),
                )
                .await
            {
                Ok((true, _)) => {}
                Ok((false, _)) => {
                    warn!(
                        customer_id = %session.customer_id,
                        limit = settings.customer_rate_limit_per_min,
                        "Customer rate limit exceeded"
                    );
                    return Err(CommandStatus::ThrottlingError);
                }
                Err(e) => error!(error = %e, "Rate limit check failed; allowing message"),
            }

            if settings.tendlc_enabled() {
                match self
                    .server
                    .with_store_timeout(
                        "rate_limiter.check_10dlc_limit",
                        limiter.check_10dlc_limit(
                            &body.source_addr,
                            settings.tendlc_hourly_limit,
                            settings.tendlc_daily_limit,
                        ),
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(source_addr = %body.source_addr, "10DLC limit exceeded");
                        return Err(CommandStatus::ThrottlingError);
                    }
                    Err(e) => error!(error = %e, "10DLC limit check failed; allowing message"),
                }
            }
        }

        let mut message = Message::from_submit(&session.customer_id, body);
        info!(
            msg_id = %message.id,
            customer_id = %message.customer_id,
            source = %message.source_addr,
            destination = %message.dest_addr,
            encoding = ?message.encoding,
            segments = message.segments,
            "submit_sm received"
        );

        let Some(router) = self.server.router() else {
            error!("No router installed");
            return Err(CommandStatus::SystemError);
        };
        let connector = match router.route_message(&mut message).await {
            Ok(connector) => connector,
            Err(e) => {
                error!(msg_id = %message.id, error = %e, "Routing failed");
                return Err(CommandStatus::SubmitFailed);
            }
        };

        if let Some(limiter) = &limiter {
            match self
                .server
                .with_store_timeout(
                    "rate_limiter.check_vendor_limit",
                    limiter.check_vendor_limit(connector.id(), connector.vendor().throughput),
                )
                .await
            {
                Ok((true, _)) => {}
                Ok((false, _)) => {
                    warn!(
                        vendor_id = %connector.id(),
                        throughput = connector.vendor().throughput,
                        "Vendor rate limit exceeded"
                    );
                    return Err(CommandStatus::ThrottlingError);
                }
                Err(e) => error!(error = %e, "Vendor rate limit check failed; allowing message"),
            }
        }

        // The tracker must know this ID before submit_sm goes out
        message.vendor_msg_id = connector.issue_message_id();

        let tracker = self.server.dlr_tracker();
        if message.registered_delivery > 0 {
            if let Some(tracker) = &tracker {
                if let Err(e) = self
                    .server
                    .with_store_timeout("dlr_tracker.store_message", tracker.store_message(&message))
                    .await
                {
                    error!(msg_id = %message.id, error = %e, "Failed to store message for DLR tracking");
                }
            }
        }

        let vendor_msg_id = match connector.send(&message).await {
            Ok(id) => id,
            Err(e) => {
                error!(msg_id = %message.id, vendor_id = %connector.id(), error = %e, "Vendor submission failed");
                return Err(CommandStatus::SubmitFailed);
            }
        };
        message.vendor_msg_id = vendor_msg_id.clone();
        message.status = MessageStatus::Sent;

        if let Some(tracker) = &tracker {
            if let Err(e) = self
                .server
                .with_store_timeout(
                    "dlr_tracker.mark_sent",
                    tracker.mark_sent(&message.id, &vendor_msg_id),
                )
                .await
            {
                error!(msg_id = %message.id, error = %e, "Failed to mark message sent");
            }
        }

        info!(
            msg_id = %message.id,
            vendor_id = %message.vendor_id,
            vendor_msg_id = %vendor_msg_id,
            "Message submitted"
        );
        Ok(vendor_msg_id)
    }

    async fn query_sm(&mut self, query: QuerySm) -> Result<Flow> {
        let sequence_number = query.sequence_number;
        let response = match self.query(&query).await {
            Ok(response) => response,
            Err(status) => QuerySmResponse::error(sequence_number, status),
        };
        self.respond(&Frame::QuerySmResp(response)).await?;
        Ok(Flow::Continue)
    }

    async fn query(&self, query: &QuerySm) -> std::result::Result<QuerySmResponse, CommandStatus> {
        let Some(session) = &self.session else {
            return Err(CommandStatus::IncorrectBindStatus);
        };
        session.touch();

        let Some(tracker) = self.server.dlr_tracker() else {
            debug!(msg_id = %query.message_id, "query_sm without a DLR tracker");
            return Err(CommandStatus::QuerySmRequestFailed);
        };
        let lookup = self
            .server
            .with_store_timeout("dlr_tracker.message_status", tracker.message_status(&query.message_id))
            .await;
        let message = match lookup {
            Ok(Some(message)) if message.customer_id == session.customer_id => message,
            Ok(_) => {
                debug!(msg_id = %query.message_id, "query_sm for unknown message");
                return Err(CommandStatus::QuerySmRequestFailed);
            }
            Err(e) => {
                error!(msg_id = %query.message_id, error = %e, "query_sm lookup failed");
                return Err(CommandStatus::QuerySmRequestFailed);
            }
        };

        let final_date = message
            .delivered_at
            .map(|at| at.format("%y%m%d%H%M%S000+").to_string())
            .unwrap_or_default();

        Ok(QuerySmResponse::new(
            query.sequence_number,
            &query.message_id,
            &final_date,
            message.status.message_state(),
            query_error_code(&message),
        ))
    }

    async fn unbind(&mut self, sequence_number: u32) -> Result<Flow> {
        if let Some(session) = self.session.take() {
            info!(session_id = %session.id, system_id = %session.system_id, "Unbind");
            self.server.remove_session(&session).await;
        }
        self.respond(&Frame::UnbindResp(UnbindResponse::new(sequence_number)))
            .await?;
        self.cancel.cancel();
        Ok(Flow::Close)
    }

    async fn close(self) {
        if let Some(session) = &self.session {
            self.server.remove_session(session).await;
        }
        self.cancel.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Error closing connection");
        }
        debug!(remote_addr = %self.remote_addr, "Connection closed");
    }
}

/// Drain a session's DLR queue into deliver_sm PDUs until it is cancelled
async fn deliver_receipts(
    server: SmppServer,
    session: Arc<Session>,
    mut dlr_rx: mpsc::Receiver<DeliveryReceipt>,
) {
    loop {
        let dlr = tokio::select! {
            _ = session.token().cancelled() => break,
            dlr = dlr_rx.recv() => match dlr {
                Some(dlr) => dlr,
                None => break,
            },
        };

        server.record_deliver();
        match session.send_receipt(&dlr).await {
            Ok(()) => info!(
                msg_id = %dlr.message_id,
                status = %dlr.status,
                "DLR delivered to customer"
            ),
            Err(e) => error!(msg_id = %dlr.message_id, error = %e, "Failed to deliver DLR"),
        }
    }
    debug!(session_id = %session.id, "DLR delivery stopped");
}

fn bind_response(bind_type: BindType, sequence_number: u32, status: CommandStatus) -> Frame {
    let ok = status == CommandStatus::Ok;
    match bind_type {
        BindType::Transmitter => Frame::BindTransmitterResp(if ok {
            BindTransmitterResponse::new(sequence_number, GATEWAY_SYSTEM_ID)
        } else {
            BindTransmitterResponse::error(sequence_number, status)
        }),
        BindType::Receiver => Frame::BindReceiverResp(if ok {
            BindReceiverResponse::new(sequence_number, GATEWAY_SYSTEM_ID)
        } else {
            BindReceiverResponse::error(sequence_number, status)
        }),
        BindType::Transceiver => Frame::BindTransceiverResp(if ok {
            BindTransceiverResponse::new(sequence_number, GATEWAY_SYSTEM_ID)
        } else {
            BindTransceiverResponse::error(sequence_number, status)
        }),
    }
}

/// Network error code for query_sm_resp, taken from a failed receipt's `err:`
fn query_error_code(message: &Message) -> u8 {
    message
        .failure_reason
        .rsplit(' ')
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .map(|code| u8::try_from(code).unwrap_or(u8::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Encoding;

    #[test]
    fn test_bind_response_matches_bind_type() {
        match bind_response(BindType::Receiver, 4, CommandStatus::Ok) {
            Frame::BindReceiverResp(resp) => {
                assert_eq!(resp.sequence_number, 4);
                assert_eq!(resp.system_id, GATEWAY_SYSTEM_ID);
                assert_eq!(resp.command_status, CommandStatus::Ok);
            }
            other => panic!("unexpected frame {other:?}"),
        }

        match bind_response(BindType::Transceiver, 5, CommandStatus::InvalidPassword) {
            Frame::BindTransceiverResp(resp) => {
                assert_eq!(resp.command_status, CommandStatus::InvalidPassword);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_query_error_code() {
        let mut message = Message::new("acme", "1", "2", "x".to_string(), Encoding::Gsm7);
        assert_eq!(query_error_code(&message), 0);

        message.failure_reason = "Vendor error: 034".to_string();
        assert_eq!(query_error_code(&message), 34);

        message.failure_reason = "Vendor error: 999".to_string();
        assert_eq!(query_error_code(&message), u8::MAX);
    }
}
