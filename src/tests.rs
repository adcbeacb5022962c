//! End-to-end tests: a customer client, the gateway and a fake vendor SMSC on loopback

use crate::codec::Frame;
use crate::connection::Connection;
use crate::connectors::{ConnectorManager, MemoryVendorStore, SessionSettings};
use crate::datatypes::*;
use crate::dlr::{DlrTracker, MemoryDlrTracker};
use crate::error::GatewayError;
use crate::models::{BindType, DeliveryReceipt, Message, MessageStatus, Vendor};
use crate::ratelimit::{CounterStore, ManualClock, MemoryCounterStore, RateLimiter};
use crate::routing::{PriorityRouter, Router};
use crate::server::{ServerSettings, Session, SmppServer, StaticCredentials};
use crate::transport::Stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod integration_tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Clone, Copy)]
    struct SmscBehaviour {
        /// Status for every submit_sm_resp
        submit_status: CommandStatus,
        /// Close the first link right after bind_transceiver_resp
        drop_first_link: bool,
        /// Write a DELIVRD receipt right behind every successful submit_sm_resp
        receipt_after_resp: bool,
    }

    impl Default for SmscBehaviour {
        fn default() -> Self {
            Self {
                submit_status: CommandStatus::Ok,
                drop_first_link: false,
                receipt_after_resp: false,
            }
        }
    }

    /// Vendor side of the link: answers binds and submits, and injects
    /// frames on request. Serves one link at a time.
    struct FakeSmsc {
        addr: SocketAddr,
        inject: mpsc::Sender<Frame>,
        binds: Arc<AtomicUsize>,
        submits: Arc<AtomicUsize>,
        unbinds: Arc<AtomicUsize>,
    }

    impl FakeSmsc {
        async fn start(behaviour: SmscBehaviour) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (inject, mut inject_rx) = mpsc::channel::<Frame>(16);
            let binds = Arc::new(AtomicUsize::new(0));
            let submits = Arc::new(AtomicUsize::new(0));
            let unbinds = Arc::new(AtomicUsize::new(0));

            let (b, s, u) = (binds.clone(), submits.clone(), unbinds.clone());
            tokio::spawn(async move {
                let mut links = 0;
                while let Ok((socket, _)) = listener.accept().await {
                    links += 1;
                    let (mut reader, mut writer) = Connection::new(socket).into_split();
                    loop {
                        tokio::select! {
                            frame = reader.read_frame() => {
                                let Ok(Some(frame)) = frame else { break };
                                let reply = match frame {
                                    Frame::BindTransceiver(bind) => {
                                        b.fetch_add(1, Ordering::SeqCst);
                                        Some(Frame::BindTransceiverResp(BindTransceiverResponse::new(
                                            bind.sequence_number,
                                            "SMSC",
                                        )))
                                    }
                                    Frame::SubmitSm(submit) => {
                                        s.fetch_add(1, Ordering::SeqCst);
                                        let resp = if behaviour.submit_status == CommandStatus::Ok {
                                            SubmitSmResponse::new(submit.sequence_number, "V123")
                                        } else {
                                            SubmitSmResponse::error(submit.sequence_number, behaviour.submit_status)
                                        };
                                        Some(Frame::SubmitSmResp(resp))
                                    }
                                    Frame::EnquireLink(link) => Some(Frame::EnquireLinkResp(
                                        EnquireLinkResponse::new(link.sequence_number),
                                    )),
                                    Frame::Unbind(unbind) => {
                                        u.fetch_add(1, Ordering::SeqCst);
                                        let _ = writer
                                            .write_frame(&Frame::UnbindResp(UnbindResponse::new(
                                                unbind.sequence_number,
                                            )))
                                            .await;
                                        break;
                                    }
                                    _ => None,
                                };
                                if let Some(reply) = reply {
                                    let bound = matches!(reply, Frame::BindTransceiverResp(_));
                                    let accepted = matches!(
                                        &reply,
                                        Frame::SubmitSmResp(resp) if resp.command_status == CommandStatus::Ok
                                    );
                                    if writer.write_frame(&reply).await.is_err() {
                                        break;
                                    }
                                    if bound && behaviour.drop_first_link && links == 1 {
                                        break;
                                    }
                                    if accepted && behaviour.receipt_after_resp {
                                        let receipt = receipt_frame("V123", "DELIVRD", "000");
                                        if writer.write_frame(&receipt).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Some(frame) = inject_rx.recv() => {
                                let _ = writer.write_frame(&frame).await;
                            }
                        }
                    }
                }
            });

            Self {
                addr,
                inject,
                binds,
                submits,
                unbinds,
            }
        }

        fn vendor(&self, id: &str, priority: i32) -> Vendor {
            Vendor {
                id: id.to_string(),
                instance_name: format!("{id}-inst"),
                host: self.addr.ip().to_string(),
                port: self.addr.port(),
                username: "gw".to_string(),
                password: "vendorpw".to_string(),
                priority,
                is_active: true,
                ..Default::default()
            }
        }

        async fn send_receipt(&self, smsc_msg_id: &str, stat: &str, err: &str) {
            self.inject
                .send(receipt_frame(smsc_msg_id, stat, err))
                .await
                .unwrap();
        }
    }

    fn receipt_frame(smsc_msg_id: &str, stat: &str, err: &str) -> Frame {
        let text = format!(
            "id:{smsc_msg_id} sub:001 dlvrd:001 submit date:2401011200 \
             done date:2401011201 stat:{stat} err:{err} text:Hello"
        );
        let mut body = ShortMessageBody::new("15550002", "15550001", Bytes::new());
        body.esm_class = ESM_CLASS_DELIVERY_RECEIPT;
        body.set_payload(DataCoding::SmscDefault.encode(&text));
        Frame::DeliverSm(Box::new(DeliverSm::new(1, body)))
    }

    /// Tracker whose mark_sent lags behind, like a slow shared store
    struct LaggingTracker {
        inner: Arc<MemoryDlrTracker>,
        mark_sent_delay: Duration,
    }

    #[async_trait]
    impl DlrTracker for LaggingTracker {
        async fn store_message(&self, message: &Message) -> crate::Result<()> {
            self.inner.store_message(message).await
        }

        async fn mark_sent(&self, message_id: &str, vendor_msg_id: &str) -> crate::Result<()> {
            tokio::time::sleep(self.mark_sent_delay).await;
            self.inner.mark_sent(message_id, vendor_msg_id).await
        }

        async fn handle_dlr(&self, dlr: &DeliveryReceipt) -> crate::Result<Option<Message>> {
            self.inner.handle_dlr(dlr).await
        }

        async fn message_status(&self, id: &str) -> crate::Result<Option<Message>> {
            self.inner.message_status(id).await
        }

        async fn dlr(&self, message_id: &str) -> crate::Result<Option<DeliveryReceipt>> {
            self.inner.dlr(message_id).await
        }
    }

    /// Router that counts how often it is consulted
    struct CountingRouter {
        inner: PriorityRouter,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Router for CountingRouter {
        async fn route_message(
            &self,
            message: &mut Message,
        ) -> crate::Result<Arc<crate::connectors::VendorConnector>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.route_message(message).await
        }
    }

    struct Gateway {
        server: SmppServer,
        manager: Arc<ConnectorManager>,
        tracker: Arc<MemoryDlrTracker>,
        router: Arc<CountingRouter>,
        addr: SocketAddr,
    }

    impl Gateway {
        fn route_calls(&self) -> usize {
            self.router.calls.load(Ordering::SeqCst)
        }

        async fn stop(self) {
            self.server.shutdown().await;
            self.manager.stop_all().await;
        }
    }

    fn local_settings() -> ServerSettings {
        ServerSettings {
            listen_addr: "127.0.0.1:0".to_string(),
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn pinned_limiter() -> RateLimiter {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        RateLimiter::new(Arc::new(MemoryCounterStore::new())).with_clock(Arc::new(clock))
    }

    async fn gateway(
        vendors: Vec<Vendor>,
        settings: ServerSettings,
        limiter: Option<RateLimiter>,
    ) -> Gateway {
        gateway_with_mark_sent_delay(vendors, settings, limiter, Duration::ZERO).await
    }

    async fn gateway_with_mark_sent_delay(
        vendors: Vec<Vendor>,
        settings: ServerSettings,
        limiter: Option<RateLimiter>,
        mark_sent_delay: Duration,
    ) -> Gateway {
        let manager = Arc::new(ConnectorManager::with_settings(
            Arc::new(MemoryVendorStore::new(vendors)),
            SessionSettings::default().with_rebind_interval(Duration::from_millis(100)),
        ));
        manager.load_vendors().await.unwrap();
        for connector in manager.all_connectors().await.values() {
            connector.connect().await.unwrap();
        }

        let tracker = Arc::new(MemoryDlrTracker::new());
        let router = Arc::new(CountingRouter {
            inner: PriorityRouter::new(manager.clone()),
            calls: AtomicUsize::new(0),
        });

        let server = SmppServer::new(settings);
        server.set_credential_store(Arc::new(StaticCredentials::new([
            ("acme", "secret"),
            ("beta", "pw"),
        ])));
        server.set_router(router.clone());
        if mark_sent_delay.is_zero() {
            server.set_dlr_tracker(tracker.clone());
        } else {
            server.set_dlr_tracker(Arc::new(LaggingTracker {
                inner: tracker.clone(),
                mark_sent_delay,
            }));
        }
        if let Some(limiter) = limiter {
            server.set_rate_limiter(Arc::new(limiter));
        }
        manager.set_dlr_handler(Arc::new(server.clone())).await;
        server.start().await.unwrap();

        let addr = server.local_addr().unwrap();
        Gateway {
            server,
            manager,
            tracker,
            router,
            addr,
        }
    }

    /// Customer ESME speaking raw PDUs
    struct Customer {
        conn: Connection<TcpStream>,
        sequence: u32,
    }

    impl Customer {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                conn: Connection::new(TcpStream::connect(addr).await.unwrap()),
                sequence: 0,
            }
        }

        fn next_sequence(&mut self) -> u32 {
            self.sequence += 1;
            self.sequence
        }

        async fn send(&mut self, frame: Frame) {
            self.conn.write_frame(&frame).await.unwrap();
        }

        async fn recv(&mut self) -> Frame {
            tokio::time::timeout(WAIT, self.conn.read_frame())
                .await
                .expect("timed out waiting for a PDU")
                .expect("read error")
                .expect("connection closed")
        }

        /// True once the gateway has closed the connection
        async fn closed(&mut self) -> bool {
            match tokio::time::timeout(WAIT, self.conn.read_frame()).await {
                Ok(Ok(None)) | Ok(Err(_)) => true,
                Ok(Ok(Some(_))) | Err(_) => false,
            }
        }

        async fn bind(&mut self, bind_type: BindType, system_id: &str, password: &str) -> CommandStatus {
            let seq = self.next_sequence();
            let frame = match bind_type {
                BindType::Transmitter => Frame::BindTransmitter(BindTransmitter::new(seq, system_id, password)),
                BindType::Receiver => Frame::BindReceiver(BindReceiver::new(seq, system_id, password)),
                BindType::Transceiver => Frame::BindTransceiver(BindTransceiver::new(seq, system_id, password)),
            };
            self.send(frame).await;

            match self.recv().await {
                Frame::BindTransmitterResp(resp) => {
                    assert_eq!(resp.sequence_number, seq);
                    resp.command_status
                }
                Frame::BindReceiverResp(resp) => {
                    assert_eq!(resp.sequence_number, seq);
                    resp.command_status
                }
                Frame::BindTransceiverResp(resp) => {
                    assert_eq!(resp.sequence_number, seq);
                    if resp.command_status == CommandStatus::Ok {
                        assert_eq!(resp.system_id, "SMPPGW");
                    }
                    resp.command_status
                }
                other => panic!("expected a bind response, got {other:?}"),
            }
        }

        async fn submit(&mut self, source: &str, text: &str) -> SubmitSmResponse {
            let seq = self.next_sequence();
            let mut body = ShortMessageBody::new(source, "15550002", Bytes::new());
            body.registered_delivery = REGISTERED_DELIVERY_RECEIPT;
            body.set_payload(DataCoding::SmscDefault.encode(text));
            self.send(Frame::SubmitSm(Box::new(SubmitSm::new(seq, body))))
                .await;

            match self.recv().await {
                Frame::SubmitSmResp(resp) => {
                    assert_eq!(resp.sequence_number, seq);
                    resp
                }
                other => panic!("expected submit_sm_resp, got {other:?}"),
            }
        }

        async fn query(&mut self, message_id: &str) -> QuerySmResponse {
            let seq = self.next_sequence();
            self.send(Frame::QuerySm(QuerySm::new(seq, message_id, "15550001")))
                .await;
            match self.recv().await {
                Frame::QuerySmResp(resp) => resp,
                other => panic!("expected query_sm_resp, got {other:?}"),
            }
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_submit_and_receipt_round_trip() {
        let smsc = FakeSmsc::start(SmscBehaviour::default()).await;
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], local_settings(), None).await;

        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        let resp = customer.submit("15550001", "Hello").await;
        assert_eq!(resp.command_status, CommandStatus::Ok);
        let gateway_id = resp.message_id.clone();
        assert!(gateway_id.starts_with("vendor-a-inst-"));
        assert_eq!(smsc.submits.load(Ordering::SeqCst), 1);

        let tracked = gw.tracker.message_status(&gateway_id).await.unwrap().unwrap();
        assert_eq!(tracked.status, MessageStatus::Sent);
        assert_eq!(tracked.customer_id, "acme");
        assert_eq!(tracked.vendor_id, "vendor-a");

        smsc.send_receipt("V123", "DELIVRD", "000").await;
        let deliver = match customer.recv().await {
            Frame::DeliverSm(deliver) => deliver,
            other => panic!("expected deliver_sm, got {other:?}"),
        };
        assert!(deliver.body.is_delivery_receipt());
        assert_eq!(deliver.body.data_coding, 0);
        let text = deliver.body.text();
        assert!(text.starts_with(&format!("id:{gateway_id} ")), "{text}");
        assert!(text.contains("stat:DELIVRD"));
        assert!(gateway_id.starts_with(&deliver.body.source_addr));
        customer
            .send(Frame::DeliverSmResp(DeliverSmResponse::new(deliver.sequence_number)))
            .await;

        // Exactly one deliver_sm per receipt
        let extra = tokio::time::timeout(Duration::from_millis(300), customer.conn.read_frame()).await;
        assert!(extra.is_err(), "unexpected extra PDU: {extra:?}");

        let query = customer.query(&gateway_id).await;
        assert_eq!(query.command_status, CommandStatus::Ok);
        assert_eq!(query.state(), MessageState::Delivered);
        assert_eq!(query.final_date.len(), 16);

        let metrics = gw.server.metrics().await;
        assert_eq!(metrics.total_binds, 1);
        assert_eq!(metrics.total_submit_sm, 1);
        assert_eq!(metrics.total_deliver_sm, 1);
        assert_eq!(metrics.active_sessions, 1);

        let health = gw.manager.health_check().await;
        assert_eq!(health["vendor-a"].messages_success, 1);
        assert_eq!(health["vendor-a"].dlrs_received, 1);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_receipt_right_behind_submit_resp_is_delivered() {
        let smsc = FakeSmsc::start(SmscBehaviour {
            receipt_after_resp: true,
            ..Default::default()
        })
        .await;
        let gw = gateway_with_mark_sent_delay(
            vec![smsc.vendor("vendor-a", 1)],
            local_settings(),
            None,
            Duration::from_millis(300),
        )
        .await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        let seq = customer.next_sequence();
        let mut body = ShortMessageBody::new("15550001", "15550002", Bytes::new());
        body.registered_delivery = REGISTERED_DELIVERY_RECEIPT;
        body.set_payload(DataCoding::SmscDefault.encode("Hello"));
        customer.send(Frame::SubmitSm(Box::new(SubmitSm::new(seq, body)))).await;

        // The receipt may reach the customer before the submit_sm_resp
        let mut gateway_id = None;
        let mut receipt_text = None;
        while gateway_id.is_none() || receipt_text.is_none() {
            match customer.recv().await {
                Frame::SubmitSmResp(resp) => {
                    assert_eq!(resp.sequence_number, seq);
                    assert_eq!(resp.command_status, CommandStatus::Ok);
                    gateway_id = Some(resp.message_id);
                }
                Frame::DeliverSm(deliver) => {
                    customer
                        .send(Frame::DeliverSmResp(DeliverSmResponse::new(deliver.sequence_number)))
                        .await;
                    receipt_text = Some(deliver.body.text());
                }
                other => panic!("unexpected PDU {other:?}"),
            }
        }
        let gateway_id = gateway_id.unwrap();
        let receipt_text = receipt_text.unwrap();
        assert!(receipt_text.starts_with(&format!("id:{gateway_id} ")), "{receipt_text}");
        assert!(receipt_text.contains("stat:DELIVRD"));

        // mark_sent finished after the receipt and must not roll the status back
        let query = customer.query(&gateway_id).await;
        assert_eq!(query.command_status, CommandStatus::Ok);
        assert_eq!(query.state(), MessageState::Delivered);
        assert_eq!(gw.server.metrics().await.total_deliver_sm, 1);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_bad_password_then_good_bind() {
        let gw = gateway(vec![], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;

        assert_eq!(
            customer.bind(BindType::Transmitter, "acme", "wrong").await,
            CommandStatus::InvalidPassword
        );
        assert_eq!(
            customer.bind(BindType::Transmitter, "stranger", "secret").await,
            CommandStatus::InvalidPassword
        );
        assert!(gw.server.sessions().await.is_empty());

        assert_eq!(customer.bind(BindType::Transmitter, "acme", "secret").await, CommandStatus::Ok);
        assert_eq!(
            customer.bind(BindType::Transmitter, "acme", "secret").await,
            CommandStatus::AlreadyBoundState
        );
        assert_eq!(gw.server.metrics().await.total_binds, 4);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_submit_before_bind() {
        let gw = gateway(vec![], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;

        let resp = customer.submit("15550001", "Hello").await;
        assert_eq!(resp.command_status, CommandStatus::IncorrectBindStatus);
        let query = customer.query("anything").await;
        assert_eq!(query.command_status, CommandStatus::IncorrectBindStatus);
        assert_eq!(gw.route_calls(), 0);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_receiver_cannot_submit() {
        let smsc = FakeSmsc::start(SmscBehaviour::default()).await;
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Receiver, "acme", "secret").await, CommandStatus::Ok);

        let resp = customer.submit("15550001", "Hello").await;
        assert_eq!(resp.command_status, CommandStatus::IncorrectBindStatus);
        assert_eq!(gw.route_calls(), 0);
        assert_eq!(smsc.submits.load(Ordering::SeqCst), 0);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_no_vendor_available() {
        let gw = gateway(vec![], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        let resp = customer.submit("15550001", "Hello").await;
        assert_eq!(resp.command_status, CommandStatus::SubmitFailed);
        assert_eq!(gw.route_calls(), 1);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_missing_router_is_system_error() {
        let server = SmppServer::new(local_settings());
        server.set_credential_store(Arc::new(StaticCredentials::new([("acme", "secret")])));
        server.start().await.unwrap();

        let mut customer = Customer::connect(server.local_addr().unwrap()).await;
        assert_eq!(customer.bind(BindType::Transmitter, "acme", "secret").await, CommandStatus::Ok);
        let resp = customer.submit("15550001", "Hello").await;
        assert_eq!(resp.command_status, CommandStatus::SystemError);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_vendor_rejection_is_submit_failed() {
        let smsc = FakeSmsc::start(SmscBehaviour {
            submit_status: CommandStatus::ThrottlingError,
            ..Default::default()
        })
        .await;
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        let resp = customer.submit("15550001", "Hello").await;
        assert_eq!(resp.command_status, CommandStatus::SubmitFailed);

        let health = gw.manager.health_check().await;
        assert_eq!(health["vendor-a"].messages_failed, 1);
        assert!(!health["vendor-a"].last_error.is_empty());

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_customer_limit_never_reaches_router() {
        let smsc = FakeSmsc::start(SmscBehaviour::default()).await;
        let settings = ServerSettings {
            customer_rate_limit_per_min: 1,
            ..local_settings()
        };
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], settings, Some(pinned_limiter())).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        assert_eq!(customer.submit("15550001", "one").await.command_status, CommandStatus::Ok);
        assert_eq!(
            customer.submit("15550001", "two").await.command_status,
            CommandStatus::ThrottlingError
        );
        assert_eq!(gw.route_calls(), 1);
        assert_eq!(smsc.submits.load(Ordering::SeqCst), 1);

        gw.stop().await;
    }

    /// Counter store whose round trips never complete
    struct HungCounterStore;

    #[async_trait]
    impl CounterStore for HungCounterStore {
        async fn incr(&self, _key: &str) -> crate::Result<i64> {
            std::future::pending().await
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> crate::Result<()> {
            std::future::pending().await
        }

        async fn get(&self, _key: &str) -> crate::Result<Option<i64>> {
            std::future::pending().await
        }

        async fn scan(&self, _pattern: &str) -> crate::Result<Vec<String>> {
            std::future::pending().await
        }

        async fn del(&self, _key: &str) -> crate::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_rate_store_fails_open() {
        let smsc = FakeSmsc::start(SmscBehaviour::default()).await;
        let settings = ServerSettings {
            store_timeout: Duration::from_millis(200),
            tendlc_hourly_limit: 5,
            tendlc_daily_limit: 50,
            ..local_settings()
        };
        let limiter = RateLimiter::new(Arc::new(HungCounterStore));
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], settings, Some(limiter)).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        let resp = customer.submit("15550001", "Hello").await;
        assert_eq!(resp.command_status, CommandStatus::Ok);
        assert_eq!(smsc.submits.load(Ordering::SeqCst), 1);

        // The connection keeps serving PDUs after the stalled checks
        customer.send(Frame::EnquireLink(EnquireLink::new(90))).await;
        match customer.recv().await {
            Frame::EnquireLinkResp(resp) => assert_eq!(resp.sequence_number, 90),
            other => panic!("expected enquire_link_resp, got {other:?}"),
        }

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_10dlc_hourly_boundary() {
        let smsc = FakeSmsc::start(SmscBehaviour::default()).await;
        let settings = ServerSettings {
            tendlc_hourly_limit: 2,
            tendlc_daily_limit: 10,
            ..local_settings()
        };
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], settings, Some(pinned_limiter())).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transmitter, "acme", "secret").await, CommandStatus::Ok);

        assert_eq!(customer.submit("15550001", "1").await.command_status, CommandStatus::Ok);
        assert_eq!(customer.submit("15550001", "2").await.command_status, CommandStatus::Ok);
        assert_eq!(
            customer.submit("15550001", "3").await.command_status,
            CommandStatus::ThrottlingError
        );
        // A different source number has its own counters
        assert_eq!(customer.submit("15550009", "4").await.command_status, CommandStatus::Ok);
        assert_eq!(gw.route_calls(), 3);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_bind_replaces_session() {
        let gw = gateway(vec![], local_settings(), None).await;

        let mut first = Customer::connect(gw.addr).await;
        assert_eq!(first.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);
        let first_session = gw.server.sessions().await[0].session_id.clone();

        let mut second = Customer::connect(gw.addr).await;
        assert_eq!(second.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        assert!(first.closed().await);
        let sessions = gw.server.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_ne!(sessions[0].session_id, first_session);
        assert_eq!(sessions[0].system_id, "acme");

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_enquire_link_and_unbind() {
        let gw = gateway(vec![], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Receiver, "beta", "pw").await, CommandStatus::Ok);

        customer.send(Frame::EnquireLink(EnquireLink::new(41))).await;
        match customer.recv().await {
            Frame::EnquireLinkResp(resp) => assert_eq!(resp.sequence_number, 41),
            other => panic!("expected enquire_link_resp, got {other:?}"),
        }

        customer.send(Frame::Unbind(Unbind::new(42))).await;
        match customer.recv().await {
            Frame::UnbindResp(resp) => assert_eq!(resp.sequence_number, 42),
            other => panic!("expected unbind_resp, got {other:?}"),
        }
        assert!(gw.server.sessions().await.is_empty());
        assert!(customer.closed().await);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_query_unknown_message() {
        let gw = gateway(vec![], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        let query = customer.query("no-such-message").await;
        assert_eq!(query.command_status, CommandStatus::QuerySmRequestFailed);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let gw = gateway(vec![], local_settings(), None).await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transceiver, "acme", "secret").await, CommandStatus::Ok);

        gw.server.shutdown().await;
        assert!(customer.closed().await);
        assert!(gw.server.sessions().await.is_empty());
        assert!(TcpStream::connect(gw.addr).await.is_err());

        gw.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_dlr_queue_holds_one_hundred() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let _accepted = listener.accept().await.unwrap();
        let (_reader, writer) = Connection::new(Stream::Plain(client)).into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        let (session, _dlr_rx) = Session::new(
            "acme",
            BindType::Receiver,
            "127.0.0.1:9",
            writer.clone(),
            CancellationToken::new(),
        );
        for i in 0..100 {
            session
                .queue_dlr(DeliveryReceipt::new(&format!("m-{i}"), "DELIVRD", "000"))
                .unwrap();
        }
        let overflow = session.queue_dlr(DeliveryReceipt::new("m-100", "DELIVRD", "000"));
        assert!(matches!(overflow, Err(GatewayError::DlrQueueFull(ref id)) if id == "acme"));

        let (transmitter, rx) = Session::new(
            "acme",
            BindType::Transmitter,
            "127.0.0.1:9",
            writer,
            CancellationToken::new(),
        );
        assert!(rx.is_none());
        assert!(!transmitter.can_receive());
        assert!(matches!(
            transmitter.queue_dlr(DeliveryReceipt::new("m", "DELIVRD", "000")),
            Err(GatewayError::NoReceiverSession(_))
        ));
    }

    #[tokio::test]
    async fn test_vendor_disconnect_twice() {
        let smsc = FakeSmsc::start(SmscBehaviour::default()).await;
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], local_settings(), None).await;
        let connector = gw.manager.connector("vendor-a").await.unwrap();
        assert!(connector.is_connected());

        gw.manager.disconnect_vendor("vendor-a").await.unwrap();
        gw.manager.disconnect_vendor("vendor-a").await.unwrap();
        assert!(!connector.is_connected());
        assert!(eventually(|| smsc.unbinds.load(Ordering::SeqCst) == 1).await);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_vendor_rebinds_after_link_loss() {
        let smsc = FakeSmsc::start(SmscBehaviour {
            drop_first_link: true,
            ..Default::default()
        })
        .await;
        let gw = gateway(vec![smsc.vendor("vendor-a", 1)], local_settings(), None).await;
        let connector = gw.manager.connector("vendor-a").await.unwrap();

        assert!(eventually(|| smsc.binds.load(Ordering::SeqCst) >= 2).await);
        assert!(eventually(|| connector.is_connected()).await);

        gw.stop().await;
    }

    #[tokio::test]
    async fn test_routing_prefers_lowest_priority_value() {
        let primary = FakeSmsc::start(SmscBehaviour::default()).await;
        let backup = FakeSmsc::start(SmscBehaviour::default()).await;
        let gw = gateway(
            vec![backup.vendor("backup", 20), primary.vendor("primary", 10)],
            local_settings(),
            None,
        )
        .await;
        let mut customer = Customer::connect(gw.addr).await;
        assert_eq!(customer.bind(BindType::Transmitter, "acme", "secret").await, CommandStatus::Ok);

        let resp = customer.submit("15550001", "Hello").await;
        assert!(resp.message_id.starts_with("primary-inst-"));
        assert_eq!(primary.submits.load(Ordering::SeqCst), 1);

        gw.manager.disconnect_vendor("primary").await.unwrap();
        let resp = customer.submit("15550001", "Hello again").await;
        assert!(resp.message_id.starts_with("backup-inst-"));
        assert_eq!(backup.submits.load(Ordering::SeqCst), 1);

        gw.stop().await;
    }
}
