// ABOUTME: Customer-facing SMPP server: plain and TLS listeners, session registry, DLR fan-out
// ABOUTME: SmppServer is also the DlrHandler that vendor connectors report receipts to

mod auth;
mod handler;
mod session;

pub use auth::{AllowAll, CredentialStore, StaticCredentials};
pub use session::{
    DLR_QUEUE_CAPACITY, Session, SessionInfo, SharedWriter, receipt_deliver_sm, write_shared,
};

use crate::config::Config;
use crate::connectors::DlrHandler;
use crate::dlr::DlrTracker;
use crate::error::{GatewayError, Result};
use crate::models::DeliveryReceipt;
use crate::ratelimit::RateLimiter;
use crate::routing::Router;
use crate::transport::Stream;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// system_id the gateway answers binds with
pub const GATEWAY_SYSTEM_ID: &str = "SMPPGW";

#[derive(Debug, Clone)]
pub struct TlsListenerSettings {
    pub listen_addr: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: String,
    pub tls: Option<TlsListenerSettings>,
    pub customer_rate_limit_per_min: i64,
    /// Both must be positive for the 10DLC check to run
    pub tendlc_hourly_limit: i64,
    pub tendlc_daily_limit: i64,
    /// Idle limit between two PDUs from a customer
    pub read_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Deadline for each rate limit or DLR tracker round trip
    pub store_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:2775".to_string(),
            tls: None,
            customer_rate_limit_per_min: 100,
            tendlc_hourly_limit: 0,
            tendlc_daily_limit: 0,
            read_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        let tls = match (
            config.tls_listen_addr(),
            &config.tls_cert_path,
            &config.tls_key_path,
        ) {
            (Some(listen_addr), Some(cert), Some(key)) => Some(TlsListenerSettings {
                listen_addr,
                cert_path: cert.clone(),
                key_path: key.clone(),
            }),
            _ => None,
        };

        Self {
            listen_addr: config.listen_addr(),
            tls,
            customer_rate_limit_per_min: config.customer_rate_limit_per_min,
            tendlc_hourly_limit: config.tendlc_hourly_limit,
            tendlc_daily_limit: config.tendlc_daily_limit,
            shutdown_timeout: config.shutdown_timeout,
            store_timeout: config.store_timeout,
            ..Default::default()
        }
    }

    pub fn tendlc_enabled(&self) -> bool {
        self.tendlc_hourly_limit > 0 && self.tendlc_daily_limit > 0
    }
}

/// Lifetime counters plus the current session count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerMetrics {
    pub active_sessions: u64,
    pub total_binds: u64,
    pub total_submit_sm: u64,
    pub total_deliver_sm: u64,
}

#[derive(Default)]
struct Counters {
    total_binds: AtomicU64,
    total_submit_sm: AtomicU64,
    total_deliver_sm: AtomicU64,
}

struct Wiring {
    router: Option<Arc<dyn Router>>,
    dlr_tracker: Option<Arc<dyn DlrTracker>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    credentials: Arc<dyn CredentialStore>,
}

pub(crate) struct ServerState {
    settings: ServerSettings,
    wiring: RwLock<Wiring>,
    /// Bound sessions keyed by system_id
    sessions: tokio::sync::RwLock<HashMap<String, Arc<Session>>>,
    counters: Counters,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    shutting_down: AtomicBool,
    local_addr: RwLock<Option<SocketAddr>>,
    tls_local_addr: RwLock<Option<SocketAddr>>,
}

/// Customer-facing SMPP server.
///
/// Cheap to clone; clones share one session registry. Install collaborators
/// with the `set_*` methods before [`start`](SmppServer::start).
#[derive(Clone)]
pub struct SmppServer {
    state: Arc<ServerState>,
}

impl SmppServer {
    /// A server that denies every bind until a credential store is installed
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            state: Arc::new(ServerState {
                settings,
                wiring: RwLock::new(Wiring {
                    router: None,
                    dlr_tracker: None,
                    rate_limiter: None,
                    credentials: Arc::new(StaticCredentials::default()),
                }),
                sessions: tokio::sync::RwLock::new(HashMap::new()),
                counters: Counters::default(),
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                shutting_down: AtomicBool::new(false),
                local_addr: RwLock::new(None),
                tls_local_addr: RwLock::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.state.settings
    }

    pub fn set_router(&self, router: Arc<dyn Router>) {
        self.state.wiring.write().router = Some(router);
    }

    pub fn set_dlr_tracker(&self, tracker: Arc<dyn DlrTracker>) {
        self.state.wiring.write().dlr_tracker = Some(tracker);
    }

    pub fn set_rate_limiter(&self, limiter: Arc<RateLimiter>) {
        self.state.wiring.write().rate_limiter = Some(limiter);
    }

    pub fn set_credential_store(&self, credentials: Arc<dyn CredentialStore>) {
        self.state.wiring.write().credentials = credentials;
    }

    pub(crate) fn router(&self) -> Option<Arc<dyn Router>> {
        self.state.wiring.read().router.clone()
    }

    pub(crate) fn dlr_tracker(&self) -> Option<Arc<dyn DlrTracker>> {
        self.state.wiring.read().dlr_tracker.clone()
    }

    pub(crate) fn rate_limiter(&self) -> Option<Arc<RateLimiter>> {
        self.state.wiring.read().rate_limiter.clone()
    }

    pub(crate) fn credentials(&self) -> Arc<dyn CredentialStore> {
        self.state.wiring.read().credentials.clone()
    }

    /// Address of the plain listener once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.state.local_addr.read()
    }

    pub fn tls_local_addr(&self) -> Option<SocketAddr> {
        *self.state.tls_local_addr.read()
    }

    /// Bind the plain listener, and the TLS listener when configured, then
    /// accept in the background until [`shutdown`](SmppServer::shutdown).
    pub async fn start(&self) -> Result<()> {
        let settings = &self.state.settings;

        let listener = bind_listener(&settings.listen_addr).await?;
        let addr = listener.local_addr()?;
        *self.state.local_addr.write() = Some(addr);
        info!(addr = %addr, "SMPP server listening");
        self.spawn_accept_loop(listener, None);

        if let Some(tls) = &settings.tls {
            let acceptor = crate::tls::load_acceptor(&tls.cert_path, &tls.key_path)?;
            let listener = bind_listener(&tls.listen_addr).await?;
            let addr = listener.local_addr()?;
            *self.state.tls_local_addr.write() = Some(addr);
            info!(addr = %addr, "SMPP TLS server listening");
            self.spawn_accept_loop(listener, Some(acceptor));
        }

        Ok(())
    }

    fn spawn_accept_loop(&self, listener: TcpListener, acceptor: Option<TlsAcceptor>) {
        let server = self.clone();
        let span = info_span!("smpp_listener", tls = acceptor.is_some());
        self.state
            .tasks
            .spawn(async move { server.accept_loop(listener, acceptor).await }.instrument(span));
    }

    async fn accept_loop(self, listener: TcpListener, acceptor: Option<TlsAcceptor>) {
        loop {
            let accepted = tokio::select! {
                _ = self.state.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (tcp, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            info!(remote_addr = %peer, "New connection");
            self.spawn_connection(tcp, peer, acceptor.clone());
        }
        debug!("Accept loop stopped");
    }

    fn spawn_connection(&self, tcp: TcpStream, peer: SocketAddr, acceptor: Option<TlsAcceptor>) {
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(remote_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let server = self.clone();
        let span = info_span!("smpp_connection", remote_addr = %peer);
        self.state.tasks.spawn(
            async move {
                let stream = match acceptor {
                    None => Stream::Plain(tcp),
                    Some(acceptor) => match crate::tls::accept(&acceptor, tcp).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                };
                handler::handle_connection(server, stream, peer).await;
            }
            .instrument(span),
        );
    }

    /// Stop accepting, close every session and wait for connection tasks.
    ///
    /// Waits at most `shutdown_timeout`. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.state.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down SMPP server");
        self.state.shutdown.cancel();

        let sessions: Vec<Arc<Session>> = self
            .state
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            session.cancel();
        }

        self.state.tasks.close();
        if tokio::time::timeout(self.state.settings.shutdown_timeout, self.state.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.state.settings.shutdown_timeout.as_secs(),
                "Timed out waiting for connections to close"
            );
        }
        info!("SMPP server stopped");
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.state.shutdown.is_cancelled()
    }

    /// Run one rate limit or tracker round trip under `store_timeout`
    pub(crate) async fn with_store_timeout<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.state.settings.store_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = limit.as_millis() as u64, "Store round trip timed out");
                Err(GatewayError::Timeout)
            }
        }
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.state.shutdown
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.state.tasks
    }

    pub(crate) fn record_bind(&self) {
        self.state.counters.total_binds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_submit(&self) {
        self.state
            .counters
            .total_submit_sm
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deliver(&self) {
        self.state
            .counters
            .total_deliver_sm
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Register a freshly bound session, replacing any session already bound
    /// under the same system_id. The replaced session is cancelled, which
    /// closes its connection.
    pub(crate) async fn register_session(&self, session: Arc<Session>) {
        let previous = self
            .state
            .sessions
            .write()
            .await
            .insert(session.system_id.clone(), session.clone());

        if let Some(previous) = previous {
            warn!(
                system_id = %session.system_id,
                old_session = %previous.id,
                old_remote_addr = %previous.remote_addr,
                "Duplicate bind; replacing existing session"
            );
            previous.cancel();
        }
    }

    /// Drop a session from the registry if it is still the registered one
    pub(crate) async fn remove_session(&self, session: &Session) {
        let mut sessions = self.state.sessions.write().await;
        if sessions
            .get(&session.system_id)
            .is_some_and(|current| current.id == session.id)
        {
            sessions.remove(&session.system_id);
            info!(
                session_id = %session.id,
                system_id = %session.system_id,
                "Session removed"
            );
        }
    }

    /// Hand a receipt to the customer's receive-capable session
    pub async fn queue_dlr_for_customer(&self, customer_id: &str, dlr: DeliveryReceipt) -> Result<()> {
        let sessions = self.state.sessions.read().await;
        let session = sessions
            .values()
            .find(|s| s.customer_id == customer_id && s.can_receive())
            .ok_or_else(|| GatewayError::NoReceiverSession(customer_id.to_string()))?;
        session.queue_dlr(dlr)?;
        debug!(customer_id = %customer_id, session_id = %session.id, "DLR queued for customer");
        Ok(())
    }

    pub async fn metrics(&self) -> ServerMetrics {
        let counters = &self.state.counters;
        ServerMetrics {
            active_sessions: self.state.sessions.read().await.len() as u64,
            total_binds: counters.total_binds.load(Ordering::Relaxed),
            total_submit_sm: counters.total_submit_sm.load(Ordering::Relaxed),
            total_deliver_sm: counters.total_deliver_sm.load(Ordering::Relaxed),
        }
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.state
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.info())
            .collect()
    }
}

#[async_trait]
impl DlrHandler for SmppServer {
    /// Update the tracked message, then queue the receipt for its customer.
    ///
    /// Receipts that match no message, or whose customer has no receiver
    /// session, are logged and dropped.
    async fn handle_dlr(&self, dlr: DeliveryReceipt) -> Result<()> {
        let Some(tracker) = self.dlr_tracker() else {
            warn!(msg_id = %dlr.message_id, "No DLR tracker installed; dropping receipt");
            return Ok(());
        };

        let Some(message) = self
            .with_store_timeout("dlr_tracker.handle_dlr", tracker.handle_dlr(&dlr))
            .await?
        else {
            return Ok(());
        };

        let mut outbound = dlr;
        if !message.vendor_msg_id.is_empty() {
            outbound.message_id = message.vendor_msg_id.clone();
        }
        if outbound.submit_date.is_none() {
            outbound.submit_date = Some(message.submitted_at);
        }

        if let Err(e) = self.queue_dlr_for_customer(&message.customer_id, outbound).await {
            warn!(
                msg_id = %message.id,
                customer_id = %message.customer_id,
                error = %e,
                "DLR not delivered to customer"
            );
        }
        Ok(())
    }
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| GatewayError::Bind {
        addr: addr.to_string(),
        source,
    })
}
