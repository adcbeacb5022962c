//! SMPP 3.4 gateway.
//!
//! Customers bind to [`server::SmppServer`] and submit messages. Each message
//! is routed to one upstream vendor, held over a persistent bind by a
//! [`connectors::VendorConnector`]. Delivery receipts flow back from the
//! vendor to the customer's receiver session.
//!
//! # Wiring
//!
//! ```rust,no_run
//! use smpp_gateway::connectors::{ConnectorManager, MemoryVendorStore};
//! use smpp_gateway::dlr::MemoryDlrTracker;
//! use smpp_gateway::ratelimit::{MemoryCounterStore, RateLimiter};
//! use smpp_gateway::routing::PriorityRouter;
//! use smpp_gateway::server::{ServerSettings, SmppServer, StaticCredentials};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> smpp_gateway::Result<()> {
//!     let manager = Arc::new(ConnectorManager::new(Arc::new(MemoryVendorStore::default())));
//!     manager.load_vendors().await?;
//!
//!     let server = SmppServer::new(ServerSettings::default());
//!     server.set_credential_store(Arc::new(StaticCredentials::new([("acme", "secret")])));
//!     server.set_router(Arc::new(PriorityRouter::new(manager.clone())));
//!     server.set_dlr_tracker(Arc::new(MemoryDlrTracker::new()));
//!     server.set_rate_limiter(Arc::new(RateLimiter::new(Arc::new(MemoryCounterStore::new()))));
//!     manager.set_dlr_handler(Arc::new(server.clone())).await;
//!
//!     manager.start_all().await;
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     manager.stop_all().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod connectors;
pub mod datatypes;
pub mod dlr;
pub mod error;
pub(crate) mod macros;
pub mod models;
pub mod ratelimit;
pub mod routing;
pub mod server;
pub mod tls;
pub mod transport;

#[cfg(test)]
mod tests;

pub use codec::{CodecError, Decodable, Encodable, Frame, PduHeader, PduRegistry};
pub use error::{GatewayError, Result};
