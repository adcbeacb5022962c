// ABOUTME: Vendor selection for outbound messages behind the Router trait
// ABOUTME: PriorityRouter picks the first connected vendor in ascending priority order

use crate::connectors::{ConnectorManager, VendorConnector};
use crate::error::{GatewayError, Result};
use crate::models::Message;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Chooses the vendor connector that carries a message
#[async_trait]
pub trait Router: Send + Sync {
    /// Pick a connector and record its id in `message.vendor_id`
    async fn route_message(&self, message: &mut Message) -> Result<Arc<VendorConnector>>;
}

pub struct PriorityRouter {
    manager: Arc<ConnectorManager>,
}

impl PriorityRouter {
    pub fn new(manager: Arc<ConnectorManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Router for PriorityRouter {
    async fn route_message(&self, message: &mut Message) -> Result<Arc<VendorConnector>> {
        let mut candidates: Vec<Arc<VendorConnector>> =
            self.manager.all_connectors().await.into_values().collect();
        if candidates.is_empty() {
            return Err(GatewayError::NoVendorAvailable);
        }
        candidates.sort_by(|a, b| {
            a.vendor()
                .priority
                .cmp(&b.vendor().priority)
                .then_with(|| a.id().cmp(b.id()))
        });

        for connector in candidates {
            if !connector.is_connected() {
                debug!(
                    msg_id = %message.id,
                    vendor_id = %connector.id(),
                    "Vendor not connected, trying next"
                );
                continue;
            }

            info!(
                msg_id = %message.id,
                vendor_id = %connector.id(),
                vendor_name = %connector.vendor().instance_name,
                priority = connector.vendor().priority,
                "Selected vendor for routing"
            );
            message.vendor_id = connector.id().to_string();
            return Ok(connector);
        }

        Err(GatewayError::NoVendorAvailable)
    }
}
