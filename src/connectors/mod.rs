// ABOUTME: Outbound side of the gateway: persistent SMPP binds to upstream SMS vendors
// ABOUTME: Connectors deliver parsed delivery receipts to an installed DlrHandler

mod manager;
mod session;
mod settings;
mod store;
mod vendor;

pub use manager::ConnectorManager;
pub use settings::SessionSettings;
pub use store::{MemoryVendorStore, PostgresVendorStore, VendorStore};
pub use vendor::{VendorConnector, mask_password};

use crate::error::Result;
use crate::models::DeliveryReceipt;
use async_trait::async_trait;

/// Receives delivery receipts parsed from vendor deliver_sm PDUs.
///
/// Called on the vendor session task after the deliver_sm_resp has gone out.
#[async_trait]
pub trait DlrHandler: Send + Sync {
    async fn handle_dlr(&self, dlr: DeliveryReceipt) -> Result<()>;
}
