// ABOUTME: ConnectorManager owns one VendorConnector per configured vendor and supervises them
// ABOUTME: Loads vendors from a VendorStore, starts/stops binds, rebuilds a connector on reconfigure

use crate::connectors::settings::SessionSettings;
use crate::connectors::store::VendorStore;
use crate::connectors::vendor::VendorConnector;
use crate::connectors::DlrHandler;
use crate::error::{GatewayError, Result};
use crate::models::ConnectorHealth;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, info_span, warn};

pub struct ConnectorManager {
    store: Arc<dyn VendorStore>,
    settings: SessionSettings,
    connectors: RwLock<HashMap<String, Arc<VendorConnector>>>,
    dlr_handler: parking_lot::RwLock<Option<Arc<dyn DlrHandler>>>,
    tasks: TaskTracker,
}

impl ConnectorManager {
    pub fn new(store: Arc<dyn VendorStore>) -> Self {
        Self::with_settings(store, SessionSettings::default())
    }

    /// Session settings applied to every connector this manager builds
    pub fn with_settings(store: Arc<dyn VendorStore>, settings: SessionSettings) -> Self {
        Self {
            store,
            settings,
            connectors: RwLock::new(HashMap::new()),
            dlr_handler: parking_lot::RwLock::new(None),
            tasks: TaskTracker::new(),
        }
    }

    /// Build and register a connector for every active SMPP vendor.
    ///
    /// Returns how many were loaded. A connector already registered under the
    /// same id is disconnected and replaced.
    pub async fn load_vendors(&self) -> Result<usize> {
        let vendors = self.store.active_vendors().await?;
        let count = vendors.len();

        for vendor in vendors {
            info!(
                vendor_id = %vendor.id,
                vendor_name = %vendor.instance_name,
                host = %vendor.host,
                port = vendor.port,
                "Loaded vendor"
            );
            let connector = self.build(vendor);
            let replaced = self
                .connectors
                .write()
                .await
                .insert(connector.id().to_string(), connector);
            if let Some(old) = replaced {
                old.disconnect().await?;
            }
        }

        info!(count, "Vendors loaded");
        Ok(count)
    }

    /// Connect every registered vendor in the background.
    ///
    /// Failures are logged per vendor; connectors that fail stay disconnected
    /// until reconnected.
    pub async fn start_all(&self) {
        let connectors = self.all_connectors().await;
        for (vendor_id, connector) in connectors {
            info!(vendor_id = %vendor_id, "Starting vendor connection");
            self.spawn_connect(vendor_id, connector);
        }
    }

    pub async fn connector(&self, vendor_id: &str) -> Result<Arc<VendorConnector>> {
        self.connectors
            .read()
            .await
            .get(vendor_id)
            .cloned()
            .ok_or_else(|| GatewayError::VendorNotFound(vendor_id.to_string()))
    }

    /// Snapshot of the connector map
    pub async fn all_connectors(&self) -> HashMap<String, Arc<VendorConnector>> {
        self.connectors.read().await.clone()
    }

    pub async fn health_check(&self) -> HashMap<String, ConnectorHealth> {
        self.connectors
            .read()
            .await
            .iter()
            .map(|(id, connector)| (id.clone(), connector.health()))
            .collect()
    }

    /// Disconnect a vendor, reload its row and swap in a fresh connector.
    ///
    /// The new connector binds in the background.
    pub async fn reconnect_vendor(&self, vendor_id: &str) -> Result<()> {
        let existing = self.connector(vendor_id).await?;
        info!(vendor_id = %vendor_id, "Reconnecting vendor");

        if let Err(e) = existing.disconnect().await {
            warn!(vendor_id = %vendor_id, error = %e, "Error disconnecting vendor");
        }

        let vendor = self.store.vendor(vendor_id).await?;
        let replacement = self.build(vendor);
        self.connectors
            .write()
            .await
            .insert(vendor_id.to_string(), replacement.clone());

        self.spawn_connect(vendor_id.to_string(), replacement);
        info!(vendor_id = %vendor_id, "Vendor reconnection initiated");
        Ok(())
    }

    pub async fn disconnect_vendor(&self, vendor_id: &str) -> Result<()> {
        let connector = self.connector(vendor_id).await?;
        info!(vendor_id = %vendor_id, "Disconnecting vendor");
        connector.disconnect().await
    }

    pub async fn connect_vendor(&self, vendor_id: &str) -> Result<()> {
        let connector = self.connector(vendor_id).await?;
        info!(vendor_id = %vendor_id, "Connecting vendor");
        connector.connect().await
    }

    /// Install the DLR handler on current connectors and every one built later
    pub async fn set_dlr_handler(&self, handler: Arc<dyn DlrHandler>) {
        *self.dlr_handler.write() = Some(handler.clone());
        for connector in self.connectors.read().await.values() {
            connector.set_dlr_handler(handler.clone());
        }
    }

    /// Disconnect every vendor and close the store
    pub async fn stop_all(&self) {
        info!("Stopping all vendor connections");
        self.tasks.close();
        self.tasks.wait().await;

        let connectors = self.all_connectors().await;
        for (vendor_id, connector) in connectors {
            if let Err(e) = connector.disconnect().await {
                error!(vendor_id = %vendor_id, error = %e, "Error disconnecting from vendor");
            }
        }

        self.store.close().await;
        info!("All vendor connections stopped");
    }

    fn build(&self, vendor: crate::models::Vendor) -> Arc<VendorConnector> {
        let connector = VendorConnector::with_settings(vendor, self.settings.clone());
        if let Some(handler) = self.dlr_handler.read().clone() {
            connector.set_dlr_handler(handler);
        }
        Arc::new(connector)
    }

    fn spawn_connect(&self, vendor_id: String, connector: Arc<VendorConnector>) {
        let span = info_span!("vendor_connect", vendor_id = %vendor_id);
        self.tasks.spawn(
            async move {
                if let Err(e) = connector.connect().await {
                    error!(error = %e, "Failed to connect to vendor");
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::MemoryVendorStore;
    use crate::models::{ConnectionStatus, DeliveryReceipt, Vendor};
    use async_trait::async_trait;

    struct NullHandler;

    #[async_trait]
    impl DlrHandler for NullHandler {
        async fn handle_dlr(&self, _dlr: DeliveryReceipt) -> Result<()> {
            Ok(())
        }
    }

    fn vendor(id: &str, priority: i32) -> Vendor {
        Vendor {
            id: id.to_string(),
            instance_name: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            priority,
            is_active: true,
            ..Default::default()
        }
    }

    fn manager(vendors: Vec<Vendor>) -> (ConnectorManager, Arc<MemoryVendorStore>) {
        let store = Arc::new(MemoryVendorStore::new(vendors));
        (ConnectorManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_load_vendors_registers_connectors() {
        let (manager, _) = manager(vec![vendor("a", 1), vendor("b", 2)]);
        assert_eq!(manager.load_vendors().await.unwrap(), 2);

        let all = manager.all_connectors().await;
        assert_eq!(all.len(), 2);
        assert!(manager.connector("a").await.is_ok());

        let health = manager.health_check().await;
        assert_eq!(health["b"].status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_unknown_vendor_is_not_found() {
        let (manager, _) = manager(vec![]);
        manager.load_vendors().await.unwrap();

        assert!(matches!(
            manager.connect_vendor("nope").await,
            Err(GatewayError::VendorNotFound(_))
        ));
        assert!(matches!(
            manager.disconnect_vendor("nope").await,
            Err(GatewayError::VendorNotFound(_))
        ));
        assert!(matches!(
            manager.reconnect_vendor("nope").await,
            Err(GatewayError::VendorNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_swaps_in_reloaded_vendor() {
        let (manager, store) = manager(vec![vendor("a", 1)]);
        manager.load_vendors().await.unwrap();
        let before = manager.connector("a").await.unwrap();

        let mut changed = vendor("a", 1);
        changed.host = "127.0.0.2".to_string();
        store.upsert(changed);

        manager.reconnect_vendor("a").await.unwrap();
        let after = manager.connector("a").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.vendor().host, "127.0.0.2");

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_handler_installed_before_load_reaches_new_connectors() {
        let (manager, _) = manager(vec![vendor("a", 1)]);
        manager.set_dlr_handler(Arc::new(NullHandler)).await;
        manager.load_vendors().await.unwrap();

        let connector = manager.connector("a").await.unwrap();
        assert!(connector.has_dlr_handler());
    }
}
