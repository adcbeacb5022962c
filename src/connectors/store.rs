// ABOUTME: Vendor configuration sources: PostgreSQL via deadpool-postgres, and in-memory for tests
// ABOUTME: Only active SMPP vendors are returned, ordered by ascending priority

use crate::config::PostgresConfig;
use crate::error::{GatewayError, Result};
use crate::models::Vendor;
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use parking_lot::RwLock;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info};

const VENDOR_COLUMNS: &str = "id::text, instance_name, display_name, host, port, use_tls, \
     bind_type, throughput, priority, is_primary, is_active, \
     COALESCE(username, ''), COALESCE(password, ''), COALESCE(system_type, 'smpp')";

/// Durable source of vendor configuration
#[async_trait]
pub trait VendorStore: Send + Sync {
    /// Active SMPP vendors by ascending priority.
    ///
    /// Rows that cannot be read are logged and skipped; failure of the query
    /// itself is returned.
    async fn active_vendors(&self) -> Result<Vec<Vendor>>;

    /// One SMPP vendor by id, active or not
    async fn vendor(&self, id: &str) -> Result<Vendor>;

    async fn close(&self);
}

pub struct PostgresVendorStore {
    pool: Pool,
}

impl PostgresVendorStore {
    pub fn new(config: &PostgresConfig) -> Result<Self> {
        info!(
            host = %config.host,
            dbname = %config.dbname,
            max_size = config.pool_size,
            "Creating PostgreSQL connection pool"
        );

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .user(&config.user)
            .password(&config.password)
            .dbname(&config.dbname);

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(pg_config, NoTls, manager_config);

        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| GatewayError::Database(e.to_string()))?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Round-trip a trivial query so startup fails fast on a bad DSN
    pub async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        debug!("PostgreSQL reachable");
        Ok(())
    }
}

#[async_trait]
impl VendorStore for PostgresVendorStore {
    async fn active_vendors(&self) -> Result<Vec<Vendor>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {VENDOR_COLUMNS} FROM messaging.vendors \
             WHERE provider_type = 'smpp' AND is_active = true \
             ORDER BY priority ASC"
        );
        let rows = client.query(query.as_str(), &[]).await?;

        let mut vendors = Vec::with_capacity(rows.len());
        for row in &rows {
            match vendor_from_row(row) {
                Ok(vendor) => vendors.push(vendor),
                Err(e) => error!(error = %e, "Failed to scan vendor row"),
            }
        }
        Ok(vendors)
    }

    async fn vendor(&self, id: &str) -> Result<Vendor> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {VENDOR_COLUMNS} FROM messaging.vendors \
             WHERE id::text = $1 AND provider_type = 'smpp'"
        );
        let row = client
            .query_opt(query.as_str(), &[&id])
            .await?
            .ok_or_else(|| GatewayError::VendorNotFound(id.to_string()))?;
        vendor_from_row(&row)
    }

    async fn close(&self) {
        self.pool.close();
        info!("PostgreSQL pool closed");
    }
}

fn vendor_from_row(row: &Row) -> Result<Vendor> {
    let port: i32 = row.try_get(4)?;
    let bind_type: String = row.try_get(6)?;
    let throughput: i32 = row.try_get(7)?;

    Ok(Vendor {
        id: row.try_get(0)?,
        instance_name: row.try_get(1)?,
        display_name: row.try_get(2)?,
        host: row.try_get(3)?,
        port: u16::try_from(port)
            .map_err(|_| GatewayError::Database(format!("vendor port {port} out of range")))?,
        use_tls: row.try_get(5)?,
        bind_type: bind_type.parse().map_err(GatewayError::Database)?,
        throughput: i64::from(throughput),
        priority: row.try_get(8)?,
        is_primary: row.try_get(9)?,
        is_active: row.try_get(10)?,
        username: row.try_get(11)?,
        password: row.try_get(12)?,
        system_type: row.try_get(13)?,
    })
}

/// Vendor rows held in memory
#[derive(Default)]
pub struct MemoryVendorStore {
    vendors: RwLock<Vec<Vendor>>,
}

impl MemoryVendorStore {
    pub fn new(vendors: Vec<Vendor>) -> Self {
        Self {
            vendors: RwLock::new(vendors),
        }
    }

    /// Insert or replace a vendor by id
    pub fn upsert(&self, vendor: Vendor) {
        let mut vendors = self.vendors.write();
        match vendors.iter_mut().find(|v| v.id == vendor.id) {
            Some(existing) => *existing = vendor,
            None => vendors.push(vendor),
        }
    }
}

#[async_trait]
impl VendorStore for MemoryVendorStore {
    async fn active_vendors(&self) -> Result<Vec<Vendor>> {
        let mut vendors: Vec<Vendor> = self
            .vendors
            .read()
            .iter()
            .filter(|v| v.is_active)
            .cloned()
            .collect();
        vendors.sort_by_key(|v| v.priority);
        Ok(vendors)
    }

    async fn vendor(&self, id: &str) -> Result<Vendor> {
        self.vendors
            .read()
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| GatewayError::VendorNotFound(id.to_string()))
    }

    async fn close(&self) {}
}
