// ABOUTME: Timing knobs for an outbound vendor session: read/write deadlines, keep-alive, rebind
// ABOUTME: Validation enforces that the read deadline outlasts the enquire_link interval

use crate::error::{GatewayError, Result};
use std::time::Duration;

/// Timing configuration for a vendor session.
///
/// The read deadline must be strictly longer than the enquire_link interval,
/// otherwise an idle but healthy link would be torn down between pings.
///
/// ```rust
/// use smpp_gateway::connectors::SessionSettings;
/// use std::time::Duration;
///
/// let settings = SessionSettings::default()
///     .with_enquire_link_interval(Duration::from_secs(15))
///     .with_rebind_interval(Duration::from_secs(2));
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Longest silence tolerated from the vendor (default: 60 seconds)
    pub read_timeout: Duration,

    /// Deadline for writing one PDU (default: 10 seconds)
    pub write_timeout: Duration,

    /// Interval between keep-alive enquire_link PDUs (default: 30 seconds)
    pub enquire_link_interval: Duration,

    /// Pause between rebind attempts after the link drops (default: 5 seconds)
    pub rebind_interval: Duration,

    /// How long `send` waits for the matching submit_sm_resp (default: 10 seconds)
    pub response_timeout: Duration,

    /// Deadline for the TCP dial plus TLS handshake (default: 10 seconds)
    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            enquire_link_interval: Duration::from_secs(30),
            rebind_interval: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionSettings {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_enquire_link_interval(mut self, interval: Duration) -> Self {
        self.enquire_link_interval = interval;
        self
    }

    pub fn with_rebind_interval(mut self, interval: Duration) -> Self {
        self.rebind_interval = interval;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_timeout <= self.enquire_link_interval {
            return Err(GatewayError::Config(format!(
                "read timeout {:?} must exceed enquire_link interval {:?}",
                self.read_timeout, self.enquire_link_interval
            )));
        }
        if self.enquire_link_interval.is_zero() {
            return Err(GatewayError::Config(
                "enquire_link interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
