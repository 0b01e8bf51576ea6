use std::time::Duration;

use adbwire_message::{SystemIdentity, CONNECT_AUTH_MAX_PAYLOAD, MAX_PAYLOAD, VERSION};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Connection settings: identity, limits, timeouts, and role flags.
///
/// Every field has a default, so a partial document deserializes into a
/// usable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Identity announced in `CNXN`.
    pub identity: SystemIdentity,
    /// Protocol version proposed in `CNXN`.
    pub version: u32,
    /// Largest payload this side accepts; the negotiated limit is the minimum
    /// of this and the peer's value.
    pub max_payload: u32,
    /// Payload ceiling while the handshake is in progress.
    pub max_handshake_payload: usize,
    /// How long to wait for each handshake reply.
    pub handshake_timeout: Duration,
    /// How long to wait for the user to accept a newly offered public key.
    pub auth_approval_timeout: Duration,
    /// How long `open` waits for `OKAY`.
    pub open_timeout: Duration,
    /// How long a locally closed stream waits for the peer's `CLSE`.
    pub close_timeout: Duration,
    /// Receive timeout of the dispatch loop; bounds shutdown and sweep latency.
    pub poll_interval: Duration,
    /// Send a public key once every signer has been refused.
    pub offer_public_key: bool,
    /// Accept streams opened by the peer instead of refusing them.
    pub accept_remote_open: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            identity: SystemIdentity::default(),
            version: VERSION,
            max_payload: MAX_PAYLOAD,
            max_handshake_payload: 16 * 1024,
            handshake_timeout: Duration::from_secs(10),
            auth_approval_timeout: Duration::from_secs(60),
            open_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            offer_public_key: true,
            accept_remote_open: false,
        }
    }
}

impl ConnectionConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload == 0 {
            return Err(ProtocolError::InvalidConfig(
                "max_payload must be non-zero".to_string(),
            ));
        }
        if self.max_handshake_payload < CONNECT_AUTH_MAX_PAYLOAD {
            return Err(ProtocolError::InvalidConfig(format!(
                "max_handshake_payload must be at least {CONNECT_AUTH_MAX_PAYLOAD}"
            )));
        }

        let timeouts = [
            ("handshake_timeout", self.handshake_timeout),
            ("auth_approval_timeout", self.auth_approval_timeout),
            ("open_timeout", self.open_timeout),
            ("close_timeout", self.close_timeout),
            ("poll_interval", self.poll_interval),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| value.is_zero()) {
            return Err(ProtocolError::InvalidConfig(format!(
                "{name} must be non-zero"
            )));
        }
        Ok(())
    }
}
