use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::trim_nul;
use crate::error::{CodecError, Result};

/// The `systemtype` field of a connect identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemType {
    Bootloader,
    Device,
    Host,
    Recovery,
    Sideload,
    Rescue,
    Unknown,
}

impl SystemType {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemType::Bootloader => "bootloader",
            SystemType::Device => "device",
            SystemType::Host => "host",
            SystemType::Recovery => "recovery",
            SystemType::Sideload => "sideload",
            SystemType::Rescue => "rescue",
            SystemType::Unknown => "unknown",
        }
    }
}

impl FromStr for SystemType {
    type Err = CodecError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "bootloader" => Ok(SystemType::Bootloader),
            "device" => Ok(SystemType::Device),
            "host" => Ok(SystemType::Host),
            "recovery" => Ok(SystemType::Recovery),
            "sideload" => Ok(SystemType::Sideload),
            "rescue" => Ok(SystemType::Rescue),
            "unknown" => Ok(SystemType::Unknown),
            other => Err(CodecError::Malformed(format!(
                "unknown system type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `systemtype:serial:banner` string carried by `CNXN`.
///
/// Devices fill the banner with `key=value;` pairs such as
/// `ro.product.model=Pixel;features=shell_v2,cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemIdentity {
    pub system_type: SystemType,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub banner: String,
}

impl SystemIdentity {
    pub fn new(system_type: SystemType, serial: impl Into<String>, banner: impl Into<String>) -> Self {
        Self {
            system_type,
            serial: serial.into(),
            banner: banner.into(),
        }
    }

    /// A host identity, as sent by this client.
    pub fn host(serial: impl Into<String>, banner: impl Into<String>) -> Self {
        Self::new(SystemType::Host, serial, banner)
    }

    /// Serialize as a NUL-terminated connect payload.
    pub fn to_payload(&self) -> Bytes {
        let text = self.to_string();
        let mut out = BytesMut::with_capacity(text.len() + 1);
        out.put_slice(text.as_bytes());
        out.put_u8(0);
        out.freeze()
    }

    /// Parse a connect payload received from the peer.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(trim_nul(payload))
            .map_err(|_| CodecError::Malformed("connect identity is not UTF-8".to_string()))?;

        let mut parts = text.splitn(3, ':');
        // Newer daemons may announce types this crate predates.
        let system_type = parts
            .next()
            .unwrap_or_default()
            .parse::<SystemType>()
            .unwrap_or(SystemType::Unknown);
        let serial = parts.next().unwrap_or_default();
        let banner = parts.next().unwrap_or_default();

        Ok(Self::new(system_type, serial, banner))
    }

    /// `key=value` pairs from the banner. Entries without `=` are skipped.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.banner
            .split(';')
            .filter_map(|entry| entry.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect()
    }

    /// Feature names advertised in the banner's `features=` property.
    pub fn features(&self) -> Vec<String> {
        self.properties()
            .get("features")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|feature| !feature.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features().iter().any(|f| f == feature)
    }
}

impl Default for SystemIdentity {
    fn default() -> Self {
        Self::host("", "")
    }
}

impl fmt::Display for SystemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.system_type, self.serial, self.banner)
    }
}
