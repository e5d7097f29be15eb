//! Transports and radio access technologies.

use serde::{Deserialize, Serialize};

/// An access path a bearer can run over.
///
/// The set is small and fixed: bearers either ride the cellular modem
/// directly or tunnel over a WLAN-backed path. Handover moves a live
/// bearer from one to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Cellular,
    Wlan,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Cellular => "cellular",
            Transport::Wlan => "wlan",
        }
    }

    /// The other transport. Useful when reasoning about handover targets.
    pub fn other(&self) -> Transport {
        match self {
            Transport::Cellular => Transport::Wlan,
            Transport::Wlan => Transport::Cellular,
        }
    }

    /// All transports, in declaration order.
    pub const ALL: [Transport; 2] = [Transport::Cellular, Transport::Wlan];
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Transport {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cellular" => Ok(Transport::Cellular),
            "wlan" => Ok(Transport::Wlan),
            other => Err(UnknownTransport(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown transport name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport: {0:?}")]
pub struct UnknownTransport(pub String);

/// Radio access technology currently serving a transport.
///
/// Profiles restrict which technologies they may be dialled on, and the
/// bearer records the technology it was set up with so a later camp on a
/// different technology can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadioTech {
    #[default]
    Unknown,
    Gsm,
    Hspa,
    Lte,
    Nr,
    Iwlan,
}

impl RadioTech {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioTech::Unknown => "unknown",
            RadioTech::Gsm => "gsm",
            RadioTech::Hspa => "hspa",
            RadioTech::Lte => "lte",
            RadioTech::Nr => "nr",
            RadioTech::Iwlan => "iwlan",
        }
    }

    /// Which transport this technology camps on.
    pub fn transport(&self) -> Transport {
        match self {
            RadioTech::Iwlan => Transport::Wlan,
            _ => Transport::Cellular,
        }
    }
}

impl std::fmt::Display for RadioTech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
