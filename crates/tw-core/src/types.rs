//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Stable identifier of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    /// Create a new random profile ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a profile ID from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ProfileId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Stable identifier of a module within a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub Uuid);

impl ModuleId {
    /// Create a new random module ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a tunnel instance hosted by the tunnel engine.
///
/// Correlates an engine notification with the instance an orchestrator owns
/// (e.g. the bundle identifier of the hosting process).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Create a new instance ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    /// No session
    #[default]
    Inactive,
    /// Session is being established
    Activating,
    /// Session is up
    Active,
    /// Session is being torn down
    Deactivating,
}

impl TunnelStatus {
    /// Whether the tunnel is up or on its way up
    pub fn is_engaged(self) -> bool {
        matches!(self, TunnelStatus::Active | TunnelStatus::Activating)
    }

    /// Refine an `Active` status with the fine-grained connection status
    /// reported by the tunnel engine. Other statuses are returned unchanged.
    pub fn with_connection_status(self, connection: Option<ConnectionStatus>) -> Self {
        match (self, connection) {
            (TunnelStatus::Active, Some(ConnectionStatus::Connecting)) => TunnelStatus::Activating,
            (TunnelStatus::Active, Some(ConnectionStatus::Connected)) => TunnelStatus::Active,
            (TunnelStatus::Active, Some(ConnectionStatus::Disconnecting)) => {
                TunnelStatus::Deactivating
            }
            (TunnelStatus::Active, Some(ConnectionStatus::Disconnected)) => TunnelStatus::Inactive,
            (status, _) => status,
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Inactive => write!(f, "inactive"),
            TunnelStatus::Activating => write!(f, "activating"),
            TunnelStatus::Active => write!(f, "active"),
            TunnelStatus::Deactivating => write!(f, "deactivating"),
        }
    }
}

/// Connection status of the protocol session inside an active tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Minimal de-duplicated state of a tunnel instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtomicState {
    /// Whether the tunnel configuration is enabled in the OS
    pub is_enabled: bool,
    /// Current tunnel status
    pub status: TunnelStatus,
}

impl AtomicState {
    /// Create a new atomic state
    pub fn new(is_enabled: bool, status: TunnelStatus) -> Self {
        Self { is_enabled, status }
    }
}

/// Bytes received and sent through the tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCount {
    /// Bytes received
    pub received: u64,
    /// Bytes sent
    pub sent: u64,
}

impl DataCount {
    pub fn new(received: u64, sent: u64) -> Self {
        Self { received, sent }
    }
}

/// Published state of a profile known to the tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveProfileState {
    /// Tunnel status
    pub status: TunnelStatus,
    /// Whether the profile was installed with on-demand rules
    pub on_demand: bool,
    /// Last polled data counter, only while active
    pub data_count: Option<DataCount>,
    /// Last error reported by the tunnel engine
    pub last_error_code: Option<ErrorCode>,
}

impl ActiveProfileState {
    /// An inactive state with no counters or errors
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Features subject to eligibility verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppFeature {
    /// DNS settings module
    Dns,
    /// HTTP proxy module
    HttpProxy,
    /// Custom routing in the IP module
    Routing,
    /// On-demand rules
    OnDemand,
    /// Provider-backed connection modules
    Providers,
    /// Interactive login
    InteractiveLogin,
    /// Profile sharing across devices
    Sharing,
}

impl fmt::Display for AppFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppFeature::Dns => write!(f, "dns"),
            AppFeature::HttpProxy => write!(f, "http-proxy"),
            AppFeature::Routing => write!(f, "routing"),
            AppFeature::OnDemand => write!(f, "on-demand"),
            AppFeature::Providers => write!(f, "providers"),
            AppFeature::InteractiveLogin => write!(f, "interactive-login"),
            AppFeature::Sharing => write!(f, "sharing"),
        }
    }
}
