//! Tunnel engine traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{ErrorCode, TunnelError};
use crate::profile::{Module, ModuleKind, ProviderProtocol, WireGuardModule};
use crate::types::{ConnectionStatus, DataCount, InstanceId, ProfileId, TunnelStatus};

/// Protocol spoken by the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelProtocol {
    OpenVpn,
    WireGuard,
}

impl From<ProviderProtocol> for TunnelProtocol {
    fn from(protocol: ProviderProtocol) -> Self {
        match protocol {
            ProviderProtocol::OpenVpn => TunnelProtocol::OpenVpn,
            ProviderProtocol::WireGuard => TunnelProtocol::WireGuard,
        }
    }
}

/// Validated configuration handed to the tunnel engine
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfiguration {
    /// Profile this configuration was built from
    pub profile_id: ProfileId,
    /// Title shown by the OS for this tunnel
    pub title: String,
    /// Protocol of the connection module, if the profile has one
    pub protocol: Option<TunnelProtocol>,
    /// Active modules, in profile order
    pub modules: Vec<Module>,
    /// Whether on-demand rules are installed with the tunnel
    pub on_demand: bool,
}

impl TunnelConfiguration {
    /// The active connection module
    pub fn connection_module(&self) -> Option<&Module> {
        self.modules.iter().find(|m| m.is_connection())
    }

    /// The active WireGuard settings, if the tunnel is a plain WireGuard one
    pub fn wireguard(&self) -> Option<&WireGuardModule> {
        self.modules.iter().find_map(|m| match &m.kind {
            ModuleKind::WireGuard(wireguard) => Some(wireguard),
            _ => None,
        })
    }
}

/// Side-channel options passed along with an install
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Installed by an explicit user action rather than an on-demand trigger
    pub is_manual: bool,
    /// Serialized application preferences (JSON)
    pub preferences: Option<String>,
}

/// Notifications emitted by the tunnel-hosting process
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelEvent {
    /// The tunnel configuration was (re)installed
    DidReinstall {
        instance: InstanceId,
        is_enabled: bool,
    },
    /// The tunnel status changed
    DidChangeStatus {
        instance: InstanceId,
        is_enabled: bool,
        status: TunnelStatus,
        /// Profile the session belongs to, when known by the engine
        profile_id: Option<ProfileId>,
    },
    /// The tunnel failed
    DidFail {
        instance: InstanceId,
        is_enabled: bool,
        error: Option<ErrorCode>,
    },
}

impl TunnelEvent {
    /// Instance the event originates from
    pub fn instance(&self) -> &InstanceId {
        match self {
            TunnelEvent::DidReinstall { instance, .. }
            | TunnelEvent::DidChangeStatus { instance, .. }
            | TunnelEvent::DidFail { instance, .. } => instance,
        }
    }
}

/// Abstraction over the platform tunnel engine
///
/// Implementations host the actual VPN session (OS VPN API or a bundled
/// protocol implementation). All operations await the engine's response.
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Identifier of the tunnel instance this engine hosts
    fn instance_id(&self) -> InstanceId;

    /// Install a configuration without starting traffic
    async fn install(
        &self,
        configuration: &TunnelConfiguration,
        options: &InstallOptions,
    ) -> Result<(), TunnelError>;

    /// Start traffic for the installed configuration
    async fn connect(&self, profile_id: &ProfileId) -> Result<(), TunnelError>;

    /// Stop traffic. Succeeds when there is no session.
    async fn disconnect(&self, profile_id: &ProfileId) -> Result<(), TunnelError>;

    /// Subscribe to engine notifications
    fn subscribe(&self) -> broadcast::Receiver<TunnelEvent>;

    /// Current data counter of an instance
    async fn data_count(&self, instance: &InstanceId) -> Option<DataCount>;

    /// Last error recorded by an instance
    fn last_error(&self, instance: &InstanceId) -> Option<ErrorCode>;

    /// Fine-grained protocol status of an instance
    fn connection_status(&self, _instance: &InstanceId) -> Option<ConnectionStatus> {
        None
    }
}
