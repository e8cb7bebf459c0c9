//! `wg-quick` tunnel engine
//!
//! Hosts WireGuard tunnels by driving `wg-quick up/down` on the configuration
//! file referenced by the profile's WireGuard module. Data counters are read
//! from the interface statistics under `/sys/class/net`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::Command;
use tokio::sync::broadcast;

use tw_core::config::EngineConfig;
use tw_core::traits::{InstallOptions, TunnelConfiguration, TunnelEngine, TunnelEvent};
use tw_core::{DataCount, ErrorCode, InstanceId, ProfileId, TunnelError, TunnelStatus};

/// An installed WireGuard configuration
#[derive(Debug, Clone)]
struct InstalledTunnel {
    title: String,
    interface: String,
    config_path: PathBuf,
}

/// Tunnel engine backed by `wg-quick`
pub struct WgQuickEngine {
    instance: InstanceId,
    wg_quick_path: PathBuf,
    sysfs_net_path: PathBuf,
    installed: DashMap<ProfileId, InstalledTunnel>,
    active: Mutex<Option<ProfileId>>,
    last_error: Mutex<Option<ErrorCode>>,
    events: broadcast::Sender<TunnelEvent>,
    /// Serializes wg-quick invocations
    commands: tokio::sync::Mutex<()>,
}

impl WgQuickEngine {
    pub fn new(config: &EngineConfig, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            instance: InstanceId::new(config.instance_id.clone()),
            wg_quick_path: config.wg_quick_path.clone(),
            sysfs_net_path: config.sysfs_net_path.clone(),
            installed: DashMap::new(),
            active: Mutex::new(None),
            last_error: Mutex::new(None),
            events,
            commands: tokio::sync::Mutex::new(()),
        }
    }

    /// Profile whose tunnel is up
    pub fn active_profile_id(&self) -> Option<ProfileId> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_active(&self, profile_id: Option<ProfileId>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = profile_id;
    }

    fn set_last_error(&self, code: Option<ErrorCode>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = code;
    }

    fn installed_tunnel(&self, profile_id: &ProfileId) -> Option<InstalledTunnel> {
        self.installed.get(profile_id).map(|t| t.value().clone())
    }

    fn emit(&self, event: TunnelEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_status(&self, profile_id: &ProfileId, status: TunnelStatus) {
        self.emit(TunnelEvent::DidChangeStatus {
            instance: self.instance.clone(),
            is_enabled: self.installed.contains_key(profile_id),
            status,
            profile_id: Some(*profile_id),
        });
    }

    fn fail(&self, profile_id: &ProfileId, code: ErrorCode) -> TunnelError {
        self.set_last_error(Some(code));
        self.emit(TunnelEvent::DidFail {
            instance: self.instance.clone(),
            is_enabled: self.installed.contains_key(profile_id),
            error: Some(code),
        });
        TunnelError::Engine(code)
    }

    async fn wg_quick(&self, action: &str, config_path: &Path) -> Result<(), ErrorCode> {
        tracing::debug!("Running wg-quick {} {}", action, config_path.display());
        let output = Command::new(&self.wg_quick_path)
            .arg(action)
            .arg(config_path)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::error!("wg-quick {} failed: {}", action, stderr.trim());
                Err(classify_failure(&stderr))
            }
            Err(e) => {
                tracing::error!(
                    "Failed to execute {}: {}",
                    self.wg_quick_path.display(),
                    e
                );
                Err(ErrorCode::Unknown)
            }
        }
    }

    async fn bring_down(&self, profile_id: &ProfileId) -> Result<(), TunnelError> {
        let Some(tunnel) = self.installed_tunnel(profile_id) else {
            self.set_active(None);
            self.emit_status(profile_id, TunnelStatus::Inactive);
            return Ok(());
        };

        self.emit_status(profile_id, TunnelStatus::Deactivating);
        let result = self.wg_quick("down", &tunnel.config_path).await;
        self.set_active(None);

        match result {
            Ok(()) => {
                tracing::info!("Tunnel {} is down", tunnel.title);
                self.emit_status(profile_id, TunnelStatus::Inactive);
                Ok(())
            }
            Err(code) => Err(self.fail(profile_id, code)),
        }
    }
}

/// Map wg-quick diagnostics to an error code
pub fn classify_failure(stderr: &str) -> ErrorCode {
    let stderr = stderr.to_lowercase();
    if stderr.contains("name or service not known")
        || stderr.contains("temporary failure in name resolution")
    {
        ErrorCode::DnsFailure
    } else if stderr.contains("key is not the correct length or format") {
        ErrorCode::Crypto
    } else if stderr.contains("network is unreachable") || stderr.contains("no route to host") {
        ErrorCode::NoRouting
    } else if stderr.contains("timed out") {
        ErrorCode::Timeout
    } else if stderr.contains("permission denied") || stderr.contains("operation not permitted") {
        ErrorCode::Authentication
    } else {
        ErrorCode::Unknown
    }
}

async fn read_counter(path: &Path) -> Option<u64> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content.trim().parse().ok()
}

#[async_trait]
impl TunnelEngine for WgQuickEngine {
    fn instance_id(&self) -> InstanceId {
        self.instance.clone()
    }

    async fn install(
        &self,
        configuration: &TunnelConfiguration,
        options: &InstallOptions,
    ) -> Result<(), TunnelError> {
        let Some(wireguard) = configuration.wireguard() else {
            return Err(TunnelError::Other(anyhow::anyhow!(
                "{} has no active WireGuard module",
                configuration.title
            )));
        };
        if tokio::fs::metadata(&wireguard.config_path).await.is_err() {
            return Err(TunnelError::Other(anyhow::anyhow!(
                "WireGuard configuration {} not found",
                wireguard.config_path.display()
            )));
        }

        tracing::info!(
            "Installing tunnel {} on {} (manual: {}, on-demand: {})",
            configuration.title,
            wireguard.interface,
            options.is_manual,
            configuration.on_demand
        );
        if let Some(preferences) = &options.preferences {
            tracing::trace!("Tunnel preferences: {}", preferences);
        }

        self.installed.insert(
            configuration.profile_id,
            InstalledTunnel {
                title: configuration.title.clone(),
                interface: wireguard.interface.clone(),
                config_path: wireguard.config_path.clone(),
            },
        );
        self.emit(TunnelEvent::DidReinstall {
            instance: self.instance.clone(),
            is_enabled: true,
        });
        Ok(())
    }

    async fn connect(&self, profile_id: &ProfileId) -> Result<(), TunnelError> {
        let _commands = self.commands.lock().await;

        let tunnel = self.installed_tunnel(profile_id).ok_or_else(|| {
            TunnelError::Other(anyhow::anyhow!("profile {} is not installed", profile_id))
        })?;

        match self.active_profile_id() {
            Some(current) if current == *profile_id => {
                tracing::debug!("Tunnel {} is already up", tunnel.title);
                return Ok(());
            }
            Some(current) => {
                tracing::info!("Bringing down {} before switching tunnels", current);
                if let Err(e) = self.bring_down(&current).await {
                    tracing::warn!("Unable to bring down {}: {}", current, e);
                }
            }
            None => {}
        }

        self.emit_status(profile_id, TunnelStatus::Activating);
        match self.wg_quick("up", &tunnel.config_path).await {
            Ok(()) => {
                tracing::info!("Tunnel {} is up on {}", tunnel.title, tunnel.interface);
                self.set_active(Some(*profile_id));
                self.set_last_error(None);
                self.emit_status(profile_id, TunnelStatus::Active);
                Ok(())
            }
            Err(code) => Err(self.fail(profile_id, code)),
        }
    }

    async fn disconnect(&self, profile_id: &ProfileId) -> Result<(), TunnelError> {
        let _commands = self.commands.lock().await;

        if self.active_profile_id() != Some(*profile_id) {
            tracing::debug!("No tunnel up for {}", profile_id);
            return Ok(());
        }
        self.bring_down(profile_id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events.subscribe()
    }

    async fn data_count(&self, instance: &InstanceId) -> Option<DataCount> {
        if *instance != self.instance {
            return None;
        }
        let profile_id = self.active_profile_id()?;
        let interface = self.installed_tunnel(&profile_id)?.interface;

        let statistics = self.sysfs_net_path.join(interface).join("statistics");
        let received = read_counter(&statistics.join("rx_bytes")).await?;
        let sent = read_counter(&statistics.join("tx_bytes")).await?;
        Some(DataCount::new(received, sent))
    }

    fn last_error(&self, instance: &InstanceId) -> Option<ErrorCode> {
        if *instance != self.instance {
            return None;
        }
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
