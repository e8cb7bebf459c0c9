//! Tunnel configuration builder
//!
//! Turns a materialized [`Profile`] into the [`TunnelConfiguration`] handed
//! to the tunnel engine.

use tw_core::profile::{ModuleKind, Profile};
use tw_core::traits::{TunnelConfiguration, TunnelProtocol};
use tw_core::TunnelError;

/// Builds engine configurations from profiles
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    title: Option<String>,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tunnel title (defaults to the profile name)
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Validate the active modules of `profile` and build its configuration.
    ///
    /// At most one connection module may be active. A provider module must
    /// have a resolved entity. A profile without a connection module yields
    /// a configuration without a protocol.
    pub fn build(self, profile: &Profile) -> Result<TunnelConfiguration, TunnelError> {
        let mut protocol = None;
        let mut connection_id = None;

        for module in profile.active_modules() {
            module
                .validate()
                .map_err(|reason| TunnelError::MalformedModule {
                    module_id: module.id,
                    reason,
                })?;

            if !module.is_connection() {
                continue;
            }
            if let Some(first) = connection_id {
                return Err(TunnelError::MalformedModule {
                    module_id: module.id,
                    reason: format!("connection module {} is already active", first),
                });
            }
            connection_id = Some(module.id);

            protocol = Some(match &module.kind {
                ModuleKind::OpenVpn(_) => TunnelProtocol::OpenVpn,
                ModuleKind::WireGuard(_) => TunnelProtocol::WireGuard,
                ModuleKind::Provider(provider) => {
                    if provider.entity.is_none() {
                        return Err(TunnelError::MissingProviderEntity {
                            module_id: module.id,
                        });
                    }
                    provider.protocol.into()
                }
                _ => continue,
            });
        }

        Ok(TunnelConfiguration {
            profile_id: profile.id,
            title: self.title.unwrap_or_else(|| profile.name.clone()),
            protocol,
            modules: profile.active_modules().cloned().collect(),
            on_demand: profile.is_on_demand_enabled(),
        })
    }
}
