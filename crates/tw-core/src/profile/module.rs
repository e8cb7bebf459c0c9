//! Profile modules

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::types::{AppFeature, ModuleId};

/// A building block of a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module identifier, stable across edits
    #[serde(default)]
    pub id: ModuleId,
    /// Module payload
    #[serde(flatten)]
    pub kind: ModuleKind,
}

/// Module payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleKind {
    OpenVpn(OpenVpnModule),
    WireGuard(WireGuardModule),
    Provider(ProviderModule),
    Dns(DnsModule),
    Ip(IpModule),
    HttpProxy(HttpProxyModule),
    OnDemand(OnDemandModule),
}

impl Module {
    /// Create a module with a fresh ID
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            id: ModuleId::new(),
            kind,
        }
    }

    /// Whether the module establishes the connection itself
    pub fn is_connection(&self) -> bool {
        matches!(
            self.kind,
            ModuleKind::OpenVpn(_) | ModuleKind::WireGuard(_) | ModuleKind::Provider(_)
        )
    }

    /// Whether the module only governs automatic connect/disconnect triggers
    pub fn is_on_demand(&self) -> bool {
        matches!(self.kind, ModuleKind::OnDemand(_))
    }

    /// Whether the module requires a login step that cannot run headlessly
    pub fn is_interactive(&self) -> bool {
        match &self.kind {
            ModuleKind::OpenVpn(openvpn) => openvpn.interactive,
            _ => false,
        }
    }

    /// Features needed to use this module
    pub fn required_features(&self) -> BTreeSet<AppFeature> {
        let mut features = BTreeSet::new();
        match &self.kind {
            ModuleKind::OpenVpn(openvpn) if openvpn.interactive => {
                features.insert(AppFeature::InteractiveLogin);
            }
            ModuleKind::Provider(_) => {
                features.insert(AppFeature::Providers);
            }
            ModuleKind::Dns(_) => {
                features.insert(AppFeature::Dns);
            }
            ModuleKind::HttpProxy(_) => {
                features.insert(AppFeature::HttpProxy);
            }
            ModuleKind::Ip(ip) if !ip.included_routes.is_empty() || !ip.excluded_routes.is_empty() => {
                features.insert(AppFeature::Routing);
            }
            ModuleKind::OnDemand(_) => {
                features.insert(AppFeature::OnDemand);
            }
            _ => {}
        }
        features
    }

    /// Check that the module can be turned into a tunnel configuration
    pub fn validate(&self) -> Result<(), String> {
        match &self.kind {
            ModuleKind::OpenVpn(openvpn) => {
                if openvpn.remotes.is_empty() {
                    return Err("no remotes".to_string());
                }
                if !openvpn.interactive {
                    if let Some(credentials) = &openvpn.credentials {
                        if credentials.username.is_empty() {
                            return Err("empty username".to_string());
                        }
                    }
                }
                Ok(())
            }
            ModuleKind::WireGuard(wireguard) => {
                if wireguard.interface.is_empty() {
                    return Err("empty interface name".to_string());
                }
                if wireguard.config_path.as_os_str().is_empty() {
                    return Err("missing configuration path".to_string());
                }
                Ok(())
            }
            ModuleKind::Provider(provider) => {
                if provider.provider_id.is_empty() {
                    return Err("missing provider".to_string());
                }
                Ok(())
            }
            ModuleKind::Dns(dns) => {
                if dns.servers.is_empty() {
                    return Err("no DNS servers".to_string());
                }
                Ok(())
            }
            ModuleKind::Ip(ip) => match ip.mtu {
                Some(mtu) if mtu < 576 => Err(format!("MTU {} is too small", mtu)),
                _ => Ok(()),
            },
            ModuleKind::HttpProxy(proxy) => {
                if proxy.address.is_empty() || proxy.port == 0 {
                    return Err("invalid proxy endpoint".to_string());
                }
                Ok(())
            }
            ModuleKind::OnDemand(_) => Ok(()),
        }
    }
}

/// OpenVPN connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenVpnModule {
    /// Remote endpoints ("host:port/proto")
    pub remotes: Vec<String>,
    /// Data channel cipher
    pub cipher: Option<String>,
    /// Stored credentials
    pub credentials: Option<Credentials>,
    /// Whether the login must be completed by the user on every connection
    pub interactive: bool,
}

/// Username/password credentials
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// WireGuard connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardModule {
    /// Name of the tunnel interface
    pub interface: String,
    /// Path of the wg-quick configuration file
    pub config_path: PathBuf,
}

/// Transport protocol of a provider-backed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderProtocol {
    OpenVpn,
    WireGuard,
}

/// Provider-backed connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderModule {
    /// Provider identifier in the catalog
    pub provider_id: String,
    /// Protocol used with this provider
    pub protocol: ProviderProtocol,
    /// Selected server and preset, if any
    #[serde(default)]
    pub entity: Option<ProviderEntity>,
}

/// A resolved (server, preset) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntity {
    pub server: ProviderServer,
    pub preset_id: String,
    /// How to pick a server on every connection
    #[serde(default)]
    pub heuristic: Option<ProviderHeuristic>,
}

/// A server in the provider catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderServer {
    pub server_id: String,
    pub hostname: String,
    pub country_code: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Server selection heuristic applied before installing a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderHeuristic {
    /// Keep the exact server
    Exact { server_id: String },
    /// Any server in the same country
    SameCountry { country_code: String },
    /// Any server in the same country area
    SameRegion {
        country_code: String,
        area: Option<String>,
    },
}

/// DNS settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsModule {
    pub servers: Vec<IpAddr>,
    pub search_domains: Vec<String>,
}

/// IP and routing settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpModule {
    pub included_routes: Vec<String>,
    pub excluded_routes: Vec<String>,
    pub mtu: Option<u16>,
}

/// HTTP proxy settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpProxyModule {
    pub address: String,
    pub port: u16,
    pub bypass_domains: Vec<String>,
}

/// When to connect or disconnect automatically
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDemandPolicy {
    /// Connect on any network
    #[default]
    Any,
    /// Connect only on the listed networks
    Including,
    /// Connect on all but the listed networks
    Excluding,
}

/// On-demand rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnDemandModule {
    pub policy: OnDemandPolicy,
    /// Wi-Fi networks the policy applies to
    pub ssids: Vec<String>,
    pub with_mobile_network: bool,
    pub with_ethernet_network: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openvpn(interactive: bool) -> Module {
        Module::new(ModuleKind::OpenVpn(OpenVpnModule {
            remotes: vec!["vpn.example.com:1194/udp".into()],
            interactive,
            ..Default::default()
        }))
    }

    #[test]
    fn test_module_classification() {
        assert!(openvpn(false).is_connection());
        assert!(!openvpn(false).is_on_demand());

        let on_demand = Module::new(ModuleKind::OnDemand(OnDemandModule::default()));
        assert!(on_demand.is_on_demand());
        assert!(!on_demand.is_connection());
    }

    #[test]
    fn test_interactive_openvpn() {
        assert!(openvpn(true).is_interactive());
        assert!(!openvpn(false).is_interactive());
        assert!(openvpn(true)
            .required_features()
            .contains(&AppFeature::InteractiveLogin));
    }

    #[test]
    fn test_validate_rejects_empty_remotes() {
        let module = Module::new(ModuleKind::OpenVpn(OpenVpnModule::default()));
        assert_eq!(module.validate(), Err("no remotes".to_string()));
    }

    #[test]
    fn test_validate_rejects_small_mtu() {
        let module = Module::new(ModuleKind::Ip(IpModule {
            mtu: Some(100),
            ..Default::default()
        }));
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            username: "user".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_module_toml_tagging() {
        let toml = r#"
            type = "wire_guard"
            interface = "wg0"
            config_path = "/etc/wireguard/wg0.conf"
        "#;
        let module: Module = toml::from_str(toml).unwrap();
        match module.kind {
            ModuleKind::WireGuard(wg) => assert_eq!(wg.interface, "wg0"),
            other => panic!("unexpected module {:?}", other),
        }
    }
}
