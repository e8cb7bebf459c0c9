//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use tw_core::profile::{
    DnsModule, Module, ModuleKind, OnDemandModule, OpenVpnModule, Profile, ProviderModule,
    ProviderProtocol, ProviderServer, WireGuardModule,
};
use tw_core::traits::{
    CatalogService, FeatureVerifier, InstallOptions, ProfileEvent, ProfileRepository,
    ServerFilters, SystemExtensionManager, SystemExtensionResult, TunnelConfiguration,
    TunnelEngine, TunnelEvent,
};
use tw_core::types::ConnectionStatus;
use tw_core::{
    AppFeature, DataCount, ErrorCode, InstanceId, ModuleId, ProfileId, TunnelError, TunnelStatus,
};

pub const INSTANCE: &str = "test.tunnel";

/// Engine operation recorded by [`FakeEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Install(ProfileId),
    Connect(ProfileId),
    Disconnect(ProfileId),
}

/// Scriptable tunnel engine that emits the notifications a real one would
pub struct FakeEngine {
    instance: InstanceId,
    events: broadcast::Sender<TunnelEvent>,
    calls: Mutex<Vec<Call>>,
    active: Mutex<Option<ProfileId>>,
    pub connect_error: Mutex<Option<ErrorCode>>,
    pub connection_status: Mutex<Option<ConnectionStatus>>,
    pub data: Mutex<Option<DataCount>>,
    pub last_options: Mutex<Option<InstallOptions>>,
    pub last_configuration: Mutex<Option<TunnelConfiguration>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            instance: InstanceId::from(INSTANCE),
            events,
            calls: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            connect_error: Mutex::new(None),
            connection_status: Mutex::new(None),
            data: Mutex::new(None),
            last_options: Mutex::new(None),
            last_configuration: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Emit a notification as if it came from the tunnel-hosting process
    pub fn emit(&self, event: TunnelEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self, profile_id: &ProfileId, status: TunnelStatus) {
        self.emit(TunnelEvent::DidChangeStatus {
            instance: self.instance.clone(),
            is_enabled: true,
            status,
            profile_id: Some(*profile_id),
        });
    }
}

#[async_trait]
impl TunnelEngine for FakeEngine {
    fn instance_id(&self) -> InstanceId {
        self.instance.clone()
    }

    async fn install(
        &self,
        configuration: &TunnelConfiguration,
        options: &InstallOptions,
    ) -> Result<(), TunnelError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Install(configuration.profile_id));
        *self.last_options.lock().unwrap() = Some(options.clone());
        *self.last_configuration.lock().unwrap() = Some(configuration.clone());
        self.emit(TunnelEvent::DidReinstall {
            instance: self.instance.clone(),
            is_enabled: true,
        });
        Ok(())
    }

    async fn connect(&self, profile_id: &ProfileId) -> Result<(), TunnelError> {
        self.calls.lock().unwrap().push(Call::Connect(*profile_id));
        self.emit_status(profile_id, TunnelStatus::Activating);

        let error = *self.connect_error.lock().unwrap();
        if let Some(code) = error {
            self.emit(TunnelEvent::DidFail {
                instance: self.instance.clone(),
                is_enabled: true,
                error: Some(code),
            });
            return Err(TunnelError::Engine(code));
        }

        *self.active.lock().unwrap() = Some(*profile_id);
        self.emit_status(profile_id, TunnelStatus::Active);
        Ok(())
    }

    async fn disconnect(&self, profile_id: &ProfileId) -> Result<(), TunnelError> {
        self.calls.lock().unwrap().push(Call::Disconnect(*profile_id));

        let was_active = {
            let mut active = self.active.lock().unwrap();
            if *active == Some(*profile_id) {
                *active = None;
                true
            } else {
                false
            }
        };
        if was_active {
            self.emit_status(profile_id, TunnelStatus::Deactivating);
            self.emit_status(profile_id, TunnelStatus::Inactive);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events.subscribe()
    }

    async fn data_count(&self, _instance: &InstanceId) -> Option<DataCount> {
        *self.data.lock().unwrap()
    }

    fn last_error(&self, _instance: &InstanceId) -> Option<ErrorCode> {
        None
    }

    fn connection_status(&self, _instance: &InstanceId) -> Option<ConnectionStatus> {
        *self.connection_status.lock().unwrap()
    }
}

/// System extension manager returning scripted results
pub struct FakeSystemExtension {
    current: Mutex<SystemExtensionResult>,
    install_result: SystemExtensionResult,
    pub installs: AtomicUsize,
    pub loads: AtomicUsize,
}

impl FakeSystemExtension {
    pub fn new(current: SystemExtensionResult, install_result: SystemExtensionResult) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(current),
            install_result,
            installs: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SystemExtensionManager for FakeSystemExtension {
    fn current_result(&self) -> SystemExtensionResult {
        *self.current.lock().unwrap()
    }

    async fn load(&self) -> Result<SystemExtensionResult, TunnelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.current_result())
    }

    async fn install(&self) -> Result<SystemExtensionResult, TunnelError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = self.install_result;
        Ok(self.install_result)
    }
}

/// Profile repository publishing whatever the test sends
pub struct FakeRepository {
    pub events: broadcast::Sender<ProfileEvent>,
    pub observe_calls: AtomicUsize,
    failures: AtomicUsize,
}

impl FakeRepository {
    /// A repository whose first `failures` loads fail
    pub fn new(failures: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            observe_calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(failures),
        })
    }

    pub fn save(&self, profile: Profile, previous: Option<Profile>) {
        let _ = self.events.send(ProfileEvent::Save { profile, previous });
    }
}

#[async_trait]
impl ProfileRepository for FakeRepository {
    async fn observe_local(&self) -> Result<(), TunnelError> {
        self.observe_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TunnelError::Other(anyhow::anyhow!("store unavailable")));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.events.subscribe()
    }
}

/// Feature verifier with a test-controlled set of eligible features
pub struct FakeVerifier {
    pub features: watch::Sender<BTreeSet<AppFeature>>,
    pub reloads: AtomicUsize,
}

impl FakeVerifier {
    pub fn new(features: BTreeSet<AppFeature>) -> Arc<Self> {
        let (tx, _) = watch::channel(features);
        Arc::new(Self {
            features: tx,
            reloads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FeatureVerifier for FakeVerifier {
    fn verify(&self, profile: &Profile) -> Result<(), TunnelError> {
        let eligible = self.features.borrow();
        let missing: BTreeSet<_> = profile
            .required_features()
            .into_iter()
            .filter(|f| !eligible.contains(f))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TunnelError::IneligibleProfile {
                required_features: missing,
            })
        }
    }

    fn eligible_features(&self) -> watch::Receiver<BTreeSet<AppFeature>> {
        self.features.subscribe()
    }

    async fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Catalog counting index refreshes
#[derive(Default)]
pub struct FakeCatalog {
    pub fetches: AtomicUsize,
    pub servers: Vec<ProviderServer>,
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn fetch_index(&self) -> Result<(), TunnelError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Err(TunnelError::Other(anyhow::anyhow!("offline")))
    }

    async fn servers(
        &self,
        _provider_id: &str,
        _filters: &ServerFilters,
    ) -> Result<Vec<ProviderServer>, TunnelError> {
        Ok(self.servers.clone())
    }
}

/// Every feature a test profile may need
pub fn all_features() -> BTreeSet<AppFeature> {
    [
        AppFeature::Dns,
        AppFeature::HttpProxy,
        AppFeature::Routing,
        AppFeature::OnDemand,
        AppFeature::Providers,
        AppFeature::InteractiveLogin,
        AppFeature::Sharing,
    ]
    .into_iter()
    .collect()
}

/// A profile with an OpenVPN, a DNS and an on-demand module, all active
pub struct TestProfile {
    pub profile: Profile,
    pub vpn_id: ModuleId,
    pub dns_id: ModuleId,
    pub on_demand_id: ModuleId,
}

impl TestProfile {
    pub fn new(name: &str) -> Self {
        let vpn = Module::new(ModuleKind::OpenVpn(OpenVpnModule {
            remotes: vec!["vpn.example.com:1194/udp".into()],
            ..Default::default()
        }));
        let dns = Module::new(ModuleKind::Dns(DnsModule {
            servers: vec!["1.1.1.1".parse().unwrap()],
            ..Default::default()
        }));
        let on_demand = Module::new(ModuleKind::OnDemand(OnDemandModule::default()));
        let (vpn_id, dns_id, on_demand_id) = (vpn.id, dns.id, on_demand.id);

        Self {
            profile: Profile::new(name)
                .with_module(vpn, true)
                .with_module(dns, true)
                .with_module(on_demand, true),
            vpn_id,
            dns_id,
            on_demand_id,
        }
    }

    /// Same profile with different DNS servers
    pub fn with_dns_edit(&self) -> Profile {
        self.profile.clone().saving_module(Module {
            id: self.dns_id,
            kind: ModuleKind::Dns(DnsModule {
                servers: vec!["9.9.9.9".parse().unwrap()],
                ..Default::default()
            }),
        })
    }

    /// Same profile with edited on-demand rules
    pub fn with_on_demand_edit(&self) -> Profile {
        self.profile.clone().saving_module(Module {
            id: self.on_demand_id,
            kind: ModuleKind::OnDemand(OnDemandModule {
                ssids: vec!["Home".into()],
                with_ethernet_network: true,
                ..Default::default()
            }),
        })
    }

    /// Same profile with a different OpenVPN data cipher
    pub fn with_cipher_edit(&self) -> Profile {
        self.profile.clone().saving_module(Module {
            id: self.vpn_id,
            kind: ModuleKind::OpenVpn(OpenVpnModule {
                remotes: vec!["vpn.example.com:1194/udp".into()],
                cipher: Some("AES-256-GCM".into()),
                ..Default::default()
            }),
        })
    }

    /// Same profile whose OpenVPN login becomes interactive
    pub fn with_interactive_login(&self) -> Profile {
        self.profile.clone().saving_module(Module {
            id: self.vpn_id,
            kind: ModuleKind::OpenVpn(OpenVpnModule {
                remotes: vec!["vpn.example.com:1194/udp".into()],
                interactive: true,
                ..Default::default()
            }),
        })
    }
}

pub fn wireguard_profile(name: &str) -> Profile {
    Profile::new(name).with_module(
        Module::new(ModuleKind::WireGuard(WireGuardModule {
            interface: "wg0".into(),
            config_path: "/etc/wireguard/wg0.conf".into(),
        })),
        true,
    )
}

pub fn unresolved_provider_profile(name: &str) -> (Profile, ModuleId) {
    let module = Module::new(ModuleKind::Provider(ProviderModule {
        provider_id: "acme".into(),
        protocol: ProviderProtocol::WireGuard,
        entity: None,
    }));
    let module_id = module.id;
    (Profile::new(name).with_module(module, true), module_id)
}

/// Wait until `condition` holds, failing the test after five seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
