//! Profile model
//!
//! A profile is an immutable, named collection of modules identified by a
//! stable [`ProfileId`]. Editing a profile produces a new value with the same
//! ID; [`Profile::differences`] compares two such values.

mod diff;
mod module;

pub use diff::ProfileDiff;
pub use module::{
    Credentials, DnsModule, HttpProxyModule, IpModule, Module, ModuleKind, OnDemandModule,
    OnDemandPolicy, OpenVpnModule, ProviderEntity, ProviderHeuristic, ProviderModule,
    ProviderProtocol, ProviderServer, WireGuardModule,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{AppFeature, ModuleId, ProfileId};

/// Profile-wide behavior flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileBehavior {
    /// Disconnect when the device goes to sleep
    pub disconnects_on_sleep: bool,
    /// Route all traffic, including local networks
    pub includes_all_networks: bool,
}

/// A named, versioned VPN configuration composed of modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable identity; required when loading from a file
    pub id: ProfileId,
    pub name: String,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub active_module_ids: BTreeSet<ModuleId>,
    #[serde(default)]
    pub behavior: ProfileBehavior,
}

impl Profile {
    /// Create an empty profile with a fresh ID
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(),
            name: name.into(),
            modules: Vec::new(),
            active_module_ids: BTreeSet::new(),
            behavior: ProfileBehavior::default(),
        }
    }

    /// Append a module, optionally marking it active
    pub fn with_module(mut self, module: Module, active: bool) -> Self {
        if active {
            self.active_module_ids.insert(module.id);
        }
        self.modules.push(module);
        self
    }

    /// Replace the behavior flags
    pub fn with_behavior(mut self, behavior: ProfileBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Rename the profile
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the module with the same ID, or append it if missing
    pub fn saving_module(mut self, module: Module) -> Self {
        match self.modules.iter_mut().find(|m| m.id == module.id) {
            Some(existing) => *existing = module,
            None => self.modules.push(module),
        }
        self
    }

    /// Look up a module by ID
    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.iter().find(|m| m.id == *id)
    }

    /// Whether the module with this ID is active
    pub fn is_active_module(&self, id: &ModuleId) -> bool {
        self.active_module_ids.contains(id)
    }

    /// Active modules, in profile order
    pub fn active_modules(&self) -> impl Iterator<Item = &Module> {
        self.modules
            .iter()
            .filter(move |m| self.active_module_ids.contains(&m.id))
    }

    /// The first active connection module
    pub fn active_connection_module(&self) -> Option<&Module> {
        self.active_modules().find(|m| m.is_connection())
    }

    /// The active provider module, if the connection is provider-backed
    pub fn active_provider_module(&self) -> Option<(&ModuleId, &ProviderModule)> {
        self.active_modules().find_map(|m| match &m.kind {
            ModuleKind::Provider(provider) => Some((&m.id, provider)),
            _ => None,
        })
    }

    /// Whether connecting requires a login step the user must complete
    pub fn is_interactive(&self) -> bool {
        self.active_connection_module()
            .map(Module::is_interactive)
            .unwrap_or(false)
    }

    /// Whether an on-demand module is active
    pub fn is_on_demand_enabled(&self) -> bool {
        self.active_modules().any(Module::is_on_demand)
    }

    /// Features required by the active modules
    pub fn required_features(&self) -> BTreeSet<AppFeature> {
        self.active_modules()
            .flat_map(|m| m.required_features())
            .collect()
    }
}
