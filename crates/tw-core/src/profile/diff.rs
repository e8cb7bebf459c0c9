//! Structural comparison of profiles

use std::collections::BTreeSet;

use super::Profile;
use crate::types::ModuleId;

/// Symbolic change between two versions of a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileDiff {
    /// The name changed
    ChangedName,
    /// Modules were added, removed or edited
    ChangedModules(BTreeSet<ModuleId>),
    /// The set of active modules changed
    ChangedActiveModules,
    /// Behavior flags changed
    ChangedBehavior,
}

impl Profile {
    /// Compare this profile with a previous version of itself
    pub fn differences(&self, previous: &Profile) -> Vec<ProfileDiff> {
        let mut diff = Vec::new();

        if self.name != previous.name {
            diff.push(ProfileDiff::ChangedName);
        }

        let mut changed_modules = BTreeSet::new();
        for module in &self.modules {
            match previous.module(&module.id) {
                Some(old) if old == module => {}
                _ => {
                    changed_modules.insert(module.id);
                }
            }
        }
        for old in &previous.modules {
            if self.module(&old.id).is_none() {
                changed_modules.insert(old.id);
            }
        }
        if !changed_modules.is_empty() {
            diff.push(ProfileDiff::ChangedModules(changed_modules));
        }

        if self.active_module_ids != previous.active_module_ids {
            diff.push(ProfileDiff::ChangedActiveModules);
        }

        if self.behavior != previous.behavior {
            diff.push(ProfileDiff::ChangedBehavior);
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Module, ModuleKind, OnDemandModule, OpenVpnModule, ProfileBehavior};

    fn base_profile() -> (Profile, ModuleId, ModuleId) {
        let vpn = Module::new(ModuleKind::OpenVpn(OpenVpnModule {
            remotes: vec!["vpn.example.com:1194/udp".into()],
            ..Default::default()
        }));
        let on_demand = Module::new(ModuleKind::OnDemand(OnDemandModule::default()));
        let (vpn_id, on_demand_id) = (vpn.id, on_demand.id);
        let profile = Profile::new("Home")
            .with_module(vpn, true)
            .with_module(on_demand, true);
        (profile, vpn_id, on_demand_id)
    }

    #[test]
    fn test_identical_profiles_have_no_diff() {
        let (profile, _, _) = base_profile();
        assert!(profile.differences(&profile.clone()).is_empty());
    }

    #[test]
    fn test_rename() {
        let (previous, _, _) = base_profile();
        let profile = previous.clone().renamed("Away");
        assert_eq!(profile.differences(&previous), vec![ProfileDiff::ChangedName]);
    }

    #[test]
    fn test_edited_module() {
        let (previous, vpn_id, _) = base_profile();
        let mut module = previous.module(&vpn_id).cloned().unwrap();
        if let ModuleKind::OpenVpn(openvpn) = &mut module.kind {
            openvpn.cipher = Some("AES-128-CBC".into());
        }
        let profile = previous.clone().saving_module(module);

        assert_eq!(
            profile.differences(&previous),
            vec![ProfileDiff::ChangedModules(BTreeSet::from([vpn_id]))]
        );
    }

    #[test]
    fn test_removed_module() {
        let (previous, vpn_id, on_demand_id) = base_profile();
        let mut profile = previous.clone();
        profile.modules.retain(|m| m.id != on_demand_id);
        profile.active_module_ids.remove(&on_demand_id);

        let diff = profile.differences(&previous);
        assert!(diff.contains(&ProfileDiff::ChangedModules(BTreeSet::from([on_demand_id]))));
        assert!(diff.contains(&ProfileDiff::ChangedActiveModules));
        assert!(!diff
            .iter()
            .any(|d| matches!(d, ProfileDiff::ChangedModules(ids) if ids.contains(&vpn_id))));
    }

    #[test]
    fn test_behavior_change() {
        let (previous, _, _) = base_profile();
        let profile = previous.clone().with_behavior(ProfileBehavior {
            disconnects_on_sleep: true,
            ..Default::default()
        });
        assert_eq!(
            profile.differences(&previous),
            vec![ProfileDiff::ChangedBehavior]
        );
    }
}
