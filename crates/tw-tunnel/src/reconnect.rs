//! Reconnection decisions for saved profiles
//!
//! Pure functions deciding whether a profile edit warrants tearing down and
//! re-establishing the active tunnel.

use std::fmt;

use tw_core::profile::{Module, Profile, ProfileDiff};
use tw_core::TunnelStatus;

/// Why a saved profile does not trigger a reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The profile has no previous version
    NewProfile,
    /// The profile is not the one the tunnel tracks
    NotActiveProfile,
    /// The tunnel is neither active nor activating
    NotConnected(TunnelStatus),
    /// Only changes that the running tunnel can ignore
    IrrelevantChanges,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NewProfile => write!(f, "new profile"),
            SkipReason::NotActiveProfile => write!(f, "not the active profile"),
            SkipReason::NotConnected(status) => write!(f, "tunnel is {}", status),
            SkipReason::IrrelevantChanges => write!(f, "irrelevant changes"),
        }
    }
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Disconnect, then connect the saved profile
    Reconnect,
    /// Leave the tunnel alone
    Skip(SkipReason),
}

/// Whether any change in `diff` requires reconnecting `profile`.
///
/// Renames and edits of a single on-demand module are applied without
/// reconnecting. An empty diff is irrelevant.
pub fn is_relevant_for_reconnecting(diff: &[ProfileDiff], profile: &Profile) -> bool {
    diff.iter().any(|change| is_relevant_change(change, profile))
}

fn is_relevant_change(change: &ProfileDiff, profile: &Profile) -> bool {
    match change {
        ProfileDiff::ChangedName => false,
        ProfileDiff::ChangedModules(ids) => {
            let only_on_demand = ids.len() == 1
                && ids
                    .iter()
                    .next()
                    .and_then(|id| profile.module(id))
                    .is_some_and(Module::is_on_demand);
            !only_on_demand
        }
        ProfileDiff::ChangedActiveModules | ProfileDiff::ChangedBehavior => true,
    }
}

/// Decide what to do after `profile` was saved over `previous`
pub fn decide(
    profile: &Profile,
    previous: Option<&Profile>,
    is_active_profile: bool,
    status: TunnelStatus,
) -> ReconnectDecision {
    let Some(previous) = previous else {
        return ReconnectDecision::Skip(SkipReason::NewProfile);
    };
    if !is_active_profile {
        return ReconnectDecision::Skip(SkipReason::NotActiveProfile);
    }
    if !status.is_engaged() {
        return ReconnectDecision::Skip(SkipReason::NotConnected(status));
    }
    if !is_relevant_for_reconnecting(&profile.differences(previous), profile) {
        return ReconnectDecision::Skip(SkipReason::IrrelevantChanges);
    }
    ReconnectDecision::Reconnect
}
