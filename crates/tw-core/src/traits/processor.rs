//! Profile processing and eligibility traits

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::watch;

use crate::error::TunnelError;
use crate::profile::Profile;
use crate::types::AppFeature;

/// Hook run on a profile right before it reaches the tunnel engine
///
/// May rewrite the provider server selection or inject verified
/// credentials. May fail with [`TunnelError::IneligibleProfile`].
#[async_trait]
pub trait ProfileProcessor: Send + Sync {
    /// Materialize a connectable profile
    async fn will_install(&self, profile: &Profile) -> Result<Profile, TunnelError>;

    /// Title the OS shows for the tunnel of this profile
    fn title(&self, profile: &Profile) -> String;
}

/// Verifies that the user is eligible for the features a profile uses
#[async_trait]
pub trait FeatureVerifier: Send + Sync {
    /// Fail with [`TunnelError::IneligibleProfile`] listing the missing features
    fn verify(&self, profile: &Profile) -> Result<(), TunnelError>;

    /// Currently eligible features, updated on every change
    fn eligible_features(&self) -> watch::Receiver<BTreeSet<AppFeature>>;

    /// Refresh eligibility from its source
    async fn reload(&self);
}
