//! Profile repository trait

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::TunnelError;
use crate::profile::Profile;
use crate::types::ProfileId;

/// Changes published by the profile repository
#[derive(Debug, Clone)]
pub enum ProfileEvent {
    /// A profile was saved; `previous` is `None` for new profiles
    Save {
        profile: Profile,
        previous: Option<Profile>,
    },
    /// Profiles were removed
    Remove { ids: Vec<ProfileId> },
}

/// Source of the user's profiles
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Read the local profiles and start observing them
    async fn observe_local(&self) -> Result<(), TunnelError>;

    /// Subscribe to profile changes
    fn subscribe(&self) -> broadcast::Receiver<ProfileEvent>;
}
