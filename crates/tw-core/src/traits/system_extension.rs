//! OS network extension activation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TunnelError;

/// Outcome of a system extension request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemExtensionResult {
    #[default]
    Unknown,
    Success,
    NeedsApproval,
    RequiresRestart,
}

impl fmt::Display for SystemExtensionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemExtensionResult::Unknown => write!(f, "unknown"),
            SystemExtensionResult::Success => write!(f, "success"),
            SystemExtensionResult::NeedsApproval => write!(f, "needs approval"),
            SystemExtensionResult::RequiresRestart => write!(f, "requires restart"),
        }
    }
}

/// Manages the OS-level network extension required on some platforms
#[async_trait]
pub trait SystemExtensionManager: Send + Sync {
    /// Result of the last load or install
    fn current_result(&self) -> SystemExtensionResult;

    /// Query the installed extension
    async fn load(&self) -> Result<SystemExtensionResult, TunnelError>;

    /// Request activation of the extension
    async fn install(&self) -> Result<SystemExtensionResult, TunnelError>;
}
