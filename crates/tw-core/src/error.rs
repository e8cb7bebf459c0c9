//! Core error types for Tunnelwright

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

use crate::traits::SystemExtensionResult;
use crate::types::{AppFeature, ModuleId};

/// Top-level error type of tunnel operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The one-time launch sequence failed; retried on the next request
    #[error("Could not launch: {reason}")]
    CouldNotLaunch { reason: String },

    /// Connect attempted without force on a profile that needs user input
    #[error("Profile requires interactive login")]
    InteractiveLogin,

    /// A provider-backed module has no resolved server
    #[error("Provider module {module_id} has no selected server")]
    MissingProviderEntity { module_id: ModuleId },

    /// Feature verification failed
    #[error("Profile requires features: {}", format_features(.required_features))]
    IneligibleProfile {
        required_features: BTreeSet<AppFeature>,
    },

    /// The system extension needs approval or a restart
    #[error("System extension not ready: {0}")]
    SystemExtension(SystemExtensionResult),

    /// Terminal error reported by the tunnel engine
    #[error("Tunnel engine error: {0}")]
    Engine(#[from] ErrorCode),

    /// Configuration build failed before reaching the engine
    #[error("Malformed module {module_id}: {reason}")]
    MalformedModule { module_id: ModuleId, reason: String },

    /// The caller interrupted the operation
    #[error("Operation interrupted")]
    Interrupted,

    /// Other error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TunnelError {
    /// Conditions resolved by a guided flow rather than an error dialog
    pub fn is_guided_flow(&self) -> bool {
        matches!(
            self,
            TunnelError::InteractiveLogin
                | TunnelError::MissingProviderEntity { .. }
                | TunnelError::IneligibleProfile { .. }
        )
    }

    /// Engine error code, if any
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            TunnelError::Engine(code) => Some(*code),
            _ => None,
        }
    }

    /// Displayable message for every condition
    pub fn user_message(&self) -> String {
        match self {
            TunnelError::CouldNotLaunch { .. } => {
                "The app could not complete its startup. Try again.".to_string()
            }
            TunnelError::InteractiveLogin => "Log in to connect with this profile.".to_string(),
            TunnelError::MissingProviderEntity { .. } => {
                "Select a server to connect with this profile.".to_string()
            }
            TunnelError::IneligibleProfile { required_features } => format!(
                "Upgrade to use this profile ({}).",
                format_features(required_features)
            ),
            TunnelError::SystemExtension(result) => match result {
                SystemExtensionResult::NeedsApproval => {
                    "Approve the system extension in the system settings.".to_string()
                }
                SystemExtensionResult::RequiresRestart => {
                    "Restart the computer to complete the system extension installation."
                        .to_string()
                }
                _ => "The system extension is not available.".to_string(),
            },
            TunnelError::Engine(code) => code.to_string(),
            TunnelError::MalformedModule { .. } => {
                "The profile contains an invalid module.".to_string()
            }
            TunnelError::Interrupted => "The connection was interrupted.".to_string(),
            TunnelError::Other(e) => e.to_string(),
        }
    }
}

fn format_features(features: &BTreeSet<AppFeature>) -> String {
    features
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error codes reported by the tunnel engine.
///
/// These are terminal for the current attempt and are never retried
/// automatically.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[error("Authentication failed")]
    Authentication,

    #[error("Encryption failed")]
    Crypto,

    #[error("Unable to resolve the server address")]
    DnsFailure,

    #[error("The connection timed out")]
    Timeout,

    #[error("Compression settings do not match the server")]
    CompressionMismatch,

    #[error("No route to the server")]
    NoRouting,

    #[error("The server shut down the connection")]
    ServerShutdown,

    #[error("TLS handshake failed")]
    TlsFailure,

    #[error("Unknown tunnel error")]
    Unknown,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guided_flow_conditions() {
        assert!(TunnelError::InteractiveLogin.is_guided_flow());
        assert!(TunnelError::MissingProviderEntity {
            module_id: ModuleId::new()
        }
        .is_guided_flow());
        assert!(TunnelError::IneligibleProfile {
            required_features: BTreeSet::from([AppFeature::OnDemand])
        }
        .is_guided_flow());

        assert!(!TunnelError::Engine(ErrorCode::Timeout).is_guided_flow());
        assert!(!TunnelError::CouldNotLaunch {
            reason: "offline".into()
        }
        .is_guided_flow());
    }

    #[test]
    fn test_engine_code() {
        let err: TunnelError = ErrorCode::TlsFailure.into();
        assert_eq!(err.code(), Some(ErrorCode::TlsFailure));
        assert_eq!(TunnelError::InteractiveLogin.code(), None);
    }

    #[test]
    fn test_ineligible_message_lists_features() {
        let err = TunnelError::IneligibleProfile {
            required_features: BTreeSet::from([AppFeature::Providers, AppFeature::Dns]),
        };
        assert_eq!(err.to_string(), "Profile requires features: dns, providers");
        assert!(err.user_message().contains("dns, providers"));
    }

    #[test]
    fn test_every_condition_has_a_message() {
        let errors = vec![
            TunnelError::CouldNotLaunch {
                reason: "x".into(),
            },
            TunnelError::InteractiveLogin,
            TunnelError::SystemExtension(SystemExtensionResult::NeedsApproval),
            TunnelError::SystemExtension(SystemExtensionResult::RequiresRestart),
            TunnelError::Engine(ErrorCode::CompressionMismatch),
            TunnelError::Interrupted,
        ];
        for err in errors {
            assert!(!err.user_message().is_empty());
        }
    }
}
