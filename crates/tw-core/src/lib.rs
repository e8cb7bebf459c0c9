//! tw-core: Core abstractions and configuration for Tunnelwright
//!
//! This crate provides the profile model, tunnel state types, the error
//! taxonomy, configuration structures and the traits implemented by the
//! collaborators of the tunnel orchestrator (tunnel engine, profile
//! repository, feature verifier, catalog service, system extension manager
//! and key-value store).

pub mod config;
pub mod error;
pub mod profile;
pub mod traits;
pub mod types;

pub use error::{ErrorCode, TunnelError};
pub use profile::{Module, ModuleKind, Profile, ProfileDiff};
pub use types::{
    ActiveProfileState, AppFeature, AtomicState, DataCount, InstanceId, ModuleId, ProfileId,
    TunnelStatus,
};
