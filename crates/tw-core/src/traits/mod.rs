//! Collaborator trait definitions

mod catalog;
mod engine;
mod processor;
mod repository;
mod store;
mod system_extension;

pub use catalog::{CatalogService, ServerFilters};
pub use engine::{InstallOptions, TunnelConfiguration, TunnelEngine, TunnelEvent, TunnelProtocol};
pub use processor::{FeatureVerifier, ProfileProcessor};
pub use repository::{ProfileEvent, ProfileRepository};
pub use store::{KeyValueStore, MemoryStore};
pub use system_extension::{SystemExtensionManager, SystemExtensionResult};
