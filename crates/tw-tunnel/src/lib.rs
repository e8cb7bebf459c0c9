//! tw-tunnel: Tunnel lifecycle orchestration
//!
//! Decides when to install, connect, reconnect or disconnect the VPN tunnel
//! in response to user actions, profile edits, eligibility changes and the
//! notifications of the tunnel-hosting process. Also ships a `wg-quick`
//! tunnel engine and the `tw-tunneld` daemon built on it.

pub mod builder;
pub mod context;
pub mod engine;
pub mod orchestrator;
pub mod processor;
pub mod reconciler;
pub mod reconnect;
pub mod serializer;

pub use builder::ConfigurationBuilder;
pub use context::{AppContext, AppContextBuilder, AppEvent};
pub use engine::WgQuickEngine;
pub use orchestrator::TunnelOrchestrator;
pub use processor::DefaultProfileProcessor;
pub use reconciler::{ActiveProfiles, StateReconciler};
pub use reconnect::{ReconnectDecision, SkipReason};
pub use serializer::TaskSerializer;
