//! Tunnel engine implementations

mod wg_quick;

pub use wg_quick::{classify_failure, WgQuickEngine};
