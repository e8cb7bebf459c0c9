//! Shared serialization/deserialization utilities for configuration
//!
//! Durations are stored as plain integers, which reads better in TOML than
//! serde's default `{ secs, nanos }` table.

/// Duration serialized as milliseconds (u64)
///
/// Used for the poll and reconnection intervals, which are often below one
/// second.
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
