//! Key-value store trait and in-memory implementation

use dashmap::DashMap;

/// Persistent key-value store shared by the app and the tunnel
pub trait KeyValueStore: Send + Sync {
    fn string(&self, key: &str) -> Option<String>;

    fn set_string(&self, key: &str, value: String);

    fn remove(&self, key: &str);
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn string(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.clone())
    }

    fn set_string(&self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}
