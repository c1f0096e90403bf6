use serde_json::Value;
use std::collections::HashMap;

/// Last committed state of every key, in both serialized and parsed forms.
///
/// The serialized map only serves redundant-write suppression; reads are answered from the parsed map. There is no
/// eviction: the number of keys is bounded by the application's key space, not by traffic.
#[derive(Debug, Default)]
pub struct CachePair {
    serialized: HashMap<String, String>,
    parsed:     HashMap<String, Value>,
}

impl CachePair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_parsed(&self, key: &str) -> Option<&Value> {
        self.parsed.get(key)
    }

    pub fn read_serialized(&self, key: &str) -> Option<&str> {
        self.serialized.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.parsed.contains_key(key)
    }

    pub fn record_commit(&mut self, key: &str, serialized: String, parsed: Value) {
        self.serialized.insert(key.to_string(), serialized);
        self.parsed.insert(key.to_string(), parsed);
    }

    pub fn forget(&mut self, key: &str) {
        self.serialized.remove(key);
        self.parsed.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.serialized.clear();
        self.parsed.clear();
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}
