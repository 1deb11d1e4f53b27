//! DNS response cache without expiry.

use hickory_proto::op::Message;
use rustc_hash::FxHashMap;
use std::sync::RwLock;

use crate::dns::Fingerprint;

/// Process-lifetime cache of positive upstream responses.
///
/// Lookups share a read lock, inserts take the write lock for the single
/// insert only. The map is allocated on the first insert and entries are
/// never evicted.
#[derive(Default)]
pub struct ResponseCache {
    entries: RwLock<Option<FxHashMap<Fingerprint, Message>>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached response.
    pub fn get(&self, key: &Fingerprint) -> Option<Message> {
        let Ok(entries) = self.entries.read() else {
            return None;
        };
        entries.as_ref()?.get(key).cloned()
    }

    /// Store a response, replacing any previous one for the same key.
    pub fn put(&self, key: Fingerprint, response: Message) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        entries
            .get_or_insert_with(FxHashMap::default)
            .insert(key, response);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|e| e.as_ref().map_or(0, |map| map.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn is_allocated(&self) -> bool {
        self.entries.read().map(|e| e.is_some()).unwrap_or(false)
    }
}
