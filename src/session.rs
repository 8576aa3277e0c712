use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

const SHARDS: usize = 16;

/// Continuation tokens keyed by conversation id.
///
/// Some providers (DashScope prompt mode) hand back an opaque session id
/// per chunk that resumes server-side context on the next turn. Each
/// conversation owns its own token; the store is sharded so concurrent
/// conversations never contend on one lock.
#[derive(Debug, Clone)]
pub struct SessionStore {
    shards: Arc<Vec<Mutex<HashMap<String, String>>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let shards = (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect();
        Self { shards: Arc::new(shards) }
    }

    fn shard(&self, conversation_id: &str) -> &Mutex<HashMap<String, String>> {
        let mut h = DefaultHasher::new();
        conversation_id.hash(&mut h);
        &self.shards[(h.finish() as usize) % SHARDS]
    }

    /// Token recorded by the previous turn, if any.
    pub fn get(&self, conversation_id: &str) -> Option<String> {
        let Ok(guard) = self.shard(conversation_id).lock() else {
            return None;
        };
        guard.get(conversation_id).cloned()
    }

    /// Records the token from the latest chunk; later chunks overwrite.
    pub fn set(&self, conversation_id: &str, token: impl Into<String>) {
        if let Ok(mut guard) = self.shard(conversation_id).lock() {
            guard.insert(conversation_id.to_string(), token.into());
        }
    }
}
