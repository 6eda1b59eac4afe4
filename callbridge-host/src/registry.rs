//! Registry of in-flight calls
//!
//! Owns every call that outlives the operation that created it: calls
//! waiting on a host round-trip and saved listener calls. Removal is the
//! only way a call leaves, and it is idempotent.

use crate::call::Call;
use callbridge_api::CallId;
use std::collections::HashMap;

/// Errors that can occur during registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Call id already in use: {0}")]
    DuplicateId(CallId),
}

/// Keyed storage of pending calls
#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: HashMap<CallId, Call>,
    next_id: u64,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce an identifier not used by any stored call
    pub fn generate_id(&mut self) -> CallId {
        loop {
            self.next_id += 1;
            let id = CallId::new(format!("call-{}", self.next_id));
            if !self.calls.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a call under its own identifier
    pub fn save(&mut self, call: Call) -> Result<CallId, RegistryError> {
        let id = call.id().clone();
        if self.calls.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        tracing::trace!(call = %id, method = %call.method_name(), "Call stored");
        self.calls.insert(id.clone(), call);
        Ok(id)
    }

    pub fn get(&self, id: &CallId) -> Option<&Call> {
        self.calls.get(id)
    }

    pub fn get_mut(&mut self, id: &CallId) -> Option<&mut Call> {
        self.calls.get_mut(id)
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.calls.contains_key(id)
    }

    /// Remove a call without releasing it, handing ownership to the caller
    pub fn take(&mut self, id: &CallId) -> Option<Call> {
        self.calls.remove(id)
    }

    /// Mark a call released and drop it
    ///
    /// Unknown or already released ids are a no-op. Returns whether a call
    /// was removed.
    pub fn release(&mut self, id: &CallId) -> bool {
        match self.calls.remove(id) {
            Some(mut call) => {
                call.release();
                tracing::trace!(call = %id, "Call released");
                true
            }
            None => false,
        }
    }

    /// Release every call (process teardown)
    pub fn release_all(&mut self) -> usize {
        let count = self.calls.len();
        for (_, mut call) in self.calls.drain() {
            call.release();
        }
        count
    }

    pub fn ids(&self) -> Vec<CallId> {
        self.calls.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CollectingSink;
    use serde_json::Map;
    use std::sync::Arc;

    fn call(id: &str) -> Call {
        Call::new(id, "op", Map::new(), Arc::new(CollectingSink::new()))
    }

    #[test]
    fn test_save_and_get() {
        let mut registry = CallRegistry::new();
        let id = registry.save(call("a")).unwrap();

        assert_eq!(id.as_str(), "a");
        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).unwrap().method_name(), "op");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = CallRegistry::new();
        registry.save(call("a")).unwrap();

        let err = registry.save(call("a")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(id) if id.as_str() == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut registry = CallRegistry::new();
        let id = registry.save(call("a")).unwrap();

        assert!(registry.release(&id));
        assert!(!registry.release(&id));
        assert!(!registry.release(&CallId::new("never-stored")));
        assert!(registry.is_empty());

        // The id is free again once released
        registry.save(call("a")).unwrap();
    }

    #[test]
    fn test_take_transfers_ownership() {
        let mut registry = CallRegistry::new();
        let id = registry.save(call("a")).unwrap();

        let taken = registry.take(&id).unwrap();
        assert!(!taken.is_released());
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn test_generate_id_skips_used() {
        let mut registry = CallRegistry::new();
        registry.save(call("call-1")).unwrap();

        let id = registry.generate_id();
        assert_eq!(id.as_str(), "call-2");
    }

    #[test]
    fn test_release_all() {
        let mut registry = CallRegistry::new();
        registry.save(call("a")).unwrap();
        registry.save(call("b")).unwrap();

        assert_eq!(registry.release_all(), 2);
        assert!(registry.is_empty());
    }
}
