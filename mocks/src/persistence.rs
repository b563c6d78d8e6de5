//! An in-memory `Persistence` implementation following the usual mock
//! repository pattern (error injection, call history) adapted to the
//! key-value + append-only-stream contract the core requires.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use marcus_core::collaborators::{Persistence, StreamRecord};
use marcus_core::error::{MarcusError, Result};
use parking_lot::Mutex;

#[derive(Default)]
struct State {
    kv: HashMap<String, serde_json::Value>,
    streams: HashMap<String, Vec<serde_json::Value>>,
    call_history: Vec<String>,
}

/// Thread-safe, in-memory store. Supports error injection (one-shot, by
/// next-call) so tests can exercise the Scheduler's rollback paths without
/// a real database.
#[derive(Default)]
pub struct InMemoryPersistence {
    state: Mutex<State>,
    inject_next_error: Mutex<Option<MarcusError>>,
}

impl InMemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inject_error(&self, error: MarcusError) {
        *self.inject_next_error.lock() = Some(error);
    }

    fn take_injected_error(&self) -> Option<MarcusError> {
        self.inject_next_error.lock().take()
    }

    pub fn call_history(&self) -> Vec<String> {
        self.state.lock().call_history.clone()
    }

    fn log(&self, state: &mut State, call: impl Into<String>) {
        state.call_history.push(call.into());
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn kv_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut state = self.state.lock();
        self.log(&mut state, format!("kv_get:{key}"));
        Ok(state.kv.get(key).cloned())
    }

    async fn kv_put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut state = self.state.lock();
        self.log(&mut state, format!("kv_put:{key}"));
        state.kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn kv_cas(
        &self,
        key: &str,
        expected: Option<serde_json::Value>,
        new_value: serde_json::Value,
    ) -> Result<bool> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut state = self.state.lock();
        self.log(&mut state, format!("kv_cas:{key}"));
        let current = state.kv.get(key).cloned();
        if current == expected {
            state.kv.insert(key.to_string(), new_value);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn kv_delete(&self, key: &str) -> Result<()> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut state = self.state.lock();
        self.log(&mut state, format!("kv_delete:{key}"));
        state.kv.remove(key);
        Ok(())
    }

    async fn kv_list_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let state = self.state.lock();
        Ok(state.kv.iter().filter(|(k, _)| k.starts_with(prefix)).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn append(&self, stream: &str, payload: serde_json::Value) -> Result<u64> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let mut state = self.state.lock();
        self.log(&mut state, format!("append:{stream}"));
        let entries = state.streams.entry(stream.to_string()).or_default();
        entries.push(payload);
        Ok(entries.len() as u64 - 1)
    }

    async fn read_stream(&self, stream: &str, from_seq: u64) -> Result<Vec<StreamRecord>> {
        if let Some(err) = self.take_injected_error() {
            return Err(err);
        }
        let state = self.state.lock();
        Ok(state
            .streams
            .get(stream)
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .skip(from_seq as usize)
                    .map(|(seq, payload)| StreamRecord { seq: seq as u64, payload: payload.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_only_writes_on_matching_expected() {
        let store = InMemoryPersistence::new();
        let ok = store.kv_cas("k", None, serde_json::json!(1)).await.unwrap();
        assert!(ok);
        let rejected = store.kv_cas("k", None, serde_json::json!(2)).await.unwrap();
        assert!(!rejected);
        assert_eq!(store.kv_get("k").await.unwrap(), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn injected_error_surfaces_once() {
        let store = InMemoryPersistence::new();
        store.inject_error(MarcusError::PersistenceError("boom".into()));
        assert!(store.kv_get("k").await.is_err());
        assert!(store.kv_get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_assigns_monotonic_sequence_numbers() {
        let store = InMemoryPersistence::new();
        let s0 = store.append("events", serde_json::json!({"a":1})).await.unwrap();
        let s1 = store.append("events", serde_json::json!({"a":2})).await.unwrap();
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
        let records = store.read_stream("events", 0).await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
