//! Canonicalization, hashing, and chain-verification primitives for the
//! append-only event log. The actual persistence (tables, queries) lives
//! in `converge-store`; this crate owns only the chain math so it can be
//! unit tested without a database.

use std::env;

use converge_schemas::Event;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// `CONVERGE_TRACE_ID` pins the trace id for end-to-end testing.
pub const TRACE_ID_ENV: &str = "CONVERGE_TRACE_ID";

/// A fresh `trace-<uuid>` unless the environment pins one.
pub fn new_trace_id() -> String {
    if let Ok(pinned) = env::var(TRACE_ID_ENV) {
        if !pinned.is_empty() {
            return pinned;
        }
    }
    format!("trace-{}", Uuid::new_v4())
}

pub fn new_event_id() -> String {
    format!("evt-{}", Uuid::new_v4())
}

/// Per-chain running state: `(chain_id, last_hash, event_count, updated_at)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    pub chain_id: String,
    pub last_hash: String,
    pub event_count: u64,
}

impl ChainState {
    pub fn genesis(chain_id: impl Into<String>) -> Self {
        ChainState {
            chain_id: chain_id.into(),
            last_hash: String::new(),
            event_count: 0,
        }
    }

    /// Computes `hash_self = H(hash_prev || canonical(event))`, advances the
    /// chain state, and returns the new hash. The event's own `hash_self`
    /// slot (if embedded in its payload) is not part of the input.
    pub fn advance(&mut self, event: &Event) -> String {
        let hash_self = compute_event_hash(&self.last_hash, event);
        self.last_hash = hash_self.clone();
        self.event_count += 1;
        hash_self
    }
}

/// `H(prev_hash || canonical(event))`, SHA-256 hex-encoded.
pub fn compute_event_hash(prev_hash: &str, event: &Event) -> String {
    let canonical = canonical_event_json(event);
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recursive-key-sort canonicalization used for both event hashing and
/// config hashing, matching the deterministic-JSON idiom used throughout
/// this codebase.
pub fn canonical_event_json(event: &Event) -> String {
    let value = serde_json::to_value(event).expect("Event serialization cannot fail");
    canonicalize_json(&value)
}

pub fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("canonical json serialization cannot fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResult {
    Valid { count: u64 },
    Broken { index: u64, reason: String },
}

/// Recomputes the chain from scratch over an ordered `(event, recorded_hash)`
/// sequence and compares at each step. Events must be given in append order.
pub fn verify_chain(entries: &[(Event, String)]) -> VerifyResult {
    let mut prev_hash = String::new();
    for (idx, (event, recorded_hash)) in entries.iter().enumerate() {
        let expected = compute_event_hash(&prev_hash, event);
        if &expected != recorded_hash {
            return VerifyResult::Broken {
                index: idx as u64,
                reason: format!("hash mismatch at index {idx}: expected {expected}, got {recorded_hash}"),
            };
        }
        prev_hash = expected;
    }
    VerifyResult::Valid {
        count: entries.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            trace_id: "trace-test".to_string(),
            timestamp: Utc::now(),
            event_type: "intent.validated".to_string(),
            intent_id: Some("org/repo:pr-1".to_string()),
            agent_id: None,
            tenant_id: None,
            payload: serde_json::json!({"a": 1, "b": 2}),
            evidence: serde_json::json!({}),
        }
    }

    #[test]
    fn canonicalization_is_key_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonicalize_json(&a), canonicalize_json(&b));
    }

    #[test]
    fn chain_advance_is_deterministic() {
        let e = sample_event("evt-1");
        let mut s1 = ChainState::genesis("default");
        let mut s2 = ChainState::genesis("default");
        assert_eq!(s1.advance(&e), s2.advance(&e));
    }

    #[test]
    fn verify_chain_detects_tampering() {
        let e1 = sample_event("evt-1");
        let e2 = sample_event("evt-2");
        let mut chain = ChainState::genesis("default");
        let h1 = chain.advance(&e1);
        let h2 = chain.advance(&e2);

        assert_eq!(
            verify_chain(&[(e1.clone(), h1.clone()), (e2.clone(), h2.clone())]),
            VerifyResult::Valid { count: 2 }
        );

        let broken = verify_chain(&[(e1, h1), (e2, "deadbeef".to_string())]);
        matches!(broken, VerifyResult::Broken { index: 1, .. });
    }

    #[test]
    fn trace_id_respects_env_pin() {
        std::env::set_var(TRACE_ID_ENV, "trace-pinned");
        assert_eq!(new_trace_id(), "trace-pinned");
        std::env::remove_var(TRACE_ID_ENV);
    }
}
