//! Binds judge slots to opaque device tokens.
//!
//! Bindings live in memory only: a restart clears them while ledger data
//! survives, so judges simply re-announce. Heartbeat timestamps are advisory
//! and feed the liveness display, nothing else.

use crate::RegisterOutcome;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct JudgeRegistry {
    bindings: HashMap<u32, String>,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl JudgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token` to `slot`. A token occupies at most one slot, so any other
    /// slot it currently holds is evicted first. A slot held by a different
    /// token is never overwritten: the first registrant keeps it until the
    /// eviction rule frees it.
    pub fn register(&mut self, slot: u32, token: &str, max_slot: u32) -> RegisterOutcome {
        if slot == 0 || slot > max_slot {
            return RegisterOutcome::SlotOutOfRange { max_slot };
        }

        let held = self
            .bindings
            .iter()
            .find(|(other, bound)| **other != slot && bound.as_str() == token)
            .map(|(other, _)| *other);
        if let Some(other) = held {
            info!("judge slot {other} released: token moved to slot {slot}");
            self.bindings.remove(&other);
        }

        // the attempt itself is a liveness signal, conflict or not
        self.last_seen.insert(token.to_string(), Utc::now());

        match self.bindings.get(&slot) {
            None => {
                info!("judge slot {slot} bound");
                self.bindings.insert(slot, token.to_string());
                RegisterOutcome::Accepted
            }
            Some(bound) if bound == token => RegisterOutcome::Accepted,
            Some(_) => {
                warn!("judge slot {slot} already in use by another device");
                RegisterOutcome::Conflict
            }
        }
    }

    /// True iff `slot` is currently bound to exactly this token. Unregistered
    /// slots always fail.
    pub fn validate(&self, slot: u32, token: &str) -> bool {
        self.bindings
            .get(&slot)
            .is_some_and(|bound| bound == token)
    }

    /// Advisory last-seen timestamps, keyed by token.
    pub fn heartbeats(&self) -> Vec<(String, DateTime<Utc>)> {
        self.last_seen
            .iter()
            .map(|(token, at)| (token.clone(), *at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_register_then_steal_then_evict() {
        let mut registry = JudgeRegistry::new();

        // valid register
        assert_eq!(registry.register(1, "abc", 2), RegisterOutcome::Accepted);
        // steal attempt: holder keeps the slot
        assert_eq!(registry.register(1, "def", 2), RegisterOutcome::Conflict);
        assert!(!registry.validate(1, "def"));
        assert!(registry.validate(1, "abc"));
        // same token elsewhere evicts its old slot
        assert_eq!(registry.register(2, "abc", 2), RegisterOutcome::Accepted);
        assert!(!registry.validate(1, "abc"));
        // the freed slot now accepts the other device
        assert_eq!(registry.register(1, "def", 2), RegisterOutcome::Accepted);
        assert!(registry.validate(1, "def"));
    }

    #[test_log::test]
    fn test_slot_out_of_range_reports_maximum() {
        let mut registry = JudgeRegistry::new();
        assert_eq!(
            registry.register(3, "abc", 2),
            RegisterOutcome::SlotOutOfRange { max_slot: 2 }
        );
        assert_eq!(
            registry.register(0, "abc", 2),
            RegisterOutcome::SlotOutOfRange { max_slot: 2 }
        );
        assert!(!registry.validate(3, "abc"));
    }

    #[test_log::test]
    fn test_rebind_same_token_refreshes() {
        let mut registry = JudgeRegistry::new();
        registry.register(1, "abc", 6);
        let first = registry.heartbeats();
        assert_eq!(registry.register(1, "abc", 6), RegisterOutcome::Accepted);
        let second = registry.heartbeats();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(second[0].1 >= first[0].1);
    }

    #[test_log::test]
    fn test_conflict_still_records_heartbeat() {
        let mut registry = JudgeRegistry::new();
        registry.register(1, "abc", 6);
        registry.register(1, "def", 6);
        let tokens: Vec<String> = registry.heartbeats().into_iter().map(|(t, _)| t).collect();
        assert!(tokens.contains(&"abc".to_string()));
        assert!(tokens.contains(&"def".to_string()));
    }

    #[test_log::test]
    fn test_validate_unregistered_slot() {
        let registry = JudgeRegistry::new();
        assert!(!registry.validate(1, "abc"));
    }
}
