//! Single-flight guard.
//!
//! At most one operation per `(kind, actor)` key is in flight at a time; a
//! second attempt fails fast with `AlreadyInProgress` instead of queueing.
//! Approvals also claim the order itself, so two approvers racing on one
//! order cannot both submit. Keys are released when the returned
//! `FlightGuard` drops, on every exit path.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rwa_core::Address;
use rwa_telemetry::Metrics;
use serde::Serialize;
use tracing::debug;

use crate::error::{DeskError, DeskResult};

/// Operation kinds that are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Approve,
    Reject,
    Cancel,
    Deposit,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Deposit => "deposit",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an in-flight operation has claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightKey {
    /// One operation of `kind` per actor.
    Actor { kind: OperationKind, actor: Address },
    /// One resolving operation per order, across actors.
    Order(Address),
}

impl fmt::Display for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor { actor, .. } => write!(f, "actor {}", actor.short()),
            Self::Order(order) => write!(f, "order {}", order.short()),
        }
    }
}

/// In-flight registry.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    inflight: Arc<DashMap<FlightKey, Instant>>,
}

impl SingleFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every key in `keys` or none of them.
    ///
    /// Each claim is an atomic check-and-mark on the map entry, so two
    /// callers can never both observe a key as free.
    pub fn try_begin(&self, kind: OperationKind, keys: &[FlightKey]) -> DeskResult<FlightGuard> {
        let mut guard = FlightGuard {
            inflight: Arc::clone(&self.inflight),
            keys: Vec::with_capacity(keys.len()),
        };

        for key in keys {
            let claimed = match self.inflight.entry(*key) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Instant::now());
                    true
                }
                Entry::Occupied(_) => false,
            };

            if !claimed {
                Metrics::single_flight_rejected(kind.as_str());
                debug!(kind = %kind, key = %key, "Operation already in flight");
                // Dropping `guard` releases the keys claimed so far.
                return Err(DeskError::AlreadyInProgress {
                    kind,
                    key: key.to_string(),
                });
            }
            guard.keys.push(*key);
        }
        Ok(guard)
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &FlightKey) -> bool {
        self.inflight.contains_key(key)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }
}

/// Releases claimed keys on drop.
#[derive(Debug)]
pub struct FlightGuard {
    inflight: Arc<DashMap<FlightKey, Instant>>,
    keys: Vec<FlightKey>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            self.inflight.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor_key(kind: OperationKind, b: u8) -> FlightKey {
        FlightKey::Actor {
            kind,
            actor: Address::new([b; 32]),
        }
    }

    #[test]
    fn test_second_claim_fails_fast() {
        let flights = SingleFlight::new();
        let key = actor_key(OperationKind::Create, 1);
        let _guard = flights.try_begin(OperationKind::Create, &[key]).unwrap();
        let err = flights.try_begin(OperationKind::Create, &[key]).unwrap_err();
        assert!(matches!(
            err,
            DeskError::AlreadyInProgress {
                kind: OperationKind::Create,
                ..
            }
        ));
    }

    #[test]
    fn test_guard_drop_releases() {
        let flights = SingleFlight::new();
        let key = actor_key(OperationKind::Approve, 1);
        {
            let _guard = flights.try_begin(OperationKind::Approve, &[key]).unwrap();
            assert!(flights.is_in_flight(&key));
        }
        assert!(!flights.is_in_flight(&key));
        assert!(flights.try_begin(OperationKind::Approve, &[key]).is_ok());
    }

    #[test]
    fn test_kinds_and_actors_are_independent() {
        let flights = SingleFlight::new();
        let _a = flights
            .try_begin(OperationKind::Create, &[actor_key(OperationKind::Create, 1)])
            .unwrap();
        let _b = flights
            .try_begin(OperationKind::Approve, &[actor_key(OperationKind::Approve, 1)])
            .unwrap();
        let _c = flights
            .try_begin(OperationKind::Create, &[actor_key(OperationKind::Create, 2)])
            .unwrap();
        assert_eq!(flights.in_flight_count(), 3);
    }

    #[test]
    fn test_partial_claim_is_rolled_back() {
        let flights = SingleFlight::new();
        let order = FlightKey::Order(Address::new([9u8; 32]));
        let _held = flights.try_begin(OperationKind::Approve, &[order]).unwrap();

        let mine = actor_key(OperationKind::Approve, 2);
        assert!(flights
            .try_begin(OperationKind::Approve, &[mine, order])
            .is_err());
        assert!(!flights.is_in_flight(&mine));
    }

    #[test]
    fn test_concurrent_claims_admit_exactly_one() {
        let flights = SingleFlight::new();
        let key = FlightKey::Order(Address::new([3u8; 32]));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flights = flights.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Hold the guard until every thread has tried.
                    let result = flights.try_begin(OperationKind::Approve, &[key]);
                    std::thread::sleep(std::time::Duration::from_millis(200));
                    result.is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }
}
