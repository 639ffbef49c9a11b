//! In-process keyed test-and-set guard.
//!
//! Collapses concurrent triggers for one subject before they reach the store.
//! The store's conditional status update remains the authority across
//! processes; entries expire so a crashed pass cannot wedge a key forever.

use moka::future::Cache;
use std::time::Duration;

#[derive(Clone)]
pub struct SingleFlight {
    in_flight: Cache<String, ()>,
}

impl SingleFlight {
    pub fn new(ttl: Duration) -> Self {
        Self {
            in_flight: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Atomically claim `key`. Returns `false` if it is already claimed.
    pub async fn try_acquire(&self, key: &str) -> bool {
        self.in_flight
            .entry(key.to_string())
            .or_insert(())
            .await
            .is_fresh()
    }

    pub async fn release(&self, key: &str) {
        self.in_flight.invalidate(key).await;
    }

    pub async fn is_held(&self, key: &str) -> bool {
        self.in_flight.get(key).await.is_some()
    }
}
