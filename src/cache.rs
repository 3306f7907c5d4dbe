// src/cache.rs
//! The three long-lived, independently TTL'd stores: primary status cache,
//! reason cache, and the per-line last-known-good store.
//!
//! Time comes from an injected [`Clock`] so tests can move it by hand.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::LineStatus;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut g = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *g += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Elapsed time between two instants; a clock that went backwards counts as zero.
pub fn age(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// Valid iff `now - stored_at < ttl`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        age(now, self.stored_at) < self.ttl
    }
}

/// Single-value cache that keeps its last value after expiry, so callers can
/// still serve it as stale data.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: RwLock<Option<CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.read().as_ref().is_some_and(|e| e.is_valid(now))
    }

    /// Value only while valid.
    pub fn get(&self, now: DateTime<Utc>) -> Option<T> {
        self.read()
            .as_ref()
            .filter(|e| e.is_valid(now))
            .map(|e| e.value.clone())
    }

    /// Last stored entry regardless of age.
    pub fn get_any(&self) -> Option<CacheEntry<T>> {
        self.read().clone()
    }

    pub fn set(&self, value: T, now: DateTime<Utc>) {
        let mut g = self.entry.write().unwrap_or_else(|p| p.into_inner());
        *g = Some(CacheEntry {
            value,
            stored_at: now,
            ttl: self.ttl,
        });
    }

    /// Mark the entry expired without dropping the value.
    pub fn expire(&self) {
        let mut g = self.entry.write().unwrap_or_else(|p| p.into_inner());
        if let Some(e) = g.as_mut() {
            e.ttl = Duration::ZERO;
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<CacheEntry<T>>> {
        self.entry.read().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct LastGood {
    pub value: LineStatus,
    pub saved_at: DateTime<Utc>,
}

/// Most recent non-degraded status per line id.
///
/// Never cleared by a failed refresh; an entry is only replaced by a later
/// live observation of the same line.
#[derive(Debug)]
pub struct LastGoodStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, LastGood>>,
}

impl LastGoodStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry for `key` if it is still inside the fallback window (`age <= ttl`).
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<LastGood> {
        let g = self.entries.read().unwrap_or_else(|p| p.into_inner());
        g.get(key)
            .filter(|e| age(now, e.saved_at) <= self.ttl)
            .cloned()
    }

    pub fn set(&self, key: &str, value: LineStatus, now: DateTime<Utc>) {
        let mut g = self.entries.write().unwrap_or_else(|p| p.into_inner());
        g.insert(
            key.to_string(),
            LastGood {
                value,
                saved_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn ttl_cache_expires_but_keeps_value() {
        let c: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        assert!(!c.is_valid(t0()));
        c.set(7, t0());
        assert_eq!(c.get(t0() + chrono::Duration::seconds(59)), Some(7));
        // valid iff age < ttl
        assert_eq!(c.get(t0() + chrono::Duration::seconds(60)), None);
        assert_eq!(c.get_any().map(|e| e.value), Some(7));
    }

    #[test]
    fn expire_forces_stale() {
        let c: TtlCache<&str> = TtlCache::new(Duration::from_secs(60));
        c.set("x", t0());
        c.expire();
        assert!(!c.is_valid(t0()));
        assert!(c.get_any().is_some());
    }

    #[test]
    fn backwards_clock_is_zero_age() {
        assert_eq!(age(t0(), t0() + chrono::Duration::seconds(5)), Duration::ZERO);
    }

    #[test]
    fn manual_clock_advances_and_jumps() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), t0() + chrono::Duration::seconds(90));

        // a jump backwards leaves stored entries at zero age
        let c: TtlCache<u8> = TtlCache::new(Duration::from_secs(60));
        c.set(1, clock.now());
        clock.set(t0());
        assert_eq!(clock.now(), t0());
        assert_eq!(c.get(clock.now()), Some(1));
    }
}
