// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

/// A settled value held by a [`CoalescingCache`](crate::CoalescingCache).
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    value: V,
    /// `None` when `now + ttl` does not fit in an `Instant`; such entries never expire.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now.checked_add(ttl),
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_until_expiry_instant() {
        let now = Instant::now();
        let entry = CacheEntry::new("v", now, Duration::from_secs(1));

        assert!(entry.is_live(now));
        assert!(entry.is_live(now + Duration::from_millis(999)));
        assert!(!entry.is_live(now + Duration::from_secs(1)));
    }

    #[test]
    fn zero_ttl_is_stale_immediately() {
        let now = Instant::now();
        let entry = CacheEntry::new(1, now, Duration::ZERO);

        assert!(!entry.is_live(now));
        assert_eq!(*entry.value(), 1);
    }

    #[test]
    fn overflowing_ttl_never_expires() {
        let now = Instant::now();
        let entry = CacheEntry::new((), now, Duration::MAX);

        assert!(entry.is_live(now + Duration::from_secs(86_400 * 365)));
    }
}
