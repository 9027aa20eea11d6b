// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// When a nonce was consumed, and when the token that carried it expires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NonceRecord {
    pub consumed_at: u64,
    pub expires_at: u64,
}

/// The ledger of consumed nonces.  The map is sharded, so concurrent
/// consumers only contend when their nonces land in the same shard.
#[derive(Debug, Default)]
pub struct NonceLedger {
    records: DashMap<String, NonceRecord>,
}

impl NonceLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Record the consumption of `nonce`.  Returns false, and leaves the
    /// ledger untouched, if it had already been consumed.
    pub fn consume(&self, nonce: &str, consumed_at: u64, expires_at: u64) -> bool {
        // check-and-insert happens under the shard's write lock
        match self.records.entry(nonce.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(NonceRecord {
                    consumed_at,
                    expires_at,
                });
                true
            }
        }
    }

    /// Lookup the consumption record of `nonce`
    pub fn lookup(&self, nonce: &str) -> Option<NonceRecord> {
        self.records.get(nonce).map(|r| *r)
    }

    /// Forget the nonces whose token has expired by `now`.  An expired token
    /// is refused regardless of its nonce, so these records are dead weight.
    pub fn prune(&self, now: u64) -> usize {
        let before = self.records.len();

        self.records.retain(|_, r| r.expires_at > now);

        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn consume_once() {
        let l = NonceLedger::new();

        assert!(l.consume("n1", 10, 100));
        assert!(!l.consume("n1", 11, 200));
        assert!(l.consume("n2", 12, 100));

        // the failed attempt did not overwrite the first record
        assert_eq!(
            l.lookup("n1"),
            Some(NonceRecord {
                consumed_at: 10,
                expires_at: 100
            })
        );
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn prune_expired() {
        let l = NonceLedger::new();

        l.consume("old", 10, 100);
        l.consume("new", 10, 300);

        assert_eq!(l.prune(100), 1);
        assert!(l.lookup("old").is_none());
        assert!(l.lookup("new").is_some());

        assert_eq!(l.prune(299), 0);
        assert_eq!(l.prune(300), 1);
        assert!(l.is_empty());
    }

    #[test]
    fn concurrent_consume_same_nonce() {
        let l = Arc::new(NonceLedger::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let l = Arc::clone(&l);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        if l.consume(&format!("nonce-{i}"), 1, 2) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 100);
        assert_eq!(l.len(), 100);
    }
}
