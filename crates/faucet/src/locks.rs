//! Per-key async mutexes serializing eligibility check through commit

use crate::ledger::CooldownKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// Registry of one async mutex per cooldown key. Entries live only while
/// some request holds or waits on them.
#[derive(Default)]
pub struct KeyLocks {
    slots: Arc<Mutex<HashMap<CooldownKey, Slot>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key. Keys are taken in sorted order so two requests
    /// sharing keys can never wait on each other in a cycle.
    pub async fn lock_all(&self, mut keys: Vec<CooldownKey>) -> KeyGuard {
        keys.sort();
        keys.dedup();

        // Built up in place so a cancelled caller still releases what it took.
        let mut guard = KeyGuard {
            held: Vec::with_capacity(keys.len()),
            slots: self.slots.clone(),
        };
        for key in keys {
            let slot = self.slot(&key);
            let lock = slot.lock_owned().await;
            guard.held.push((key, lock));
        }
        guard
    }

    fn slot(&self, key: &CooldownKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.clone()).or_default().clone()
    }

    /// Keys with an active holder or waiter.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Releases its keys on drop.
pub struct KeyGuard {
    held: Vec<(CooldownKey, OwnedMutexGuard<()>)>,
    slots: Arc<Mutex<HashMap<CooldownKey, Slot>>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for (key, guard) in self.held.drain(..) {
            drop(guard);
            // Map's Arc is the only one left: nobody holds or waits.
            let idle = slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1);
            if idle {
                slots.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn keys(identity: &str, address: &str) -> Vec<CooldownKey> {
        vec![
            CooldownKey::Identity(identity.to_string()),
            CooldownKey::Address(address.to_string()),
        ]
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let (locks, inside, peak) = (locks.clone(), inside.clone(), peak.clone());
            handles.push(tokio::spawn(async move {
                // distinct identities, shared address
                let _guard = locks.lock_all(keys(&format!("ip-{}", i), "0xaa")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_disjoint_keys_run_in_parallel() {
        let locks = KeyLocks::new();
        let first = locks.lock_all(keys("ip-1", "0xaa")).await;

        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock_all(keys("ip-2", "0xbb"))).await;
        assert!(second.is_ok());
        assert_eq!(locks.active(), 4);

        drop(first);
        drop(second);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_key_blocks_until_release() {
        let locks = KeyLocks::new();
        let first = locks.lock_all(keys("ip-1", "0xaa")).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock_all(keys("ip-1", "0xbb"))).await;
        assert!(blocked.is_err());

        drop(first);
        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.lock_all(keys("ip-1", "0xbb"))).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_keys_do_not_self_deadlock() {
        let locks = KeyLocks::new();
        let same = vec![
            CooldownKey::Identity("x".to_string()),
            CooldownKey::Identity("x".to_string()),
        ];
        let guard = tokio::time::timeout(Duration::from_millis(50), locks.lock_all(same)).await;
        assert!(guard.is_ok());
    }
}
