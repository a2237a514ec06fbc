//! FIFO mutual exclusion keyed by an arbitrary equatable value (spec §4.1).

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum KeyedLockError {
    #[error("unlock called on a key that is not locked")]
    NotLocked,
}

struct KeyState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Per-key FIFO mutual exclusion. Distinct keys never block each other;
/// lock ordering across multiple keys is the caller's responsibility.
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    state: Mutex<HashMap<K, KeyState>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Atomic test-and-acquire. Returns whether the lock was newly acquired.
    pub fn try_lock(&self, key: &K) -> bool {
        let mut state = self.state.lock().expect("keyed lock state poisoned");
        match state.get_mut(key) {
            Some(entry) if entry.held => false,
            Some(entry) => {
                entry.held = true;
                true
            }
            None => {
                state.insert(
                    key.clone(),
                    KeyState {
                        held: true,
                        waiters: VecDeque::new(),
                    },
                );
                true
            }
        }
    }

    /// Acquire the lock, waiting if it is already held. Completes immediately
    /// if the key is free.
    pub async fn wait_for_lock(&self, key: &K) {
        let rx = {
            let mut state = self.state.lock().expect("keyed lock state poisoned");
            match state.get_mut(key) {
                Some(entry) if entry.held => {
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push_back(tx);
                    Some(rx)
                }
                Some(entry) => {
                    entry.held = true;
                    None
                }
                None => {
                    state.insert(
                        key.clone(),
                        KeyState {
                            held: true,
                            waiters: VecDeque::new(),
                        },
                    );
                    None
                }
            }
        };
        if let Some(rx) = rx {
            // The grantor always fulfils this; a dropped sender would mean the
            // lock table entry vanished while we were queued, which never happens.
            let _ = rx.await;
        }
    }

    /// Release the lock, granting the oldest waiter (FIFO) if any, else
    /// freeing the key entirely.
    pub fn unlock(&self, key: &K) -> Result<(), KeyedLockError> {
        let mut state = self.state.lock().expect("keyed lock state poisoned");
        match state.get_mut(key) {
            Some(entry) if entry.held => {
                if let Some(next) = entry.waiters.pop_front() {
                    let _ = next.send(());
                } else {
                    state.remove(key);
                }
                Ok(())
            }
            _ => Err(KeyedLockError::NotLocked),
        }
    }

    /// Acquire multiple keys in the given order; on drop of the returned
    /// guard release happens in reverse order.
    pub async fn wait_for_locks(&self, keys: &[K]) -> MultiGuard<'_, K> {
        for key in keys {
            self.wait_for_lock(key).await;
        }
        MultiGuard {
            locks: self,
            keys: keys.to_vec(),
        }
    }
}

/// RAII guard releasing a set of keys in reverse acquisition order.
pub struct MultiGuard<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    keys: Vec<K>,
}

impl<K: Eq + Hash + Clone> Drop for MultiGuard<'_, K> {
    fn drop(&mut self) {
        for key in self.keys.iter().rev() {
            let _ = self.locks.unlock(key);
        }
    }
}
