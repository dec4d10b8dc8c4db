//! In-memory device key store
//!
//! One record per identity, keyed by its 8-byte SRC. Records are immutable
//! once stored: every writer builds a complete replacement and swaps it in,
//! so a reader never observes a half-rotated fan.

use parking_lot::RwLock;
use shardrelay_core::crypto::SymmetricKey;
use shardrelay_core::exchange::ExchangeKeyPair;
use shardrelay_core::kdf::{KeyFan, Src};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Material stored once a device has registered
#[derive(Clone)]
pub struct Registration {
    /// Key-encryption key the next Login/Rekey wraps its fans under
    pub nonce: SymmetricKey,
    pub w_token: Vec<u8>,
    pub ds_pub: Vec<u8>,
    pub de_pub: Vec<u8>,
    /// One ephemeral exchange key per fan slot, owner first
    pub se_priv: Vec<ExchangeKeyPair>,
    pub login_encrypts: KeyFan,
    pub login_signs: KeyFan,
}

/// Everything the relay holds for one identity
#[derive(Clone)]
pub struct DeviceKeyState {
    pub encrypts: KeyFan,
    pub signs: KeyFan,
    /// `None` for the owner and for invited devices that have not registered
    pub registration: Option<Registration>,
}

impl DeviceKeyState {
    /// Identity provisioned with its fans only
    pub fn provisioned(encrypts: KeyFan, signs: KeyFan) -> Self {
        Self {
            encrypts,
            signs,
            registration: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Rotating fans used to authenticate Login
    pub fn login_fans(&self) -> Option<(&KeyFan, &KeyFan)> {
        self.registration
            .as_ref()
            .map(|r| (&r.login_encrypts, &r.login_signs))
    }
}

impl fmt::Debug for DeviceKeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKeyState")
            .field("nodes", &self.encrypts.node_count())
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

/// Concurrent SRC -> DeviceKeyState map
#[derive(Default)]
pub struct DeviceKeyStore {
    devices: RwLock<HashMap<Src, Arc<DeviceKeyState>>>,
}

impl DeviceKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, src: &Src) -> Option<Arc<DeviceKeyState>> {
        self.devices.read().get(src).cloned()
    }

    /// Store unconditionally, replacing any previous record
    pub fn put(&self, src: Src, state: DeviceKeyState) {
        self.devices.write().insert(src, Arc::new(state));
    }

    /// Store only if `src` is unknown. Returns false if a record exists.
    pub fn insert_new(&self, src: Src, state: DeviceKeyState) -> bool {
        let mut devices = self.devices.write();
        if devices.contains_key(&src) {
            return false;
        }
        devices.insert(src, Arc::new(state));
        true
    }

    /// Swap in `next` only if the stored record is still `current`.
    ///
    /// Two rotations that both started from the same record cannot both
    /// succeed; the loser sees `false`.
    pub fn replace(&self, src: &Src, current: &Arc<DeviceKeyState>, next: DeviceKeyState) -> bool {
        let mut devices = self.devices.write();
        match devices.get_mut(src) {
            Some(stored) if Arc::ptr_eq(stored, current) => {
                *stored = Arc::new(next);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardrelay_core::kdf::KeyHierarchy;

    fn state(secret: &[u8]) -> (Src, DeviceKeyState) {
        let h = KeyHierarchy::from_secret(secret).unwrap();
        (
            h.src(),
            DeviceKeyState::provisioned(h.encrypt_fan(3).unwrap(), h.sign_fan(3).unwrap()),
        )
    }

    #[test]
    fn test_insert_new_only_once() {
        let store = DeviceKeyStore::new();
        let (src, first) = state(b"one");
        assert!(store.insert_new(src, first.clone()));
        assert!(!store.insert_new(src, first));
        assert_eq!(store.len(), 1);
        assert!(!store.get(&src).unwrap().is_registered());
    }

    #[test]
    fn test_replace_detects_concurrent_update() {
        let store = DeviceKeyStore::new();
        let (src, initial) = state(b"one");
        store.put(src, initial.clone());

        let seen_by_a = store.get(&src).unwrap();
        let seen_by_b = store.get(&src).unwrap();

        assert!(store.replace(&src, &seen_by_a, initial.clone()));
        assert!(!store.replace(&src, &seen_by_b, initial));
    }

    #[test]
    fn test_replace_unknown_src() {
        let store = DeviceKeyStore::new();
        let (src, initial) = state(b"one");
        let detached = Arc::new(initial.clone());
        assert!(!store.replace(&src, &detached, initial));
        assert!(store.is_empty());
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let store = DeviceKeyStore::new();
        let (src, initial) = state(b"one");
        let (_, other) = state(b"two");
        store.put(src, initial);

        let snapshot = store.get(&src).unwrap();
        store.put(src, other.clone());
        assert_ne!(snapshot.encrypts, other.encrypts);
        assert_eq!(store.get(&src).unwrap().encrypts, other.encrypts);
    }
}
