//! Boundary to the external key-value store holding encrypted tuple-set
//! rows. The store is only ever touched through opaque byte keys; every
//! worker thread clones one handle at pool startup and reuses it across
//! rounds, the moral equivalent of a per-thread pooled connection.

use crate::channel::Channel;
use crate::error::OxtSseError;
use crate::params::{KV_KEY_BYTE_LEN, LABEL_BYTE_LEN, TSET_VALUE_BYTE_LEN};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::RwLock;

/// A key under which one tuple-set value is filed: the digest-derived bucket,
/// the slot issued by the free-bucket table, and the digest-derived label
/// that disambiguates chains sharing a (bucket, slot) pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KvKey {
    pub bucket: u16,
    pub slot: u16,
    pub label: [u8; LABEL_BYTE_LEN],
}

impl KvKey {
    pub fn to_bytes(&self) -> [u8; KV_KEY_BYTE_LEN] {
        let mut out = [0u8; KV_KEY_BYTE_LEN];
        out[..2].copy_from_slice(&self.bucket.to_le_bytes());
        out[2..4].copy_from_slice(&self.slot.to_le_bytes());
        out[4..].copy_from_slice(&self.label);
        out
    }
}

/// Get/set access to the store. A missing key is an ordinary outcome, not an
/// error; store-side failures surface as misses inside implementations.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn set(&self, key: &[u8], value: &[u8]);
}

/// In-process store implementation backing tests, demos and deployments that
/// co-locate the row store with the query engine.
pub struct MemKvStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemKvStore {
    pub fn new() -> MemKvStore {
        MemKvStore {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of every entry, for shipping an index built
    /// locally to a remote store.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries.read().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Default for MemKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemKvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        self.entries.write().unwrap().insert(key.to_vec(), value.to_vec());
    }
}

/// Streams built index rows to a remote party: an entry count followed by
/// fixed-width (key, value) pairs.
pub fn send_entries<S: Read + Write>(channel: &mut Channel<S>, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), OxtSseError> {
    channel.write_u64(entries.len() as u64)?;
    for (key, value) in entries {
        debug_assert_eq!(key.len(), KV_KEY_BYTE_LEN);
        debug_assert_eq!(value.len(), TSET_VALUE_BYTE_LEN);

        channel.write_all_bytes(key)?;
        channel.write_all_bytes(value)?;
    }
    channel.flush()
}

/// Receives index rows streamed by `send_entries` into the given store and
/// returns how many were filed.
pub fn recv_entries<S: Read + Write>(channel: &mut Channel<S>, store: &dyn KvStore) -> Result<usize, OxtSseError> {
    let entry_count = channel.read_u64()? as usize;
    for _ in 0..entry_count {
        let mut key = [0u8; KV_KEY_BYTE_LEN];
        let mut value = [0u8; TSET_VALUE_BYTE_LEN];
        channel.read_exact_into(&mut key)?;
        channel.read_exact_into(&mut value)?;

        store.set(&key, &value);
    }

    Ok(entry_count)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kv_key_layout_is_bucket_slot_label() {
        let key = KvKey {
            bucket: 0x0201,
            slot: 0x0403,
            label: [9u8; 12],
        };

        let bytes = key.to_bytes();
        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[4..], &[9u8; 12]);
    }

    #[test]
    fn mem_store_misses_then_hits() {
        let store = MemKvStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get(b"absent"), None);

        store.set(b"present", b"value");
        assert_eq!(store.get(b"present").as_deref(), Some(b"value".as_slice()));
        assert_eq!(store.len(), 1);
    }
}
