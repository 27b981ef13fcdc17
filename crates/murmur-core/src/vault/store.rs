//! Vault persistence.
//!
//! The vault serializes its full record to CBOR and hands the bytes to a
//! [`KeyStore`] backend. Platform integrations wrap their secure storage
//! (keychain, keystore) behind the trait; [`MemoryKeyStore`] backs tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a [`KeyStore`] backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend read or write failed.
    #[error("key store I/O failed: {0}")]
    Io(String),

    /// Stored bytes could not be decoded, or the record failed to encode.
    #[error("key store serialization failed: {0}")]
    Serialization(String),
}

/// Persisted RSA key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyPair {
    /// Owning user.
    pub user_id: String,
    /// Public half, `SubjectPublicKeyInfo` DER.
    pub public_key_der: Vec<u8>,
    /// Private half, PKCS#8 DER.
    pub private_key_der: Vec<u8>,
    /// Creation wall-clock time.
    pub created_at_ms: u64,
}

/// Persisted shared secret for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSharedSecret {
    /// Conversation the secret belongs to.
    pub conversation_id: String,
    /// Derived secret, hex-encoded.
    pub secret: String,
    /// Participant set the secret was derived over.
    pub participants: BTreeSet<String>,
    /// Derivation wall-clock time.
    pub created_at_ms: u64,
    /// Last cache hit wall-clock time.
    pub last_used_at_ms: u64,
}

/// Complete persisted vault state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    /// Master secret feeding shared-secret derivation.
    pub master_secret: String,
    /// Key pairs by user id.
    pub key_pairs: BTreeMap<String, StoredKeyPair>,
    /// Shared secrets by conversation id.
    pub shared_secrets: BTreeMap<String, StoredSharedSecret>,
}

/// Storage backend for vault records.
pub trait KeyStore: Clone + Send + Sync + 'static {
    /// Load the persisted record. `Ok(None)` when nothing is stored yet.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] when the backend read fails.
    /// - [`StoreError::Serialization`] when the stored bytes are corrupt.
    fn load(&self) -> Result<Option<VaultRecord>, StoreError>;

    /// Persist the record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] when the backend write fails.
    /// - [`StoreError::Serialization`] when encoding fails.
    fn store(&self, record: &VaultRecord) -> Result<(), StoreError>;

    /// Delete the persisted record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] when the backend delete fails.
    fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory [`KeyStore`].
///
/// Stores the encoded bytes rather than the record itself so every load goes
/// through a full decode, same as a real backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    bytes: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the raw stored bytes. Test hook for corruption scenarios.
    pub fn inject_raw(&self, bytes: Vec<u8>) {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<VaultRecord>, StoreError> {
        let guard = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_deref() {
            None => Ok(None),
            Some(bytes) => ciborium::from_reader(bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
        }
    }

    fn store(&self, record: &VaultRecord) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(record, &mut bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_record() -> VaultRecord {
        let mut record = VaultRecord { master_secret: "ms".to_string(), ..Default::default() };
        record.shared_secrets.insert(
            "conv_1".to_string(),
            StoredSharedSecret {
                conversation_id: "conv_1".to_string(),
                secret: "aa".repeat(32),
                participants: ["alice".to_string(), "bob".to_string()].into(),
                created_at_ms: 1,
                last_used_at_ms: 2,
            },
        );
        record
    }

    #[test]
    fn round_trips_through_encoded_bytes() {
        let store = MemoryKeyStore::new();
        assert_eq!(store.load().unwrap(), None);

        let record = sample_record();
        store.store(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[test]
    fn clear_removes_the_record() {
        let store = MemoryKeyStore::new();
        store.store(&sample_record()).unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn corrupt_bytes_surface_as_serialization_error() {
        let store = MemoryKeyStore::new();
        store.inject_raw(vec![0xff, 0x00, 0x13, 0x37]);
        assert!(matches!(store.load(), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn clones_share_storage() {
        let store = MemoryKeyStore::new();
        let clone = store.clone();
        store.store(&sample_record()).unwrap();
        assert!(clone.load().unwrap().is_some());
    }
}
