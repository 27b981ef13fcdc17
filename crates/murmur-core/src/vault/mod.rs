//! Key vault.
//!
//! Owns all long-lived cryptographic material on this device: the master
//! secret feeding conversation secret derivation, per-user RSA-2048 key
//! pairs, and a cache of derived shared secrets. Every mutation is persisted
//! through the [`KeyStore`] backend so the material survives restarts.
//!
//! Corrupt or unreadable storage never takes the vault down: opening falls
//! back to a fresh master secret and counts the recovery, at the cost of old
//! envelopes becoming undecryptable.

mod store;

pub use store::{KeyStore, MemoryKeyStore, StoreError, StoredKeyPair, StoredSharedSecret, VaultRecord};

use std::collections::{BTreeMap, BTreeSet};

use murmur_crypto::{DeriveError, derive_shared_secret};
use rand::rngs::OsRng;
use rsa::{
    Oaep, RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::env::Environment;

/// RSA modulus size for user key pairs.
const RSA_KEY_BITS: usize = 2048;

/// Errors from vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Persistence backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Shared secret derivation failed.
    #[error(transparent)]
    Derive(#[from] DeriveError),

    /// RSA key generation, encoding, or usage failed.
    #[error("key operation failed: {0}")]
    Key(String),

    /// No key pair exists for the user.
    #[error("no key pair stored for user {user_id}")]
    MissingKeyPair {
        /// User whose key pair was requested.
        user_id: String,
    },

    /// Stored material failed validation.
    #[error("vault integrity violation: {reason}")]
    IntegrityViolation {
        /// What failed validation.
        reason: String,
    },
}

/// In-memory RSA key pair handed out by the vault.
#[derive(Debug, Clone)]
pub struct UserKeyPair {
    /// Owning user.
    pub user_id: String,
    /// Public half.
    pub public_key: RsaPublicKey,
    /// Private half.
    pub private_key: RsaPrivateKey,
}

/// Device-local store of cryptographic material.
#[derive(Debug)]
pub struct KeyVault<S: KeyStore> {
    store: S,
    master_secret: Zeroizing<String>,
    key_pairs: BTreeMap<String, StoredKeyPair>,
    shared_secrets: BTreeMap<String, StoredSharedSecret>,
    recovery_count: u64,
}

impl<S: KeyStore> KeyVault<S> {
    /// Open the vault from storage.
    ///
    /// Empty storage provisions a fresh random master secret. Corrupt or
    /// unreadable storage is logged and treated as empty; the recovery is
    /// counted and previously derived secrets are lost.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Store`] when persisting the fresh record fails.
    pub fn open<E: Environment>(store: S, env: &E) -> Result<Self, VaultError> {
        Self::open_inner(store, env, None)
    }

    /// Open the vault with a caller-provisioned master secret.
    ///
    /// The provisioned secret is used only when storage is empty or
    /// unreadable; an intact stored record keeps its own master secret so
    /// existing conversation secrets stay valid.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Store`] when persisting the fresh record fails.
    pub fn open_provisioned<E: Environment>(
        store: S,
        env: &E,
        master_secret: String,
    ) -> Result<Self, VaultError> {
        Self::open_inner(store, env, Some(master_secret))
    }

    fn open_inner<E: Environment>(
        store: S,
        env: &E,
        provisioned: Option<String>,
    ) -> Result<Self, VaultError> {
        let (record, recovery_count) = match store.load() {
            Ok(Some(record)) => (Some(record), 0),
            Ok(None) => (None, 0),
            Err(e) => {
                tracing::warn!(error = %e, "vault storage unreadable, provisioning fresh material");
                (None, 1)
            },
        };

        let vault = match record {
            Some(record) => Self {
                store,
                master_secret: Zeroizing::new(record.master_secret),
                key_pairs: record.key_pairs,
                shared_secrets: record.shared_secrets,
                recovery_count,
            },
            None => {
                let master =
                    provisioned.unwrap_or_else(|| Self::generate_master_secret(env));
                Self {
                    store,
                    master_secret: Zeroizing::new(master),
                    key_pairs: BTreeMap::new(),
                    shared_secrets: BTreeMap::new(),
                    recovery_count,
                }
            },
        };

        vault.persist()?;
        Ok(vault)
    }

    fn generate_master_secret<E: Environment>(env: &E) -> String {
        let mut bytes = [0u8; 32];
        env.random_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// How many times opening fell back to fresh material because storage
    /// was unreadable.
    #[must_use]
    pub fn recovery_count(&self) -> u64 {
        self.recovery_count
    }

    /// Return the key pair for the user, generating and persisting a fresh
    /// RSA-2048 pair on first use.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Key`] when generation or DER encoding fails.
    /// - [`VaultError::Store`] when persisting fails.
    pub fn get_or_create_user_key_pair<E: Environment>(
        &mut self,
        user_id: &str,
        env: &E,
    ) -> Result<UserKeyPair, VaultError> {
        if let Some(stored) = self.key_pairs.get(user_id) {
            return Self::decode_key_pair(stored);
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| VaultError::Key(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_der = private_key
            .to_pkcs8_der()
            .map_err(|e| VaultError::Key(e.to_string()))?
            .as_bytes()
            .to_vec();
        let public_key_der = public_key
            .to_public_key_der()
            .map_err(|e| VaultError::Key(e.to_string()))?
            .as_bytes()
            .to_vec();

        self.key_pairs.insert(
            user_id.to_string(),
            StoredKeyPair {
                user_id: user_id.to_string(),
                public_key_der,
                private_key_der,
                created_at_ms: env.unix_millis(),
            },
        );
        self.persist()?;

        Ok(UserKeyPair { user_id: user_id.to_string(), public_key, private_key })
    }

    fn decode_key_pair(stored: &StoredKeyPair) -> Result<UserKeyPair, VaultError> {
        let private_key = RsaPrivateKey::from_pkcs8_der(&stored.private_key_der)
            .map_err(|e| VaultError::Key(e.to_string()))?;
        let public_key = RsaPublicKey::from_public_key_der(&stored.public_key_der)
            .map_err(|e| VaultError::Key(e.to_string()))?;
        Ok(UserKeyPair {
            user_id: stored.user_id.clone(),
            public_key,
            private_key,
        })
    }

    /// Return the shared secret for a conversation, deriving and caching it
    /// on first use. A cached secret is reused only when the participant set
    /// matches; a changed set forces re-derivation.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Derive`] when the participant list is empty.
    /// - [`VaultError::Store`] when persisting fails.
    pub fn get_or_create_shared_secret<E: Environment>(
        &mut self,
        conversation_id: &str,
        participants: &[String],
        env: &E,
    ) -> Result<String, VaultError> {
        let participant_set: BTreeSet<String> = participants.iter().cloned().collect();

        if let Some(cached) = self.shared_secrets.get_mut(conversation_id)
            && cached.participants == participant_set
        {
            cached.last_used_at_ms = env.unix_millis();
            let secret = cached.secret.clone();
            self.persist()?;
            return Ok(secret);
        }

        let secret = derive_shared_secret(participants, conversation_id, &self.master_secret)?;
        let now_ms = env.unix_millis();
        self.shared_secrets.insert(
            conversation_id.to_string(),
            StoredSharedSecret {
                conversation_id: conversation_id.to_string(),
                secret: secret.clone(),
                participants: participant_set,
                created_at_ms: now_ms,
                last_used_at_ms: now_ms,
            },
        );
        self.persist()?;

        Ok(secret)
    }

    /// Encrypt a small payload (key material, invitation tokens) to a user's
    /// public key with RSA-OAEP over SHA-256.
    ///
    /// # Errors
    ///
    /// - [`VaultError::MissingKeyPair`] when the user has no stored pair.
    /// - [`VaultError::Key`] when encryption fails, including payloads past
    ///   the OAEP limit for a 2048-bit key.
    pub fn seal_for_user(&self, user_id: &str, payload: &[u8]) -> Result<Vec<u8>, VaultError> {
        let stored = self
            .key_pairs
            .get(user_id)
            .ok_or_else(|| VaultError::MissingKeyPair { user_id: user_id.to_string() })?;
        let pair = Self::decode_key_pair(stored)?;

        pair.public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), payload)
            .map_err(|e| VaultError::Key(e.to_string()))
    }

    /// Decrypt a payload sealed to the user's public key.
    ///
    /// # Errors
    ///
    /// - [`VaultError::MissingKeyPair`] when the user has no stored pair.
    /// - [`VaultError::Key`] when decryption fails.
    pub fn open_with_user_key(&self, user_id: &str, sealed: &[u8]) -> Result<Vec<u8>, VaultError> {
        let stored = self
            .key_pairs
            .get(user_id)
            .ok_or_else(|| VaultError::MissingKeyPair { user_id: user_id.to_string() })?;
        let pair = Self::decode_key_pair(stored)?;

        pair.private_key
            .decrypt(Oaep::new::<Sha256>(), sealed)
            .map_err(|e| VaultError::Key(e.to_string()))
    }

    /// Replace the master secret and drop all cached shared secrets.
    ///
    /// Key pairs survive rotation; conversation secrets are re-derived on
    /// next use under the new master.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Store`] when persisting fails.
    pub fn rotate_keys<E: Environment>(&mut self, env: &E) -> Result<(), VaultError> {
        self.master_secret = Zeroizing::new(Self::generate_master_secret(env));
        self.shared_secrets.clear();
        self.persist()
    }

    /// Destroy all material, in memory and in storage. The only deletion
    /// path; there is no partial removal.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Store`] when the backend delete fails.
    pub fn wipe(&mut self) -> Result<(), VaultError> {
        self.master_secret = Zeroizing::new(String::new());
        self.key_pairs.clear();
        self.shared_secrets.clear();
        self.store.clear()?;
        Ok(())
    }

    /// Validate in-memory material: key pair halves present, shared secrets
    /// non-empty with at least one participant.
    ///
    /// # Errors
    ///
    /// - [`VaultError::IntegrityViolation`] naming the first failure.
    pub fn validate_integrity(&self) -> Result<(), VaultError> {
        for (user_id, pair) in &self.key_pairs {
            if pair.public_key_der.is_empty() || pair.private_key_der.is_empty() {
                return Err(VaultError::IntegrityViolation {
                    reason: format!("key pair for {user_id} has an empty half"),
                });
            }
        }

        for (conversation_id, secret) in &self.shared_secrets {
            if secret.secret.is_empty() {
                return Err(VaultError::IntegrityViolation {
                    reason: format!("shared secret for {conversation_id} is empty"),
                });
            }
            if secret.participants.is_empty() {
                return Err(VaultError::IntegrityViolation {
                    reason: format!("shared secret for {conversation_id} has no participants"),
                });
            }
        }

        Ok(())
    }

    /// Number of cached shared secrets.
    #[must_use]
    pub fn shared_secret_count(&self) -> usize {
        self.shared_secrets.len()
    }

    /// Number of stored key pairs.
    #[must_use]
    pub fn key_pair_count(&self) -> usize {
        self.key_pairs.len()
    }

    fn persist(&self) -> Result<(), VaultError> {
        let record = VaultRecord {
            master_secret: self.master_secret.as_str().to_string(),
            key_pairs: self.key_pairs.clone(),
            shared_secrets: self.shared_secrets.clone(),
        };
        self.store.store(&record)?;
        Ok(())
    }
}
