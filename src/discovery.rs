//! Public key discovery.
//!
//! Recipient keys can come from two places: the client's own key store
//! and the system keyring. Discovery checks the store first and falls
//! back to the keyring, caching keyring hits back into the store so the
//! next lookup is local. It also handles correspondents who paste their
//! armored public key into a mail body.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::internal::{
    fingerprint_to_hex, normalize_fingerprint, parse_public_key, primary_user_id, split_user_id,
};
use crate::keyring::Keyring;
use crate::keystore::KeyStore;
use crate::types::EmbeddedKey;

const KEY_BLOCK_BEGIN: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
const KEY_BLOCK_END: &str = "-----END PGP PUBLIC KEY BLOCK-----";

/// Resolves public keys across the key store and the system keyring.
pub struct KeyDiscovery {
    store: Arc<KeyStore>,
    keyring: Keyring,
}

impl KeyDiscovery {
    pub fn new(store: Arc<KeyStore>, keyring: Keyring) -> Self {
        Self { store, keyring }
    }

    /// Resolve an armored public key for a fingerprint.
    ///
    /// The key store is consulted first. On a miss, the keyring is asked;
    /// a keyring hit is written through into the store before returning,
    /// so subsequent lookups stay local.
    ///
    /// # Errors
    /// [`Error::PublicKeyNotFound`] when neither source has the key. A
    /// keyring that is missing or broken counts as a source with no keys.
    pub fn resolve_public_key(&self, fingerprint: &str) -> Result<String> {
        let fingerprint = normalize_fingerprint(fingerprint)?;

        if let Some(armored) = self.store.public_key(&fingerprint)? {
            return Ok(armored);
        }

        match self.keyring.export_public_key(&fingerprint) {
            Ok(armored) => {
                self.store.import_public_key(&armored)?;
                tracing::debug!(%fingerprint, "cached keyring public key into store");
                Ok(armored)
            }
            Err(e) => {
                tracing::debug!(%fingerprint, error = %e, "keyring lookup failed");
                Err(Error::PublicKeyNotFound(fingerprint))
            }
        }
    }

    /// Find an armored public key pasted into free-form message text.
    ///
    /// The candidate block is validated by actually parsing it; text
    /// without a valid block yields `None` rather than an error.
    pub fn extract_public_key_from_message(&self, text: &str) -> Result<Option<EmbeddedKey>> {
        Ok(extract_embedded_key(text))
    }

    /// Extract an embedded public key from message text and persist it in
    /// the key store.
    ///
    /// # Returns
    /// The extracted key, or `None` if the text carries no valid block.
    pub fn import_from_message(&self, text: &str) -> Result<Option<EmbeddedKey>> {
        let Some(embedded) = extract_embedded_key(text) else {
            return Ok(None);
        };
        self.store.import_public_key(&embedded.armored)?;
        Ok(Some(embedded))
    }
}

/// Scan text for a public key block and validate it.
fn extract_embedded_key(text: &str) -> Option<EmbeddedKey> {
    let start = text.find(KEY_BLOCK_BEGIN)?;
    let end_marker = text[start..].find(KEY_BLOCK_END)?;
    let armored = &text[start..start + end_marker + KEY_BLOCK_END.len()];

    let key = match parse_public_key(armored.as_bytes()) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(error = %e, "embedded key block failed to parse");
            return None;
        }
    };

    let fingerprint = fingerprint_to_hex(&key.primary_key);
    let (name, email) = primary_user_id(&key)
        .map(|uid| split_user_id(&uid))
        .unwrap_or_default();

    Some(EmbeddedKey {
        armored: armored.to_string(),
        fingerprint,
        name,
        email,
    })
}
