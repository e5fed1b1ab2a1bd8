//! Key pair generation.
//!
//! Generates the Curve25519 key pairs the mail client provisions for new
//! accounts: an EdDSA primary key that certifies and signs, plus an ECDH
//! encryption subkey. Both halves are exported ASCII-armored so the key
//! store can lay them down as plain text files.

use pgp::composed::{EncryptionCaps, KeyType, SecretKeyParamsBuilder, SubkeyParamsBuilder};
use pgp::crypto::ecc_curve::ECCCurve;
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::internal::{fingerprint_to_hex, public_key_to_armored, secret_key_to_armored};
use crate::types::GeneratedKey;

/// Generate a new Curve25519 key pair for the given identity.
///
/// # Arguments
/// * `user_id` - Identity of the form `Name <email@example.com>`
/// * `passphrase` - Passphrase protecting the secret key (empty = unprotected)
///
/// # Returns
/// The generated key with armored public and private blocks and the
/// canonical fingerprint.
///
/// # Example
/// ```no_run
/// use mailcrypt::create_key_pair;
///
/// let key = create_key_pair("Alice <alice@example.com>", "correct horse").unwrap();
/// println!("Fingerprint: {}", key.fingerprint);
/// ```
pub fn create_key_pair(user_id: &str, passphrase: &str) -> Result<GeneratedKey> {
    if user_id.trim().is_empty() {
        return Err(Error::InvalidInput("A user ID is required".to_string()));
    }

    let mut rng = thread_rng();

    let mut enc_builder = SubkeyParamsBuilder::default();
    enc_builder
        .key_type(KeyType::ECDH(ECCCurve::Curve25519))
        .can_encrypt(EncryptionCaps::All)
        .can_sign(false)
        .can_authenticate(false);
    if !passphrase.is_empty() {
        enc_builder.passphrase(Some(passphrase.to_string()));
    }
    let encryption_subkey = enc_builder
        .build()
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(KeyType::Ed25519Legacy)
        .can_certify(true)
        .can_sign(true)
        .can_encrypt(EncryptionCaps::None)
        .primary_user_id(user_id.to_string())
        .subkeys(vec![encryption_subkey]);
    if !passphrase.is_empty() {
        key_params.passphrase(Some(passphrase.to_string()));
    }

    let secret_key_params = key_params
        .build()
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let secret_key = secret_key_params
        .generate(&mut rng)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let public_key = secret_key.to_public_key();
    let public_armored = public_key_to_armored(&public_key)?;
    let private_armored = secret_key_to_armored(&secret_key)?;
    let fingerprint = fingerprint_to_hex(&public_key.primary_key);

    Ok(GeneratedKey {
        public_armored,
        private_armored,
        fingerprint,
    })
}
