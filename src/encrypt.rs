//! Encryption functions.
//!
//! This module provides functions for encrypting data to one or more
//! OpenPGP recipients, optionally signing inside the encryption layer.

use pgp::composed::{MessageBuilder, SignedPublicKey, SignedSecretKey};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::{KeyDetails, Password};
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::internal::{is_subkey_valid, parse_public_key};
use crate::sign::select_hash_for_key;

/// Encrypt bytes to multiple recipients.
///
/// Encrypts the plaintext so that any of the recipients can decrypt it.
/// Each recipient only needs their own secret key to decrypt.
///
/// # Arguments
/// * `recipient_certs` - Slice of recipient public keys (armored or binary)
/// * `plaintext` - The data to encrypt
///
/// # Returns
/// The ASCII-armored encrypted message.
pub fn encrypt_bytes_to_multiple(recipient_certs: &[&[u8]], plaintext: &[u8]) -> Result<String> {
    encrypt_internal(recipient_certs, plaintext, None)
}

/// Encrypt bytes to multiple recipients and sign inside the encryption layer.
///
/// The signature is made with the signer's primary key, which must be
/// unlockable with the given passphrase. Recipients see a signed message
/// after decrypting; the signature is not visible on the wire.
///
/// # Arguments
/// * `recipient_certs` - Slice of recipient public keys (armored or binary)
/// * `plaintext` - The data to encrypt
/// * `signer_cert` - The signer's secret key (armored or binary)
/// * `passphrase` - Passphrase unlocking the signer's secret key
///
/// # Returns
/// The ASCII-armored encrypted-and-signed message.
pub fn encrypt_and_sign(
    recipient_certs: &[&[u8]],
    plaintext: &[u8],
    signer_cert: &[u8],
    passphrase: &str,
) -> Result<String> {
    let secret_key = crate::internal::parse_secret_key(signer_cert)?;
    encrypt_internal(recipient_certs, plaintext, Some((&secret_key, passphrase)))
}

fn encrypt_internal(
    recipient_certs: &[&[u8]],
    plaintext: &[u8],
    signer: Option<(&SignedSecretKey, &str)>,
) -> Result<String> {
    if recipient_certs.is_empty() {
        return Err(Error::NoRecipientKeys);
    }

    let mut rng = thread_rng();

    // Parse all recipient certificates and find usable encryption subkeys
    let mut encryption_keys = Vec::new();
    for cert_data in recipient_certs {
        let public_key = parse_public_key(cert_data)?;
        let subkeys = find_valid_encryption_subkeys(&public_key)?;
        encryption_keys.extend(subkeys);
    }

    let mut builder = MessageBuilder::from_bytes("", plaintext.to_vec())
        .seipd_v1(&mut rng, SymmetricKeyAlgorithm::AES256);

    for key in &encryption_keys {
        builder
            .encrypt_to_key(&mut rng, key)
            .map_err(|e| Error::Crypto(e.to_string()))?;
    }

    if let Some((secret_key, passphrase)) = signer {
        let password: Password = passphrase.into();
        let hash_alg = select_hash_for_key(secret_key);
        builder.sign(&secret_key.primary_key, password, hash_alg);
    }

    builder
        .to_armored_string(&mut rng, None.into())
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Helper to find valid encryption subkeys from a public key.
fn find_valid_encryption_subkeys(
    key: &SignedPublicKey,
) -> Result<Vec<pgp::composed::SignedPublicSubKey>> {
    let mut valid_keys = Vec::new();

    for subkey in &key.public_subkeys {
        if !subkey.key.algorithm().can_encrypt() {
            continue;
        }

        // Check key flags in binding signature
        let has_encryption_flag = subkey.signatures.iter().any(|sig| {
            let flags = sig.key_flags();
            flags.encrypt_comms() || flags.encrypt_storage()
        });

        if !has_encryption_flag {
            continue;
        }

        // Skip revoked or expired subkeys
        if !is_subkey_valid(subkey, false) {
            continue;
        }

        valid_keys.push(subkey.clone());
    }

    if valid_keys.is_empty() {
        return Err(Error::Crypto(
            "no usable encryption subkey in recipient certificate".to_string(),
        ));
    }

    Ok(valid_keys)
}
