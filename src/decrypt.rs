//! Decryption functions.
//!
//! This module provides functions for decrypting OpenPGP encrypted messages
//! using locally stored secret key material.

use std::io::Cursor;

use pgp::composed::{Message, SignedSecretKey};
use pgp::types::Password;

use crate::error::{Error, Result};
use crate::internal::parse_secret_key;

/// Decrypt bytes using a secret key.
///
/// Decrypts an OpenPGP encrypted message using the recipient's secret key.
/// The message must have been encrypted to this key.
///
/// # Arguments
/// * `secret_cert` - The recipient's secret key (armored or binary)
/// * `ciphertext` - The encrypted data (armored or binary)
/// * `passphrase` - Passphrase to unlock the secret key
///
/// # Returns
/// The decrypted plaintext bytes.
///
/// # Errors
/// * [`Error::PassphraseIncorrect`] - If the passphrase is wrong
/// * [`Error::Crypto`] - If the message wasn't encrypted to this key
pub fn decrypt_bytes(secret_cert: &[u8], ciphertext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let secret_key = parse_secret_key(secret_cert)?;
    decrypt_with_key(&secret_key, ciphertext, passphrase)
}

/// Decrypt bytes using an already-parsed secret key.
pub fn decrypt_with_key(
    secret_key: &SignedSecretKey,
    ciphertext: &[u8],
    passphrase: &str,
) -> Result<Vec<u8>> {
    let password: Password = passphrase.into();

    // Parse the encrypted message (try armored first, then binary)
    let message = match Message::from_armor(Cursor::new(ciphertext)) {
        Ok((msg, _headers)) => msg,
        Err(_) => {
            Message::from_bytes(ciphertext).map_err(|e| Error::Parse(e.to_string()))?
        }
    };

    // Try standard decrypt first, then legacy mode
    let decrypted = message
        .decrypt(&password, secret_key)
        .or_else(|_| {
            // Re-parse for the legacy attempt; decrypt consumes the message
            let msg = match Message::from_armor(Cursor::new(ciphertext)) {
                Ok((m, _headers)) => m,
                Err(_) => {
                    Message::from_bytes(ciphertext).map_err(|e| Error::Parse(e.to_string()))?
                }
            };
            msg.decrypt_legacy(&password, secret_key)
                .map_err(|e| Error::Crypto(e.to_string()))
        })
        .map_err(|e: Error| {
            // rpgp reports a bad passphrase as a generic unlock failure
            let text = e.to_string();
            if text.contains("password") || text.contains("decrypt") || text.contains("checksum") {
                Error::PassphraseIncorrect
            } else {
                e
            }
        })?;

    // Handle compression if present
    let mut decompressed = if decrypted.is_compressed() {
        decrypted
            .decompress()
            .map_err(|e| Error::Crypto(e.to_string()))?
    } else {
        decrypted
    };

    decompressed
        .as_data_vec()
        .map_err(|e| Error::Crypto(e.to_string()))
}
