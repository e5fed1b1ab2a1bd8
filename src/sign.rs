//! Signing functions.
//!
//! This module provides functions for creating OpenPGP signatures on data
//! using locally stored secret key material. Hardware-backed signatures go
//! through [`TokenBridge`](crate::TokenBridge) instead.

use std::io::Cursor;

use pgp::composed::{CleartextSignedMessage, DetachedSignature, SignedSecretKey};
use pgp::crypto::hash::HashAlgorithm;
use pgp::types::{KeyDetails, Password, PublicParams};
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::internal::parse_secret_key;

/// Select appropriate hash algorithm based on key type.
/// ECDSA keys require hash algorithms that match or exceed their security level.
pub(crate) fn select_hash_for_key(secret_key: &SignedSecretKey) -> HashAlgorithm {
    let params = secret_key.primary_key.public_params();

    match params {
        PublicParams::ECDSA(ecdsa) => {
            use pgp::types::EcdsaPublicParams;
            match ecdsa {
                EcdsaPublicParams::P256 { .. } => HashAlgorithm::Sha256,
                EcdsaPublicParams::P384 { .. } => HashAlgorithm::Sha384,
                EcdsaPublicParams::P521 { .. } => HashAlgorithm::Sha512,
                _ => HashAlgorithm::Sha256,
            }
        }
        PublicParams::EdDSALegacy(_) | PublicParams::Ed25519(_) => HashAlgorithm::Sha256,
        PublicParams::RSA(_) => HashAlgorithm::Sha256,
        _ => HashAlgorithm::Sha256,
    }
}

/// Sign text with a cleartext signature.
///
/// Creates a cleartext signed message where the original text remains
/// human-readable with the signature appended. This is the format the mail
/// client uses for signed-but-unencrypted mail bodies.
///
/// # Arguments
/// * `secret_cert` - The signer's secret key (armored or binary)
/// * `text` - The text to sign
/// * `passphrase` - Passphrase to unlock the secret key
///
/// # Returns
/// The cleartext signed message.
///
/// # Errors
/// * [`Error::PassphraseIncorrect`] - If the passphrase is wrong
pub fn sign_text_cleartext(secret_cert: &[u8], text: &str, passphrase: &str) -> Result<String> {
    let secret_key = parse_secret_key(secret_cert)?;
    let password: Password = passphrase.into();
    let mut rng = thread_rng();

    let csf = CleartextSignedMessage::sign(&mut rng, text, &secret_key.primary_key, &password)
        .map_err(map_signing_error)?;

    csf.to_armored_string(None.into())
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Create a detached signature for bytes.
///
/// Creates a signature that is separate from the original data. The
/// recipient needs both the signature and the original bytes to verify.
///
/// # Arguments
/// * `secret_cert` - The signer's secret key (armored or binary)
/// * `data` - The data to sign
/// * `passphrase` - Passphrase to unlock the secret key
///
/// # Returns
/// The ASCII-armored detached signature.
pub fn sign_bytes_detached(secret_cert: &[u8], data: &[u8], passphrase: &str) -> Result<String> {
    let secret_key = parse_secret_key(secret_cert)?;
    let password: Password = passphrase.into();

    let mut rng = thread_rng();
    let hash_alg = select_hash_for_key(&secret_key);

    let signature = DetachedSignature::sign_binary_data(
        &mut rng,
        &secret_key.primary_key,
        &password,
        hash_alg,
        Cursor::new(data),
    )
    .map_err(map_signing_error)?;

    signature
        .to_armored_string(None.into())
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Map an rpgp signing error, distinguishing a bad passphrase from other
/// failures.
fn map_signing_error(e: pgp::errors::Error) -> Error {
    let text = e.to_string();
    if text.contains("password") || text.contains("checksum") || text.contains("decrypt") {
        Error::PassphraseIncorrect
    } else {
        Error::Crypto(text)
    }
}
