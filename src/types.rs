//! Public data types used across the library.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Metadata describing one key known to the [`KeyStore`](crate::KeyStore).
///
/// The fingerprint is always the canonical form: uppercase hex with no
/// spaces. `has_private_key` tracks whether local private material is stored
/// alongside the public block; `from_hardware_token` marks keys whose private
/// half lives on a token and never touches disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub fingerprint: String,
    pub name: String,
    pub email: String,
    pub is_default: bool,
    pub has_private_key: bool,
    pub from_hardware_token: bool,
}

/// Armored key material loaded from the store.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// ASCII-armored public key block.
    pub public_armored: String,
    /// ASCII-armored private key block, if present on disk.
    pub private_armored: Option<String>,
}

/// Result of generating a fresh key pair.
#[derive(Debug)]
pub struct GeneratedKey {
    /// ASCII-armored public key block.
    pub public_armored: String,
    /// ASCII-armored private key block.
    pub private_armored: String,
    /// Canonical fingerprint (uppercase hex, no spaces).
    pub fingerprint: String,
}

/// Touch policy configured for a token key slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPolicy {
    Off,
    On,
    Fixed,
    Cached,
    CachedFixed,
}

impl TouchPolicy {
    /// Parse a policy name as reported by the vendor management tool.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Some(TouchPolicy::Off),
            "on" => Some(TouchPolicy::On),
            "fixed" => Some(TouchPolicy::Fixed),
            "cached" => Some(TouchPolicy::Cached),
            "cached-fixed" | "cached_fixed" => Some(TouchPolicy::CachedFixed),
            _ => None,
        }
    }
}

/// OpenPGP applet state read from a connected token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenPgpStatus {
    pub signature_fingerprint: Option<String>,
    pub decryption_fingerprint: Option<String>,
    pub authentication_fingerprint: Option<String>,
    pub touch_policy: Option<TouchPolicy>,
    pub pin_tries_remaining: Option<u8>,
    pub public_key_url: Option<String>,
}

/// A snapshot of a detected hardware token.
///
/// `openpgp: None` means the token is physically present but its OpenPGP
/// applet could not be read. Sessions are never cached; detection runs anew
/// before every hardware operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSession {
    pub serial: String,
    pub firmware: Option<String>,
    pub openpgp: Option<OpenPgpStatus>,
}

/// Outcome of a signing request.
#[derive(Debug)]
pub enum SignOutcome {
    /// The armored signed message.
    Signed(String),
    /// Signing failed in a non-fatal way; the returned message is marked as
    /// unsigned and carries the intended signer's identity and public key.
    UnsignedFallback { message: String, reason: String },
    /// The hardware token wants a PIN before it will sign.
    NeedsPin,
}

/// Outcome of a decryption request.
#[derive(Debug)]
pub enum DecryptOutcome {
    Plaintext(Vec<u8>),
    /// The hardware token wants a PIN before it will decrypt.
    NeedsPin,
}

/// A caller-supplied unlock secret.
///
/// Passphrases unlock locally stored private keys; PINs unlock hardware
/// tokens. The two fail differently ([`Error::PassphraseIncorrect`] vs the
/// PIN error family) and are never interchangeable, so the engine requires
/// callers to say which one they are holding.
///
/// [`Error::PassphraseIncorrect`]: crate::Error::PassphraseIncorrect
#[derive(Debug, Clone)]
pub enum Credential {
    Passphrase(SecretString),
    Pin(SecretString),
}

impl Credential {
    pub fn passphrase(value: impl Into<String>) -> Self {
        Credential::Passphrase(SecretString::new(value.into()))
    }

    pub fn pin(value: impl Into<String>) -> Self {
        Credential::Pin(SecretString::new(value.into()))
    }

    /// The secret value regardless of kind.
    pub(crate) fn secret(&self) -> &str {
        match self {
            Credential::Passphrase(s) | Credential::Pin(s) => s.expose_secret(),
        }
    }

    /// The PIN value, if this credential is a PIN.
    pub(crate) fn pin_value(&self) -> Option<&str> {
        match self {
            Credential::Pin(s) => Some(s.expose_secret()),
            Credential::Passphrase(_) => None,
        }
    }
}

/// Options for [`CryptoEngine::encrypt_message`](crate::CryptoEngine::encrypt_message).
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Sign the message inside the encryption layer with the default key.
    pub sign: bool,
    /// Append the sender's armored public key block after the message.
    pub attach_public_key: bool,
    /// Passphrase for unlocking the default private key when signing.
    pub passphrase: Option<String>,
}

/// A public key found embedded in free-form message text.
#[derive(Debug, Clone)]
pub struct EmbeddedKey {
    pub armored: String,
    pub fingerprint: String,
    pub name: String,
    pub email: String,
}
