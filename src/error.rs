//! Error types for the mailcrypt library.
//!
//! This module provides a comprehensive error type that covers all possible
//! failure modes across the key store, the hardware token bridge, and the
//! OpenPGP operations themselves.

use thiserror::Error;

/// The main error type for mailcrypt operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested key was not found in the key store
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// No usable default key pair is configured
    #[error("No usable default key configured")]
    NoDefaultKey,

    /// No recipient public keys could be resolved for encryption
    #[error("No recipient keys available for encryption")]
    NoRecipientKeys,

    /// A public key was not found in the store or the external keyring
    #[error("Public key not found: {0}")]
    PublicKeyNotFound(String),

    /// Invalid passphrase or unable to unlock the secret key
    #[error("Invalid passphrase for secret key")]
    PassphraseIncorrect,

    /// The hardware token needs a PIN before the operation can proceed
    #[error("Hardware token PIN required")]
    PinRequired,

    /// The supplied hardware token PIN was rejected; retries may remain
    #[error("Hardware token PIN incorrect")]
    PinIncorrect,

    /// The hardware token PIN is blocked; the token must be reset
    #[error("Hardware token PIN is blocked")]
    PinBlocked,

    /// No hardware token is connected
    #[error("No hardware token detected")]
    HardwareNotDetected,

    /// A token is connected but its OpenPGP applet is unusable
    #[error("Hardware token present but OpenPGP applet is not usable")]
    HardwareMisconfigured,

    /// An external tool exited abnormally; detail carries its stderr verbatim
    #[error("{tool} failed: {detail}")]
    ExternalToolFailure { tool: String, detail: String },

    /// Cryptographic operation failed
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Certificate or message parsing failed
    #[error("Parsing failed: {0}")]
    Parse(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key store metadata could not be read or written
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Generic error from anyhow
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// A specialized Result type for mailcrypt operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Crypto(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Crypto(s.to_string())
    }
}
