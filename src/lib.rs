//! # mailcrypt
//!
//! Key management and OpenPGP crypto engine for a secure-mail client,
//! built on [rpgp](https://docs.rs/pgp).
//!
//! The library covers the four concerns a mail client needs around
//! OpenPGP:
//!
//! - **Key storage**: a file-backed [`KeyStore`] holding armored key
//!   material plus a small metadata table (default key, identity,
//!   hardware origin)
//! - **Hardware tokens**: a [`TokenBridge`] that detects OpenPGP smart
//!   cards and routes sign/decrypt through external helper tools, with a
//!   precise PIN failure taxonomy
//! - **Key discovery**: [`KeyDiscovery`] resolves recipient keys across
//!   the store and the system keyring, and picks up keys pasted into
//!   mail bodies
//! - **Message operations**: a [`CryptoEngine`] that decides, per
//!   operation, between the local software path and the hardware path
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailcrypt::{
//!     BridgeConfig, CryptoEngine, EncryptOptions, KeyStore, Keyring, SystemRunner, TokenBridge,
//! };
//!
//! let store = Arc::new(KeyStore::open("/home/user/.mymail/keys").unwrap());
//! store
//!     .generate_key_pair("Alice", "alice@example.com", "password")
//!     .unwrap();
//!
//! let keyring = Keyring::new();
//! let bridge = Arc::new(TokenBridge::new(
//!     Arc::new(SystemRunner),
//!     keyring.clone(),
//!     BridgeConfig::default(),
//! ));
//! let engine = CryptoEngine::new(store, bridge, keyring);
//!
//! // Encrypts to the default key as implicit recipient
//! let ciphertext = engine
//!     .encrypt_message(b"Hello!", &[], &EncryptOptions::default())
//!     .unwrap();
//! ```
//!
//! ## Credentials
//!
//! Locally stored keys unlock with a passphrase; token keys unlock with a
//! PIN. The two are distinct [`Credential`] variants with distinct
//! failures: a wrong passphrase is [`Error::PassphraseIncorrect`], while
//! PINs move through [`Error::PinRequired`], [`Error::PinIncorrect`]
//! (retryable), and [`Error::PinBlocked`] (terminal, never re-prompt).

// Modules
mod error;
mod internal;
mod types;

mod decrypt;
mod discovery;
mod encrypt;
mod engine;
mod key;
mod keyring;
mod sign;

pub mod hardware;
pub mod keystore;

// Re-export error types
pub use error::{Error, Result};

// Re-export all public types
pub use types::{
    Credential, DecryptOutcome, EmbeddedKey, EncryptOptions, GeneratedKey, KeyMaterial, KeyRecord,
    OpenPgpStatus, SignOutcome, TokenSession, TouchPolicy,
};

// Re-export the crypto primitives
pub use decrypt::{decrypt_bytes, decrypt_with_key};
pub use encrypt::{encrypt_and_sign, encrypt_bytes_to_multiple};
pub use key::create_key_pair;
pub use sign::{sign_bytes_detached, sign_text_cleartext};

// Re-export the components
pub use discovery::KeyDiscovery;
pub use engine::CryptoEngine;
pub use hardware::{
    BridgeConfig, CommandOutput, CommandSpec, HardwareCommandRunner, SystemRunner, TokenBridge,
    TokenProbe,
};
pub use keyring::Keyring;
pub use keystore::KeyStore;
