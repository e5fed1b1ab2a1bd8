//! File-backed key storage.
//!
//! This module provides persistent storage for OpenPGP key material as
//! plain armored files plus a small JSON metadata table. Private material
//! lives next to the public block when a key was generated locally; keys
//! whose private half lives on a hardware token only store the public side.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   metadata.json          one object per fingerprint
//!   keys/
//!     <FINGERPRINT>.public   armored public key
//!     <FINGERPRINT>.private  armored private key (local keys only)
//! ```
//!
//! # Basic Usage
//!
//! ```no_run
//! use mailcrypt::KeyStore;
//!
//! // Open or create a key store
//! let store = KeyStore::open("~/.mymail/keys").unwrap();
//!
//! // Generate a key; the first key ever stored becomes the default
//! let record = store
//!     .generate_key_pair("Alice", "alice@example.com", "password")
//!     .unwrap();
//! println!("Generated key: {}", record.fingerprint);
//!
//! // List all keys
//! for rec in store.list_records().unwrap() {
//!     println!("  {} <{}> {}", rec.name, rec.email, rec.fingerprint);
//! }
//! ```

mod metadata;
mod store;

pub use store::KeyStore;
