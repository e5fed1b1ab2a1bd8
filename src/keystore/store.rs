//! KeyStore implementation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::internal::{
    fingerprint_to_hex, normalize_fingerprint, parse_public_key, primary_user_id, split_user_id,
};
use crate::key::create_key_pair;
use crate::types::{KeyMaterial, KeyRecord};

use super::metadata::{KeyMeta, MetadataTable};

/// File-backed key storage.
///
/// Armored key material lives under `<dir>/keys/` as one `.public` (and
/// optionally `.private`) file per fingerprint; metadata for every key is a
/// single JSON document at `<dir>/metadata.json`, rewritten in full on each
/// mutation. See the [module docs](crate::keystore) for the layout.
///
/// # Invariants
///
/// - At most one record has `is_default == true`. Changing the default
///   clears every other flag inside the same metadata rewrite.
/// - Every mutation is persisted before the call returns.
/// - The store never touches hardware; a key with `from_hardware_token`
///   set simply has no `.private` file.
///
/// # Thread Safety
///
/// All mutations take an internal mutex, so a `KeyStore` can be shared
/// behind an `Arc` across threads.
pub struct KeyStore {
    keys_dir: PathBuf,
    metadata_path: PathBuf,
    lock: Mutex<()>,
}

impl KeyStore {
    /// Open or create a key store rooted at the given directory.
    ///
    /// The directory and its `keys/` subdirectory are created if needed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mailcrypt::KeyStore;
    ///
    /// let store = KeyStore::open("/home/user/.mymail/keys").unwrap();
    /// println!("Keys in store: {}", store.count().unwrap());
    /// ```
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let keys_dir = dir.join("keys");
        fs::create_dir_all(&keys_dir)?;

        Ok(Self {
            keys_dir,
            metadata_path: dir.join("metadata.json"),
            lock: Mutex::new(()),
        })
    }

    /// Generate a new key pair and store both halves.
    ///
    /// The private block is written next to the public one; the first key
    /// ever stored becomes the default automatically.
    ///
    /// # Arguments
    /// * `name` - Display name for the user ID
    /// * `email` - Email address for the user ID
    /// * `passphrase` - Passphrase protecting the new secret key
    ///
    /// # Returns
    /// The record of the freshly stored key.
    pub fn generate_key_pair(&self, name: &str, email: &str, passphrase: &str) -> Result<KeyRecord> {
        let user_id = if name.trim().is_empty() {
            email.to_string()
        } else {
            format!("{} <{}>", name.trim(), email)
        };
        let generated = create_key_pair(&user_id, passphrase)?;

        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut table = MetadataTable::load(&self.metadata_path)?;

        fs::write(
            self.public_path(&generated.fingerprint),
            &generated.public_armored,
        )?;
        fs::write(
            self.private_path(&generated.fingerprint),
            &generated.private_armored,
        )?;

        let first_key = table.0.is_empty();
        table.0.insert(
            generated.fingerprint.clone(),
            KeyMeta {
                name: name.trim().to_string(),
                email: email.to_string(),
                is_default: first_key,
                has_private_key: true,
                from_hardware_token: false,
            },
        );
        table.save(&self.metadata_path)?;

        table
            .record(&generated.fingerprint)
            .ok_or_else(|| Error::KeyNotFound(generated.fingerprint.clone()))
    }

    /// Import an armored public key.
    ///
    /// Re-importing a known fingerprint refreshes the stored public block
    /// and identity but preserves `is_default`, `has_private_key`, and
    /// `from_hardware_token`.
    ///
    /// # Returns
    /// The canonical fingerprint of the imported key.
    pub fn import_public_key(&self, armored: &str) -> Result<String> {
        let public_key = parse_public_key(armored.as_bytes())?;
        let fingerprint = fingerprint_to_hex(&public_key.primary_key);
        let (name, email) = primary_user_id(&public_key)
            .map(|uid| split_user_id(&uid))
            .unwrap_or_default();

        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut table = MetadataTable::load(&self.metadata_path)?;

        fs::write(self.public_path(&fingerprint), armored)?;

        let entry = table.0.entry(fingerprint.clone()).or_default();
        entry.name = name;
        entry.email = email;
        table.save(&self.metadata_path)?;

        Ok(fingerprint)
    }

    /// Load the default key pair, if one is usable.
    ///
    /// Returns `None` unless a record is marked default, claims private
    /// material, and both armored files actually exist on disk. A record
    /// whose flags disagree with the filesystem is treated as unusable
    /// rather than an error.
    pub fn get_default_key_pair(&self) -> Result<Option<KeyMaterial>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let table = MetadataTable::load(&self.metadata_path)?;

        let Some(fp) = table
            .0
            .iter()
            .find(|(_, meta)| meta.is_default && meta.has_private_key)
            .map(|(fp, _)| fp.clone())
        else {
            return Ok(None);
        };

        let public_path = self.public_path(&fp);
        let private_path = self.private_path(&fp);
        if !public_path.exists() || !private_path.exists() {
            return Ok(None);
        }

        Ok(Some(KeyMaterial {
            public_armored: fs::read_to_string(public_path)?,
            private_armored: Some(fs::read_to_string(private_path)?),
        }))
    }

    /// The record currently marked default, if any.
    pub fn default_record(&self) -> Result<Option<KeyRecord>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let table = MetadataTable::load(&self.metadata_path)?;
        Ok(table
            .default_fingerprint()
            .cloned()
            .and_then(|fp| table.record(&fp)))
    }

    /// Mark a key as the default.
    ///
    /// Every other default flag is cleared in the same metadata rewrite, so
    /// the store can never persist two defaults.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] if the fingerprint is not in the store.
    pub fn set_default_key(&self, fingerprint: &str) -> Result<()> {
        let fingerprint = normalize_fingerprint(fingerprint)?;

        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut table = MetadataTable::load(&self.metadata_path)?;

        if !table.0.contains_key(&fingerprint) {
            return Err(Error::KeyNotFound(fingerprint));
        }

        table.clear_defaults();
        if let Some(meta) = table.0.get_mut(&fingerprint) {
            meta.is_default = true;
        }
        table.save(&self.metadata_path)
    }

    /// Mark a key as hardware-backed.
    ///
    /// Hardware-origin keys keep only their public block in the store; the
    /// private half stays on the token.
    pub fn mark_hardware_origin(&self, fingerprint: &str) -> Result<()> {
        let fingerprint = normalize_fingerprint(fingerprint)?;

        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut table = MetadataTable::load(&self.metadata_path)?;

        let meta = table
            .0
            .get_mut(&fingerprint)
            .ok_or(Error::KeyNotFound(fingerprint.clone()))?;
        meta.from_hardware_token = true;
        table.save(&self.metadata_path)
    }

    /// Delete a key: its record and any material files.
    ///
    /// If the deleted key was the default, another key is elected in its
    /// place, preferring keys that hold private material.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] if the fingerprint is not in the store.
    pub fn delete_key(&self, fingerprint: &str) -> Result<()> {
        let fingerprint = normalize_fingerprint(fingerprint)?;

        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut table = MetadataTable::load(&self.metadata_path)?;

        let removed = table
            .0
            .remove(&fingerprint)
            .ok_or(Error::KeyNotFound(fingerprint.clone()))?;

        remove_if_exists(&self.public_path(&fingerprint))?;
        remove_if_exists(&self.private_path(&fingerprint))?;

        if removed.is_default {
            // Re-elect, preferring a key we can actually sign with
            let successor = table
                .0
                .iter()
                .find(|(_, meta)| meta.has_private_key)
                .or_else(|| table.0.iter().next())
                .map(|(fp, _)| fp.clone());
            if let Some(fp) = successor {
                if let Some(meta) = table.0.get_mut(&fp) {
                    meta.is_default = true;
                }
            }
        }

        table.save(&self.metadata_path)
    }

    /// Look up the record for a fingerprint.
    pub fn get_record(&self, fingerprint: &str) -> Result<Option<KeyRecord>> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        let _guard = self.lock.lock().map_err(poisoned)?;
        let table = MetadataTable::load(&self.metadata_path)?;
        Ok(table.record(&fingerprint))
    }

    /// List every record in the store, ordered by fingerprint.
    pub fn list_records(&self) -> Result<Vec<KeyRecord>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let table = MetadataTable::load(&self.metadata_path)?;
        Ok(table
            .0
            .keys()
            .filter_map(|fp| table.record(fp))
            .collect())
    }

    /// Check whether a fingerprint is known to the store.
    pub fn contains(&self, fingerprint: &str) -> Result<bool> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        let _guard = self.lock.lock().map_err(poisoned)?;
        let table = MetadataTable::load(&self.metadata_path)?;
        Ok(table.0.contains_key(&fingerprint))
    }

    /// Number of keys in the store.
    pub fn count(&self) -> Result<usize> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let table = MetadataTable::load(&self.metadata_path)?;
        Ok(table.0.len())
    }

    /// Read the armored public block for a fingerprint, if stored.
    pub fn public_key(&self, fingerprint: &str) -> Result<Option<String>> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        read_optional(&self.public_path(&fingerprint))
    }

    /// Read the armored private block for a fingerprint, if stored.
    pub fn private_key(&self, fingerprint: &str) -> Result<Option<String>> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        read_optional(&self.private_path(&fingerprint))
    }

    fn public_path(&self, fingerprint: &str) -> PathBuf {
        self.keys_dir.join(format!("{}.public", fingerprint))
    }

    fn private_path(&self, fingerprint: &str) -> PathBuf {
        self.keys_dir.join(format!("{}.private", fingerprint))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Crypto("key store lock poisoned".to_string())
}
