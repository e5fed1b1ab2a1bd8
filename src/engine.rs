//! The crypto engine.
//!
//! `CryptoEngine` is the one entry point the mail client calls for
//! message-level operations. It owns the policy decisions: which keys a
//! message is encrypted to, whether signing happens locally or on the
//! token, and which source gets to decrypt first. The primitives live in
//! [`encrypt`](crate::encrypt), [`decrypt`](crate::decrypt) and
//! [`sign`](crate::sign); the engine only routes between them, the
//! [`TokenBridge`], and the system keyring.

use std::sync::Arc;

use crate::discovery::KeyDiscovery;
use crate::error::{Error, Result};
use crate::hardware::TokenBridge;
use crate::internal::normalize_fingerprint;
use crate::keyring::Keyring;
use crate::keystore::KeyStore;
use crate::types::{
    Credential, DecryptOutcome, EncryptOptions, KeyRecord, OpenPgpStatus, SignOutcome,
};
use crate::{decrypt, encrypt, sign};

/// Orchestrates encryption, signing, and decryption across the key store,
/// the hardware token bridge, and the system keyring.
///
/// All collaborators are injected at construction; the engine holds no
/// global state and performs no lazy setup.
pub struct CryptoEngine {
    store: Arc<KeyStore>,
    bridge: Arc<TokenBridge>,
    keyring: Keyring,
    discovery: KeyDiscovery,
}

impl CryptoEngine {
    pub fn new(store: Arc<KeyStore>, bridge: Arc<TokenBridge>, keyring: Keyring) -> Self {
        let discovery = KeyDiscovery::new(Arc::clone(&store), keyring.clone());
        Self {
            store,
            bridge,
            keyring,
            discovery,
        }
    }

    /// The discovery component backing this engine.
    pub fn discovery(&self) -> &KeyDiscovery {
        &self.discovery
    }

    /// Encrypt a message to a set of recipients.
    ///
    /// Every recipient fingerprint is resolved through discovery; a
    /// recipient that resolves nowhere fails the whole call with
    /// [`Error::PublicKeyNotFound`]. The sender's own default key is
    /// always added as an implicit recipient (when it has a stored public
    /// block) so sent mail stays readable.
    ///
    /// With `opts.sign` set, the engine signs inside the encryption layer
    /// using the default private key and `opts.passphrase`. A key that
    /// cannot be unlocked demotes the message to unsigned with a warning
    /// rather than failing the send.
    ///
    /// # Returns
    /// The ASCII-armored message, with the sender's public key block
    /// appended when `opts.attach_public_key` is set.
    pub fn encrypt_message(
        &self,
        plaintext: &[u8],
        recipients: &[&str],
        opts: &EncryptOptions,
    ) -> Result<String> {
        let mut resolved_fps: Vec<String> = Vec::new();
        let mut certs: Vec<String> = Vec::new();

        for recipient in recipients {
            let fingerprint = normalize_fingerprint(recipient)?;
            if resolved_fps.contains(&fingerprint) {
                continue;
            }
            let armored = self.discovery.resolve_public_key(&fingerprint)?;
            resolved_fps.push(fingerprint);
            certs.push(armored);
        }

        // Implicit self-recipient
        let default_record = self.store.default_record()?;
        if let Some(record) = &default_record {
            if !resolved_fps.contains(&record.fingerprint) {
                if let Some(armored) = self.store.public_key(&record.fingerprint)? {
                    resolved_fps.push(record.fingerprint.clone());
                    certs.push(armored);
                }
            }
        }

        if certs.is_empty() {
            return Err(Error::NoRecipientKeys);
        }
        let cert_bytes: Vec<&[u8]> = certs.iter().map(|c| c.as_bytes()).collect();

        let signer_private = if opts.sign {
            self.store
                .get_default_key_pair()?
                .and_then(|material| material.private_armored)
        } else {
            None
        };

        let ciphertext = match signer_private {
            Some(private) => {
                let passphrase = opts.passphrase.as_deref().unwrap_or("");
                match encrypt::encrypt_and_sign(
                    &cert_bytes,
                    plaintext,
                    private.as_bytes(),
                    passphrase,
                ) {
                    Ok(ciphertext) => ciphertext,
                    Err(e) => {
                        tracing::warn!(error = %e, "signing inside encryption failed; sending unsigned");
                        encrypt::encrypt_bytes_to_multiple(&cert_bytes, plaintext)?
                    }
                }
            }
            None => {
                if opts.sign {
                    tracing::warn!("no default private key available; sending unsigned");
                }
                encrypt::encrypt_bytes_to_multiple(&cert_bytes, plaintext)?
            }
        };

        if opts.attach_public_key {
            if let Some(record) = &default_record {
                if let Some(public) = self.store.public_key(&record.fingerprint)? {
                    return Ok(format!("{}\n{}", ciphertext, public));
                }
            }
        }

        Ok(ciphertext)
    }

    /// Sign message text with the default key.
    ///
    /// A default key with local private material signs locally using the
    /// credential as a passphrase. A hardware-origin default (or one
    /// without local private material) signs on the token.
    ///
    /// Hardware outcomes: [`SignOutcome::NeedsPin`] when the token wants a
    /// PIN; [`Error::PinIncorrect`] and [`Error::PinBlocked`] surface as
    /// hard errors and are never retried here; any other token failure
    /// degrades to [`SignOutcome::UnsignedFallback`] so the mail can still
    /// be sent, clearly marked.
    ///
    /// # Errors
    /// * [`Error::NoDefaultKey`] - no default record
    /// * [`Error::PassphraseIncorrect`] - local key would not unlock
    /// * [`Error::HardwareNotDetected`] / [`Error::HardwareMisconfigured`]
    pub fn sign_message(&self, text: &str, credential: &Credential) -> Result<SignOutcome> {
        let record = self.store.default_record()?.ok_or(Error::NoDefaultKey)?;

        if record.from_hardware_token || !record.has_private_key {
            return self.sign_with_token(text, &record, credential);
        }

        let material = self.store.get_default_key_pair()?.ok_or(Error::NoDefaultKey)?;
        let private = material.private_armored.ok_or(Error::NoDefaultKey)?;
        let signed = sign::sign_text_cleartext(private.as_bytes(), text, credential.secret())?;
        Ok(SignOutcome::Signed(signed))
    }

    fn sign_with_token(
        &self,
        text: &str,
        record: &KeyRecord,
        credential: &Credential,
    ) -> Result<SignOutcome> {
        match self.bridge.detect() {
            None => return Err(Error::HardwareNotDetected),
            Some(session) if session.openpgp.is_none() => {
                return Err(Error::HardwareMisconfigured)
            }
            Some(_) => {}
        }

        let public = self
            .store
            .public_key(&record.fingerprint)?
            .ok_or_else(|| Error::PublicKeyNotFound(record.fingerprint.clone()))?;

        match self.bridge.sign(text.as_bytes(), &public, credential.pin_value()) {
            Ok(signed) => Ok(SignOutcome::Signed(signed)),
            Err(Error::PinRequired) => Ok(SignOutcome::NeedsPin),
            Err(
                e @ (Error::PinIncorrect
                | Error::PinBlocked
                | Error::HardwareNotDetected
                | Error::PublicKeyNotFound(_)),
            ) => Err(e),
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "token signing failed; producing marked unsigned message");
                let message = unsigned_fallback_message(record, &reason, text, &public);
                Ok(SignOutcome::UnsignedFallback { message, reason })
            }
        }
    }

    /// Decrypt an incoming message.
    ///
    /// Resolution order:
    /// 1. A connected token with a readable OpenPGP applet decrypts first,
    ///    but only when the default key is token-backed or the card's
    ///    decryption slot holds it; a plain software default never gets a
    ///    PIN prompt for a card it has nothing to do with.
    ///    [`DecryptOutcome::NeedsPin`] is returned as soon as the token
    ///    asks for a PIN; PIN failures are hard errors; any other token
    ///    failure falls through.
    /// 2. A hardware-origin default key without local private material
    ///    decrypts through the keyring's card stub with the PIN.
    /// 3. Otherwise the local default private key decrypts with the
    ///    credential as a passphrase.
    ///
    /// # Errors
    /// * [`Error::NoDefaultKey`] - no path can decrypt
    /// * [`Error::PassphraseIncorrect`] - local key would not unlock
    /// * [`Error::PinIncorrect`] / [`Error::PinBlocked`]
    pub fn decrypt_message(
        &self,
        ciphertext: &[u8],
        credential: &Credential,
    ) -> Result<DecryptOutcome> {
        let pin = credential.pin_value();
        let record = self.store.default_record()?;

        if let Some(session) = self.bridge.detect() {
            match &session.openpgp {
                Some(status) => {
                    if let Some(rec) = record.as_ref().filter(|r| card_holds_key(status, r)) {
                        if let Some(public) = self.store.public_key(&rec.fingerprint)? {
                            match self.bridge.decrypt(ciphertext, &public, pin) {
                                Ok(plaintext) => return Ok(DecryptOutcome::Plaintext(plaintext)),
                                Err(Error::PinRequired) => return Ok(DecryptOutcome::NeedsPin),
                                Err(e @ (Error::PinIncorrect | Error::PinBlocked)) => {
                                    return Err(e)
                                }
                                Err(e) => {
                                    tracing::debug!(error = %e, "token decrypt failed; trying other paths");
                                }
                            }
                        }
                    }
                }
                None => {
                    tracing::debug!("token present but applet unreadable; skipping hardware decrypt");
                }
            }
        }

        match record {
            Some(rec) if rec.from_hardware_token && !rec.has_private_key => {
                let Some(pin) = pin else {
                    return Ok(DecryptOutcome::NeedsPin);
                };
                self.keyring
                    .decrypt_with_pin(ciphertext, pin)
                    .map(DecryptOutcome::Plaintext)
            }
            _ => {
                let material = self.store.get_default_key_pair()?.ok_or(Error::NoDefaultKey)?;
                let private = material.private_armored.ok_or(Error::NoDefaultKey)?;
                decrypt::decrypt_bytes(private.as_bytes(), ciphertext, credential.secret())
                    .map(DecryptOutcome::Plaintext)
            }
        }
    }
}

/// Whether the connected card is worth asking to decrypt for this default
/// key. A token-backed default always is; a software default only when the
/// card's decryption slot reports its fingerprint.
fn card_holds_key(status: &OpenPgpStatus, record: &KeyRecord) -> bool {
    if record.from_hardware_token || !record.has_private_key {
        return true;
    }
    status
        .decryption_fingerprint
        .as_deref()
        .is_some_and(|fp| fp.eq_ignore_ascii_case(&record.fingerprint))
}

/// Compose the marked unsigned message sent when token signing degrades.
fn unsigned_fallback_message(record: &KeyRecord, reason: &str, text: &str, public: &str) -> String {
    format!(
        "[mailcrypt: this message is NOT signed]\n\
         Intended signer: {} <{}> ({})\n\
         Signing failed: {}\n\
         \n\
         {}\n\
         \n\
         {}\n",
        record.name, record.email, record.fingerprint, reason, text, public
    )
}
