//! The hardware token bridge.
//!
//! Sign and decrypt operations on the token go through small external
//! helper programs rather than direct card I/O. The bridge owns the full
//! lifecycle of one helper call: re-detecting the token, making sure the
//! public certificate is in the keyring, staging input and PIN material
//! in a private scratch directory, invoking the helper, and classifying
//! every way the helper can fail.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::internal::{fingerprint_to_hex, parse_public_key};
use crate::keyring::{classify_pin_failure, write_secret_file, Keyring};
use crate::types::TokenSession;

use super::detect::TokenProbe;
use super::runner::{CommandSpec, HardwareCommandRunner};

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Helper invoked as `<sign_command> <input> <output>`.
    pub sign_command: String,
    /// Helper invoked as `<decrypt_command> <input> <output>`.
    pub decrypt_command: String,
    /// Environment variable naming the PIN file. The PIN itself is never
    /// placed on a command line.
    pub pin_env: String,
    /// Deadline for one helper invocation.
    pub operation_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sign_command: "mailcrypt-card-sign".to_string(),
            decrypt_command: "mailcrypt-card-decrypt".to_string(),
            pin_env: "MAILCRYPT_PIN_FILE".to_string(),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Serialized access to a hardware token via external helpers.
///
/// Operations are mutually exclusive: a card mid-operation cannot service
/// a second command, so `sign` and `decrypt` queue on an internal mutex.
/// Detection runs fresh before every operation; there is no cached notion
/// of "a token is plugged in".
pub struct TokenBridge {
    runner: Arc<dyn HardwareCommandRunner>,
    probe: TokenProbe,
    keyring: Keyring,
    config: BridgeConfig,
    lock: Mutex<()>,
}

impl TokenBridge {
    pub fn new(
        runner: Arc<dyn HardwareCommandRunner>,
        keyring: Keyring,
        config: BridgeConfig,
    ) -> Self {
        let probe = TokenProbe::new(Arc::clone(&runner));
        Self::with_probe(runner, probe, keyring, config)
    }

    /// Construct with an explicit probe. Used by tests to stub detection.
    pub fn with_probe(
        runner: Arc<dyn HardwareCommandRunner>,
        probe: TokenProbe,
        keyring: Keyring,
        config: BridgeConfig,
    ) -> Self {
        Self {
            runner,
            probe,
            keyring,
            config,
            lock: Mutex::new(()),
        }
    }

    /// Detect a connected token. `None` means absent.
    pub fn detect(&self) -> Option<TokenSession> {
        self.probe.detect()
    }

    /// Sign data with the token key belonging to `public_cert`.
    ///
    /// # Returns
    /// The armored signed message produced by the helper.
    ///
    /// # Errors
    /// * [`Error::HardwareNotDetected`] - no token connected
    /// * [`Error::PinRequired`] - the helper produced no output and no PIN
    ///   was supplied
    /// * [`Error::PinIncorrect`] / [`Error::PinBlocked`] - classified from
    ///   helper stderr
    /// * [`Error::PublicKeyNotFound`] - the certificate could not be made
    ///   available to the keyring
    /// * [`Error::ExternalToolFailure`] - timeout or any other failure,
    ///   with the helper's stderr verbatim
    pub fn sign(&self, data: &[u8], public_cert: &str, pin: Option<&str>) -> Result<String> {
        let command = self.config.sign_command.clone();
        let output = self.run_helper(&command, data, public_cert, pin)?;
        String::from_utf8(output)
            .map_err(|_| Error::Parse("helper produced non-UTF-8 signature output".to_string()))
    }

    /// Decrypt a message with the token key belonging to `public_cert`.
    ///
    /// Same failure taxonomy as [`sign`](Self::sign).
    pub fn decrypt(&self, ciphertext: &[u8], public_cert: &str, pin: Option<&str>) -> Result<Vec<u8>> {
        let command = self.config.decrypt_command.clone();
        self.run_helper(&command, ciphertext, public_cert, pin)
    }

    fn run_helper(
        &self,
        command: &str,
        input: &[u8],
        public_cert: &str,
        pin: Option<&str>,
    ) -> Result<Vec<u8>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::Crypto("token bridge lock poisoned".to_string()))?;

        if self.detect().is_none() {
            return Err(Error::HardwareNotDetected);
        }

        self.ensure_cert_in_keyring(public_cert)?;

        // Scratch directory owned by this operation alone; dropped (and
        // deleted, PIN file included) on every exit path below.
        let scratch = tempfile::Builder::new().prefix("mailcrypt-token-").tempdir()?;
        restrict_dir(scratch.path())?;

        let input_path = scratch.path().join("input");
        let output_path = scratch.path().join("output");
        std::fs::write(&input_path, input)?;

        let input_arg = input_path.to_string_lossy().to_string();
        let output_arg = output_path.to_string_lossy().to_string();
        let mut spec = CommandSpec::new(command, &[&input_arg, &output_arg])
            .timeout(self.config.operation_timeout);

        if let Some(pin) = pin {
            let pin_path = scratch.path().join("pin");
            write_secret_file(&pin_path, pin)?;
            spec = spec.env(&self.config.pin_env, pin_path.to_string_lossy());
        }

        let out = self.runner.run(&spec)?;

        if out.timed_out {
            return Err(Error::ExternalToolFailure {
                tool: command.to_string(),
                detail: format!(
                    "timed out after {} seconds",
                    self.config.operation_timeout.as_secs()
                ),
            });
        }
        if let Some(err) = classify_pin_failure(&out.stderr) {
            return Err(err);
        }
        if out.stderr.to_lowercase().contains("no public key") {
            return Err(Error::PublicKeyNotFound(cert_fingerprint(public_cert)?));
        }
        if !output_path.exists() {
            // The helpers signal "waiting for a PIN" by exiting without
            // writing the output file
            if pin.is_none() {
                return Err(Error::PinRequired);
            }
            if !out.success() {
                return Err(Error::ExternalToolFailure {
                    tool: command.to_string(),
                    detail: out.stderr,
                });
            }
            return Err(Error::ExternalToolFailure {
                tool: command.to_string(),
                detail: "helper exited without producing output".to_string(),
            });
        }
        if !out.success() {
            return Err(Error::ExternalToolFailure {
                tool: command.to_string(),
                detail: out.stderr,
            });
        }

        Ok(std::fs::read(&output_path)?)
    }

    /// Make sure the keyring can resolve the signer's certificate,
    /// importing it on the fly if needed.
    fn ensure_cert_in_keyring(&self, public_cert: &str) -> Result<()> {
        let fingerprint = cert_fingerprint(public_cert)?;
        if self.keyring.has_key(&fingerprint) {
            return Ok(());
        }
        tracing::debug!(%fingerprint, "importing certificate into keyring for token operation");
        self.keyring.import_armored(public_cert)?;
        if !self.keyring.has_key(&fingerprint) {
            return Err(Error::PublicKeyNotFound(fingerprint));
        }
        Ok(())
    }
}

fn cert_fingerprint(public_cert: &str) -> Result<String> {
    let key = parse_public_key(public_cert.as_bytes())?;
    Ok(fingerprint_to_hex(&key.primary_key))
}

fn restrict_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
