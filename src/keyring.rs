//! External keyring tool invocation.
//!
//! The mail client leans on the system `gpg` keyring for two things the
//! library does not do natively: serving public keys that were imported
//! outside the client, and decrypting with smart-card keys whose stubs
//! live in the keyring. Every invocation goes through the shared
//! [`HardwareCommandRunner`] so tests can substitute stub executables or
//! fake runners.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::hardware::{CommandSpec, HardwareCommandRunner, SystemRunner};

/// Per-call deadline for keyring operations.
const KEYRING_TIMEOUT: Duration = Duration::from_secs(20);

/// Wrapper around the system keyring tool.
#[derive(Clone)]
pub struct Keyring {
    program: String,
    runner: Arc<dyn HardwareCommandRunner>,
}

impl Default for Keyring {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyring {
    /// A keyring backed by the system `gpg` binary.
    pub fn new() -> Self {
        Self::with_runner("gpg", Arc::new(SystemRunner))
    }

    /// A keyring with an explicit program name and runner. Used by tests.
    pub fn with_runner(program: impl Into<String>, runner: Arc<dyn HardwareCommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Whether the keyring tool is installed and answers at all.
    pub fn available(&self) -> bool {
        self.run(&["--version"])
            .map(|out| out.success())
            .unwrap_or(false)
    }

    /// Whether the keyring holds a public key for this fingerprint.
    pub fn has_key(&self, fingerprint: &str) -> bool {
        self.run(&["--batch", "--list-keys", fingerprint])
            .map(|out| out.success())
            .unwrap_or(false)
    }

    /// Whether the keyring holds secret material (or a card stub) for this
    /// fingerprint.
    pub fn has_secret_key(&self, fingerprint: &str) -> bool {
        self.run(&["--batch", "--list-secret-keys", fingerprint])
            .map(|out| out.success())
            .unwrap_or(false)
    }

    /// Export an armored public key from the keyring.
    ///
    /// # Errors
    /// * [`Error::PublicKeyNotFound`] - the keyring has no such key; gpg
    ///   signals this either with a non-zero exit or with an empty export
    /// * [`Error::ExternalToolFailure`] - any other tool failure
    pub fn export_public_key(&self, fingerprint: &str) -> Result<String> {
        let out = self.run(&["--batch", "--armor", "--export", fingerprint])?;

        if out.timed_out {
            return Err(self.tool_failure("timed out"));
        }
        if !out.success() {
            let stderr = out.stderr.to_lowercase();
            if stderr.contains("not found") || stderr.contains("no public key") {
                return Err(Error::PublicKeyNotFound(fingerprint.to_string()));
            }
            return Err(self.tool_failure(&out.stderr));
        }
        // gpg exits 0 with empty output when nothing matched
        if out.stdout.trim().is_empty() {
            return Err(Error::PublicKeyNotFound(fingerprint.to_string()));
        }

        Ok(out.stdout)
    }

    /// Import a key file into the keyring.
    pub fn import_key_file(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        let out = self.run(&["--batch", "--yes", "--import", &path])?;
        if !out.success() {
            return Err(self.tool_failure(&out.stderr));
        }
        Ok(())
    }

    /// Import armored key material into the keyring.
    pub fn import_armored(&self, armored: &str) -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("import.asc");
        std::fs::write(&path, armored)?;
        self.import_key_file(&path)
    }

    /// Decrypt a message whose key lives on a smart card known to the
    /// keyring, supplying the card PIN through loopback pinentry.
    ///
    /// # Errors
    /// * [`Error::PinIncorrect`] / [`Error::PinBlocked`] - classified from
    ///   the tool's stderr
    /// * [`Error::ExternalToolFailure`] - timeout or any other failure
    pub fn decrypt_with_pin(&self, ciphertext: &[u8], pin: &str) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("message.asc");
        let output = dir.path().join("message.out");
        let pin_file = dir.path().join("pin");

        std::fs::write(&input, ciphertext)?;
        write_secret_file(&pin_file, pin)?;

        let input_s = input.to_string_lossy().to_string();
        let output_s = output.to_string_lossy().to_string();
        let pin_s = pin_file.to_string_lossy().to_string();
        let out = self.run(&[
            "--batch",
            "--yes",
            "--pinentry-mode",
            "loopback",
            "--passphrase-file",
            &pin_s,
            "--output",
            &output_s,
            "--decrypt",
            &input_s,
        ])?;

        if out.timed_out {
            return Err(self.tool_failure("timed out"));
        }
        if let Some(err) = classify_pin_failure(&out.stderr) {
            return Err(err);
        }
        if !out.success() {
            return Err(self.tool_failure(&out.stderr));
        }

        Ok(std::fs::read(&output)?)
    }

    fn run(&self, args: &[&str]) -> Result<crate::hardware::CommandOutput> {
        let spec = CommandSpec::new(&self.program, args).timeout(KEYRING_TIMEOUT);
        Ok(self.runner.run(&spec)?)
    }

    fn tool_failure(&self, detail: &str) -> Error {
        Error::ExternalToolFailure {
            tool: self.program.clone(),
            detail: detail.to_string(),
        }
    }
}

/// Classify a PIN-related failure from tool stderr.
///
/// Blocked is checked before incorrect: a blocked card often also prints
/// the bad-PIN line, and blocked must win so callers never re-prompt.
pub(crate) fn classify_pin_failure(stderr: &str) -> Option<Error> {
    let lower = stderr.to_lowercase();
    if lower.contains("pin blocked")
        || lower.contains("card is permanently locked")
        || lower.contains("pin is blocked")
    {
        return Some(Error::PinBlocked);
    }
    if lower.contains("bad pin")
        || lower.contains("invalid pin")
        || lower.contains("bad passphrase")
        || lower.contains("incorrect pin")
    {
        return Some(Error::PinIncorrect);
    }
    None
}

/// Write a secret to a file readable only by the owner.
pub(crate) fn write_secret_file(path: &Path, secret: &str) -> Result<()> {
    std::fs::write(path, secret)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
