//! TokenBridge behavior tests with a fake command runner.
//!
//! The fake runner answers the detection probes as if a token were
//! connected and lets each test script what the sign/decrypt helper does:
//! write its output file, refuse with PIN errors, hang until killed, or
//! crash. No real processes are spawned.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailcrypt::{
    BridgeConfig, CommandOutput, CommandSpec, Error, HardwareCommandRunner, Keyring, TokenBridge,
};

struct FnRunner<F>(F);

impl<F> HardwareCommandRunner for FnRunner<F>
where
    F: Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync,
{
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        (self.0)(spec)
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: stdout.to_string(),
        ..Default::default()
    }
}

fn failed(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status: Some(code),
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

/// Canned detection and keyring responses for a connected, configured
/// token. Returns `None` for the helper commands the test scripts itself.
fn detection_response(spec: &CommandSpec) -> Option<CommandOutput> {
    match spec.program.as_str() {
        "ykman" if spec.args == ["list"] => {
            Some(ok("YubiKey 5 NFC (5.4.3) [CCID] Serial: 12345678\n"))
        }
        "ykman" => Some(ok(
            "PIN tries remaining: 3\nSignature key:\n  Fingerprint: AABBCCDD\n",
        )),
        // Keyring lookups always hit, so no import round-trip happens
        "gpg" => Some(ok("")),
        _ => None,
    }
}

fn test_config() -> BridgeConfig {
    BridgeConfig {
        sign_command: "fake-card-sign".to_string(),
        decrypt_command: "fake-card-decrypt".to_string(),
        ..Default::default()
    }
}

fn bridge_with<F>(helper: F) -> TokenBridge
where
    F: Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync + 'static,
{
    let runner: Arc<dyn HardwareCommandRunner> = Arc::new(FnRunner(move |spec: &CommandSpec| {
        if let Some(out) = detection_response(spec) {
            return Ok(out);
        }
        helper(spec)
    }));
    let keyring = Keyring::with_runner("gpg", Arc::clone(&runner));
    TokenBridge::new(runner, keyring, test_config())
}

fn test_cert() -> String {
    mailcrypt::create_key_pair("Token Owner <owner@example.com>", "pw")
        .unwrap()
        .public_armored
}

#[test]
fn test_detect_via_fake_runner() {
    let bridge = bridge_with(|_spec| Ok(failed(1, "unexpected")));
    let session = bridge.detect().unwrap();
    assert_eq!(session.serial, "12345678");
    assert_eq!(session.firmware.as_deref(), Some("5.4.3"));
    let status = session.openpgp.unwrap();
    assert_eq!(status.signature_fingerprint.as_deref(), Some("AABBCCDD"));
    assert_eq!(status.pin_tries_remaining, Some(3));
}

#[test]
fn test_missing_output_without_pin_means_pin_required() {
    let bridge = bridge_with(|_spec| Ok(ok("")));
    let err = bridge.sign(b"data", &test_cert(), None);
    assert!(matches!(err, Err(Error::PinRequired)));
}

#[test]
fn test_bad_pin_is_classified_incorrect() {
    let bridge = bridge_with(|_spec| Ok(failed(2, "card helper: Invalid PIN\n")));
    let err = bridge.sign(b"data", &test_cert(), Some("000000"));
    assert!(matches!(err, Err(Error::PinIncorrect)));
}

#[test]
fn test_blocked_pin_wins_over_bad_pin() {
    let bridge = bridge_with(|_spec| Ok(failed(2, "Bad PIN\nPIN blocked\n")));
    let err = bridge.decrypt(b"data", &test_cert(), Some("000000"));
    assert!(matches!(err, Err(Error::PinBlocked)));
}

#[test]
fn test_timeout_is_an_external_tool_failure() {
    let bridge = bridge_with(|_spec| {
        Ok(CommandOutput {
            timed_out: true,
            ..Default::default()
        })
    });
    let err = bridge.sign(b"data", &test_cert(), Some("123456"));
    match err {
        Err(Error::ExternalToolFailure { tool, detail }) => {
            assert_eq!(tool, "fake-card-sign");
            assert!(detail.contains("timed out"));
        }
        other => panic!("expected tool failure, got {:?}", other),
    }
}

#[test]
fn test_helper_stderr_is_preserved_verbatim() {
    let bridge = bridge_with(|spec: &CommandSpec| {
        // Helper fails after producing output; exit status decides
        std::fs::write(&spec.args[1], b"partial").unwrap();
        Ok(failed(1, "segfault at 0xdeadbeef\n"))
    });
    let err = bridge.sign(b"data", &test_cert(), Some("123456"));
    match err {
        Err(Error::ExternalToolFailure { detail, .. }) => {
            assert_eq!(detail, "segfault at 0xdeadbeef\n");
        }
        other => panic!("expected tool failure, got {:?}", other),
    }
}

#[test]
fn test_successful_sign_reads_helper_output() {
    let seen_args: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&seen_args);

    let bridge = bridge_with(move |spec: &CommandSpec| {
        *seen.lock().unwrap() = spec.args.clone();

        // The PIN arrives as a file named by the environment, never argv
        let pin_file = spec
            .envs
            .iter()
            .find(|(k, _)| k == "MAILCRYPT_PIN_FILE")
            .map(|(_, v)| v.clone())
            .expect("PIN file env var not set");
        assert_eq!(std::fs::read_to_string(&pin_file).unwrap(), "123456");

        let input = std::fs::read(&spec.args[0]).unwrap();
        assert_eq!(input, b"message body");

        std::fs::write(&spec.args[1], b"-----BEGIN PGP SIGNATURE-----\n").unwrap();
        Ok(ok(""))
    });

    let signed = bridge
        .sign(b"message body", &test_cert(), Some("123456"))
        .unwrap();
    assert_eq!(signed, "-----BEGIN PGP SIGNATURE-----\n");

    let args = seen_args.lock().unwrap();
    assert_eq!(args.len(), 2);
    assert!(!args.iter().any(|a| a.contains("123456")));
}

#[test]
fn test_scratch_directory_is_deleted_on_all_paths() {
    let scratch: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));

    // Success path
    let seen = Arc::clone(&scratch);
    let bridge = bridge_with(move |spec: &CommandSpec| {
        *seen.lock().unwrap() = PathBuf::from(&spec.args[0]).parent().map(Into::into);
        std::fs::write(&spec.args[1], b"out").unwrap();
        Ok(ok(""))
    });
    bridge.decrypt(b"data", &test_cert(), Some("123456")).unwrap();
    let dir = scratch.lock().unwrap().clone().unwrap();
    assert!(!dir.exists());

    // Failure path
    let seen = Arc::clone(&scratch);
    let bridge = bridge_with(move |spec: &CommandSpec| {
        *seen.lock().unwrap() = PathBuf::from(&spec.args[0]).parent().map(Into::into);
        Ok(failed(1, "boom"))
    });
    let _ = bridge.decrypt(b"data", &test_cert(), Some("123456"));
    let dir = scratch.lock().unwrap().clone().unwrap();
    assert!(!dir.exists());
}

#[test]
fn test_absent_token_fails_before_invoking_helper() {
    let helper_ran = Arc::new(Mutex::new(false));
    let ran = Arc::clone(&helper_ran);

    // Every probe fails: no token anywhere
    let runner: Arc<dyn HardwareCommandRunner> = Arc::new(FnRunner(move |spec: &CommandSpec| {
        match spec.program.as_str() {
            "ykman" | "gpg" | "lsusb" => Ok(failed(1, "")),
            _ => {
                *ran.lock().unwrap() = true;
                Ok(ok(""))
            }
        }
    }));
    let keyring = Keyring::with_runner("gpg", Arc::clone(&runner));
    let bridge = TokenBridge::new(runner, keyring, test_config());

    let err = bridge.sign(b"data", &test_cert(), Some("123456"));
    assert!(matches!(err, Err(Error::HardwareNotDetected)));
    assert!(!*helper_ran.lock().unwrap());
}

#[test]
fn test_usb_fallback_reports_unconfigured_token() {
    // Management tool and card status are absent; only raw USB sees it
    let runner: Arc<dyn HardwareCommandRunner> = Arc::new(FnRunner(|spec: &CommandSpec| {
        match spec.program.as_str() {
            "lsusb" => Ok(ok("Bus 001 Device 004: ID 1050:0407 Yubico YubiKey\n")),
            _ => Ok(failed(127, "command not found")),
        }
    }));
    let keyring = Keyring::with_runner("gpg", Arc::clone(&runner));
    let bridge = TokenBridge::new(runner, keyring, test_config());

    let session = bridge.detect().unwrap();
    assert!(session.openpgp.is_none());
}

#[test]
fn test_pin_file_permissions_are_owner_only() {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let bridge = bridge_with(|spec: &CommandSpec| {
            let pin_file = spec
                .envs
                .iter()
                .find(|(k, _)| k == "MAILCRYPT_PIN_FILE")
                .map(|(_, v)| v.clone())
                .unwrap();
            let mode = std::fs::metadata(&pin_file).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
            std::fs::write(&spec.args[1], b"out").unwrap();
            Ok(ok(""))
        });
        bridge.sign(b"data", &test_cert(), Some("123456")).unwrap();
    }
}

#[test]
fn test_operation_timeout_is_passed_to_the_runner() {
    let bridge = bridge_with(|spec: &CommandSpec| {
        assert_eq!(spec.timeout, Duration::from_secs(30));
        std::fs::write(&spec.args[1], b"out").unwrap();
        Ok(ok(""))
    });
    bridge.sign(b"data", &test_cert(), Some("123456")).unwrap();
}
