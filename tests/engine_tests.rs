//! CryptoEngine integration tests.
//!
//! These tests run the full engine against a real on-disk key store. Most
//! use a runner whose external tools always fail to spawn, which models a
//! machine with no token plugged in and no keyring tool installed. The
//! hardware policy tests swap in a scripted runner that answers the
//! detection probes as if a token were connected and lets each test decide
//! what the card helper does.

use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use mailcrypt::{
    BridgeConfig, CommandOutput, CommandSpec, Credential, CryptoEngine, DecryptOutcome,
    EncryptOptions, Error, HardwareCommandRunner, KeyStore, Keyring, SignOutcome, TokenBridge,
};

const TEST_PASSPHRASE: &str = "test-passphrase-123";

/// Runner on a machine without any of the external tools.
struct NoToolsRunner;

impl HardwareCommandRunner for NoToolsRunner {
    fn run(&self, _spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such tool",
        ))
    }
}

fn engine_with(store: Arc<KeyStore>) -> CryptoEngine {
    engine_with_runner(store, Arc::new(NoToolsRunner))
}

fn engine_with_runner(store: Arc<KeyStore>, runner: Arc<dyn HardwareCommandRunner>) -> CryptoEngine {
    let keyring = Keyring::with_runner("gpg", Arc::clone(&runner));
    let bridge = Arc::new(TokenBridge::new(
        runner,
        keyring.clone(),
        BridgeConfig::default(),
    ));
    CryptoEngine::new(store, bridge, keyring)
}

/// Runner scripted per test: canned detection and keyring responses for a
/// connected token, with the card helper behavior supplied as a closure.
struct ScriptedRunner<F> {
    card_decryption_fp: String,
    helper: F,
}

impl<F> HardwareCommandRunner for ScriptedRunner<F>
where
    F: Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync,
{
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let ok = |stdout: &str| CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            ..Default::default()
        };
        match spec.program.as_str() {
            "ykman" if spec.args == ["list"] => {
                Ok(ok("YubiKey 5 NFC (5.4.3) [CCID] Serial: 12345678\n"))
            }
            "ykman" => Ok(ok(&format!(
                "PIN tries remaining: 3\nSignature key:\n  Fingerprint: AABBCCDD\nDecryption key:\n  Fingerprint: {}\n",
                self.card_decryption_fp
            ))),
            // Keyring lookups always hit
            "gpg" => Ok(ok("")),
            _ => (self.helper)(spec),
        }
    }
}

fn token_engine_with<F>(store: Arc<KeyStore>, card_decryption_fp: &str, helper: F) -> CryptoEngine
where
    F: Fn(&CommandSpec) -> std::io::Result<CommandOutput> + Send + Sync + 'static,
{
    engine_with_runner(
        store,
        Arc::new(ScriptedRunner {
            card_decryption_fp: card_decryption_fp.to_string(),
            helper,
        }),
    )
}

fn helper_failure(code: i32, stderr: &str) -> std::io::Result<CommandOutput> {
    Ok(CommandOutput {
        status: Some(code),
        stderr: stderr.to_string(),
        ..Default::default()
    })
}

/// Helper that exits cleanly without writing its output file, which is how
/// the card helpers ask for a PIN.
fn helper_wants_pin(_spec: &CommandSpec) -> std::io::Result<CommandOutput> {
    Ok(CommandOutput {
        status: Some(0),
        ..Default::default()
    })
}

fn store_with_hardware_default(dir: &std::path::Path) -> Arc<KeyStore> {
    let store = store_with_default(dir);
    let fp = store.default_record().unwrap().unwrap().fingerprint;
    store.mark_hardware_origin(&fp).unwrap();
    store
}

fn store_with_default(dir: &std::path::Path) -> Arc<KeyStore> {
    let store = Arc::new(KeyStore::open(dir.join("store")).unwrap());
    store
        .generate_key_pair("Alice", "alice@example.com", TEST_PASSPHRASE)
        .unwrap();
    store
}

#[test]
fn test_local_round_trip() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(store);

    let ciphertext = engine
        .encrypt_message(b"the plan is on", &[], &EncryptOptions::default())
        .unwrap();
    assert!(ciphertext.contains("BEGIN PGP MESSAGE"));

    let outcome = engine
        .decrypt_message(
            ciphertext.as_bytes(),
            &Credential::passphrase(TEST_PASSPHRASE),
        )
        .unwrap();
    match outcome {
        DecryptOutcome::Plaintext(plaintext) => assert_eq!(plaintext, b"the plan is on"),
        other => panic!("expected plaintext, got {:?}", other),
    }
}

#[test]
fn test_encrypt_to_named_recipient_from_store() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());

    let bob = mailcrypt::create_key_pair("Bob <bob@example.com>", "bob-pw").unwrap();
    store.import_public_key(&bob.public_armored).unwrap();

    let engine = engine_with(store);
    let ciphertext = engine
        .encrypt_message(b"for bob", &[&bob.fingerprint], &EncryptOptions::default())
        .unwrap();

    // Bob can decrypt with his own key
    let plaintext = mailcrypt::decrypt_bytes(
        bob.private_armored.as_bytes(),
        ciphertext.as_bytes(),
        "bob-pw",
    )
    .unwrap();
    assert_eq!(plaintext, b"for bob");
}

#[test]
fn test_unknown_recipient_fails_hard() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(store);

    let err = engine.encrypt_message(
        b"data",
        &["DEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF"],
        &EncryptOptions::default(),
    );
    assert!(matches!(err, Err(Error::PublicKeyNotFound(_))));
}

#[test]
fn test_no_recipients_at_all() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeyStore::open(dir.path().join("store")).unwrap());
    let engine = engine_with(store);

    let err = engine.encrypt_message(b"data", &[], &EncryptOptions::default());
    assert!(matches!(err, Err(Error::NoRecipientKeys)));
}

#[test]
fn test_signed_encryption_round_trip() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(store);

    let opts = EncryptOptions {
        sign: true,
        passphrase: Some(TEST_PASSPHRASE.to_string()),
        ..Default::default()
    };
    let ciphertext = engine.encrypt_message(b"signed mail", &[], &opts).unwrap();

    let outcome = engine
        .decrypt_message(
            ciphertext.as_bytes(),
            &Credential::passphrase(TEST_PASSPHRASE),
        )
        .unwrap();
    assert!(matches!(outcome, DecryptOutcome::Plaintext(p) if p == b"signed mail"));
}

#[test]
fn test_unlock_failure_during_encrypt_continues_unsigned() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(store);

    let opts = EncryptOptions {
        sign: true,
        passphrase: Some("wrong".to_string()),
        ..Default::default()
    };
    // The send must still succeed, just without a signature
    let ciphertext = engine.encrypt_message(b"still goes out", &[], &opts).unwrap();

    let outcome = engine
        .decrypt_message(
            ciphertext.as_bytes(),
            &Credential::passphrase(TEST_PASSPHRASE),
        )
        .unwrap();
    assert!(matches!(outcome, DecryptOutcome::Plaintext(p) if p == b"still goes out"));
}

#[test]
fn test_attach_public_key_appends_block() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(store);

    let opts = EncryptOptions {
        attach_public_key: true,
        ..Default::default()
    };
    let out = engine.encrypt_message(b"hi", &[], &opts).unwrap();
    assert!(out.contains("BEGIN PGP MESSAGE"));
    assert!(out.contains("BEGIN PGP PUBLIC KEY BLOCK"));
}

#[test]
fn test_local_sign_produces_cleartext_signature() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(store);

    let outcome = engine
        .sign_message("I wrote this", &Credential::passphrase(TEST_PASSPHRASE))
        .unwrap();
    match outcome {
        SignOutcome::Signed(signed) => {
            assert!(signed.contains("I wrote this"));
            assert!(signed.contains("BEGIN PGP SIGNED MESSAGE"));
        }
        other => panic!("expected signed outcome, got {:?}", other),
    }
}

#[test]
fn test_wrong_passphrase_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(Arc::clone(&store));

    let err = engine.sign_message("text", &Credential::passphrase("wrong"));
    assert!(matches!(err, Err(Error::PassphraseIncorrect)));

    // The store is exactly as it was
    assert_eq!(store.count().unwrap(), 1);
    assert!(store.get_default_key_pair().unwrap().is_some());
}

#[test]
fn test_sign_without_default_key() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeyStore::open(dir.path().join("store")).unwrap());
    let engine = engine_with(store);

    let err = engine.sign_message("text", &Credential::passphrase(TEST_PASSPHRASE));
    assert!(matches!(err, Err(Error::NoDefaultKey)));
}

#[test]
fn test_hardware_default_without_token_fails_fast() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let fp = store.default_record().unwrap().unwrap().fingerprint;
    store.mark_hardware_origin(&fp).unwrap();

    let engine = engine_with(store);
    let err = engine.sign_message("text", &Credential::pin("123456"));
    assert!(matches!(err, Err(Error::HardwareNotDetected)));
}

#[test]
fn test_decrypt_without_default_key() {
    let dir = tempdir().unwrap();
    let store = Arc::new(KeyStore::open(dir.path().join("store")).unwrap());
    let engine = engine_with(store);

    let err = engine.decrypt_message(b"whatever", &Credential::passphrase("pw"));
    assert!(matches!(err, Err(Error::NoDefaultKey)));
}

#[test]
fn test_decrypt_wrong_passphrase_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let engine = engine_with(Arc::clone(&store));

    let ciphertext = engine
        .encrypt_message(b"secret", &[], &EncryptOptions::default())
        .unwrap();
    let err = engine.decrypt_message(ciphertext.as_bytes(), &Credential::passphrase("wrong"));
    assert!(matches!(err, Err(Error::PassphraseIncorrect)));

    // The store is exactly as it was
    assert_eq!(store.count().unwrap(), 1);
    assert!(store.get_default_key_pair().unwrap().is_some());
}

#[test]
fn test_token_sign_failure_degrades_to_marked_unsigned() {
    let dir = tempdir().unwrap();
    let store = store_with_hardware_default(dir.path());
    let engine = token_engine_with(store, "EEFF0011", |_spec: &CommandSpec| {
        helper_failure(1, "card helper exploded\n")
    });

    let outcome = engine
        .sign_message("still goes out", &Credential::pin("123456"))
        .unwrap();
    match outcome {
        SignOutcome::UnsignedFallback { message, reason } => {
            assert!(message.contains("NOT signed"));
            assert!(message.contains("still goes out"));
            assert!(reason.contains("card helper exploded"));
        }
        other => panic!("expected unsigned fallback, got {:?}", other),
    }
}

#[test]
fn test_token_sign_without_pin_reports_needs_pin() {
    let dir = tempdir().unwrap();
    let store = store_with_hardware_default(dir.path());
    let engine = token_engine_with(store, "EEFF0011", helper_wants_pin);

    let outcome = engine
        .sign_message("text", &Credential::passphrase(TEST_PASSPHRASE))
        .unwrap();
    assert!(matches!(outcome, SignOutcome::NeedsPin));
}

#[test]
fn test_token_decrypt_without_pin_reports_needs_pin() {
    let dir = tempdir().unwrap();
    let store = store_with_hardware_default(dir.path());
    let engine = token_engine_with(store, "EEFF0011", helper_wants_pin);

    let outcome = engine
        .decrypt_message(b"ciphertext", &Credential::passphrase(TEST_PASSPHRASE))
        .unwrap();
    assert!(matches!(outcome, DecryptOutcome::NeedsPin));
}

#[test]
fn test_token_sign_missing_card_key_is_a_hard_stop() {
    let dir = tempdir().unwrap();
    let store = store_with_hardware_default(dir.path());
    let engine = token_engine_with(store, "EEFF0011", |_spec: &CommandSpec| {
        helper_failure(2, "gpg: signing failed: No public key\n")
    });

    let err = engine.sign_message("text", &Credential::pin("123456"));
    assert!(matches!(err, Err(Error::PublicKeyNotFound(_))));
}

#[test]
fn test_unreadable_applet_fails_sign_as_misconfigured() {
    let dir = tempdir().unwrap();
    let store = store_with_hardware_default(dir.path());

    // Token enumerates but its OpenPGP applet cannot be read
    struct NoAppletRunner;
    impl HardwareCommandRunner for NoAppletRunner {
        fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            if spec.program == "ykman" && spec.args == ["list"] {
                return Ok(CommandOutput {
                    status: Some(0),
                    stdout: "YubiKey 5 NFC (5.4.3) [CCID] Serial: 12345678\n".to_string(),
                    ..Default::default()
                });
            }
            Ok(CommandOutput {
                status: Some(1),
                ..Default::default()
            })
        }
    }
    let engine = engine_with_runner(store, Arc::new(NoAppletRunner));

    let err = engine.sign_message("text", &Credential::pin("123456"));
    assert!(matches!(err, Err(Error::HardwareMisconfigured)));
}

#[test]
fn test_software_default_skips_unrelated_card_on_decrypt() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());

    // Card present, but its decryption slot holds somebody else's key; the
    // helper records whether it was ever invoked
    let helper_ran = Arc::new(Mutex::new(false));
    let ran = Arc::clone(&helper_ran);
    let engine = token_engine_with(Arc::clone(&store), "EEFF0011", move |spec: &CommandSpec| {
        *ran.lock().unwrap() = true;
        helper_wants_pin(spec)
    });

    let ciphertext = engine
        .encrypt_message(b"local mail", &[], &EncryptOptions::default())
        .unwrap();
    let outcome = engine
        .decrypt_message(
            ciphertext.as_bytes(),
            &Credential::passphrase(TEST_PASSPHRASE),
        )
        .unwrap();

    // A passphrase holder decrypts locally instead of being asked for a PIN
    assert!(matches!(outcome, DecryptOutcome::Plaintext(p) if p == b"local mail"));
    assert!(!*helper_ran.lock().unwrap());
}

#[test]
fn test_software_default_on_matching_card_decrypts_hardware_first() {
    let dir = tempdir().unwrap();
    let store = store_with_default(dir.path());
    let fp = store.default_record().unwrap().unwrap().fingerprint;

    let engine = token_engine_with(Arc::clone(&store), &fp, helper_wants_pin);

    let ciphertext = engine
        .encrypt_message(b"card mail", &[], &EncryptOptions::default())
        .unwrap();
    let outcome = engine
        .decrypt_message(
            ciphertext.as_bytes(),
            &Credential::passphrase(TEST_PASSPHRASE),
        )
        .unwrap();
    assert!(matches!(outcome, DecryptOutcome::NeedsPin));
}
