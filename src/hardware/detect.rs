//! Hardware token detection.
//!
//! Detection tries a series of probes in order of how much they can tell
//! us: the vendor management tool first, then a generic smart-card status
//! query, and finally raw USB enumeration. The first probe that sees a
//! token wins. A probe chain that comes up empty means no token is
//! connected; a token whose OpenPGP applet cannot be read is reported
//! with `openpgp: None`.

use std::sync::Arc;

use crate::types::{OpenPgpStatus, TokenSession, TouchPolicy};

use super::runner::{CommandSpec, HardwareCommandRunner};

/// USB vendor ID for Yubico devices, as printed by `lsusb`.
const USB_VENDOR_ID: &str = "1050:";

/// Probes the system for a connected hardware token.
pub struct TokenProbe {
    runner: Arc<dyn HardwareCommandRunner>,
    /// Vendor management tool (`ykman`).
    mgmt_tool: String,
    /// Generic smart-card tool (`gpg`).
    card_tool: String,
    /// OS USB enumeration tool (`lsusb`).
    enum_tool: String,
}

impl TokenProbe {
    pub fn new(runner: Arc<dyn HardwareCommandRunner>) -> Self {
        Self {
            runner,
            mgmt_tool: "ykman".to_string(),
            card_tool: "gpg".to_string(),
            enum_tool: "lsusb".to_string(),
        }
    }

    /// Override the probed tool names. Used by tests to point the probe at
    /// stub executables.
    pub fn with_tools(
        runner: Arc<dyn HardwareCommandRunner>,
        mgmt_tool: impl Into<String>,
        card_tool: impl Into<String>,
        enum_tool: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            mgmt_tool: mgmt_tool.into(),
            card_tool: card_tool.into(),
            enum_tool: enum_tool.into(),
        }
    }

    /// Run the probe chain. `None` means no token is connected.
    ///
    /// Results are never cached; callers re-detect before every hardware
    /// operation.
    pub fn detect(&self) -> Option<TokenSession> {
        if let Some(session) = self.probe_mgmt_tool() {
            tracing::debug!(serial = %session.serial, "token found via management tool");
            return Some(session);
        }
        if let Some(session) = self.probe_card_status() {
            tracing::debug!(serial = %session.serial, "token found via card status");
            return Some(session);
        }
        if let Some(session) = self.probe_usb() {
            tracing::debug!("token found via USB enumeration");
            return Some(session);
        }
        tracing::debug!("no hardware token detected");
        None
    }

    /// Probe via the vendor management tool: `list` for presence, then
    /// `openpgp info` for applet state.
    fn probe_mgmt_tool(&self) -> Option<TokenSession> {
        let list = self
            .runner
            .run(&CommandSpec::new(&self.mgmt_tool, &["list"]))
            .ok()?;
        if !list.success() {
            return None;
        }
        let (serial, firmware) = parse_device_list(&list.stdout)?;

        let openpgp = self
            .runner
            .run(&CommandSpec::new(&self.mgmt_tool, &["openpgp", "info"]))
            .ok()
            .filter(|out| out.success())
            .map(|out| parse_openpgp_info(&out.stdout));

        Some(TokenSession {
            serial,
            firmware,
            openpgp,
        })
    }

    /// Probe via the generic smart-card status query in colon format.
    fn probe_card_status(&self) -> Option<TokenSession> {
        let out = self
            .runner
            .run(&CommandSpec::new(
                &self.card_tool,
                &["--card-status", "--with-colons"],
            ))
            .ok()?;
        if !out.success() {
            return None;
        }
        parse_card_status_colons(&out.stdout)
    }

    /// Last resort: look for the vendor ID in the USB device list. This
    /// proves presence but tells us nothing about the applet.
    fn probe_usb(&self) -> Option<TokenSession> {
        let out = self
            .runner
            .run(&CommandSpec::new(&self.enum_tool, &[]))
            .ok()?;
        if !out.success() {
            return None;
        }
        let present = out
            .stdout
            .lines()
            .any(|line| line.contains(USB_VENDOR_ID) || line.contains("Yubico"));
        present.then(|| TokenSession {
            serial: "unknown".to_string(),
            firmware: None,
            openpgp: None,
        })
    }
}

/// Parse the management tool's device list, e.g.
/// `YubiKey 5 NFC (5.4.3) [OTP+FIDO+CCID] Serial: 12345678`.
fn parse_device_list(stdout: &str) -> Option<(String, Option<String>)> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;

    let serial = line
        .rsplit_once("Serial:")
        .map(|(_, s)| s.trim().to_string())
        .filter(|s| !s.is_empty())?;

    let firmware = line
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(fw, _)| fw.trim().to_string())
        .filter(|fw| !fw.is_empty());

    Some((serial, firmware))
}

/// Parse the management tool's `openpgp info` report.
///
/// The report is line oriented: top-level `Key: value` pairs plus indented
/// sections per key slot. Only the fields we surface are extracted;
/// anything unrecognized is skipped.
fn parse_openpgp_info(stdout: &str) -> OpenPgpStatus {
    #[derive(PartialEq)]
    enum Slot {
        None,
        Signature,
        Decryption,
        Authentication,
    }

    let mut status = OpenPgpStatus::default();
    let mut slot = Slot::None;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            slot = match trimmed.trim_end_matches(':') {
                "Signature key" => Slot::Signature,
                "Decryption key" => Slot::Decryption,
                "Authentication key" => Slot::Authentication,
                _ => Slot::None,
            };
        }

        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.trim() {
            "PIN tries remaining" => {
                status.pin_tries_remaining = value.parse().ok();
            }
            "Public key URL" | "URL" => {
                status.public_key_url = Some(value.to_string());
            }
            "Fingerprint" => {
                let fp = Some(value.replace(' ', "").to_uppercase());
                match slot {
                    Slot::Signature => status.signature_fingerprint = fp,
                    Slot::Decryption => status.decryption_fingerprint = fp,
                    Slot::Authentication => status.authentication_fingerprint = fp,
                    Slot::None => {}
                }
            }
            "Touch policy" => {
                if slot == Slot::Signature {
                    status.touch_policy = TouchPolicy::parse(value);
                }
            }
            _ => {}
        }
    }

    status
}

/// Parse the colon-format card status report.
///
/// Relevant records: `serial:<hex>:`, `version:<v>:`,
/// `fpr:<sig>:<enc>:<auth>:`, `pinretry:<pin>:<reset>:<admin>:`,
/// `url:<url>:`.
fn parse_card_status_colons(stdout: &str) -> Option<TokenSession> {
    let mut serial = None;
    let mut firmware = None;
    let mut status = OpenPgpStatus::default();
    let mut saw_applet = false;

    for line in stdout.lines() {
        let mut fields = line.split(':');
        match fields.next() {
            Some("serial") => {
                serial = fields.next().map(|s| s.to_string()).filter(|s| !s.is_empty());
            }
            Some("version") => {
                firmware = fields.next().map(|s| s.to_string()).filter(|s| !s.is_empty());
            }
            Some("fpr") => {
                saw_applet = true;
                status.signature_fingerprint = non_empty(fields.next());
                status.decryption_fingerprint = non_empty(fields.next());
                status.authentication_fingerprint = non_empty(fields.next());
            }
            Some("pinretry") => {
                saw_applet = true;
                status.pin_tries_remaining = fields.next().and_then(|s| s.parse().ok());
            }
            Some("url") => {
                status.public_key_url = fields
                    .next()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let serial = serial?;
    Some(TokenSession {
        serial,
        firmware,
        openpgp: saw_applet.then_some(status),
    })
}

fn non_empty(field: Option<&str>) -> Option<String> {
    field
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
}
