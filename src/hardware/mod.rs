//! Hardware token integration.
//!
//! All token access happens through external command-line tools rather
//! than direct device I/O. The [`HardwareCommandRunner`] trait is the
//! single seam between this library and those tools, so everything above
//! it (detection, the keyring wrapper, the bridge) can be exercised in
//! tests with a fake runner.

mod bridge;
mod detect;
mod runner;

pub use bridge::{BridgeConfig, TokenBridge};
pub use detect::TokenProbe;
pub use runner::{CommandOutput, CommandSpec, HardwareCommandRunner, SystemRunner};
