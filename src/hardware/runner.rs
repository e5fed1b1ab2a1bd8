//! Subprocess execution for external tools.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// A fully specified external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    /// Build a spec with the default 20 second timeout.
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            envs: Vec::new(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The process hit its deadline and was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

/// Executes external commands for token detection, the keyring wrapper,
/// and the token bridge.
///
/// Implementations must be safe to share across threads. Tests substitute
/// fakes that return canned outputs without spawning anything.
pub trait HardwareCommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Runner backed by real processes.
///
/// Stdin is closed; stdout and stderr are drained on separate threads so a
/// chatty child can never fill a pipe and deadlock against the timeout
/// loop. A child that outlives its deadline is killed and reported with
/// `timed_out` set.
pub struct SystemRunner;

impl HardwareCommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_handle = child.stdout.take().map(drain_thread);
        let stderr_handle = child.stderr.take().map(drain_thread);

        let deadline = Instant::now() + spec.timeout;
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status.code();
            }
            if Instant::now() >= deadline {
                timed_out = true;
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(Duration::from_millis(25));
        };

        let stdout = join_drain(stdout_handle);
        let stderr = join_drain(stderr_handle);

        tracing::debug!(
            program = %spec.program,
            ?status,
            timed_out,
            "external command finished"
        );

        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            timed_out,
        })
    }
}

fn drain_thread<R: Read + Send + 'static>(mut source: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = source.read_to_string(&mut buf);
        buf
    })
}

fn join_drain(handle: Option<std::thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
