//! Lifecycle of one external tunnel process for one candidate relay.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::TunnelConfig;
use crate::error::Result;

/// Appended to every candidate config so the tunnel never touches the
/// host routing table.
const ROUTE_NOPULL: &str = "route-nopull";

const SUCCESS_MARKER: &str = "Initialization Sequence Completed";
const DEVICE_PREFIX: &str = "TUN/TAP device ";
const DEVICE_SUFFIX: &str = " opened";
const FAILED_MARKER: &str = "failed: ";
const AUTH_FAILED_MARKER: &str = "AUTH_FAILED";

/// The decided result of the connection race. Exactly one is produced per
/// session; every variant except `Connected` is terminal for the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelOutcome {
    Connected { interface: String },
    TimedOut,
    ProcessExited { code: Option<i32>, signal: Option<i32> },
    AuthFailed { reason: Option<String> },
    DeviceNameMissing,
}

/// One tunnel process, from config file to guaranteed teardown.
///
/// `teardown` consumes the session, so it cannot run twice; dropping a
/// session without tearing it down is logged and signals the process as a
/// best effort.
pub struct TunnelSession {
    child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    // Holds the scoped config file for the lifetime of the session.
    _config_file: NamedTempFile,
    sudo: bool,
    connect_timeout: Duration,
    teardown_grace: Duration,
    torn_down: bool,
}

impl TunnelSession {
    /// Write the candidate config to a scoped temporary file and start the
    /// tunnel process pointed at it, stdout piped.
    pub fn spawn(config_text: &str, cfg: &TunnelConfig) -> Result<Self> {
        let mut config_file = NamedTempFile::new()?;
        write!(config_file, "{config_text}\r\n{ROUTE_NOPULL}\r\n")?;
        config_file.flush()?;

        let mut command = if cfg.sudo {
            let mut c = Command::new("sudo");
            c.arg(&cfg.openvpn);
            c
        } else {
            Command::new(&cfg.openvpn)
        };
        command
            .arg("--config")
            .arg(config_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
        debug!(pid = ?child.id(), "tunnel process started");

        Ok(Self {
            child,
            stdout,
            _config_file: config_file,
            sudo: cfg.sudo,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            teardown_grace: Duration::from_secs(cfg.teardown_grace_secs),
            torn_down: false,
        })
    }

    /// Resolve the connection outcome: a three-way race between the connect
    /// timer, the process exiting on its own, and the stdout parser. The
    /// first signal to settle wins; the losers are never consulted again.
    pub async fn connect(&mut self) -> TunnelOutcome {
        let timer = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(timer);

        let mut device: Option<String> = None;
        let mut stdout_open = self.stdout.is_some();

        loop {
            tokio::select! {
                _ = &mut timer => {
                    debug!("connect timed out");
                    return TunnelOutcome::TimedOut;
                }
                status = self.child.wait() => {
                    let (code, signal) = match status {
                        Ok(status) => (status.code(), exit_signal(&status)),
                        Err(err) => {
                            warn!(%err, "failed to wait on tunnel process");
                            (None, None)
                        }
                    };
                    debug!(?code, ?signal, "tunnel process exited before connecting");
                    return TunnelOutcome::ProcessExited { code, signal };
                }
                line = next_line(&mut self.stdout), if stdout_open => match line {
                    Some(line) => {
                        if let Some(outcome) = match_line(&line, &mut device) {
                            return outcome;
                        }
                    }
                    // EOF only disables the stdout branch; the timer and
                    // exit branches still decide the outcome.
                    None => stdout_open = false,
                }
            }
        }
    }

    /// Signal the process and wait up to the grace timeout for it to exit.
    ///
    /// A signal to an already-exited process is a logged no-op; a process
    /// that outlives the grace period is reported and left for external
    /// cleanup, never escalated to a stronger signal.
    pub async fn teardown(mut self) {
        if let Some(pid) = self.child.id() {
            debug!(pid, "signalling tunnel process");
            let mut kill = if self.sudo {
                let mut c = Command::new("sudo");
                c.arg("kill");
                c
            } else {
                Command::new("kill")
            };
            kill.arg(pid.to_string());

            match kill.status().await {
                Ok(status) if !status.success() => {
                    debug!(pid, "kill reported failure, process likely already gone");
                }
                Ok(_) => {}
                Err(err) => warn!(pid, %err, "failed to signal tunnel process"),
            }
        }

        match tokio::time::timeout(self.teardown_grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "tunnel process exited"),
            Ok(Err(err)) => warn!(%err, "failed to reap tunnel process"),
            Err(_) => warn!("tunnel process did not exit within the grace period"),
        }
        self.torn_down = true;
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!("tunnel session dropped without teardown");
            let _ = self.child.start_kill();
        }
    }
}

/// Parse one stdout line. Returns a decided outcome, or records the
/// interface name for a later success marker.
fn match_line(line: &str, device: &mut Option<String>) -> Option<TunnelOutcome> {
    if let Some((_, rest)) = line.split_once(DEVICE_PREFIX) {
        if let Some((name, _)) = rest.split_once(DEVICE_SUFFIX) {
            *device = Some(name.to_string());
        }
    }

    if line.contains(SUCCESS_MARKER) {
        return Some(match device.take() {
            Some(interface) => TunnelOutcome::Connected { interface },
            None => {
                debug!("success marker seen but no device name was reported");
                TunnelOutcome::DeviceNameMissing
            }
        });
    }

    if let Some((_, reason)) = line.split_once(FAILED_MARKER) {
        let reason = reason.trim().to_string();
        debug!(reason, "tunnel reported failure");
        return Some(TunnelOutcome::AuthFailed { reason: Some(reason) });
    }

    if line.contains(AUTH_FAILED_MARKER) {
        debug!("tunnel reported authentication failure");
        return Some(TunnelOutcome::AuthFailed { reason: None });
    }

    None
}

async fn next_line(stdout: &mut Option<Lines<BufReader<ChildStdout>>>) -> Option<String> {
    match stdout {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(err) => {
                debug!(%err, "failed to read tunnel stdout");
                None
            }
        },
        None => None,
    }
}

fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
