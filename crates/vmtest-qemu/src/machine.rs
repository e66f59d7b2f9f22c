//! Vm type - handle to a running QEMU process.

use crate::cmdline::quote_cmdline;
use crate::config::{Options, SerialOutput};
use crate::console::Console;
use crate::error::{Result, VmError};
use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const READ_CHUNK: usize = 4096;

/// How long output may stay open after QEMU exits before the pump is dropped.
/// Background processes forked by QEMU can hold the pipes indefinitely.
const PUMP_GRACE: Duration = Duration::from_secs(1);

/// Represents a running or exited QEMU instance.
///
/// Output not consumed through the [`Console`] is retained in memory until the
/// console is dropped. Callers that stop expecting should drop it, e.g.
/// `drop(vm.take_console())`; output keeps flowing to the serial sink.
pub struct Vm {
    /// Unique identifier for this VM, used in log output
    id: Uuid,
    /// Argv QEMU was started with
    cmdline: Vec<String>,
    /// When the process was spawned
    started_at: DateTime<Utc>,
    /// Current state of the VM
    state: VmState,
    /// QEMU child process
    child: Child,
    /// Serial console, until taken by the caller
    console: Option<Console>,
    /// Task draining stdout/stderr
    pump: Option<JoinHandle<()>>,
}

/// Current state of the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// QEMU is running
    Running,
    /// QEMU exited with a success status
    Exited,
    /// QEMU exited with a failure status
    Failed,
    /// QEMU was killed
    Killed,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Running => write!(f, "running"),
            VmState::Exited => write!(f, "exited"),
            VmState::Failed => write!(f, "failed"),
            VmState::Killed => write!(f, "killed"),
        }
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.id)
            .field("cmdline", &self.cmdline)
            .field("started_at", &self.started_at)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Vm {
    /// Build the command line for `options` and spawn QEMU.
    ///
    /// Stdout and stderr are drained by a background task from the moment of
    /// spawn, copied to the serial output sink if one is set and delivered to
    /// the [`Console`].
    ///
    /// # Errors
    /// Returns configuration errors from resolution, or [`VmError::Spawn`] if
    /// the executable cannot be started. No handle exists in either case.
    pub async fn start(mut options: Options) -> Result<Self> {
        let cmdline = options.cmdline()?;
        let serial_output = options.serial_output.take();

        let id = Uuid::new_v4();
        tracing::info!(%id, cmdline = %quote_cmdline(&cmdline), "Starting VM");

        let mut child = Command::new(&cmdline[0])
            .args(&cmdline[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                tracing::error!(%id, path = %cmdline[0], error = %source, "Failed to spawn VM");
                VmError::Spawn {
                    path: cmdline[0].clone().into(),
                    source,
                }
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => Some(tokio::spawn(pump_output(
                id,
                stdout,
                stderr,
                serial_output,
                tx,
            ))),
            _ => None,
        };

        tracing::info!(%id, pid = ?child.id(), "VM started");

        Ok(Self {
            id,
            cmdline,
            started_at: Utc::now(),
            state: VmState::Running,
            child,
            console: Some(Console::new(rx, stdin)),
            pump,
        })
    }

    /// Get the unique ID of this VM.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the current state of the VM.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Argv QEMU was started with.
    pub fn cmdline(&self) -> &[String] {
        &self.cmdline
    }

    /// Argv as a single shell-quoted string.
    pub fn cmdline_quoted(&self) -> String {
        quote_cmdline(&self.cmdline)
    }

    /// When QEMU was spawned.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// OS process ID, while the process is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Borrow the console, unless it has been taken.
    pub fn console_mut(&mut self) -> Option<&mut Console> {
        self.console.as_mut()
    }

    /// Take the console, e.g. to read it from another task while waiting.
    pub fn take_console(&mut self) -> Option<Console> {
        self.console.take()
    }

    /// Wait for QEMU to exit and its output to be drained.
    ///
    /// If another process still holds the output pipes [`PUMP_GRACE`] after
    /// exit, the remaining output is detached and the console reports closed.
    /// Only one caller may wait.
    ///
    /// # Errors
    /// Returns [`VmError::Exit`] if QEMU exits with a failure status.
    pub async fn wait(&mut self) -> Result<()> {
        self.ensure_running()?;

        let status = self.child.wait().await?;
        self.join_pump().await;

        let elapsed_ms = (Utc::now() - self.started_at).num_milliseconds();
        if status.success() {
            self.state = VmState::Exited;
            tracing::info!(id = %self.id, elapsed_ms, "VM exited");
            Ok(())
        } else {
            self.state = VmState::Failed;
            tracing::warn!(id = %self.id, elapsed_ms, %status, "VM exited with failure");
            Err(VmError::Exit(status))
        }
    }

    /// Force kill the VM.
    ///
    /// This immediately terminates QEMU and reaps it.
    pub async fn kill(&mut self) -> Result<()> {
        self.ensure_running()?;

        tracing::warn!(id = %self.id, "Force killing VM");
        self.child.kill().await?;
        self.join_pump().await;

        self.state = VmState::Killed;
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state != VmState::Running {
            return Err(VmError::InvalidState {
                expected: VmState::Running.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }

    async fn join_pump(&mut self) {
        let Some(mut pump) = self.pump.take() else {
            return;
        };
        match tokio::time::timeout(PUMP_GRACE, &mut pump).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(id = %self.id, error = %e, "Output pump task failed");
            }
            Err(_) => {
                tracing::warn!(
                    id = %self.id,
                    grace_ms = PUMP_GRACE.as_millis() as u64,
                    "VM output still open after exit, detaching it"
                );
                pump.abort();
            }
        }
    }
}

/// Copy QEMU's stdout and stderr to the serial sink and the console until
/// both streams close.
async fn pump_output<O, E>(
    id: Uuid,
    mut stdout: O,
    mut stderr: E,
    mut sink: Option<SerialOutput>,
    console: mpsc::UnboundedSender<Vec<u8>>,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let chunk = tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => match read {
                Ok(0) => { out_open = false; None }
                Ok(n) => Some(out_buf[..n].to_vec()),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Error reading VM stdout");
                    out_open = false;
                    None
                }
            },
            read = stderr.read(&mut err_buf), if err_open => match read {
                Ok(0) => { err_open = false; None }
                Ok(n) => Some(err_buf[..n].to_vec()),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Error reading VM stderr");
                    err_open = false;
                    None
                }
            },
        };
        let Some(chunk) = chunk else { continue };

        if let Some(writer) = sink.as_mut() {
            if let Err(e) = writer.write_all(&chunk).await {
                tracing::warn!(%id, error = %e, "Serial output sink failed, detaching it");
                sink = None;
            }
        }
        // The console may have been dropped; output is still drained.
        let _ = console.send(chunk);
    }

    if let Some(mut writer) = sink {
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(%id, error = %e, "Serial output sink shutdown failed");
        }
    }
    tracing::debug!(%id, "VM output closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(VmState::Running.to_string(), "running");
        assert_eq!(VmState::Exited.to_string(), "exited");
        assert_eq!(VmState::Failed.to_string(), "failed");
        assert_eq!(VmState::Killed.to_string(), "killed");
    }

    #[tokio::test]
    async fn test_dropped_console_retains_nothing() {
        let output = vec![b'x'; 256 * 1024];
        let (sink, mut captured) = tokio::io::duplex(512 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let console = Console::new(rx, None);
        drop(console);

        pump_output(
            Uuid::new_v4(),
            &output[..],
            tokio::io::empty(),
            Some(Box::new(sink)),
            tx.clone(),
        )
        .await;

        // Nothing can be queued once the receiving console is gone.
        assert!(tx.is_closed());
        assert!(tx.send(b"late".to_vec()).is_err());

        let mut teed = Vec::new();
        captured.read_to_end(&mut teed).await.unwrap();
        assert_eq!(teed.len(), output.len());
    }

    #[tokio::test]
    async fn test_pump_delivers_both_streams() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut console = Console::new(rx, None);

        pump_output(Uuid::new_v4(), &b"out"[..], &b"err"[..], None, tx).await;

        let all = console.read_to_end().await;
        assert!(all.contains("out"));
        assert!(all.contains("err"));
    }

    #[tokio::test]
    async fn test_start_config_error_spawns_nothing() {
        let options = Options {
            qemu_path: Some("/definitely/not/qemu".into()),
            arch: Some(crate::Arch::X86_64),
            kernel_args: "console=ttyS0".into(),
            ..Default::default()
        };
        let err = Vm::start(options).await.unwrap_err();
        assert!(matches!(err, VmError::KernelRequiredForArgs));
    }
}
