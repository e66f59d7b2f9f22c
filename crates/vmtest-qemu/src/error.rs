//! Error types for vmtest-qemu.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Result type alias for vmtest-qemu operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors that can occur while building a command line or running a VM.
#[derive(Debug, Error)]
pub enum VmError {
    /// Kernel arguments were given (directly or by a device) but no kernel.
    #[error("kernel args are required to be empty if no kernel is specified")]
    KernelRequiredForArgs,

    /// Neither the options nor `VMTEST_QEMU` name a QEMU executable
    #[error("no QEMU executable configured: set a QEMU path or VMTEST_QEMU")]
    NoQemuPath,

    /// An environment override could not be parsed
    #[error("malformed environment configuration in {var}: {reason}")]
    MalformedEnv { var: &'static str, reason: String },

    /// Architecture string does not name a supported guest
    #[error("unsupported guest architecture: {0:?}")]
    UnsupportedArch(String),

    /// Failed to spawn the QEMU process
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// QEMU exited with a failure status
    #[error("VM exited with {0}")]
    Exit(ExitStatus),

    /// Console output ended before the expected marker appeared
    #[error("console closed before {marker:?} appeared")]
    ConsoleClosed { marker: String },

    /// VM is not in expected state
    #[error("invalid VM state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout waiting for operation
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl VmError {
    /// Whether this error was raised before any process was spawned.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            VmError::KernelRequiredForArgs
                | VmError::NoQemuPath
                | VmError::MalformedEnv { .. }
                | VmError::UnsupportedArch(_)
        )
    }
}
