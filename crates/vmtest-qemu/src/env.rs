//! Environment overrides for VM options.
//!
//! Configuration gaps are filled from environment variables. The environment
//! is captured once into a [`VmtestEnv`] so that resolution is a pure
//! function of the options and this snapshot.

use std::collections::HashMap;
use std::env::VarError;

/// QEMU executable and baseline flags, e.g. `qemu-system-x86_64 -enable-kvm -m 1G`.
pub const ENV_QEMU: &str = "VMTEST_QEMU";

/// Guest architecture, e.g. `x86_64`.
pub const ENV_QEMU_ARCH: &str = "VMTEST_QEMU_ARCH";

/// Path to the guest kernel.
pub const ENV_KERNEL: &str = "VMTEST_KERNEL";

/// Path to the guest initramfs.
pub const ENV_INITRAMFS: &str = "VMTEST_INITRAMFS";

/// Snapshot of the `VMTEST_*` variables.
///
/// Empty values are treated as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmtestEnv {
    pub qemu: Option<String>,
    pub qemu_arch: Option<String>,
    pub kernel: Option<String>,
    pub initramfs: Option<String>,
}

impl VmtestEnv {
    /// Load overrides from the process environment.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `VMTEST_QEMU` | QEMU path followed by extra flags, shell-quoted |
    /// | `VMTEST_QEMU_ARCH` | Guest architecture |
    /// | `VMTEST_KERNEL` | Kernel image path |
    /// | `VMTEST_INITRAMFS` | Initramfs path |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| readable(key, std::env::var(key)))
    }

    /// Build a snapshot from an explicit key/value map.
    pub fn from_map<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build a snapshot from any lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            qemu: get(ENV_QEMU),
            qemu_arch: get(ENV_QEMU_ARCH),
            kernel: get(ENV_KERNEL),
            initramfs: get(ENV_INITRAMFS),
        }
    }

    /// A snapshot with no overrides at all.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Keep a variable's value if it is valid UTF-8. Anything else is unset.
fn readable(key: &str, value: std::result::Result<String, VarError>) -> Option<String> {
    match value {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(raw)) => {
            tracing::debug!(var = key, value = ?raw, "Ignoring non-UTF-8 environment value");
            None
        }
    }
}
