//! Serializable machine descriptions.
//!
//! A machine file is a JSON document describing the VM; command-line flags
//! are layered on top of it before the VM is built.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vmtest_qemu::{
    ArbitraryArgs, ArbitraryKernelArgs, Arch, Device, IdeBlockDevice, P9Directory, UserNetwork,
    VirtioRandom, VmBuilder, VmtestEnv,
};

/// A VM described as data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineSpec {
    /// QEMU executable
    pub qemu: Option<String>,
    /// Guest architecture
    pub arch: Option<Arch>,
    /// Kernel image
    pub kernel: Option<PathBuf>,
    /// Kernel command line
    pub kernel_args: String,
    /// Initramfs image
    pub initramfs: Option<PathBuf>,
    /// Devices, in order
    pub devices: Vec<DeviceSpec>,
}

/// One device entry in a machine file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceSpec {
    IdeDisk {
        file: PathBuf,
    },
    KernelArgs {
        args: String,
    },
    Args {
        args: Vec<String>,
    },
    VirtioRandom,
    P9 {
        dir: PathBuf,
        tag: String,
    },
    UserNetwork {
        #[serde(default)]
        model: Option<String>,
    },
}

impl DeviceSpec {
    fn into_device(self) -> Box<dyn Device> {
        match self {
            DeviceSpec::IdeDisk { file } => Box::new(IdeBlockDevice::new(file)),
            DeviceSpec::KernelArgs { args } => Box::new(ArbitraryKernelArgs::new(args)),
            DeviceSpec::Args { args } => Box::new(ArbitraryArgs::new(args)),
            DeviceSpec::VirtioRandom => Box::new(VirtioRandom),
            DeviceSpec::P9 { dir, tag } => Box::new(P9Directory::new(dir, tag)),
            DeviceSpec::UserNetwork { model } => Box::new(UserNetwork { model }),
        }
    }
}

impl MachineSpec {
    /// Load a machine description from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read machine file {}", path.display()))?;
        let spec = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse machine file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded machine file");
        Ok(spec)
    }

    /// Turn this description into a builder using `env` for fallbacks.
    pub fn into_builder(self, env: VmtestEnv) -> VmBuilder {
        let mut builder = VmBuilder::new().env(env).kernel_args(self.kernel_args);
        if let Some(qemu) = self.qemu {
            builder = builder.qemu_path(qemu);
        }
        if let Some(arch) = self.arch {
            builder = builder.arch(arch);
        }
        if let Some(kernel) = self.kernel {
            builder = builder.kernel(kernel);
        }
        if let Some(initramfs) = self.initramfs {
            builder = builder.initramfs(initramfs);
        }
        for device in self.devices {
            builder = builder.boxed_device(device.into_device());
        }
        builder
    }
}
