//! Pluggable QEMU devices.
//!
//! Every device renders its own command-line fragment and may contribute
//! kernel arguments. Devices that need bus or drive names draw them from the
//! [`IdAllocator`] in the [`DeviceContext`], so independently written devices
//! compose without name collisions.

use crate::arch::Arch;
use crate::ids::IdAllocator;
use std::fmt::Debug;
use std::path::PathBuf;

/// Build-time state handed to each device.
#[derive(Debug)]
pub struct DeviceContext<'a> {
    /// Resolved guest architecture
    pub arch: Arch,
    /// Shared ID allocator for this build
    pub ids: &'a mut IdAllocator,
}

/// A QEMU device or flag group.
pub trait Device: Debug + Send + Sync {
    /// Command-line tokens for this device.
    fn cmdline(&self, ctx: &mut DeviceContext<'_>) -> Vec<String>;

    /// Kernel arguments this device needs, appended after the configured ones.
    fn kernel_args(&self) -> Option<String> {
        None
    }
}

/// IDE disk attached to its own ICH9 AHCI controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeBlockDevice {
    /// Backing image on the host
    pub file: PathBuf,
}

impl IdeBlockDevice {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }
}

impl Device for IdeBlockDevice {
    fn cmdline(&self, ctx: &mut DeviceContext<'_>) -> Vec<String> {
        let drive = ctx.ids.id("drive");
        let ahci = ctx.ids.id("ahci");
        vec![
            "-drive".into(),
            format!("file={},if=none,id={drive}", self.file.display()),
            "-device".into(),
            format!("ich9-ahci,id={ahci}"),
            "-device".into(),
            format!("ide-hd,drive={drive},bus={ahci}.0"),
        ]
    }
}

/// Extra kernel command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitraryKernelArgs(pub String);

impl ArbitraryKernelArgs {
    pub fn new(args: impl Into<String>) -> Self {
        Self(args.into())
    }
}

impl Device for ArbitraryKernelArgs {
    fn cmdline(&self, _ctx: &mut DeviceContext<'_>) -> Vec<String> {
        Vec::new()
    }

    fn kernel_args(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Raw QEMU flags, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitraryArgs(pub Vec<String>);

impl ArbitraryArgs {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }
}

impl Device for ArbitraryArgs {
    fn cmdline(&self, _ctx: &mut DeviceContext<'_>) -> Vec<String> {
        self.0.clone()
    }
}

/// virtio RNG backed by the host's entropy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtioRandom;

impl Device for VirtioRandom {
    fn cmdline(&self, ctx: &mut DeviceContext<'_>) -> Vec<String> {
        let model = if ctx.arch.is_arm() {
            "virtio-rng-device"
        } else {
            "virtio-rng-pci"
        };
        vec!["-device".into(), model.into()]
    }
}

/// Host directory shared with the guest over 9P.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P9Directory {
    /// Directory on the host
    pub dir: PathBuf,
    /// Mount tag the guest uses to find the share
    pub tag: String,
}

impl P9Directory {
    pub fn new(dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            tag: tag.into(),
        }
    }
}

impl Device for P9Directory {
    fn cmdline(&self, ctx: &mut DeviceContext<'_>) -> Vec<String> {
        let fsdev = ctx.ids.id("fsdev");
        let model = if ctx.arch.is_arm() {
            "virtio-9p-device"
        } else {
            "virtio-9p-pci"
        };
        vec![
            "-fsdev".into(),
            format!(
                "local,id={fsdev},path={},security_model=none",
                self.dir.display()
            ),
            "-device".into(),
            format!("{model},fsdev={fsdev},mount_tag={}", self.tag),
        ]
    }
}

/// QEMU user-mode (slirp) network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserNetwork {
    /// NIC model; picked per architecture when unset
    pub model: Option<String>,
}

impl UserNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
        }
    }
}

impl Device for UserNetwork {
    fn cmdline(&self, ctx: &mut DeviceContext<'_>) -> Vec<String> {
        let net = ctx.ids.id("net");
        let model = match &self.model {
            Some(m) => m.as_str(),
            None if ctx.arch.is_arm() => "virtio-net-device",
            None => "e1000",
        };
        vec![
            "-netdev".into(),
            format!("user,id={net}"),
            "-device".into(),
            format!("{model},netdev={net}"),
        ]
    }
}
