//! Builder pattern for ergonomic VM configuration.

use crate::arch::Arch;
use crate::config::Options;
use crate::device::Device;
use crate::env::VmtestEnv;
use crate::error::Result;
use crate::Vm;
use std::path::PathBuf;
use tokio::io::AsyncWrite;

/// Fluent builder for configuring and starting [`Vm`] instances.
///
/// # Example
///
/// ```no_run
/// use vmtest_qemu::{IdeBlockDevice, VmBuilder};
///
/// # async fn example() -> vmtest_qemu::Result<()> {
/// let mut vm = VmBuilder::new()
///     .kernel("/path/to/bzImage")
///     .initramfs("/path/to/initramfs.cpio")
///     .kernel_args("console=ttyS0")
///     .device(IdeBlockDevice::new("/path/to/disk.img"))
///     .serial_output(tokio::io::stderr())
///     .start()
///     .await?;
///
/// vm.console_mut().unwrap().expect_string("I AM HERE").await?;
/// vm.wait().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct VmBuilder {
    options: Options,
}

impl Default for VmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VmBuilder {
    /// Create a new builder whose unset fields fall back to `VMTEST_*`.
    pub fn new() -> Self {
        Self {
            options: Options::from_env(),
        }
    }

    /// Set the path to the QEMU binary.
    pub fn qemu_path(mut self, path: impl Into<String>) -> Self {
        self.options.qemu_path = Some(path.into());
        self
    }

    /// Set the guest architecture.
    pub fn arch(mut self, arch: Arch) -> Self {
        self.options.arch = Some(arch);
        self
    }

    /// Set the path to the kernel image.
    pub fn kernel(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.kernel = Some(path.into());
        self
    }

    /// Set the kernel boot arguments.
    pub fn kernel_args(mut self, args: impl Into<String>) -> Self {
        self.options.kernel_args = args.into();
        self
    }

    /// Set the path to the initramfs.
    pub fn initramfs(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.initramfs = Some(path.into());
        self
    }

    /// Copy all VM output to `sink`.
    pub fn serial_output(mut self, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.options.serial_output = Some(Box::new(sink));
        self
    }

    /// Add a device. Devices are rendered in the order they are added.
    pub fn device(mut self, device: impl Device + 'static) -> Self {
        self.options.devices.push(Box::new(device));
        self
    }

    /// Add an already boxed device.
    pub fn boxed_device(mut self, device: Box<dyn Device>) -> Self {
        self.options.devices.push(device);
        self
    }

    /// Replace the environment snapshot used for fallbacks.
    pub fn env(mut self, env: VmtestEnv) -> Self {
        self.options.env = env;
        self
    }

    /// Build and return the options without starting a VM.
    pub fn build_options(self) -> Options {
        self.options
    }

    /// Resolve the options and return the QEMU argv.
    pub fn cmdline(&self) -> Result<Vec<String>> {
        self.options.cmdline()
    }

    /// Start the VM.
    ///
    /// # Errors
    /// Returns an error if the options are inconsistent or QEMU cannot be spawned.
    pub async fn start(self) -> Result<Vm> {
        Vm::start(self.options).await
    }
}
