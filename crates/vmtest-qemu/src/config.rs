//! VM options and their resolution against environment overrides.

use crate::arch::Arch;
use crate::device::Device;
use crate::env::{VmtestEnv, ENV_QEMU};
use crate::error::{Result, VmError};
use std::path::PathBuf;
use tokio::io::AsyncWrite;

/// Sink receiving a copy of everything the VM writes to stdout/stderr.
pub type SerialOutput = Box<dyn AsyncWrite + Send + Unpin>;

/// Description of a VM to launch.
///
/// Unset fields fall back to the `VMTEST_*` environment variables captured
/// in `env`.
#[derive(Default)]
pub struct Options {
    /// Path to the QEMU binary; falls back to `VMTEST_QEMU`
    pub qemu_path: Option<String>,
    /// Guest architecture; falls back to `VMTEST_QEMU_ARCH`, then the host
    pub arch: Option<Arch>,
    /// Kernel image; falls back to `VMTEST_KERNEL`
    pub kernel: Option<PathBuf>,
    /// Kernel command line
    pub kernel_args: String,
    /// Initramfs image; falls back to `VMTEST_INITRAMFS`
    pub initramfs: Option<PathBuf>,
    /// Where to tee serial output
    pub serial_output: Option<SerialOutput>,
    /// Devices, rendered in order
    pub devices: Vec<Box<dyn Device>>,
    /// Environment snapshot used for fallbacks
    pub env: VmtestEnv,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("qemu_path", &self.qemu_path)
            .field("arch", &self.arch)
            .field("kernel", &self.kernel)
            .field("kernel_args", &self.kernel_args)
            .field("initramfs", &self.initramfs)
            .field("serial_output", &self.serial_output.is_some())
            .field("devices", &self.devices)
            .field("env", &self.env)
            .finish()
    }
}

/// Options with every environment fallback applied and validated.
#[derive(Debug)]
pub struct ResolvedConfig<'a> {
    /// QEMU executable (argv\[0\])
    pub qemu_path: String,
    /// Flags that followed the executable in `VMTEST_QEMU`
    pub base_args: Vec<String>,
    pub arch: Arch,
    pub kernel: Option<PathBuf>,
    pub initramfs: Option<PathBuf>,
    /// Configured kernel args followed by each device's, space-joined
    pub kernel_args: String,
    pub devices: &'a [Box<dyn Device>],
}

impl Options {
    /// Options whose fallbacks come from the current process environment.
    pub fn from_env() -> Self {
        Self {
            env: VmtestEnv::from_env(),
            ..Default::default()
        }
    }

    /// The guest architecture these options resolve to.
    pub fn resolve_arch(&self) -> Result<Arch> {
        if let Some(arch) = self.arch {
            return Ok(arch);
        }
        if let Some(arch) = &self.env.qemu_arch {
            return arch.parse();
        }
        Arch::host().ok_or_else(|| VmError::UnsupportedArch(std::env::consts::ARCH.to_string()))
    }

    /// Apply environment fallbacks and validate the combination.
    ///
    /// # Errors
    /// - [`VmError::MalformedEnv`] if `VMTEST_QEMU` cannot be tokenized
    /// - [`VmError::NoQemuPath`] if no executable is configured anywhere
    /// - [`VmError::UnsupportedArch`] for an unknown architecture
    /// - [`VmError::KernelRequiredForArgs`] if kernel args exist without a kernel
    pub fn resolve(&self) -> Result<ResolvedConfig<'_>> {
        let (qemu_path, base_args) = match &self.qemu_path {
            Some(path) if !path.is_empty() => (path.clone(), Vec::new()),
            _ => self.qemu_from_env()?,
        };

        let arch = self.resolve_arch()?;

        let kernel = self
            .kernel
            .clone()
            .filter(|k| !k.as_os_str().is_empty())
            .or_else(|| self.env.kernel.as_ref().map(PathBuf::from));
        let initramfs = self
            .initramfs
            .clone()
            .filter(|i| !i.as_os_str().is_empty())
            .or_else(|| self.env.initramfs.as_ref().map(PathBuf::from));

        let kernel_args = self.merged_kernel_args();
        if !kernel_args.is_empty() && kernel.is_none() {
            return Err(VmError::KernelRequiredForArgs);
        }

        tracing::debug!(
            qemu = %qemu_path,
            %arch,
            kernel = ?kernel,
            initramfs = ?initramfs,
            devices = self.devices.len(),
            "Resolved VM options"
        );

        Ok(ResolvedConfig {
            qemu_path,
            base_args,
            arch,
            kernel,
            initramfs,
            kernel_args,
            devices: &self.devices,
        })
    }

    fn qemu_from_env(&self) -> Result<(String, Vec<String>)> {
        let Some(raw) = &self.env.qemu else {
            return Err(VmError::NoQemuPath);
        };
        let mut words = shell_words::split(raw).map_err(|e| VmError::MalformedEnv {
            var: ENV_QEMU,
            reason: e.to_string(),
        })?;
        if words.is_empty() {
            return Err(VmError::NoQemuPath);
        }
        let path = words.remove(0);
        Ok((path, words))
    }

    fn merged_kernel_args(&self) -> String {
        std::iter::once(self.kernel_args.clone())
            .chain(self.devices.iter().filter_map(|d| d.kernel_args()))
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ArbitraryKernelArgs, IdeBlockDevice};
    use crate::env::{ENV_INITRAMFS, ENV_KERNEL, ENV_QEMU_ARCH};

    fn base() -> Options {
        Options {
            qemu_path: Some("qemu".into()),
            arch: Some(Arch::X86_64),
            ..Default::default()
        }
    }

    #[test]
    fn test_explicit_fields_win_over_env() {
        let opts = Options {
            kernel: Some("./foobar".into()),
            initramfs: Some("./initrd".into()),
            env: VmtestEnv::from_map([
                (ENV_QEMU, "qemu-system-x86_64 -enable-kvm -m 1G"),
                (ENV_QEMU_ARCH, "i386"),
                (ENV_KERNEL, "./baz"),
                (ENV_INITRAMFS, "./init.cpio"),
            ]),
            ..base()
        };
        let resolved = opts.resolve().unwrap();
        assert_eq!(resolved.qemu_path, "qemu");
        assert!(resolved.base_args.is_empty());
        assert_eq!(resolved.arch, Arch::X86_64);
        assert_eq!(resolved.kernel, Some(PathBuf::from("./foobar")));
        assert_eq!(resolved.initramfs, Some(PathBuf::from("./initrd")));
    }

    #[test]
    fn test_env_fills_gaps() {
        let opts = Options {
            env: VmtestEnv::from_map([
                (ENV_QEMU, "qemu-system-x86_64 -enable-kvm -m 1G"),
                (ENV_QEMU_ARCH, "aarch64"),
                (ENV_KERNEL, "./foobar"),
                (ENV_INITRAMFS, "./init.cpio"),
            ]),
            ..Default::default()
        };
        let resolved = opts.resolve().unwrap();
        assert_eq!(resolved.qemu_path, "qemu-system-x86_64");
        assert_eq!(resolved.base_args, vec!["-enable-kvm", "-m", "1G"]);
        assert_eq!(resolved.arch, Arch::Aarch64);
        assert_eq!(resolved.kernel, Some(PathBuf::from("./foobar")));
        assert_eq!(resolved.initramfs, Some(PathBuf::from("./init.cpio")));
    }

    #[test]
    fn test_qemu_env_quoting() {
        let opts = Options {
            env: VmtestEnv::from_map([(ENV_QEMU, r#"qemu -name "my vm" -m 1G"#)]),
            arch: Some(Arch::X86_64),
            ..Default::default()
        };
        let resolved = opts.resolve().unwrap();
        assert_eq!(resolved.base_args, vec!["-name", "my vm", "-m", "1G"]);
    }

    #[test]
    fn test_qemu_env_unterminated_quote() {
        let opts = Options {
            env: VmtestEnv::from_map([(ENV_QEMU, "qemu -name 'oops")]),
            arch: Some(Arch::X86_64),
            ..Default::default()
        };
        let err = opts.resolve().unwrap_err();
        assert!(matches!(err, VmError::MalformedEnv { var: ENV_QEMU, .. }));
        assert!(err.is_config());
    }

    #[test]
    fn test_no_qemu_path() {
        let opts = Options {
            arch: Some(Arch::X86_64),
            ..Default::default()
        };
        assert!(matches!(opts.resolve(), Err(VmError::NoQemuPath)));

        let opts = Options {
            arch: Some(Arch::X86_64),
            env: VmtestEnv::from_map([(ENV_QEMU, "   ")]),
            ..Default::default()
        };
        assert!(matches!(opts.resolve(), Err(VmError::NoQemuPath)));
    }

    #[test]
    fn test_bad_env_arch() {
        let opts = Options {
            qemu_path: Some("qemu".into()),
            env: VmtestEnv::from_map([(ENV_QEMU_ARCH, "amd64")]),
            ..Default::default()
        };
        assert!(matches!(opts.resolve(), Err(VmError::UnsupportedArch(_))));
    }

    #[test]
    fn test_kernel_args_require_kernel() {
        let opts = Options {
            kernel_args: "printk=ttyS0".into(),
            ..base()
        };
        assert!(matches!(opts.resolve(), Err(VmError::KernelRequiredForArgs)));

        let opts = Options {
            devices: vec![Box::new(ArbitraryKernelArgs::new("earlyprintk=ttyS0"))],
            ..base()
        };
        assert!(matches!(opts.resolve(), Err(VmError::KernelRequiredForArgs)));
    }

    #[test]
    fn test_kernel_from_env_satisfies_args() {
        let opts = Options {
            kernel_args: "console=ttyS0".into(),
            env: VmtestEnv::from_map([(ENV_KERNEL, "./vmlinuz")]),
            ..base()
        };
        let resolved = opts.resolve().unwrap();
        assert_eq!(resolved.kernel_args, "console=ttyS0");
    }

    #[test]
    fn test_kernel_args_merge_order() {
        let opts = Options {
            kernel: Some("./foobar".into()),
            kernel_args: "printk=ttyS0".into(),
            devices: vec![
                Box::new(ArbitraryKernelArgs::new("earlyprintk=ttyS0")),
                Box::new(IdeBlockDevice::new("./disk")),
                Box::new(ArbitraryKernelArgs::new("quiet")),
            ],
            ..base()
        };
        assert_eq!(
            opts.resolve().unwrap().kernel_args,
            "printk=ttyS0 earlyprintk=ttyS0 quiet"
        );
    }

    #[test]
    fn test_device_args_alone_have_no_leading_space() {
        let opts = Options {
            kernel: Some("./foobar".into()),
            devices: vec![Box::new(ArbitraryKernelArgs::new("earlyprintk=ttyS0"))],
            ..base()
        };
        assert_eq!(opts.resolve().unwrap().kernel_args, "earlyprintk=ttyS0");
    }

    #[test]
    fn test_empty_device_args_do_not_require_kernel() {
        let opts = Options {
            devices: vec![Box::new(ArbitraryKernelArgs::new(""))],
            ..base()
        };
        assert!(opts.resolve().is_ok());
    }
}
