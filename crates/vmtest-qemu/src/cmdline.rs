//! QEMU command-line construction.

use crate::config::{Options, ResolvedConfig};
use crate::device::DeviceContext;
use crate::error::Result;
use crate::ids::IdAllocator;

/// Build argv from resolved options.
///
/// Order: executable, `VMTEST_QEMU` flags, `-nographic`, device fragments in
/// configuration order, then `-kernel`, `-initrd` and `-append`.
pub fn build_cmdline(resolved: &ResolvedConfig<'_>) -> Vec<String> {
    let mut args = Vec::with_capacity(2 + resolved.base_args.len());
    args.push(resolved.qemu_path.clone());
    args.extend(resolved.base_args.iter().cloned());
    args.push("-nographic".to_string());

    let mut ids = IdAllocator::new();
    for device in resolved.devices {
        let mut ctx = DeviceContext {
            arch: resolved.arch,
            ids: &mut ids,
        };
        args.extend(device.cmdline(&mut ctx));
    }

    if let Some(kernel) = &resolved.kernel {
        args.push("-kernel".to_string());
        args.push(kernel.to_string_lossy().into_owned());
    }
    if let Some(initramfs) = &resolved.initramfs {
        args.push("-initrd".to_string());
        args.push(initramfs.to_string_lossy().into_owned());
    }
    if !resolved.kernel_args.is_empty() {
        args.push("-append".to_string());
        args.push(resolved.kernel_args.clone());
    }
    args
}

/// Render argv as a single shell-quoted string, for logs and reproduction.
pub fn quote_cmdline<S: AsRef<str>>(args: &[S]) -> String {
    shell_words::join(args)
}

impl Options {
    /// Resolve these options and build the QEMU argv.
    pub fn cmdline(&self) -> Result<Vec<String>> {
        let resolved = self.resolve()?;
        Ok(build_cmdline(&resolved))
    }
}
