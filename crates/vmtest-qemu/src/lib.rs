//! # vmtest-qemu
//!
//! QEMU launcher for VM-based tests.
//! Turns a declarative machine description into a QEMU command line and
//! manages the resulting process.
//!
//! ## Quick Start
//!
//! ```no_run
//! use vmtest_qemu::{ArbitraryKernelArgs, Arch, VmBuilder};
//!
//! # async fn example() -> vmtest_qemu::Result<()> {
//! // QEMU path, kernel and initramfs may also come from VMTEST_QEMU,
//! // VMTEST_KERNEL and VMTEST_INITRAMFS.
//! let mut vm = VmBuilder::new()
//!     .qemu_path("qemu-system-x86_64")
//!     .arch(Arch::X86_64)
//!     .kernel("/path/to/bzImage")
//!     .initramfs("/path/to/initramfs.cpio")
//!     .device(ArbitraryKernelArgs::new("console=ttyS0"))
//!     .start()
//!     .await?;
//!
//! vm.console_mut().unwrap().expect_string("I AM HERE").await?;
//! vm.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Environment Fallbacks**: `VMTEST_QEMU`, `VMTEST_QEMU_ARCH`, `VMTEST_KERNEL`, `VMTEST_INITRAMFS`
//! - **Pluggable Devices**: implement [`Device`] to add hardware; IDs come from a per-build [`IdAllocator`]
//! - **Console**: expect-style matching on serial output, write-through stdin
//! - **Builder Pattern**: Ergonomic configuration with `VmBuilder`

mod arch;
mod builder;
mod cmdline;
mod config;
mod console;
mod device;
mod env;
mod error;
mod ids;
mod machine;

pub use arch::Arch;
pub use builder::VmBuilder;
pub use cmdline::{build_cmdline, quote_cmdline};
pub use config::{Options, ResolvedConfig, SerialOutput};
pub use console::{Console, DEFAULT_EXPECT_TIMEOUT};
pub use device::{
    ArbitraryArgs, ArbitraryKernelArgs, Device, DeviceContext, IdeBlockDevice, P9Directory,
    UserNetwork, VirtioRandom,
};
pub use env::{VmtestEnv, ENV_INITRAMFS, ENV_KERNEL, ENV_QEMU, ENV_QEMU_ARCH};
pub use error::{Result, VmError};
pub use ids::IdAllocator;
pub use machine::{Vm, VmState};
