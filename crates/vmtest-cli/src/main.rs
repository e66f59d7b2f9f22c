//! vmtest entry point.
//!
//! Builds a QEMU command line from flags, an optional machine file and the
//! `VMTEST_*` environment, then either prints it or runs the VM with its
//! serial output on stdout.

mod machine;

use anyhow::Context;
use clap::Parser;
use machine::{DeviceSpec, MachineSpec};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vmtest_qemu::{quote_cmdline, Arch, VmtestEnv};

#[derive(Parser, Debug)]
#[command(name = "vmtest", version, about = "Launch QEMU test VMs")]
struct Args {
    /// Machine description (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// QEMU executable (default: first word of VMTEST_QEMU)
    #[arg(long)]
    qemu: Option<String>,

    /// Guest architecture (default: VMTEST_QEMU_ARCH, then the host)
    #[arg(long)]
    arch: Option<Arch>,

    /// Kernel image (default: VMTEST_KERNEL)
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Kernel command line
    #[arg(long)]
    append: Option<String>,

    /// Initramfs (default: VMTEST_INITRAMFS)
    #[arg(long)]
    initramfs: Option<PathBuf>,

    /// Attach a disk image as an IDE drive
    #[arg(long = "disk")]
    disks: Vec<PathBuf>,

    /// Extra kernel argument contributed after --append
    #[arg(long = "karg")]
    kargs: Vec<String>,

    /// Share a host directory over 9P, as DIR:TAG
    #[arg(long = "9p", value_parser = parse_p9)]
    shares: Vec<(PathBuf, String)>,

    /// Add a virtio RNG
    #[arg(long)]
    rng: bool,

    /// Add a user-mode network interface
    #[arg(long)]
    net: bool,

    /// Print the QEMU command line and exit
    #[arg(long)]
    print: bool,

    /// Wait for this string on the console before waiting for exit
    #[arg(long)]
    expect: Option<String>,

    /// Seconds to wait for --expect
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl Args {
    /// Layer flags over a machine file.
    fn apply(&self, spec: &mut MachineSpec) {
        if let Some(qemu) = &self.qemu {
            spec.qemu = Some(qemu.clone());
        }
        if let Some(arch) = self.arch {
            spec.arch = Some(arch);
        }
        if let Some(kernel) = &self.kernel {
            spec.kernel = Some(kernel.clone());
        }
        if let Some(append) = &self.append {
            spec.kernel_args = append.clone();
        }
        if let Some(initramfs) = &self.initramfs {
            spec.initramfs = Some(initramfs.clone());
        }
        spec.devices.extend(
            self.disks
                .iter()
                .map(|file| DeviceSpec::IdeDisk { file: file.clone() }),
        );
        spec.devices.extend(
            self.shares
                .iter()
                .map(|(dir, tag)| DeviceSpec::P9 {
                    dir: dir.clone(),
                    tag: tag.clone(),
                }),
        );
        if self.rng {
            spec.devices.push(DeviceSpec::VirtioRandom);
        }
        if self.net {
            spec.devices.push(DeviceSpec::UserNetwork { model: None });
        }
        spec.devices.extend(
            self.kargs
                .iter()
                .map(|args| DeviceSpec::KernelArgs { args: args.clone() }),
        );
    }
}

fn parse_p9(s: &str) -> Result<(PathBuf, String), String> {
    match s.rsplit_once(':') {
        Some((dir, tag)) if !dir.is_empty() && !tag.is_empty() => {
            Ok((PathBuf::from(dir), tag.to_string()))
        }
        _ => Err(format!("expected DIR:TAG, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the VM's serial output
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("vmtest=info".parse()?)
                .add_directive("vmtest_qemu=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut spec = match &args.config {
        Some(path) => MachineSpec::load(path)?,
        None => MachineSpec::default(),
    };
    args.apply(&mut spec);
    tracing::debug!(?spec, "Machine description");

    let builder = spec.into_builder(VmtestEnv::from_env());

    if args.print {
        let cmdline = builder.cmdline().context("invalid VM configuration")?;
        println!("{}", quote_cmdline(&cmdline));
        return Ok(());
    }

    let mut vm = builder
        .serial_output(tokio::io::stdout())
        .start()
        .await
        .context("failed to start VM")?;
    tracing::info!(id = %vm.id(), cmdline = %vm.cmdline_quoted(), "VM running");

    if let Some(marker) = &args.expect {
        let timeout = Duration::from_secs(args.timeout);
        let console = vm.console_mut().context("console unavailable")?;
        console
            .expect_string_timeout(marker, timeout)
            .await
            .with_context(|| format!("did not see {marker:?} on the console"))?;
        tracing::info!(marker = %marker, "Console marker seen");
    }
    // Serial output still reaches stdout; stop buffering it for the console
    drop(vm.take_console());

    let outcome = tokio::select! {
        result = vm.wait() => Some(result),
        interrupted = signal::ctrl_c() => {
            interrupted.context("failed to listen for interrupt")?;
            None
        }
    };
    match outcome {
        Some(result) => result.context("VM exited with an error")?,
        None => {
            tracing::info!("Received interrupt, killing VM");
            vm.kill().await.context("failed to kill VM")?;
        }
    }

    tracing::info!(id = %vm.id(), state = %vm.state(), "VM finished");
    Ok(())
}
