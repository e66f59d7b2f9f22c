//! Guest architectures understood by the command-line builder.

use crate::error::VmError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// QEMU guest architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Arch {
    /// 64-bit x86 (`qemu-system-x86_64`)
    X86_64,
    /// 32-bit x86 (`qemu-system-i386`)
    I386,
    /// 32-bit ARM (`qemu-system-arm`)
    Arm,
    /// 64-bit ARM (`qemu-system-aarch64`)
    Aarch64,
}

impl Arch {
    /// Architecture of the machine running this process, if it can be a guest.
    pub fn host() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Arch::X86_64),
            "x86" => Some(Arch::I386),
            "arm" => Some(Arch::Arm),
            "aarch64" => Some(Arch::Aarch64),
            _ => None,
        }
    }

    /// QEMU's name for this architecture.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::I386 => "i386",
            Arch::Arm => "arm",
            Arch::Aarch64 => "aarch64",
        }
    }

    /// ARM guests use MMIO transports rather than PCI.
    pub fn is_arm(&self) -> bool {
        matches!(self, Arch::Arm | Arch::Aarch64)
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "i386" => Ok(Arch::I386),
            "arm" => Ok(Arch::Arm),
            "aarch64" => Ok(Arch::Aarch64),
            other => Err(VmError::UnsupportedArch(other.to_string())),
        }
    }
}

impl TryFrom<String> for Arch {
    type Error = VmError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Arch> for String {
    fn from(arch: Arch) -> Self {
        arch.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_names() {
        for arch in [Arch::X86_64, Arch::I386, Arch::Arm, Arch::Aarch64] {
            assert_eq!(arch.as_str().parse::<Arch>().unwrap(), arch);
        }
    }

    #[test]
    fn test_parse_unsupported() {
        let err = "riscv64".parse::<Arch>().unwrap_err();
        assert!(matches!(err, VmError::UnsupportedArch(ref s) if s == "riscv64"));
        // GOARCH-style names are not QEMU names.
        assert!("amd64".parse::<Arch>().is_err());
    }

    #[test]
    fn test_is_arm() {
        assert!(Arch::Arm.is_arm());
        assert!(Arch::Aarch64.is_arm());
        assert!(!Arch::X86_64.is_arm());
        assert!(!Arch::I386.is_arm());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Arch::Aarch64).unwrap();
        assert_eq!(json, "\"aarch64\"");
        let arch: Arch = serde_json::from_str("\"i386\"").unwrap();
        assert_eq!(arch, Arch::I386);
        assert!(serde_json::from_str::<Arch>("\"sparc\"").is_err());
    }
}
