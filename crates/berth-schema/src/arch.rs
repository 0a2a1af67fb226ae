use crate::SchemaError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Linux personality a container runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Architecture {
    I686,
    X86_64,
    Armv7l,
    Aarch64,
    Ppc,
    Ppc64,
    Ppc64le,
    S390x,
    Mips,
    Mips64,
    Riscv32,
    Riscv64,
}

impl Architecture {
    pub const ALL: [Architecture; 12] = [
        Architecture::I686,
        Architecture::X86_64,
        Architecture::Armv7l,
        Architecture::Aarch64,
        Architecture::Ppc,
        Architecture::Ppc64,
        Architecture::Ppc64le,
        Architecture::S390x,
        Architecture::Mips,
        Architecture::Mips64,
        Architecture::Riscv32,
        Architecture::Riscv64,
    ];

    /// Kernel name, as reported by `uname -m`.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::I686 => "i686",
            Architecture::X86_64 => "x86_64",
            Architecture::Armv7l => "armv7l",
            Architecture::Aarch64 => "aarch64",
            Architecture::Ppc => "ppc",
            Architecture::Ppc64 => "ppc64",
            Architecture::Ppc64le => "ppc64le",
            Architecture::S390x => "s390x",
            Architecture::Mips => "mips",
            Architecture::Mips64 => "mips64",
            Architecture::Riscv32 => "riscv32",
            Architecture::Riscv64 => "riscv64",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Architecture::I686 => &["i386", "i586", "386", "x86", "generic"],
            Architecture::X86_64 => &["amd64"],
            Architecture::Armv7l => &["armel", "armhf", "arm", "armhfp", "armv7a", "armv7hl"],
            Architecture::Aarch64 => &["arm64", "arm64v8"],
            Architecture::Ppc => &["powerpc"],
            Architecture::Ppc64 => &["powerpc64"],
            Architecture::Ppc64le => &["ppc64el"],
            Architecture::S390x => &[],
            Architecture::Mips => &["mipsel", "mipsle"],
            Architecture::Mips64 => &["mips64el", "mips64le"],
            Architecture::Riscv32 => &[],
            Architecture::Riscv64 => &[],
        }
    }

    /// Architecture of the running process, if it maps to a known personality.
    pub fn host() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86" => Some(Architecture::I686),
            "x86_64" => Some(Architecture::X86_64),
            "arm" => Some(Architecture::Armv7l),
            "aarch64" => Some(Architecture::Aarch64),
            "powerpc" => Some(Architecture::Ppc),
            "powerpc64" if cfg!(target_endian = "little") => Some(Architecture::Ppc64le),
            "powerpc64" => Some(Architecture::Ppc64),
            "s390x" => Some(Architecture::S390x),
            "mips" => Some(Architecture::Mips),
            "mips64" => Some(Architecture::Mips64),
            "riscv32" => Some(Architecture::Riscv32),
            "riscv64" => Some(Architecture::Riscv64),
            _ => None,
        }
    }

    /// Personalities a host of this architecture can additionally run.
    pub fn personalities(self) -> &'static [Architecture] {
        match self {
            Architecture::X86_64 => &[Architecture::I686],
            Architecture::Aarch64 => &[Architecture::Armv7l],
            Architecture::Ppc64 => &[Architecture::Ppc],
            _ => &[],
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::ALL
            .into_iter()
            .find(|a| a.name() == s || a.aliases().contains(&s))
            .ok_or_else(|| SchemaError::UnknownArchitecture(s.to_owned()))
    }
}

impl Serialize for Architecture {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Architecture {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
