//! The execution environment that library rules are evaluated against.

/// Operating system family, as named in version manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsKind {
    Linux,
    Windows,
    Osx,
    Other,
}

impl OsKind {
    /// The OS this process runs on.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            "macos" => Self::Osx,
            _ => Self::Other,
        }
    }

    /// Name used for this OS in rules and native classifier maps.
    pub fn manifest_name(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Osx => "osx",
            Self::Other => "unknown",
        }
    }
}

/// Operating system plus pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: OsKind,
    /// 32 or 64.
    pub arch_bits: u8,
}

impl Platform {
    pub fn new(os: OsKind, arch_bits: u8) -> Self {
        Self { os, arch_bits }
    }

    /// The platform this process runs on.
    pub fn current() -> Self {
        let arch_bits = if cfg!(target_pointer_width = "64") { 64 } else { 32 };
        Self::new(OsKind::current(), arch_bits)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}
