use std::env;
use std::fmt;

use crate::version::{is_commit_hash, VersionKey};

/// Executable name of the launched tool, without extension.
pub const TOOL_NAME: &str = "bazel";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("unsupported OS \"{0}\", must be Linux, macOS or Windows")]
    UnsupportedOs(String),
    #[error("unsupported architecture \"{0}\", must be arm64 or x86_64")]
    UnsupportedArch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Darwin,
    Linux,
    Windows,
}

impl Os {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Os::Darwin => "darwin",
            Os::Linux => "linux",
            Os::Windows => "windows",
        }
    }

    /// Directory name used by the CI artifact bucket.
    #[must_use]
    pub fn ci_name(self) -> &'static str {
        match self {
            Os::Darwin => "macos",
            Os::Linux => "linux",
            Os::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Arm64,
}

impl Arch {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Released binaries ship with and without an embedded JDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    #[default]
    Standard,
    NoJdk,
}

impl Flavor {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::Standard => "bazel",
            Flavor::NoJdk => "bazel_nojdk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    /// Describes the machine the launcher runs on.
    ///
    /// # Errors
    /// Returns an error for hosts outside the supported OS/architecture matrix.
    pub fn host() -> Result<Self, PlatformError> {
        Self::from_parts(env::consts::OS, env::consts::ARCH)
    }

    /// # Errors
    /// Returns an error for unknown OS or architecture names.
    pub fn from_parts(os: &str, arch: &str) -> Result<Self, PlatformError> {
        let os = match os {
            "macos" | "darwin" => Os::Darwin,
            "linux" => Os::Linux,
            "windows" => Os::Windows,
            other => return Err(PlatformError::UnsupportedOs(other.to_string())),
        };
        let arch = match arch {
            "x86_64" | "amd64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Arm64,
            other => return Err(PlatformError::UnsupportedArch(other.to_string())),
        };
        Ok(Self { os, arch })
    }

    #[must_use]
    pub fn executable_suffix(&self) -> &'static str {
        match self.os {
            Os::Windows => ".exe",
            _ => "",
        }
    }

    /// `bazel` or `bazel.exe`.
    #[must_use]
    pub fn executable_name(&self) -> String {
        format!("{TOOL_NAME}{}", self.executable_suffix())
    }

    /// Machine name used in artifact names for `version`. Apple silicon builds
    /// only exist from 4.1.0 on, older releases run the x86_64 build.
    #[must_use]
    pub fn machine_name(&self, version: &str) -> Arch {
        if self.os == Os::Darwin
            && self.arch == Arch::Arm64
            && !is_commit_hash(version)
            && VersionKey::parse(version).is_some_and(|key| key < VersionKey::release(4, 1, 0))
        {
            tracing::warn!(
                version,
                "falling back to x86_64 because arm64 is not supported on Apple Silicon until 4.1.0"
            );
            return Arch::X86_64;
        }
        self.arch
    }

    /// `<flavor>-<version>-<os>-<machine>`, optionally with the executable suffix.
    #[must_use]
    pub fn artifact_name(&self, flavor: Flavor, version: &str, with_suffix: bool) -> String {
        let suffix = if with_suffix {
            self.executable_suffix()
        } else {
            ""
        };
        format!(
            "{}-{version}-{}-{}{suffix}",
            flavor.as_str(),
            self.os.as_str(),
            self.machine_name(version),
        )
    }

    /// File name of the self-extracting installer script of a release.
    #[must_use]
    pub fn installer_name(&self, version: &str) -> String {
        format!(
            "{TOOL_NAME}-{version}-installer-{}-{}.sh",
            self.os.as_str(),
            self.machine_name(version),
        )
    }

    /// Platform directory of per-commit CI builds, e.g. `macos_arm64`.
    #[must_use]
    pub fn commit_label(&self) -> String {
        match self.arch {
            Arch::Arm64 => format!("{}_arm64", self.os.ci_name()),
            Arch::X86_64 => self.os.ci_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_hosts() {
        assert_eq!(
            Platform::from_parts("freebsd", "x86_64"),
            Err(PlatformError::UnsupportedOs("freebsd".to_string()))
        );
        let err = Platform::from_parts("linux", "riscv64").unwrap_err();
        assert!(err.to_string().starts_with("unsupported architecture"));
    }

    #[test]
    fn artifact_names() {
        let linux = Platform::from_parts("linux", "x86_64").unwrap();
        assert_eq!(
            linux.artifact_name(Flavor::Standard, "7.0.0", true),
            "bazel-7.0.0-linux-x86_64"
        );
        assert_eq!(linux.executable_name(), "bazel");

        let windows = Platform::from_parts("windows", "aarch64").unwrap();
        assert_eq!(
            windows.artifact_name(Flavor::NoJdk, "7.0.0", true),
            "bazel_nojdk-7.0.0-windows-arm64.exe"
        );
        assert_eq!(
            windows.artifact_name(Flavor::Standard, "7.0.0", false),
            "bazel-7.0.0-windows-arm64"
        );
        assert_eq!(windows.executable_name(), "bazel.exe");
    }

    #[test]
    fn darwin_arm64_falls_back_before_4_1() {
        let mac = Platform::from_parts("macos", "aarch64").unwrap();
        assert_eq!(mac.machine_name("4.0.0"), Arch::X86_64);
        assert_eq!(mac.machine_name("4.1.0rc1"), Arch::X86_64);
        assert_eq!(mac.machine_name("4.1.0"), Arch::Arm64);
        assert_eq!(mac.machine_name("7.0.0-pre.20231011.2"), Arch::Arm64);

        let commit = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(mac.machine_name(commit), Arch::Arm64);
        assert_eq!(
            mac.artifact_name(Flavor::Standard, "3.7.2", false),
            "bazel-3.7.2-darwin-x86_64"
        );

        let linux = Platform::from_parts("linux", "arm64").unwrap();
        assert_eq!(linux.machine_name("0.29.0"), Arch::Arm64);
    }

    #[test]
    fn installer_names() {
        let linux = Platform::from_parts("linux", "x86_64").unwrap();
        assert_eq!(
            linux.installer_name("7.0.0"),
            "bazel-7.0.0-installer-linux-x86_64.sh"
        );
        let mac = Platform::from_parts("macos", "arm64").unwrap();
        assert_eq!(
            mac.installer_name("3.7.2"),
            "bazel-3.7.2-installer-darwin-x86_64.sh"
        );
    }

    #[test]
    fn commit_labels() {
        assert_eq!(
            Platform::from_parts("darwin", "arm64").unwrap().commit_label(),
            "macos_arm64"
        );
        assert_eq!(
            Platform::from_parts("linux", "amd64").unwrap().commit_label(),
            "linux"
        );
    }
}
