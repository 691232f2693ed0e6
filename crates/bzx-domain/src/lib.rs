//! Domain types shared by the bzx launcher crates: layered configuration,
//! workspace discovery, host platform naming and the version label grammar.

pub mod config;
pub mod platform;
pub mod version;
pub mod workspace;

pub use config::{keys, parse_bool, Config, ConfigError, LayerSource};
pub use platform::{Arch, Flavor, Os, Platform, PlatformError, TOOL_NAME};
pub use version::{
    compare_versions, is_commit_hash, parse_label, sort_ascending, CandidatePolicy, VersionError,
    VersionInfo, VersionKey, VersionKind, UPSTREAM_FORK,
};
pub use workspace::{find_workspace_root, read_version_file, BOUNDARY_FILES, VERSION_FILE};
