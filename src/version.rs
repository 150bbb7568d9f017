//! Version and build information for sasmap
//!
//! Build metadata is injected by `build.rs`; every field falls back to "unknown".

use serde::Serialize;

/// Build metadata reported by `sasmap version` and embedded in status output
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_date: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: package_version(),
            commit: build_commit(),
            build_date: build_date(),
            rustc_version: rustc_version(),
        }
    }
}

/// Full version line: "sasmap {version} ({commit} {date}) rustc {rustc_version}"
pub fn version() -> String {
    let info = BuildInfo::current();
    format!(
        "sasmap {} ({} {}) rustc {}",
        info.version, info.commit, info.build_date, info.rustc_version
    )
}

pub fn package_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn build_commit() -> &'static str {
    option_env!("SASMAP_COMMIT_SHA").unwrap_or("unknown")
}

pub fn build_date() -> &'static str {
    option_env!("SASMAP_BUILD_DATE").unwrap_or("unknown")
}

pub fn rustc_version() -> &'static str {
    option_env!("SASMAP_RUSTC_VERSION").unwrap_or("unknown")
}
