//! Scan configuration
//!
//! One YAML file describes the roots, the macro root, the remote parameters and
//! the resolution tables. It is loaded and validated once at startup and then
//! passed by reference into the scan entry point; nothing in the core reads
//! global state.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::error_codes;
use crate::facts::Engine;

/// Fixed bindings made by the connection-setup macro
pub const DEFAULT_CONNECTION_BINDINGS: &[(&str, &str)] = &[
    ("sf_database_old", "ILS_DATALAB_SBX_DB"),
    ("sf_schema_old", "DATALAB_ILSNP"),
    ("sf_database", "LIS_DTALAB_WRKGRP_SPC_DB"),
    ("sf_schema", "DL_T1_ILS_ANALYTICS"),
];

/// Snowflake databases/schemas where writes count as in scope
pub const DEFAULT_WRITE_SCOPE: &[&str] = &["LIS_DTALAB_WRKGRP_SPC_DB", "DATALAB_ILSNP"];

/// Default traversal depth for impact queries
pub const DEFAULT_MAX_DEPTH: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("No scan roots configured")]
    NoRoots,

    #[error("Macro root {0} is not one of the configured roots")]
    MacroRootNotInRoots(String),

    #[error("workers must be at least 1")]
    ZeroWorkers,

    #[error("max_depth must be at least 1")]
    ZeroDepth,

    #[error("Unknown engine '{engine}' for known libref '{libref}'")]
    UnknownEngine { libref: String, engine: String },

    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } | ConfigError::Yaml(_) => error_codes::SASMAP_CFG_001_UNREADABLE,
            _ => error_codes::SASMAP_CFG_002_INVALID,
        }
    }
}

/// Remote access parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Local directory mirroring the remote tree; remote paths are joined onto it
    pub base_dir: Option<PathBuf>,
    pub read_timeout_secs: u64,
    /// Retries after the first failed attempt
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            read_timeout_secs: 30,
            retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl RemoteConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// SQLite database holding the fact relations
    pub database: PathBuf,
    /// Remote roots, scanned in order
    pub roots: Vec<String>,
    /// The root whose `%macro` definitions populate the macro catalog
    pub macro_root: String,
    pub extensions: Vec<String>,
    /// Glob patterns of remote paths to skip
    pub exclude: Vec<String>,
    pub workers: usize,
    pub full_rescan: bool,
    /// libref -> engine name, used when no LIBNAME statement binds the libref
    pub known_librefs: BTreeMap<String, String>,
    /// Replaces the connection-setup macro's default bindings when set
    pub connection_bindings: Option<BTreeMap<String, String>>,
    pub snowflake_write_scope: Vec<String>,
    pub remote: RemoteConfig,
    pub max_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("sasmap.db"),
            roots: Vec::new(),
            macro_root: String::new(),
            extensions: vec![".sas".to_string()],
            exclude: Vec::new(),
            workers: 4,
            full_rescan: false,
            known_librefs: BTreeMap::new(),
            connection_bindings: None,
            snowflake_write_scope: DEFAULT_WRITE_SCOPE.iter().map(|s| s.to_string()).collect(),
            remote: RemoteConfig::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ScanConfig {
    /// Read, parse and validate a YAML config file
    ///
    /// A relative `database` path is resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        if config.database.is_relative() {
            if let Some(dir) = path.parent() {
                config.database = dir.join(&config.database);
            }
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: ScanConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot drive a scan
    ///
    /// # Guarantees
    /// - at least one root, and the macro root is one of them
    /// - at least one worker and a positive query depth
    /// - every known libref names a recognised engine
    /// - every exclude pattern compiles
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        let macro_root = normalize_root(&self.macro_root);
        if macro_root.is_empty() || !self.roots.iter().any(|r| normalize_root(r) == macro_root) {
            return Err(ConfigError::MacroRootNotInRoots(self.macro_root.clone()));
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        self.known_libref_engines()?;
        self.exclude_set()?;
        Ok(())
    }

    /// Known librefs with lower-cased keys and parsed engines
    pub fn known_libref_engines(&self) -> Result<HashMap<String, Engine>, ConfigError> {
        self.known_librefs
            .iter()
            .map(|(libref, engine)| {
                Engine::from_str(engine)
                    .map(|e| (libref.to_ascii_lowercase(), e))
                    .ok_or_else(|| ConfigError::UnknownEngine {
                        libref: libref.clone(),
                        engine: engine.clone(),
                    })
            })
            .collect()
    }

    pub fn exclude_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidGlob {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|source| ConfigError::InvalidGlob {
            pattern: self.exclude.join(","),
            source,
        })
    }

    /// Variable bindings made by the connection-setup macro, lower-cased names
    pub fn connection_bindings(&self) -> Vec<(String, String)> {
        match &self.connection_bindings {
            Some(map) => map
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            None => DEFAULT_CONNECTION_BINDINGS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Roots in processing order: macro root first, then the rest as configured,
    /// duplicates removed
    pub fn ordered_roots(&self) -> Vec<String> {
        let macro_root = normalize_root(&self.macro_root);
        let mut ordered = vec![macro_root.clone()];
        for root in &self.roots {
            let root = normalize_root(root);
            if !ordered.contains(&root) {
                ordered.push(root);
            }
        }
        ordered
    }

    pub fn macro_root(&self) -> String {
        normalize_root(&self.macro_root)
    }

    /// True when `path` has one of the configured extensions (case-insensitive)
    pub fn has_extension(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }
}

/// Strip trailing separators, keeping a bare `/`
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() && root.trim().starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
database: map.db
roots: [/prod/macros, /prod/jobs/]
macro_root: /prod/macros/
workers: 2
known_librefs:
  dwh: oracle
  SFLIB: snowflake
remote:
  retries: 1
"#;

    #[test]
    fn test_valid_config_loads_with_defaults() {
        let config = ScanConfig::from_yaml(VALID).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.extensions, vec![".sas"]);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.remote.retries, 1);
        assert_eq!(config.remote.read_timeout_secs, 30);
        assert_eq!(config.snowflake_write_scope.len(), 2);
        let engines = config.known_libref_engines().unwrap();
        assert_eq!(engines.get("sflib"), Some(&Engine::Snowflake));
        assert_eq!(config.ordered_roots(), vec!["/prod/macros", "/prod/jobs"]);
    }

    #[test]
    fn test_macro_root_must_be_a_root() {
        let err = ScanConfig::from_yaml("roots: [/a]\nmacro_root: /b\n").unwrap_err();
        assert!(matches!(err, ConfigError::MacroRootNotInRoots(_)));
    }

    #[test]
    fn test_no_roots_rejected() {
        let err = ScanConfig::from_yaml("macro_root: /a\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoRoots));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = ScanConfig::from_yaml("roots: [/a]\nmacro_root: /a\nworkers: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWorkers));
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let yaml = "roots: [/a]\nmacro_root: /a\nknown_librefs:\n  x: teradata\n";
        let err = ScanConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEngine { .. }));
    }

    #[test]
    fn test_bad_glob_rejected() {
        let yaml = "roots: [/a]\nmacro_root: /a\nexclude: ['[']\n";
        let err = ScanConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGlob { .. }));
    }

    #[test]
    fn test_connection_binding_override() {
        let mut config = ScanConfig::from_yaml(VALID).unwrap();
        assert_eq!(config.connection_bindings().len(), 4);
        let mut map = BTreeMap::new();
        map.insert("SF_DATABASE".to_string(), "OTHER_DB".to_string());
        config.connection_bindings = Some(map);
        assert_eq!(
            config.connection_bindings(),
            vec![("sf_database".to_string(), "OTHER_DB".to_string())]
        );
    }

    #[test]
    fn test_extension_filter() {
        let config = ScanConfig::from_yaml(VALID).unwrap();
        assert!(config.has_extension("/prod/jobs/LOAD.SAS"));
        assert!(!config.has_extension("/prod/jobs/notes.txt"));
    }
}
