//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if the workspaces root is missing or
//! points somewhere it must not. The database URL is wrapped in
//! `secrecy::SecretString` to keep it out of logs.

pub mod toolchain;

use std::path::{Component, Path, PathBuf};

use secrecy::SecretString;

use crate::error::{Error, Result};

pub use toolchain::ToolchainConfig;

#[derive(Debug)]
pub struct Config {
    /// Absolute, normalised root under which every workspace lives.
    pub workspaces_root: PathBuf,
    pub database_url: Option<SecretString>,
    pub toolchain: ToolchainConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let root = required_var("WORKSPACES_ROOT")?;
        let cwd = std::env::current_dir()?;
        let workspaces_root =
            resolve_workspaces_root(Path::new(&root), &cwd, Path::new(env!("CARGO_MANIFEST_DIR")))?;

        let toolchain = match std::env::var("TOOLCHAIN_CONFIG") {
            Ok(path) => ToolchainConfig::load(Path::new(&path))?,
            Err(_) => ToolchainConfig::default(),
        };

        Ok(Self {
            workspaces_root,
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            toolchain,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// The database URL, or a config error naming the variable.
    pub fn require_database_url(&self) -> Result<&SecretString> {
        self.database_url
            .as_ref()
            .ok_or_else(|| Error::Config("required environment variable DATABASE_URL is not set".into()))
    }
}

/// Resolve `root` to an absolute path and reject it if it falls inside
/// `source_tree` (or is the source tree itself).
pub fn resolve_workspaces_root(root: &Path, cwd: &Path, source_tree: &Path) -> Result<PathBuf> {
    if root.as_os_str().is_empty() {
        return Err(Error::Config("WORKSPACES_ROOT is empty".into()));
    }

    let absolute = if root.is_absolute() {
        normalize(root)
    } else {
        normalize(&cwd.join(root))
    };
    let source_tree = normalize(source_tree);

    if absolute.starts_with(&source_tree) {
        return Err(Error::Config(format!(
            "WORKSPACES_ROOT {} is inside the application source tree {}; \
             generated projects must live elsewhere",
            absolute.display(),
            source_tree.display()
        )));
    }
    Ok(absolute)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
