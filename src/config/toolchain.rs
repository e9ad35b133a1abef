//! External tool commands, loaded from TOML.
//!
//! ```toml
//! [toolchain]
//! scaffold = "npm init playwright@latest -- --quiet --lang=ts --no-browsers --no-examples ."
//! install = "npm install --save-dev --no-audit --no-fund @cucumber/cucumber ts-node"
//! health_check = "npm run health-check"
//! command_timeout_secs = 600
//!
//! [toolchain.env]
//! NPM_CONFIG_UPDATE_NOTIFIER = "false"
//! ```
//!
//! Every field is optional; omitted fields fall back to the defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::process::DEFAULT_COMMAND_TIMEOUT;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct ToolchainFile {
    #[serde(default)]
    toolchain: ToolchainConfig,
}

/// The three commands the generation pipeline shells out to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Scaffolds the browser-automation skeleton into the cwd, skipping
    /// browser downloads.
    pub scaffold: String,
    /// Installs the BDD and test-support dependencies.
    pub install: String,
    /// Runs the generated health-check script.
    pub health_check: String,
    pub command_timeout_secs: u64,
    /// Extra environment for every command.
    pub env: BTreeMap<String, String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            scaffold: "npm init playwright@latest -- --quiet --lang=ts --browser=chromium \
                       --no-browsers --no-examples --install-deps=false ."
                .to_string(),
            install: "npm install --save-dev --no-audit --no-fund \
                      @cucumber/cucumber ts-node typescript dotenv @types/node"
                .to_string(),
            health_check: "npm run health-check".to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            env: BTreeMap::from([
                ("PLAYWRIGHT_SKIP_BROWSER_DOWNLOAD".to_string(), "1".to_string()),
                ("NPM_CONFIG_UPDATE_NOTIFIER".to_string(), "false".to_string()),
            ]),
        }
    }
}

impl ToolchainConfig {
    /// Load from a TOML file with a `[toolchain]` table.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read toolchain config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad toolchain config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        let file: ToolchainFile = toml::from_str(content)?;
        Ok(file.toolchain)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
