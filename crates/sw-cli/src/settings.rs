//! TOML settings file.
//!
//! ```toml
//! [engine]
//! max_cascade_depth = 32
//! max_dispatches = 10000
//! time_budget_ms = 250
//!
//! [library]
//! seed = 7
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sw_concepts::Library;
use sw_core::EngineConfig;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineConfig,
    pub library: LibrarySettings,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LibrarySettings {
    /// Seed for random behaviors; unset draws from the OS.
    pub seed: Option<u64>,
}

impl Settings {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid settings")
    }

    /// Read `path`, else `$SW_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = std::env::var("SW_CONFIG").ok().filter(|p| !p.is_empty());
        let path = match (path, env.as_deref()) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(p)) => p.into(),
            (None, None) => return Ok(Self::default()),
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings =
            Self::parse(&text).with_context(|| format!("in settings file {}", path.display()))?;
        tracing::info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn library(&self) -> Library {
        Library::with_seed(self.library.seed)
    }
}
