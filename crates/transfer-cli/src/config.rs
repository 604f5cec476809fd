//! Optional saved-profile loading. A profile fills in connection fields
//! the command line didn't specify; flags always win over the profile.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Profile {
    pub transport: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub passive: Option<bool>,
    pub secure: Option<bool>,
    pub https: Option<bool>,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading profile {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing profile {}", path.display()))
    }
}
