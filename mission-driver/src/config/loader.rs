// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `udefx.toml`, deserializes the raw tables and converts them into
//! the typed runtime [`Config`].

use crate::config::model::{Config, ConfigError, RawConfig};
use log::Level;
use std::{fs, path::Path};

/// Load and validate the configuration at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    udefx_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    udefx_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Parse configuration text. An empty document yields the defaults.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Config::try_from(raw)
}
