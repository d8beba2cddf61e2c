// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Runtime settings, read from a toml file. Every key is optional.
//!
//! ```toml
//! backend = "auto"          # auto | native | plugin
//! trace_polls = false
//!
//! [plugin]
//! mode = "linked"           # linked | dylib | none
//! library = "readback_plugin"
//! forward_logs = true
//!
//! [log]
//! level = "info"
//! file = "log/readback.log"
//! ```

use crate::error::{ReadbackError, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Which backends a request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// host first, plugin as fallback
    #[default]
    Auto,
    Native,
    Plugin,
}

impl BackendPreference {
    pub fn allows_native(self) -> bool {
        matches!(self, BackendPreference::Auto | BackendPreference::Native)
    }

    pub fn allows_plugin(self) -> bool {
        matches!(self, BackendPreference::Auto | BackendPreference::Plugin)
    }
}

impl FromStr for BackendPreference {
    type Err = ReadbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "plugin" => Ok(Self::Plugin),
            other => Err(ReadbackError::Config(format!("unknown backend {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginMode {
    /// readback_plugin compiled into this binary
    #[default]
    Linked,
    /// shared library opened at startup
    Dylib,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub mode: PluginMode,
    /// library name or path, used by `dylib`
    pub library: String,
    /// route plugin diagnostics into `log`
    pub forward_logs: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            mode: PluginMode::default(),
            library: "readback_plugin".to_string(),
            forward_logs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub file: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "log/readback.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadbackConfig {
    pub backend: BackendPreference,
    /// log every request state on every poll
    pub trace_polls: bool,
    pub plugin: PluginConfig,
    pub log: LogConfig,
}

impl ReadbackConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.level_filter()?;
        Ok(cfg)
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log.level)
            .map_err(|_| ReadbackError::Config(format!("unknown log level {:?}", self.log.level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ReadbackConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ReadbackConfig::default());
        assert_eq!(cfg.backend, BackendPreference::Auto);
        assert_eq!(cfg.plugin.library, "readback_plugin");
        assert_eq!(cfg.level_filter().unwrap(), LevelFilter::Info);
    }

    #[test]
    fn test_partial_file() {
        let cfg = ReadbackConfig::from_toml_str(
            r#"
backend = "plugin"
[plugin]
mode = "dylib"
[log]
level = "trace"
"#,
        )
        .unwrap();
        assert_eq!(cfg.backend, BackendPreference::Plugin);
        assert_eq!(cfg.plugin.mode, PluginMode::Dylib);
        assert!(cfg.plugin.forward_logs);
        assert_eq!(cfg.level_filter().unwrap(), LevelFilter::Trace);
        assert_eq!(cfg.log.file, "log/readback.log");
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            ReadbackConfig::from_toml_str("backend = \"gpu\""),
            Err(ReadbackError::ConfigParse(_))
        ));
        assert!(matches!(
            ReadbackConfig::from_toml_str("[log]\nlevel = \"loud\""),
            Err(ReadbackError::Config(_))
        ));
    }

    #[test]
    fn test_preference() {
        assert!(BackendPreference::Auto.allows_native() && BackendPreference::Auto.allows_plugin());
        assert!(!BackendPreference::Native.allows_plugin());
        assert!(!BackendPreference::Plugin.allows_native());
        assert_eq!("Plugin".parse::<BackendPreference>().unwrap(), BackendPreference::Plugin);
        assert!("x".parse::<BackendPreference>().is_err());
    }
}
