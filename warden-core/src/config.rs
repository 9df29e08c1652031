//! Startup configuration, independent of any one request.
//!
//! Precedence, lowest to highest: compiled-in defaults, an optional
//! JSON config file, command-line flags. This mirrors the way build
//! state is persisted as JSON elsewhere in this lineage of crates,
//! repurposed here for a small, rarely-written configuration document
//! instead of a cache.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::{fs, path::Path};

const DEFAULT_CONFINEMENT_ROOT: &str = "/mnt/honeycomb";
const DEFAULT_CONFINEMENT_MODE: u32 = 0o750;
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Process-wide configuration resolved before the event loop starts.
#[derive(Clone, Debug)]
pub struct SupervisorConfig
{
    /// Directory under which every launch's confinement directory is
    /// created.
    pub confinement_root: String,
    /// Mode applied to `confinement_root` and each confinement directory.
    pub confinement_mode: u32,
    /// Descriptor requests are read from.
    pub request_fd: i32,
    /// Descriptor responses are written to.
    pub response_fd: i32,
    /// Compiled-in `PATH` fallback used when the environment has none.
    pub default_path: String,
    /// Logging verbosity, passed to the logging facade at startup.
    pub log_level: String,
}

impl Default for SupervisorConfig
{
    fn default() -> Self
    {
        Self{
            confinement_root: DEFAULT_CONFINEMENT_ROOT.to_owned(),
            confinement_mode: DEFAULT_CONFINEMENT_MODE,
            request_fd: 0,
            response_fd: 1,
            default_path: DEFAULT_PATH.to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

/// The subset of [`SupervisorConfig`] that may appear in a JSON config
/// file; every field is optional so a file may override only what it
/// names.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile
{
    confinement_root: Option<String>,
    confinement_mode: Option<String>,
    request_fd: Option<i32>,
    response_fd: Option<i32>,
    default_path: Option<String>,
    log_level: Option<String>,
}

impl SupervisorConfig
{
    /// Load a JSON config file on top of the compiled-in defaults.
    ///
    /// An unknown key or malformed JSON is a fatal `ConfigError`: the
    /// process must never reach the event loop with a partially
    /// applied configuration.
    pub fn load(path: &Path) -> Result<Self>
    {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("reading {}: {e}", path.display())))?;

        let file: ConfigFile = serde_json::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("parsing {}: {e}", path.display())))?;

        let mut config = Self::default();

        if let Some(v) = file.confinement_root { config.confinement_root = v; }
        if let Some(v) = file.confinement_mode { config.confinement_mode = parse_octal(&v)?; }
        if let Some(v) = file.request_fd       { config.request_fd = v; }
        if let Some(v) = file.response_fd      { config.response_fd = v; }
        if let Some(v) = file.default_path     { config.default_path = v; }
        if let Some(v) = file.log_level        { config.log_level = v; }

        Ok(config)
    }
}

fn parse_octal(s: &str) -> Result<u32>
{
    u32::from_str_radix(s.trim_start_matches('0'), 8)
        .map_err(|e| Error::ConfigError(format!("invalid mode {s:?}: {e}")))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn defaults_are_self_consistent()
    {
        let config = SupervisorConfig::default();
        assert_eq!(config.confinement_root, "/mnt/honeycomb");
        assert_eq!(config.confinement_mode, 0o750);
    }

    #[test]
    fn load_rejects_unknown_key()
    {
        let dir = std::env::temp_dir().join(format!("warden-config-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        fs::write(&path, r#"{"bogus": true}"#).unwrap();

        assert!(matches!(SupervisorConfig::load(&path), Err(Error::ConfigError(_))));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_overrides_only_named_fields()
    {
        let dir = std::env::temp_dir().join(format!("warden-config-test2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        fs::write(&path, r#"{"confinement_root": "/tmp/jail"}"#).unwrap();

        let config = SupervisorConfig::load(&path).unwrap();
        assert_eq!(config.confinement_root, "/tmp/jail");
        assert_eq!(config.confinement_mode, 0o750);

        fs::remove_dir_all(&dir).ok();
    }
}
