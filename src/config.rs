use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::Error;

/// Default cache time-to-live in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Name of the project configuration file, looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = ".linkref.toml";

/// Project configuration loaded from `.linkref.toml`.
/// Include/exclude patterns are path prefixes applied to markdown files.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a completed check result stays fresh.
    pub cache_ttl: Duration,
    /// Optional pattern matched against checked link text; a match attaches
    /// an informational diagnostic (used to flag region-locked URLs).
    pub country_code_regex: Option<regex::Regex>,
    /// Path prefixes excluded from scanning.
    pub exclude: Vec<String>,
    /// Path prefixes included in scanning; empty means everything.
    pub include: Vec<String>,
}

/// Raw TOML structure for `.linkref.toml`.
#[derive(serde::Deserialize)]
struct LinkrefTomlConfig {
    cache_ttl_secs: Option<u64>,
    country_code_regex: Option<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    include: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        return Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            country_code_regex: None,
            exclude: Vec::new(),
            include: Vec::new(),
        };
    }
}

impl Config {
    /// Load config from `.linkref.toml` in the given root directory.
    /// Returns the default if the file doesn't exist. Returns an error if
    /// the file exists but is malformed — never silently falls back to
    /// defaults when the user wrote a config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails (other than not-found),
    /// `Error::TomlDe` if the TOML is malformed, or `Error::ConfigInvalid`
    /// if `country_code_regex` is not a valid pattern.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE_NAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Io(e)),
        };

        let raw: LinkrefTomlConfig = toml::from_str(&content)?;
        let country_code_regex = match raw.country_code_regex {
            None => None,
            Some(pattern) => Some(regex::Regex::new(&pattern).map_err(|e| {
                return Error::ConfigInvalid {
                    reason: format!("country_code_regex: {e}"),
                };
            })?),
        };

        return Ok(Self {
            cache_ttl: Duration::from_secs(raw.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            country_code_regex,
            exclude: raw.exclude,
            include: raw.include,
        });
    }

    /// Check whether a markdown file path should be scanned.
    ///
    /// A path is included if no include patterns are set (scan everything),
    /// or if the path starts with at least one include pattern.
    /// An included path is then excluded if it starts with any exclude pattern.
    pub fn should_scan(&self, relative_path: &str) -> bool {
        let included = self.include.is_empty()
            || self.include.iter().any(|p| relative_path.starts_with(p.as_str()));

        if !included {
            return false;
        }

        return !self.exclude.iter().any(|p| relative_path.starts_with(p.as_str()));
    }
}

/// Hot-reloadable handle to the current configuration. The engine reads
/// through this on every pass, so a reload takes effect without restarts.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
}

impl ConfigHandle {
    /// Wrap an initial configuration.
    pub fn new(config: Config) -> Self {
        return Self {
            inner: Arc::new(RwLock::new(config)),
        };
    }

    /// A clone of the current configuration.
    pub fn get(&self) -> Config {
        return match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
    }

    /// Swap in a new configuration. Callers are expected to follow up with
    /// a full reprocess so cached results reflect the new settings.
    pub fn replace(&self, config: Config) {
        match self.inner.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_is_five_minutes() {
        let config = Config::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(config.country_code_regex.is_none());
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "cache_ttl_secs = []").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn loads_ttl_and_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "cache_ttl_secs = 10\ncountry_code_regex = \"\\\\.ru/\"",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(10));
        assert!(config.country_code_regex.unwrap().is_match("https://x.ru/a"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "country_code_regex = \"(\"").unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn include_exclude_prefixes() {
        let config = Config {
            exclude: vec!["docs/internal/".to_string()],
            include: vec!["docs/".to_string()],
            ..Config::default()
        };
        assert!(config.should_scan("docs/guide.md"));
        assert!(!config.should_scan("docs/internal/secret.md"));
        assert!(!config.should_scan("src/README.md"));
    }

    #[test]
    fn handle_reload_is_visible_to_readers() {
        let handle = ConfigHandle::new(Config::default());
        let mut updated = Config::default();
        updated.cache_ttl = Duration::from_secs(1);
        handle.replace(updated);
        assert_eq!(handle.get().cache_ttl, Duration::from_secs(1));
    }
}
