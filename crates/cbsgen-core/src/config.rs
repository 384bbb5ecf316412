use crate::resolve::ResolverOptions;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings read from `cbsgen.toml`. Command-line flags override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Worker count; `None` uses the available parallelism.
    pub jobs: Option<usize>,
    /// Per-unit timeout in seconds; `None` disables it.
    pub unit_timeout_secs: Option<u64>,
    pub use_uncompressed_manifests: bool,
    pub container_extension: String,
    pub skip_existing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: None,
            unit_timeout_secs: None,
            use_uncompressed_manifests: false,
            container_extension: cbsgen_store::DEFAULT_CONTAINER_EXTENSION.to_owned(),
            skip_existing: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CoreError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `~/.config/cbsgen/config.toml`, or the defaults when it does not exist.
    pub fn load_default() -> Result<Self, CoreError> {
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.jobs == Some(0) {
            return Err(CoreError::Config("jobs must be at least 1".to_owned()));
        }
        if self.container_extension.is_empty()
            || self.container_extension.contains(['.', '/', '\\'])
        {
            return Err(CoreError::Config(format!(
                "invalid container extension '{}'",
                self.container_extension
            )));
        }
        Ok(())
    }

    pub fn effective_jobs(&self) -> usize {
        self.jobs
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from))
            .max(1)
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            use_uncompressed_manifests: self.use_uncompressed_manifests,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config/cbsgen/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cbsgen.toml");

        let config = Config {
            jobs: Some(4),
            unit_timeout_secs: Some(30),
            use_uncompressed_manifests: true,
            container_extension: "tar".to_owned(),
            skip_existing: false,
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.unit_timeout(), Some(Duration::from_secs(30)));
        assert!(loaded.resolver_options().use_uncompressed_manifests);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = Config::parse("jobs = 2\n").unwrap();
        assert_eq!(config.effective_jobs(), 2);
        assert_eq!(config.container_extension, "cab");
        assert!(config.skip_existing);
        assert!(config.unit_timeout().is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::parse("threads = 2\n"),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn zero_jobs_is_rejected() {
        assert!(Config::parse("jobs = 0\n").is_err());
    }

    #[test]
    fn extension_with_dot_is_rejected() {
        assert!(Config::parse("container_extension = \".cab\"\n").is_err());
    }

    #[test]
    fn effective_jobs_is_never_zero() {
        assert!(Config::default().effective_jobs() >= 1);
    }
}
