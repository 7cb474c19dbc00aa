use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::archive::RemoteArchive;
use crate::domain::Transport;
use crate::error::TabixError;
use crate::executor::RetryPolicy;
use crate::tools::ToolOverrides;

pub const CONFIG_FILE_NAME: &str = "bed-to-tabix.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub compressed: Option<bool>,
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
    #[serde(default)]
    pub tools: ToolsEntry,
    #[serde(default)]
    pub archive: Option<RemoteArchive>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ToolsEntry {
    #[serde(default)]
    pub tabix: Option<Utf8PathBuf>,
    #[serde(default)]
    pub bgzip: Option<Utf8PathBuf>,
    #[serde(default)]
    pub bcftools: Option<Utf8PathBuf>,
}

/// Values given on the command line; each one wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub concurrency: Option<usize>,
    pub unzipped: bool,
    pub transport: Option<Transport>,
    pub tools: ToolOverrides,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub concurrency: usize,
    pub compressed: bool,
    pub transport: Transport,
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
    pub tools: ToolOverrides,
    pub archive: RemoteArchive,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` if given, else the first of `./bed-to-tabix.json` and the
    /// user config file that exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Config, TabixError> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            return Ok(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TabixError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| TabixError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("bed-to-tabix").join("config.json"))
            .filter(|path| path.exists())
    }

    pub fn resolve(path: Option<&Path>, overrides: Overrides) -> Result<ResolvedConfig, TabixError> {
        Self::resolve_config(Self::load(path)?, overrides)
    }

    pub fn resolve_config(config: Config, overrides: Overrides) -> Result<ResolvedConfig, TabixError> {
        let concurrency = overrides.concurrency.or(config.concurrency).unwrap_or(6);
        if concurrency == 0 {
            return Err(TabixError::InvalidConcurrency);
        }
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: config.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            base_delay: config
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        };

        let from_file = |path: Option<Utf8PathBuf>| path.map(Utf8PathBuf::into_std_path_buf);
        let tools = ToolOverrides {
            tabix: overrides.tools.tabix.or_else(|| from_file(config.tools.tabix)),
            bgzip: overrides.tools.bgzip.or_else(|| from_file(config.tools.bgzip)),
            bcftools: overrides
                .tools
                .bcftools
                .or_else(|| from_file(config.tools.bcftools)),
        };

        Ok(ResolvedConfig {
            concurrency,
            compressed: !overrides.unzipped && config.compressed.unwrap_or(true),
            transport: overrides
                .transport
                .or(config.transport)
                .unwrap_or_default(),
            retry,
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs.unwrap_or(600)),
            tools,
            archive: config.archive.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config() {
        let resolved = ConfigLoader::resolve_config(Config::default(), Overrides::default()).unwrap();
        assert_eq!(resolved.concurrency, 6);
        assert!(resolved.compressed);
        assert_eq!(resolved.transport, Transport::Ftp);
        assert_eq!(resolved.retry.max_attempts, 3);
        assert_eq!(resolved.attempt_timeout, Duration::from_secs(600));
        assert_eq!(resolved.archive, RemoteArchive::default());
    }

    #[test]
    fn command_line_wins_over_file() {
        let config: Config = serde_json::from_str(
            r#"{
                "concurrency": 2,
                "transport": "http",
                "retry_delay_ms": 10,
                "tools": { "tabix": "/opt/htslib/bin/tabix", "bcftools": "/opt/bcftools" }
            }"#,
        )
        .unwrap();
        let overrides = Overrides {
            concurrency: Some(8),
            unzipped: true,
            transport: None,
            tools: ToolOverrides {
                bcftools: Some(PathBuf::from("/usr/local/bin/bcftools")),
                ..ToolOverrides::default()
            },
        };

        let resolved = ConfigLoader::resolve_config(config, overrides).unwrap();
        assert_eq!(resolved.concurrency, 8);
        assert!(!resolved.compressed);
        assert_eq!(resolved.transport, Transport::Http);
        assert_eq!(resolved.retry.base_delay, Duration::from_millis(10));
        assert_eq!(
            resolved.tools.tabix,
            Some(PathBuf::from("/opt/htslib/bin/tabix"))
        );
        assert_eq!(
            resolved.tools.bcftools,
            Some(PathBuf::from("/usr/local/bin/bcftools"))
        );
        assert_eq!(resolved.tools.bgzip, None);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = Config {
            concurrency: Some(0),
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::resolve_config(config, Overrides::default()),
            Err(TabixError::InvalidConcurrency)
        ));
    }
}
