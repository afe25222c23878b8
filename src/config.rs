use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::db::DEFAULT_FRESHNESS_HOURS;
use crate::error::{AppError, Result};

const APP_DIR: &str = "brevify";
const API_KEY_ENV: &str = "YOUTUBE_API_KEY";
const PORT_ENV: &str = "PORT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub youtube_api_key: Option<String>,

    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: i64,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_video_page_limit")]
    pub video_page_limit: u32,

    #[serde(default = "default_transcript_concurrency")]
    pub transcript_concurrency: usize,

    #[serde(default = "default_transcript_languages")]
    pub transcript_languages: Vec<String>,

    /// Extra or overriding prompt templates, keyed by name.
    #[serde(default)]
    pub prompt_templates: BTreeMap<String, String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("brevify.db").to_string_lossy().to_string()
}

fn default_freshness_hours() -> i64 {
    DEFAULT_FRESHNESS_HOURS
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_video_page_limit() -> u32 {
    20
}

fn default_transcript_concurrency() -> usize {
    4
}

fn default_transcript_languages() -> Vec<String> {
    vec!["en".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            youtube_api_key: None,
            freshness_hours: default_freshness_hours(),
            host: default_host(),
            port: default_port(),
            video_page_limit: default_video_page_limit(),
            transcript_concurrency: default_transcript_concurrency(),
            transcript_languages: default_transcript_languages(),
            prompt_templates: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads the config file, writing a default one on first run, then
    /// applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.youtube_api_key = Some(key.trim().to_string());
        }
        if let Some(port) = lookup(PORT_ENV).and_then(|p| p.trim().parse::<u16>().ok()) {
            self.port = port;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.freshness_hours <= 0 {
            return Err(AppError::Config(
                "freshness_hours must be positive".to_string(),
            ));
        }
        if self.transcript_concurrency == 0 {
            return Err(AppError::Config(
                "transcript_concurrency must be at least 1".to_string(),
            ));
        }
        for (name, template) in &self.prompt_templates {
            if !template.contains("{transcript}") {
                return Err(AppError::Config(format!(
                    "prompt template '{}' must contain {{transcript}}",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = toml::from_str(r#"youtube_api_key = "abc""#).unwrap();
        assert_eq!(config.youtube_api_key.as_deref(), Some("abc"));
        assert_eq!(config.freshness_hours, 24);
        assert_eq!(config.port, 8888);
        assert_eq!(config.transcript_languages, vec!["en"]);
        assert!(config.prompt_templates.is_empty());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config: Config = toml::from_str(r#"youtube_api_key = "from-file""#).unwrap();
        config.apply_env(|key| match key {
            "YOUTUBE_API_KEY" => Some("from-env".to_string()),
            "PORT" => Some("9000".to_string()),
            _ => None,
        });
        assert_eq!(config.youtube_api_key.as_deref(), Some("from-env"));
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn blank_env_key_is_ignored() {
        let mut config: Config = toml::from_str(r#"youtube_api_key = "from-file""#).unwrap();
        config.apply_env(|key| (key == "YOUTUBE_API_KEY").then(|| "  ".to_string()));
        assert_eq!(config.youtube_api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn custom_templates_need_a_transcript_slot() {
        let config: Config = toml::from_str(
            r#"
            [prompt_templates]
            tldr = "Give me the gist"
            "#,
        )
        .unwrap();
        tokio_test::assert_err!(config.validate());
    }

    #[test]
    fn load_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = tokio_test::assert_ok!(Config::load(Some(&path)));
        assert!(path.exists());
        assert_eq!(config.video_page_limit, 20);

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.db_path, config.db_path);
    }
}
