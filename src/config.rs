//! Configuration loader and validator for the regeneration and migration pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub site: Site,
    pub regenerate: Regenerate,
    pub migrate: Migrate,
    pub disqus: Disqus,
    #[serde(default)]
    pub deploy: Deploy,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    /// Deployment version id; falls back to `PRESSLINE_VERSION_ID`, then the crate version.
    #[serde(default)]
    pub version_id: Option<String>,
}

/// Public site settings used by generators and the importer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub host: String,
    pub title: String,
    pub post_path_format: String,
    pub summary_length: usize,
    pub posts_per_page: u32,
    #[serde(default)]
    pub google_site_verification: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Regenerate {
    pub batch_size: u32,
    /// Re-save each scanned entity with a fresh `last_regenerated_at`.
    #[serde(default = "default_true")]
    pub write_back: bool,
    /// Completed regeneration tasks older than this are deleted when a run finishes.
    #[serde(default = "default_task_retention_hours")]
    pub task_retention_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Migrate {
    pub batch_size: usize,
}

/// Remote commenting service credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Disqus {
    pub user_api_key: String,
    pub forum_name: String,
    #[serde(default = "default_disqus_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deploy {
    #[serde(default)]
    pub static_pages: Vec<StaticPage>,
}

/// A file published verbatim at `path` on every new deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticPage {
    pub path: String,
    pub source: String,
    pub content_type: String,
    #[serde(default)]
    pub indexed: bool,
}

fn default_true() -> bool {
    true
}

fn default_task_retention_hours() -> u64 {
    24
}

fn default_disqus_api_base() -> String {
    "http://disqus.com/api/".to_string()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Deployment version id used to key deploy markers.
    pub fn version_id(&self) -> String {
        self.app
            .version_id
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| std::env::var("PRESSLINE_VERSION_ID").ok())
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/pressline.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if cfg.site.host.trim().is_empty() {
        return Err(ConfigError::Invalid("site.host must be non-empty"));
    }
    if !cfg.site.post_path_format.contains("{slug}") {
        return Err(ConfigError::Invalid(
            "site.post_path_format must contain {slug}",
        ));
    }
    if cfg.site.posts_per_page == 0 {
        return Err(ConfigError::Invalid("site.posts_per_page must be > 0"));
    }

    if cfg.regenerate.batch_size == 0 {
        return Err(ConfigError::Invalid("regenerate.batch_size must be > 0"));
    }
    if cfg.migrate.batch_size == 0 {
        return Err(ConfigError::Invalid("migrate.batch_size must be > 0"));
    }

    if cfg.disqus.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("disqus.api_base must be non-empty"));
    }

    for page in &cfg.deploy.static_pages {
        if !page.path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "deploy.static_pages[].path must start with /",
            ));
        }
        if page.source.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "deploy.static_pages[].source must be non-empty",
            ));
        }
    }

    Ok(())
}

/// Returns the canonical example YAML.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 60

site:
  host: "blog.example.com"
  title: "Example Blog"
  post_path_format: "/{year}/{month}/{slug}"
  summary_length: 200
  posts_per_page: 5
  google_site_verification: null

regenerate:
  batch_size: 50
  write_back: true
  task_retention_hours: 24

migrate:
  batch_size: 20

disqus:
  user_api_key: "YOUR_DISQUS_USER_API_KEY"
  forum_name: "example"
  api_base: "http://disqus.com/api/"

deploy:
  static_pages:
    - path: "/robots.txt"
      source: "static/robots.txt"
      content_type: "text/plain"
      indexed: false
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert!(cfg.regenerate.write_back);
        assert_eq!(cfg.deploy.static_pages.len(), 1);
    }

    #[test]
    fn invalid_host() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.site.host = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("site.host")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_batch_sizes() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.regenerate.batch_size = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("regenerate.batch_size")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.migrate.batch_size = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn path_format_needs_slug() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.site.post_path_format = "/{year}/{month}".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn static_pages_need_absolute_paths() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.deploy.static_pages[0].path = "robots.txt".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn write_back_defaults_on() {
        let yaml = example().replace("  write_back: true\n", "");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.regenerate.write_back);
    }

    #[test]
    fn task_retention_defaults_to_a_day() {
        let yaml = example().replace("  task_retention_hours: 24\n", "");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.regenerate.task_retention_hours, 24);
    }

    #[test]
    fn explicit_version_id_wins() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.version_id = Some("42-3".into());
        assert_eq!(cfg.version_id(), "42-3");
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.site.host, "blog.example.com");
        assert_eq!(cfg.migrate.batch_size, 20);
    }
}
