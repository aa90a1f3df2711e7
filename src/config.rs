//! Runtime configuration.
//!
//! Layering, lowest to highest: built-in defaults, the optional TOML file,
//! environment variables (read through `dotenvy`, so a `.env` file works),
//! then command-line overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "blog.toml";

const DEFAULT_PER_PAGE_HOME: usize = 5;
const DEFAULT_PER_PAGE_GLOBAL: usize = 10;
const DEFAULT_RESET_TOKEN_TTL_SECS: u64 = 600;
const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;
const DEFAULT_MAIL_SENDER: &str = "admin@blog.com";
const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchBackendKind {
    None,
    Tantivy,
    Elasticsearch { url: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub secret_key: Option<String>,
    pub database_path: PathBuf,
    pub search_backend: SearchBackendKind,
    pub index_dir: PathBuf,
    pub uploaded_path: PathBuf,
    pub profile_pics_path: PathBuf,
    pub per_page_home: usize,
    pub per_page_global: usize,
    pub reset_token_ttl: Duration,
    pub session_ttl: Duration,
    pub mail_sender: String,
    pub public_url: String,
    pub bind_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
}

/// Every setting as it appears in the TOML file or the environment, before
/// defaults are filled in.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    pub secret_key: Option<String>,
    pub database_path: Option<PathBuf>,
    pub search_backend: Option<String>,
    pub elasticsearch_url: Option<String>,
    pub index_dir: Option<PathBuf>,
    pub uploaded_path: Option<PathBuf>,
    pub profile_pics_path: Option<PathBuf>,
    pub per_page_home: Option<usize>,
    pub per_page_global: Option<usize>,
    pub reset_token_ttl_secs: Option<u64>,
    pub session_ttl_secs: Option<u64>,
    pub mail_sender: Option<String>,
    pub public_url: Option<String>,
    pub bind_addr: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl RawConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing config file")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Settings present in the environment.
    pub fn from_env() -> Result<Self> {
        fn text(key: &str) -> Option<String> {
            dotenvy::var(key).ok().filter(|v| !v.trim().is_empty())
        }
        fn number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
            match text(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| anyhow!("{key} must be a non-negative integer, got {v:?}")),
                None => Ok(None),
            }
        }

        Ok(Self {
            secret_key: text("SECRET_KEY"),
            database_path: text("DATABASE_PATH").map(PathBuf::from),
            search_backend: text("SEARCH_BACKEND"),
            elasticsearch_url: text("ELASTICSEARCH_URL"),
            index_dir: text("INDEX_DIR").map(PathBuf::from),
            uploaded_path: text("UPLOADED_PATH").map(PathBuf::from),
            profile_pics_path: text("PROFILE_PICS_PATH").map(PathBuf::from),
            per_page_home: number("PER_PAGE_HOME")?,
            per_page_global: number("PER_PAGE_GLOBAL")?,
            reset_token_ttl_secs: number("RESET_TOKEN_TTL_SECS")?,
            session_ttl_secs: number("SESSION_TTL_SECS")?,
            mail_sender: text("MAIL_SENDER"),
            public_url: text("PUBLIC_URL"),
            bind_addr: text("BIND_ADDR"),
            log_dir: text("BLOG_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Layer `over` on top of `self`; set values in `over` win.
    pub fn merge(self, over: RawConfig) -> Self {
        Self {
            secret_key: over.secret_key.or(self.secret_key),
            database_path: over.database_path.or(self.database_path),
            search_backend: over.search_backend.or(self.search_backend),
            elasticsearch_url: over.elasticsearch_url.or(self.elasticsearch_url),
            index_dir: over.index_dir.or(self.index_dir),
            uploaded_path: over.uploaded_path.or(self.uploaded_path),
            profile_pics_path: over.profile_pics_path.or(self.profile_pics_path),
            per_page_home: over.per_page_home.or(self.per_page_home),
            per_page_global: over.per_page_global.or(self.per_page_global),
            reset_token_ttl_secs: over.reset_token_ttl_secs.or(self.reset_token_ttl_secs),
            session_ttl_secs: over.session_ttl_secs.or(self.session_ttl_secs),
            mail_sender: over.mail_sender.or(self.mail_sender),
            public_url: over.public_url.or(self.public_url),
            bind_addr: over.bind_addr.or(self.bind_addr),
            log_dir: over.log_dir.or(self.log_dir),
        }
    }
}

impl Config {
    /// Load from `config_path` (or `<data_dir>/blog.toml` if it exists) and
    /// the environment.
    pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let file = match config_path {
            Some(path) => RawConfig::from_file(path)?,
            None => {
                let implicit = data_dir.join(CONFIG_FILE_NAME);
                if implicit.is_file() {
                    RawConfig::from_file(&implicit)?
                } else {
                    RawConfig::default()
                }
            }
        };
        let raw = file.merge(RawConfig::from_env()?);
        Self::resolve(raw, data_dir)
    }

    /// Fill defaults relative to `data_dir` and validate.
    pub fn resolve(raw: RawConfig, data_dir: PathBuf) -> Result<Self> {
        let search_backend = match (raw.search_backend.as_deref(), raw.elasticsearch_url) {
            (None, None) => SearchBackendKind::None,
            (None, Some(url)) => SearchBackendKind::Elasticsearch { url },
            (Some(kind), url) => match kind.trim().to_ascii_lowercase().as_str() {
                "none" | "off" => SearchBackendKind::None,
                "tantivy" => SearchBackendKind::Tantivy,
                "elasticsearch" | "elastic" => SearchBackendKind::Elasticsearch {
                    url: url.ok_or_else(|| {
                        anyhow!("SEARCH_BACKEND=elasticsearch needs ELASTICSEARCH_URL")
                    })?,
                },
                other => bail!("unknown search backend {other:?}"),
            },
        };

        let per_page_home = raw.per_page_home.unwrap_or(DEFAULT_PER_PAGE_HOME);
        let per_page_global = raw.per_page_global.unwrap_or(DEFAULT_PER_PAGE_GLOBAL);
        if per_page_home == 0 || per_page_global == 0 {
            bail!("page sizes must be positive");
        }

        let bind_text = raw.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        let bind_addr = bind_text
            .parse()
            .with_context(|| format!("invalid bind address {bind_text:?}"))?;

        let static_dir = data_dir.join("static");
        Ok(Self {
            secret_key: raw.secret_key,
            database_path: raw
                .database_path
                .unwrap_or_else(|| data_dir.join("blog.db")),
            search_backend,
            index_dir: raw.index_dir.unwrap_or_else(|| data_dir.join("index")),
            uploaded_path: raw
                .uploaded_path
                .unwrap_or_else(|| static_dir.join("post_images")),
            profile_pics_path: raw
                .profile_pics_path
                .unwrap_or_else(|| static_dir.join("profile_pics")),
            per_page_home,
            per_page_global,
            reset_token_ttl: Duration::from_secs(
                raw.reset_token_ttl_secs
                    .unwrap_or(DEFAULT_RESET_TOKEN_TTL_SECS),
            ),
            session_ttl: Duration::from_secs(
                raw.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS),
            ),
            mail_sender: raw
                .mail_sender
                .unwrap_or_else(|| DEFAULT_MAIL_SENDER.to_string()),
            public_url: raw
                .public_url
                .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            bind_addr,
            log_dir: raw.log_dir,
            data_dir,
        })
    }

    /// The signing secret; serving without one is refused.
    pub fn require_secret(&self) -> Result<&str> {
        match self.secret_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("SECRET_KEY is not set"),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "personal-blog", "personal-blog").map_or_else(
        || PathBuf::from(".personal-blog"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}
