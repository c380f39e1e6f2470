use anyhow::{bail, Context, Result};
use fin_import::{SignPolicy, SourceFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "fin.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_tags_path")]
    pub tags_path: PathBuf,
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    pub static_dir: Option<PathBuf>,
    #[serde(default)]
    pub backend: Backend,
}

/// Where `serve` finds entries and keeps tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Parse `[[sources]]` at startup; tags live in `tags_path`.
    #[default]
    Files,
    /// Entries stored by `fin import`; tags live in the database.
    Database,
}

/// One export file read at `serve` startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub invert_sign: Option<bool>,
}

fn default_tags_path() -> PathBuf {
    PathBuf::from("tags")
}

fn default_database() -> PathBuf {
    PathBuf::from("fin.db")
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            static_dir: None,
            backend: Backend::Files,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tags_path: default_tags_path(),
            database: default_database(),
            server: ServerConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl SourceConfig {
    pub fn sign(&self) -> Option<SignPolicy> {
        self.invert_sign.map(SignPolicy::from_inverted)
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or `fin.toml` in the working directory when no path is
    /// given. Only the implicit file may be absent.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG), false),
        };
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        Config::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        for source in &self.sources {
            let format = SourceFormat::from_path(&source.path);
            if format.is_none() {
                bail!("{}: unknown source format", source.path.display());
            }
            if format == Some(SourceFormat::Csv) && source.invert_sign.is_none() {
                bail!(
                    "{}: csv sources must set invert_sign explicitly",
                    source.path.display()
                );
            }
        }
        Ok(())
    }
}
