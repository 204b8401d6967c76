use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db::{Database, User};
use crate::error::{Error, Result};

const CONFIG_FILE_NAME: &str = ".gatorconfig.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// sqlx connection string, e.g. `sqlite:gator.db?mode=rwc`
    #[serde(default)]
    pub db_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|err| match err {
            Error::ConfigParse { source, .. } => Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate config from a JSON string (useful for testing)
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(content).map_err(|source| Error::ConfigParse {
                path: PathBuf::new(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.db_url.trim().is_empty() {
            return Err(Error::Config("db_url is required".to_string()));
        }
        Ok(())
    }

    /// `~/.gatorconfig.json`, or the working directory when no home directory is known.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }
}

/// Per-invocation context handed to command handlers.
///
/// The config is read once when the session is opened. The only writes back to
/// disk happen through [`Session::set_user`].
#[derive(Debug)]
pub struct Session {
    config: Config,
    path: PathBuf,
}

impl Session {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Self { config, path })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn current_user_name(&self) -> Option<&str> {
        self.config.current_user_name.as_deref()
    }

    pub fn set_user(&mut self, name: &str) -> Result<()> {
        self.config.current_user_name = Some(name.to_string());
        self.config.save(&self.path)
    }

    /// Resolve the logged-in user, failing if nobody is logged in or the
    /// recorded user has since been removed from storage.
    pub async fn current_user(&self, db: &Database) -> Result<User> {
        let name = self.current_user_name().ok_or_else(|| {
            Error::Auth("you must be logged in to perform this action".to_string())
        })?;
        db.get_user_by_name(name)
            .await?
            .ok_or_else(|| Error::Auth(format!("user '{}' not found in the database", name)))
    }
}
