//! Configuration manager for mailconfirm.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_PORT: u16 = 5000;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public base URL, used to build confirmation links.
    pub url: String,
    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to login sessions.
    #[serde(default, skip_serializing)]
    pub session: Session,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            url: DEFAULT_URL.to_owned(),
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            argon2: None,
            mail: None,
            session: Session::default(),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing, in KiB.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Mail relay configuration.
///
/// Confirmation emails are published on a RabbitMQ queue and delivered by an
/// external mailer.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
}

/// Session cookie configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Name of the cookie carrying the session token.
    pub cookie_name: String,
    /// Lifetime of a session, in hours.
    pub lifetime_hours: i64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            cookie_name: "session".into(),
            lifetime_hours: 24 * 7,
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Instance version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies the `PORT` environment variable.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        self.read_with_port(std::env::var("PORT").ok())
    }

    /// Same as [`Configuration::read`] with an explicit port override.
    ///
    /// The override also applies to the fallback configuration.
    fn read_with_port(
        self,
        port: Option<String>,
    ) -> Result<Arc<Self>, url::ParseError> {
        let mut config = self.load()?;

        if let Some(port) = port.and_then(|p| p.parse().ok()) {
            config.port = port;
        }

        Ok(Arc::new(config))
    }

    fn load(self) -> Result<Self, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let file = match File::open(file_path) {
            Ok(file) => file,
            Err(err) => return Ok(self.error(err)),
        };

        let mut config: Configuration = match serde_yaml::from_reader(file) {
            Ok(config) => config,
            Err(err) => return Ok(self.error(err)),
        };
        config.version = VERSION.to_owned();
        config.url = self.normalize_url(&config.url)?;

        Ok(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        let config = Configuration::default();

        assert_eq!(
            config.normalize_url("example.com").unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            config.normalize_url("http://127.0.0.1:5000").unwrap(),
            "http://127.0.0.1:5000/"
        );
        assert!(config.normalize_url("http://").is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
name: test
url: accounts.example.com
postgres:
  address: localhost:5432
session:
  cookie_name: sid
  lifetime_hours: 1
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.name, "test");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.postgres.unwrap().address, "localhost:5432");
        assert_eq!(config.session.cookie_name, "sid");
        assert!(config.mail.is_none());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/config.yaml"))
            .read()
            .unwrap();

        assert_eq!(config.version(), VERSION);
        assert_eq!(config.session, Session::default());
    }

    #[test]
    fn test_port_override() {
        let missing = PathBuf::from("/nonexistent/config.yaml");

        let config = Configuration::default()
            .path(missing.clone())
            .read_with_port(Some("8123".into()))
            .unwrap();
        assert_eq!(config.port, 8123);

        let config = Configuration::default()
            .path(missing)
            .read_with_port(Some("not a port".into()))
            .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_port_override_on_file() {
        let path = std::env::temp_dir()
            .join(format!("mailconfirm-{}.yaml", std::process::id()));
        std::fs::write(&path, "name: test\nurl: example.com\nport: 7000\n")
            .unwrap();

        let config = Configuration::default()
            .path(path.clone())
            .read_with_port(None)
            .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.url, "https://example.com/");

        let config = Configuration::default()
            .path(path.clone())
            .read_with_port(Some("8123".into()))
            .unwrap();
        assert_eq!(config.port, 8123);

        std::fs::remove_file(path).unwrap();
    }
}
