use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    /// Base directory for the files `cat` is allowed to reveal
    /// (`<work_dir>/funny_files/cat/<name>`). Made absolute at load time.
    pub work_dir: PathBuf,
    pub mongo: MongoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            auth: AuthConfig::default(),
            work_dir: PathBuf::from("."),
            mongo: MongoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    /// Host key files. When empty, keys are generated into the data dir.
    pub host_keys: Vec<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_address: "127.0.0.1:2022".to_string(),
            host_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Structured-line records instead of plain text.
    pub json: bool,
    /// Include a `time` field in structured-line records.
    pub timestamps: bool,
    /// Log addresses as `{host, port}` objects instead of `host:port` strings.
    pub split_host_port: bool,
    /// Emit `debug_*` events.
    pub debug: bool,
    pub metrics_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub no_auth: NoAuthPolicy,
    pub password_auth: MethodPolicy,
    pub public_key_auth: MethodPolicy,
    pub keyboard_interactive_auth: MethodPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            no_auth: NoAuthPolicy { accepted: false },
            password_auth: MethodPolicy {
                enabled: true,
                accepted: true,
            },
            public_key_auth: MethodPolicy {
                enabled: true,
                accepted: false,
            },
            keyboard_interactive_auth: MethodPolicy {
                enabled: false,
                accepted: false,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoAuthPolicy {
    pub accepted: bool,
}

impl Default for NoAuthPolicy {
    fn default() -> Self {
        NoAuthPolicy { accepted: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MethodPolicy {
    pub enabled: bool,
    pub accepted: bool,
}

impl Default for MethodPolicy {
    fn default() -> Self {
        MethodPolicy {
            enabled: true,
            accepted: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Authentication source database.
    pub auth: String,
    pub db: String,
    pub ssh_collect: String,
    pub auth_collect: String,
    pub shell_collect: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        MongoConfig {
            enable: false,
            host: "127.0.0.1".to_string(),
            port: 27017,
            user: String::new(),
            password: String::new(),
            auth: "admin".to_string(),
            db: "sshesame".to_string(),
            ssh_collect: "ssh".to_string(),
            auth_collect: "auth".to_string(),
            shell_collect: "shell".to_string(),
        }
    }
}

/// Load and validate the configuration file.
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config> {
    let mut cfg: Config = serde_yaml::from_str(content).context("failed to parse configuration")?;
    cfg.work_dir = std::path::absolute(&cfg.work_dir)
        .context("failed to get absolute path of working directory")?;
    Ok(cfg)
}

/// Holder for the current configuration snapshot. Reloads replace the whole
/// snapshot; connections capture the `Arc` once at accept time and never
/// observe a mid-connection change.
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    pub fn new(cfg: Config) -> Self {
        ConfigStore {
            current: RwLock::new(Arc::new(cfg)),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().expect("config lock poisoned").clone()
    }

    pub fn replace(&self, cfg: Config) {
        *self.current.write().expect("config lock poisoned") = Arc::new(cfg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg.server.listen_address, "127.0.0.1:2022");
        assert!(!cfg.logging.json);
        assert!(!cfg.logging.debug);
        assert!(!cfg.mongo.enable);
        assert_eq!(cfg.mongo.port, 27017);
        assert!(cfg.auth.password_auth.enabled);
        assert!(cfg.auth.password_auth.accepted);
        assert!(!cfg.auth.no_auth.accepted);
        assert!(cfg.work_dir.is_absolute());
    }

    #[test]
    fn parse_full_config() {
        let cfg = parse(
            r#"
server:
  listen_address: "0.0.0.0:22"
  host_keys:
    - /etc/sshesame/host_key_ed25519
logging:
  json: true
  timestamps: true
  split_host_port: true
  debug: true
  metrics_address: "127.0.0.1:9100"
auth:
  no_auth:
    accepted: true
  public_key_auth:
    enabled: true
    accepted: true
work_dir: /var/lib/sshesame
mongo:
  enable: true
  host: mongo.internal
  port: 27018
  user: honey
  password: pot
  auth: admin
  db: honeypot
  ssh_collect: ssh_log
  auth_collect: auth_log
  shell_collect: shell_log
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.listen_address, "0.0.0.0:22");
        assert_eq!(cfg.server.host_keys.len(), 1);
        assert!(cfg.logging.json && cfg.logging.timestamps && cfg.logging.split_host_port);
        assert_eq!(cfg.logging.metrics_address.as_deref(), Some("127.0.0.1:9100"));
        assert!(cfg.auth.no_auth.accepted);
        assert!(cfg.auth.public_key_auth.accepted);
        // Partial sections keep their defaults.
        assert!(cfg.auth.password_auth.accepted);
        assert_eq!(cfg.work_dir, PathBuf::from("/var/lib/sshesame"));
        assert!(cfg.mongo.enable);
        assert_eq!(cfg.mongo.host, "mongo.internal");
        assert_eq!(cfg.mongo.shell_collect, "shell_log");
    }

    #[test]
    fn reload_replaces_snapshot_without_touching_old_one() {
        let store = ConfigStore::new(parse("{}").unwrap());
        let before = store.snapshot();
        store.replace(parse("logging:\n  debug: true\n").unwrap());
        assert!(!before.logging.debug);
        assert!(store.snapshot().logging.debug);
    }
}
