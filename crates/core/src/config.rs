use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sessions: SessionConfig,
    pub files: FileConfig,
    pub policy: PolicyConfig,
    pub engine: EngineConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL used to build download links.
    pub public_base_url: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub disconnect_timeout_secs: u64,
    /// JSON file holding persisted conversation ids. In-memory when unset.
    pub conversation_store_path: Option<PathBuf>,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl FileConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// YAML capability table.
    pub path: PathBuf,
    /// JSON-lines audit log. In-memory when unset.
    pub audit_log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Worker executable spawned once per agent handle.
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub handshake_timeout_secs: u64,
    pub invoke_timeout_secs: u64,
}

impl EngineConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Wait before the single retry after an engine failure.
    pub retry_backoff_ms: u64,
}

impl OrchestratorConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
    pub filter: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AGENTRELAY_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__SERVER__PORT=3000 to server.port
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 3000,
                public_base_url: "http://localhost:3000".into(),
                allowed_origins: vec!["*".into()],
            },
            sessions: SessionConfig {
                ttl_secs: 30 * 60,
                sweep_interval_secs: 60,
                shutdown_grace_secs: 30,
                disconnect_timeout_secs: 5,
                conversation_store_path: None,
            },
            files: FileConfig {
                default_ttl_secs: 60 * 60,
                sweep_interval_secs: 60,
            },
            policy: PolicyConfig {
                path: "config/policy.yaml".into(),
                audit_log_path: None,
            },
            engine: EngineConfig {
                program: "agent-worker".into(),
                args: Vec::new(),
                working_dir: None,
                handshake_timeout_secs: 30,
                invoke_timeout_secs: 300,
            },
            orchestrator: OrchestratorConfig {
                retry_backoff_ms: 500,
            },
            logging: LoggingConfig {
                json: false,
                filter: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sessions.shutdown_grace(), Duration::from_secs(30));
        assert!(cfg.sessions.disconnect_timeout() < cfg.sessions.shutdown_grace());
        assert_eq!(cfg.files.default_ttl(), Duration::from_secs(3600));
        assert_eq!(cfg.orchestrator.retry_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let mut cfg = AppConfig::default();
        cfg.sessions.sweep_interval_secs = 0;
        cfg.files.sweep_interval_secs = 0;
        assert_eq!(cfg.sessions.sweep_interval(), Duration::from_secs(1));
        assert_eq!(cfg.files.sweep_interval(), Duration::from_secs(1));
    }
}
