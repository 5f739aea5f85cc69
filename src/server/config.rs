//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Well-known listening port for gatelink deployments.
pub const DEFAULT_PORT: u16 = 8878;

/// Default per-session deadline.
pub const SESSION_DEADLINE: Duration = Duration::from_secs(600);

/// Default interval between connection liveness probes.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Target network selecting gate and resolver endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Live network
    Production,
    /// Test network with relaxed registration
    Sandbox,
}

impl Environment {
    /// WebSocket endpoint of the gate for this environment.
    pub fn gate_url(&self) -> &'static str {
        match self {
            Environment::Production => "wss://gate.gatelink.network/rpc",
            Environment::Sandbox => "wss://gate.sandbox.gatelink.network/rpc",
        }
    }

    /// Identity-bundle resolver endpoint for this environment.
    pub fn resolver_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://resolver.gatelink.network",
            Environment::Sandbox => "https://resolver.sandbox.gatelink.network",
        }
    }
}

/// TLS credentials for the listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Runtime server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// Optional TLS credentials; plain TCP when absent
    pub tls: Option<TlsConfig>,
    /// Per-deployment project identifier
    pub project_id: Uuid,
    /// Shared secret for the session cipher
    pub shared_secret: String,
    /// Target network
    pub environment: Environment,
    /// Gate endpoint; defaults to the environment's but can be pinned
    pub gate_url: String,
    /// Gate connect timeout
    pub gate_connect_timeout: Duration,
    /// Per-session deadline
    pub session_deadline: Duration,
    /// Connection liveness probe interval
    pub ping_interval: Duration,
}

impl ServerConfig {
    /// Build a configuration with defaults for everything except the
    /// deployment identity.
    ///
    /// # Errors
    ///
    /// The project identifier must parse as a UUID; anything else is a
    /// hard failure here rather than a broken deployment later.
    pub fn new(
        project_id: &str,
        shared_secret: impl Into<String>,
        environment: Environment,
    ) -> Result<Self> {
        let project_id = Uuid::parse_str(project_id)
            .map_err(|e| Error::config(format!("project_id is not a valid UUID: {e}")))?;

        Ok(Self {
            listen_addr: "0.0.0.0".into(),
            listen_port: DEFAULT_PORT,
            tls: None,
            project_id,
            shared_secret: shared_secret.into(),
            environment,
            gate_url: environment.gate_url().into(),
            gate_connect_timeout: crate::gate::CONNECT_TIMEOUT,
            session_deadline: SESSION_DEADLINE,
            ping_interval: PING_INTERVAL,
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::config("listen_addr cannot be empty"));
        }
        if self.shared_secret.is_empty() {
            return Err(Error::config("shared_secret cannot be empty"));
        }
        if self.gate_url.is_empty() {
            return Err(Error::config("gate_url cannot be empty"));
        }
        Ok(())
    }
}

/// Configuration file format for serialization.
#[derive(Serialize, Deserialize)]
pub struct ServerConfigFile {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// Project identifier (UUID)
    pub project_id: String,
    /// Shared secret for the session cipher
    pub shared_secret: String,
    /// Target network: "production" or "sandbox"
    pub environment: Environment,
    /// Gate endpoint override (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_url: Option<String>,
    /// PEM certificate chain (optional, enables TLS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert_path: Option<PathBuf>,
    /// PEM private key (optional, required with tls_cert_path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key_path: Option<PathBuf>,
    /// Session deadline in seconds (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_deadline_secs: Option<u64>,
}

impl ServerConfigFile {
    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::new(
            &self.project_id,
            self.shared_secret.clone(),
            self.environment,
        )?;
        config.listen_addr = self.listen_addr.clone();
        config.listen_port = self.listen_port;

        if let Some(url) = &self.gate_url {
            config.gate_url = url.clone();
        }
        if let Some(secs) = self.session_deadline_secs {
            config.session_deadline = Duration::from_secs(secs);
        }

        config.tls = match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.clone(),
                key_path: key.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(Error::config(
                    "tls_cert_path and tls_key_path must be set together",
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            listen_port: config.listen_port,
            project_id: config.project_id.to_string(),
            shared_secret: config.shared_secret.clone(),
            environment: config.environment,
            gate_url: Some(config.gate_url.clone()),
            tls_cert_path: config.tls.as_ref().map(|t| t.cert_path.clone()),
            tls_key_path: config.tls.as_ref().map(|t| t.key_path.clone()),
            session_deadline_secs: Some(config.session_deadline.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = "5f64a3c2-8b1d-4e7a-9c3f-2d6e8a1b4c7d";

    #[test]
    fn test_project_id_must_be_uuid() {
        assert!(ServerConfig::new(PROJECT, "secret", Environment::Sandbox).is_ok());

        let err = ServerConfig::new("not-a-uuid", "secret", Environment::Sandbox).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_environment_selects_endpoints() {
        let config = ServerConfig::new(PROJECT, "secret", Environment::Production).unwrap();
        assert!(config.gate_url.contains("gate.gatelink.network"));

        let config = ServerConfig::new(PROJECT, "secret", Environment::Sandbox).unwrap();
        assert!(config.gate_url.contains("sandbox"));
        assert!(config.environment.resolver_url().contains("sandbox"));
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new(PROJECT, "secret", Environment::Sandbox).unwrap();
        assert_eq!(config.listen_port, DEFAULT_PORT);
        assert_eq!(config.session_deadline, Duration::from_secs(600));
        assert!(config.tls.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_roundtrip() {
        let mut config = ServerConfig::new(PROJECT, "secret", Environment::Sandbox).unwrap();
        config.gate_url = "ws://127.0.0.1:9000".into();

        let file = ServerConfigFile::from_config(&config);
        let toml_text = toml::to_string_pretty(&file).unwrap();
        let parsed: ServerConfigFile = toml::from_str(&toml_text).unwrap();
        let restored = parsed.to_config().unwrap();

        assert_eq!(restored.project_id, config.project_id);
        assert_eq!(restored.gate_url, "ws://127.0.0.1:9000");
        assert_eq!(restored.environment, Environment::Sandbox);
    }

    #[test]
    fn test_tls_paths_must_pair() {
        let file = ServerConfigFile {
            listen_addr: "0.0.0.0".into(),
            listen_port: DEFAULT_PORT,
            project_id: PROJECT.into(),
            shared_secret: "secret".into(),
            environment: Environment::Sandbox,
            gate_url: None,
            tls_cert_path: Some("cert.pem".into()),
            tls_key_path: None,
            session_deadline_secs: None,
        };
        assert!(file.to_config().is_err());
    }
}
