use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub upstream: UpstreamSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl VigilSettings {
    /// Reject combinations the gateway cannot start with.
    pub fn validate(&self) -> Result<()> {
        let secret_missing = match self.auth.jwt_secret.as_deref() {
            Some(secret) => secret.is_empty(),
            None => true,
        };
        if secret_missing {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret (or SECRET_KEY) is required".to_string(),
            ));
        }
        if self.upstream.base_url.is_empty() {
            return Err(SettingsError::InvalidValue("upstream.baseUrl is empty".to_string()));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per socket. A full queue holds the turn back
    /// until the client catches up.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret shared with the token issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    pub leeway_secs: u64,
}

impl AuthSettings {
    pub fn secret(&self) -> Option<SecretString> {
        self.jwt_secret.clone().map(SecretString::from)
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    /// Upper bound on one whole agent turn.
    pub turn_timeout_secs: u64,
    /// Longest silence tolerated between stream chunks.
    pub idle_timeout_secs: u64,
    pub initializing_indicator: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://agent-service:8001".to_string(),
            connect_timeout_secs: 10,
            turn_timeout_secs: 120,
            idle_timeout_secs: 60,
            initializing_indicator: true,
        }
    }
}

impl UpstreamSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Relative paths resolve against `~/.vigil`.
    pub database_path: String,
    /// The agent service's checkpoint database.
    pub checkpoint_database_path: String,
    /// Seconds between orphaned-checkpoint sweeps; 0 disables the sweep.
    pub reconcile_interval_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "vigil.db".to_string(),
            checkpoint_database_path: "checkpoints.db".to_string(),
            reconcile_interval_secs: 600,
        }
    }
}

impl StorageSettings {
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0)
            .then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-target overrides, e.g. `{"vigil_relay": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            module_levels: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret() -> VigilSettings {
        let mut s = VigilSettings::default();
        s.auth.jwt_secret = Some("s3cret".into());
        s
    }

    #[test]
    fn defaults() {
        let s = VigilSettings::default();
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.server.max_send_queue, 256);
        assert_eq!(s.upstream.base_url, "http://agent-service:8001");
        assert_eq!(s.upstream.turn_timeout(), Duration::from_secs(120));
        assert!(s.upstream.initializing_indicator);
        assert_eq!(s.storage.reconcile_interval(), Some(Duration::from_secs(600)));
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn validate_requires_secret() {
        let err = VigilSettings::default().validate().unwrap_err();
        assert!(err.to_string().contains("jwtSecret"));
        assert!(with_secret().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_secret() {
        let mut s = with_secret();
        s.auth.jwt_secret = Some(String::new());
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_queue() {
        let mut s = with_secret();
        s.server.max_send_queue = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_reconcile_interval_disables_sweep() {
        let mut s = StorageSettings::default();
        s.reconcile_interval_secs = 0;
        assert_eq!(s.reconcile_interval(), None);
    }

    #[test]
    fn debug_redacts_secret() {
        let dbg = format!("{:?}", with_secret().auth);
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(VigilSettings::default()).unwrap();
        assert!(json["server"].get("maxSendQueue").is_some());
        assert!(json["upstream"].get("turnTimeoutSecs").is_some());
        assert!(json["auth"].get("jwtSecret").is_none());
    }
}
