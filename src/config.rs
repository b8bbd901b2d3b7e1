// Конфигурация приложения
// Логирование по умолчанию включено только в режиме разработки

use crate::error::{LinkError, Result};
use crate::peer::types::ServerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

/// Переменная окружения с путём к JSON-конфигу
pub const CONFIG_ENV: &str = "CAMLINK_CONFIG";

/// Runtime settings of the link engine. Every duration is stored in
/// milliseconds so the JSON form stays flat.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub heartbeat_interval_ms: u64,
    pub liveness_window_ms: u64,
    pub liveness_check_interval_ms: u64,
    pub slice_duration_ms: u64,
    pub min_chunk_bytes: usize,
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub recorder_stop_timeout_ms: u64,
    pub remote_write_timeout_ms: u64,
    pub archive_path: PathBuf,
    pub logging_enabled: bool,
    pub ice_servers: Vec<ServerConfig>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            liveness_window_ms: 15_000,
            liveness_check_interval_ms: 1_000,
            slice_duration_ms: 30_000,
            min_chunk_bytes: 10_000,
            max_reconnect_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            recorder_stop_timeout_ms: 5_000,
            remote_write_timeout_ms: 5_000,
            archive_path: PathBuf::from("camlink.db"),
            logging_enabled: LOGGING_ENABLED,
            ice_servers: default_ice_servers(),
        }
    }
}

impl LinkConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: LinkConfig = serde_json::from_str(raw)
            .map_err(|e| LinkError::Config(format!("cannot parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Берём путь из `CAMLINK_CONFIG`, иначе значения по умолчанию
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_reconnect_attempts == 0 {
            return Err(LinkError::Config(
                "max_reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.slice_duration_ms == 0 {
            return Err(LinkError::Config("slice_duration_ms must be positive".into()));
        }
        if self.liveness_check_interval_ms == 0 {
            return Err(LinkError::Config(
                "liveness_check_interval_ms must be positive".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_interval_ms >= self.liveness_window_ms
        {
            return Err(LinkError::Config(format!(
                "heartbeat interval {}ms must be shorter than the liveness window {}ms",
                self.heartbeat_interval_ms, self.liveness_window_ms
            )));
        }

        // Валидация серверов
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(LinkError::Config(format!(
                    "ICE server '{}' has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(LinkError::Config(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms)
    }

    pub fn slice_duration(&self) -> Duration {
        Duration::from_millis(self.slice_duration_ms)
    }

    pub fn recorder_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.recorder_stop_timeout_ms)
    }

    pub fn remote_write_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_write_timeout_ms)
    }
}

/// Дефолтные STUN-серверы
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
