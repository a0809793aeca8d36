// Конфигурация приложения
// По умолчанию в режиме разработки логирование подробнее

use crate::error::ConfigError;
use crate::media::MediaConstraints;
use crate::peer::state::GRACE_PERIOD;
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug"; // В режиме отладки подробные логи

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3000/ws";

/// Настройки сессии звонка
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Адрес WebSocket ретранслятора (без параметров room/user)
    pub relay_url: String,
    pub ice_servers: Vec<ServerConfig>,
    pub media: MediaConstraints,
    /// Сколько ждать восстановления ICE после Disconnected
    pub disconnect_grace_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: default_ice_servers(),
            media: MediaConstraints::default(),
            disconnect_grace_secs: GRACE_PERIOD.as_secs(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let relay = self.relay_url.trim();
        if !(relay.starts_with("ws://") || relay.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "relay_url must start with ws:// or wss://, got {:?}",
                self.relay_url
            )));
        }

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ICE server {:?} has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "TURN server {:?} requires username and credential",
                    server.id
                )));
            }
        }

        if self.media.width == 0 || self.media.height == 0 {
            return Err(ConfigError::Invalid(
                "media width and height must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }
}

/// Публичные STUN серверы, если пользователь не задал свои
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
