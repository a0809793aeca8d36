use thiserror::Error;

/// Ошибка получения локальных медиа (камера/микрофон).
///
/// Все варианты показываются пользователю одним классом сообщений и
/// автоматически не повторяются.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device is already in use: {0}")]
    InUse(String),

    #[error("{0}")]
    Other(String),
}

impl AcquisitionError {
    pub fn user_message(&self) -> String {
        format!("Не удалось получить доступ к камере/микрофону: {}", self)
    }
}

/// Сервер-ретранслятор недоступен
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("invalid relay url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("relay unreachable: {0}")]
    Unreachable(String),

    #[error("relay transport error: {0}")]
    Transport(String),
}

impl ConnectError {
    pub fn user_message(&self) -> String {
        format!("Не удалось подключиться к серверу: {}", self)
    }
}

/// Ошибка SDP/ICE согласования. Не повторяется: нужен leave + повторный join.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("failed to create peer connection: {0}")]
    PeerCreation(String),

    #[error("failed to attach local tracks: {0}")]
    Tracks(String),

    #[error("SDP error: {0}")]
    Sdp(String),

    #[error("ICE connection failed")]
    IceFailed,

    #[error("peer connection lost")]
    Disconnected,
}

impl NegotiationError {
    pub fn user_message(&self) -> String {
        match self {
            NegotiationError::IceFailed | NegotiationError::Disconnected => {
                "Соединение с собеседником потеряно".to_string()
            }
            other => format!("Ошибка установления соединения: {}", other),
        }
    }
}

/// Некорректное входящее сообщение. Никогда не покидает модуль signaling.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid control message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
