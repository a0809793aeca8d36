use crate::media::LocalStream;
use crate::peer::types::RemoteStream;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Статус сессии звонка
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Idle,
    AwaitingMedia,
    Connecting,
    Connected,
    Failed,
}

/// Состояние переключателей камеры и микрофона
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaToggles {
    pub camera_enabled: bool,
    pub microphone_enabled: bool,
}

impl Default for MediaToggles {
    fn default() -> Self {
        Self {
            camera_enabled: true,
            microphone_enabled: true,
        }
    }
}

/// Состояние сессии. Принадлежит контроллеру; наружу отдаётся только
/// [`SessionSnapshot`].
#[derive(Debug, Default)]
pub struct Session {
    pub room_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub local_stream: Option<LocalStream>,
    pub remote_stream: Option<RemoteStream>,
    pub media_toggles: MediaToggles,
    pub joined_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Останавливает локальные треки и возвращает сессию в исходное
    /// состояние. Сообщение об ошибке сохраняется.
    pub fn clear(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            stream.stop();
        }
        let error_message = self.error_message.take();
        *self = Session {
            error_message,
            ..Session::default()
        };
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            room_id: self.room_id.clone(),
            user_id: self.user_id.clone(),
            status: self.status,
            error_message: self.error_message.clone(),
            has_local_media: self.local_stream.is_some(),
            remote_stream: self.remote_stream.clone(),
            media_toggles: self.media_toggles,
            joined_at: self.joined_at,
        }
    }
}

/// Неизменяемый снимок сессии для наблюдателей
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub room_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub has_local_media: bool,
    pub remote_stream: Option<RemoteStream>,
    pub media_toggles: MediaToggles,
    pub joined_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn has_remote_media(&self) -> bool {
        self.remote_stream.is_some()
    }
}
