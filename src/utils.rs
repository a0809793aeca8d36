use crate::error::ConnectError;
use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Адрес подключения к ретранслятору: комната и пользователь передаются параметрами
pub fn relay_endpoint(base: &str, room_id: &str, user_id: &str) -> Result<String, ConnectError> {
    let base = base.trim();
    if !(base.starts_with("ws://") || base.starts_with("wss://")) {
        return Err(ConnectError::InvalidUrl {
            url: base.to_string(),
            reason: "expected ws:// or wss:// scheme".to_string(),
        });
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{}{}room={}&user={}",
        base,
        separator,
        urlencoding::encode(room_id),
        urlencoding::encode(user_id)
    ))
}
