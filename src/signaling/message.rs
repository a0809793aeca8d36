use crate::error::ParseError;
use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

/// Управляющее сообщение, которым участники комнаты обмениваются через ретранслятор.
///
/// `sender` проставляет клиент; ретранслятор может его перезаписать.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Участник вошёл в комнату
    Join { sender: String },

    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        data: SessionDescription,
    },

    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        data: SessionDescription,
    },

    Candidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        data: IceCandidate,
    },

    /// Ретранслятор сообщает, что участник отключился
    Leave { sender: String },
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn join(sender: &str) -> Self {
        ControlMessage::Join {
            sender: sender.to_string(),
        }
    }

    pub fn offer(sender: &str, data: SessionDescription) -> Self {
        ControlMessage::Offer {
            sender: Some(sender.to_string()),
            data,
        }
    }

    pub fn answer(sender: &str, data: SessionDescription) -> Self {
        ControlMessage::Answer {
            sender: Some(sender.to_string()),
            data,
        }
    }

    pub fn candidate(sender: &str, data: IceCandidate) -> Self {
        ControlMessage::Candidate {
            sender: Some(sender.to_string()),
            data,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            ControlMessage::Join { sender } | ControlMessage::Leave { sender } => Some(sender),
            ControlMessage::Offer { sender, .. }
            | ControlMessage::Answer { sender, .. }
            | ControlMessage::Candidate { sender, .. } => sender.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Join { .. } => "join",
            ControlMessage::Offer { .. } => "offer",
            ControlMessage::Answer { .. } => "answer",
            ControlMessage::Candidate { .. } => "candidate",
            ControlMessage::Leave { .. } => "leave",
        }
    }
}
