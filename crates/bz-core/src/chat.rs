//! Chat session state carried in the `chatUser` cookie, and the chat status
//! lifecycle.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{BzError, BzResult};
use crate::record::{RecordId, Table};
use crate::{now_timestamp, Document};

pub const CHAT_COOKIE_NAME: &str = "chatUser";
pub const CHAT_COOKIE_MAX_AGE_SECS: u64 = 3 * 24 * 60 * 60;

pub const GREETING_ID: &str = "admin-msg-1";
pub const GREETING_TEXT: &str = "Hello! How can I assist you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Viewed,
    Active,
    Closed,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewed => "viewed",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "viewed" => Some(Self::Viewed),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// What the widget remembers between visits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub chat_user_id: String,
    pub chat_id: String,
    pub user_email: String,
    #[serde(default)]
    pub user_name: String,
}

impl ChatSession {
    pub fn new(chat_user: &RecordId, chat: &RecordId, email: &str, name: &str) -> Self {
        Self {
            chat_user_id: chat_user.key().to_string(),
            chat_id: chat.key().to_string(),
            user_email: email.to_string(),
            user_name: name.to_string(),
        }
    }

    pub fn chat_user_ref(&self) -> BzResult<RecordId> {
        RecordId::parse_key(Table::ChatUser, &self.chat_user_id)
    }

    pub fn chat_ref(&self) -> BzResult<RecordId> {
        RecordId::parse_key(Table::Chat, &self.chat_id)
    }

    pub fn to_cookie_value(&self) -> BzResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    pub fn from_cookie_value(value: &str) -> BzResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|e| BzError::InvalidInput(format!("malformed chat cookie: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Full `Set-Cookie` header value.
    pub fn set_cookie_header(&self) -> BzResult<String> {
        Ok(format!(
            "{CHAT_COOKIE_NAME}={}; Max-Age={CHAT_COOKIE_MAX_AGE_SECS}; Path=/; SameSite=Lax",
            self.to_cookie_value()?
        ))
    }

    /// Find and decode the session in a raw `Cookie` request header.
    pub fn from_cookie_header(header: &str) -> Option<Self> {
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == CHAT_COOKIE_NAME)
            .and_then(|(_, value)| Self::from_cookie_value(value).ok())
    }
}

/// The admin greeting the widget shows ahead of the stored messages.
pub fn greeting_message() -> Document {
    let mut doc = Document::new();
    doc.insert("id".into(), json!(GREETING_ID));
    doc.insert("content".into(), json!(GREETING_TEXT));
    doc.insert("sender_id".into(), json!("admin"));
    doc.insert("created_at".into(), json!(now_timestamp()));
    doc
}
