use chrono::{DateTime, NaiveDateTime};
use shared::{
    domain::{MessageId, UserId},
    protocol::{ChatMessage, PostSummary},
};

use crate::connection::ConnectionState;

const DISPLAY_FORMAT: &str = "%d %b %Y %H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRow {
    pub id: UserId,
    pub nickname: String,
    pub online: bool,
    pub unread: u32,
    pub badge: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerHeader {
    pub id: UserId,
    pub nickname: String,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: MessageId,
    pub mine: bool,
    pub author: String,
    pub text: String,
    pub image_url: Option<String>,
    pub time: String,
}

impl MessageRow {
    pub fn from_message(message: &ChatMessage, me: Option<&UserId>) -> Self {
        Self {
            id: message.id.clone(),
            mine: me == Some(&message.sender_id),
            author: message.sender_name.clone(),
            text: message.content.clone(),
            image_url: message.image_url.clone(),
            time: display_time(&message.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    pub connection: ConnectionState,
    pub presence: Vec<PresenceRow>,
    pub partner: Option<PartnerHeader>,
    pub messages: Vec<MessageRow>,
    pub exhausted: bool,
    pub loading: bool,
    pub unread_total: u32,
    pub nav_badge: Option<String>,
    pub chat_attachment: Option<String>,
    pub post_attachment: Option<String>,
    pub posts: Vec<PostSummary>,
}

/// Formats a server timestamp for display; unknown formats are shown raw.
pub fn display_time(raw: &str) -> String {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.format(DISPLAY_FORMAT).to_string();
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|parsed| parsed.format(DISPLAY_FORMAT).to_string())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
