use serde::de::DeserializeOwned;
use shared::protocol::{ChatMessage, Envelope, PostSummary, UserPresence, VoteUpdate};
use tracing::debug;

use crate::error::DecodeError;

pub const USER_LIST: &str = "user_list";
pub const NEW_MESSAGE: &str = "new_message";
pub const NEW_POST: &str = "new_post";
pub const VOTE_UPDATE: &str = "vote_update";
pub const FORCE_LOGOUT: &str = "force_logout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    UserList(Vec<UserPresence>),
    NewMessage(ChatMessage),
    NewPost(PostSummary),
    VoteUpdate(VoteUpdate),
    ForceLogout { reason: Option<String> },
}

pub trait EventHandler {
    type Output;

    fn on_user_list(&mut self, users: Vec<UserPresence>) -> Self::Output;
    fn on_new_message(&mut self, message: ChatMessage) -> Self::Output;
    fn on_new_post(&mut self, post: PostSummary) -> Self::Output;
    fn on_vote_update(&mut self, update: VoteUpdate) -> Self::Output;
    fn on_force_logout(&mut self, reason: Option<String>) -> Self::Output;
}

/// `Ok(None)` means the tag is not one this client knows about.
pub fn decode_frame(raw: &str) -> Result<Option<ServerEvent>, DecodeError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(DecodeError::Envelope)?;
    decode_envelope(envelope)
}

pub fn decode_envelope(envelope: Envelope) -> Result<Option<ServerEvent>, DecodeError> {
    let Envelope { kind, payload } = envelope;
    let event = match kind.as_str() {
        // An empty list is marshalled as `null` by the server.
        USER_LIST if payload.is_null() => ServerEvent::UserList(Vec::new()),
        USER_LIST => ServerEvent::UserList(payload_as(&kind, payload)?),
        NEW_MESSAGE => ServerEvent::NewMessage(payload_as(&kind, payload)?),
        NEW_POST => ServerEvent::NewPost(payload_as(&kind, payload)?),
        VOTE_UPDATE => ServerEvent::VoteUpdate(payload_as(&kind, payload)?),
        FORCE_LOGOUT => ServerEvent::ForceLogout {
            reason: payload.as_str().map(str::to_string),
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn payload_as<T: DeserializeOwned>(kind: &str, payload: serde_json::Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

pub fn dispatch<H: EventHandler>(handler: &mut H, event: ServerEvent) -> H::Output {
    match event {
        ServerEvent::UserList(users) => handler.on_user_list(users),
        ServerEvent::NewMessage(message) => handler.on_new_message(message),
        ServerEvent::NewPost(post) => handler.on_new_post(post),
        ServerEvent::VoteUpdate(update) => handler.on_vote_update(update),
        ServerEvent::ForceLogout { reason } => handler.on_force_logout(reason),
    }
}

/// Malformed frames and unknown tags are dropped without touching the handler.
pub fn route_frame<H: EventHandler>(handler: &mut H, raw: &str) -> Option<H::Output> {
    match decode_frame(raw) {
        Ok(Some(event)) => Some(dispatch(handler, event)),
        Ok(None) => {
            debug!("push: ignoring envelope with unknown type");
            None
        }
        Err(err) => {
            debug!("push: dropping malformed frame: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
