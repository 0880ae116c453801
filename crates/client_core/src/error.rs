use thiserror::Error;

use crate::connection::ConnectionState;

/// A push frame that could not be turned into a server event. Always dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not a valid envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("invalid `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Local validation failures of an outbound send. No network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("message has neither text nor an attachment")]
    Empty,
    #[error("no conversation is active")]
    NoActiveConversation,
    #[error("push connection is {0:?}, not open")]
    NotConnected(ConnectionState),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not logged in: missing session token")]
    NotLoggedIn,
    #[error("server did not issue a session token")]
    MissingToken,
}
