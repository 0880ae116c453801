use shared::{
    domain::{ComposeContext, UserId},
    protocol::ClientRequest,
};

use crate::{connection::ConnectionState, error::SendRejected};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub text: String,
    pub pending_attachment: Option<String>,
}

impl Composer {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.pending_attachment.is_none()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.pending_attachment = None;
    }
}

/// One composer per context, so each holds at most one pending attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeSlots {
    pub chat: Composer,
    pub post: Composer,
    chat_epoch: u64,
    post_epoch: u64,
}

impl ComposeSlots {
    pub fn get(&self, context: ComposeContext) -> &Composer {
        match context {
            ComposeContext::Chat => &self.chat,
            ComposeContext::Post => &self.post,
        }
    }

    pub fn get_mut(&mut self, context: ComposeContext) -> &mut Composer {
        match context {
            ComposeContext::Chat => &mut self.chat,
            ComposeContext::Post => &mut self.post,
        }
    }

    pub fn epoch(&self, context: ComposeContext) -> u64 {
        match context {
            ComposeContext::Chat => self.chat_epoch,
            ComposeContext::Post => self.post_epoch,
        }
    }

    /// Replaces any attachment already pending in `context`. Returns `false`
    /// and stores nothing when `context` was left since `epoch` was read.
    pub fn attach(&mut self, context: ComposeContext, epoch: u64, url: String) -> bool {
        if self.epoch(context) != epoch {
            return false;
        }
        self.get_mut(context).pending_attachment = Some(url);
        true
    }

    pub fn remove_attachment(&mut self, context: ComposeContext) -> Option<String> {
        self.get_mut(context).pending_attachment.take()
    }

    /// Drops the pending attachment of `context` along with any upload still
    /// heading for it.
    pub fn leave(&mut self, context: ComposeContext) -> Option<String> {
        match context {
            ComposeContext::Chat => self.chat_epoch += 1,
            ComposeContext::Post => self.post_epoch += 1,
        }
        self.remove_attachment(context)
    }

    pub fn clear(&mut self) {
        self.leave(ComposeContext::Chat);
        self.leave(ComposeContext::Post);
        self.chat.clear();
        self.post.clear();
    }
}

/// Validates the chat composer and builds the send command. On rejection the
/// composer is left as it was; on success it is cleared.
pub fn take_send_command(
    composer: &mut Composer,
    active_partner: Option<&UserId>,
    connection: ConnectionState,
) -> Result<ClientRequest, SendRejected> {
    if composer.is_blank() {
        return Err(SendRejected::Empty);
    }
    let Some(receiver_id) = active_partner else {
        return Err(SendRejected::NoActiveConversation);
    };
    if connection != ConnectionState::Open {
        return Err(SendRejected::NotConnected(connection));
    }

    let command = ClientRequest::SendMessage {
        receiver_id: receiver_id.clone(),
        content: composer.text.trim().to_string(),
        image_url: composer.pending_attachment.clone().unwrap_or_default(),
    };
    composer.clear();
    Ok(command)
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
