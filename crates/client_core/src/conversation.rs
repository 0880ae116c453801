use std::collections::{HashMap, HashSet};

use shared::{
    domain::{MessageId, UserId},
    protocol::ChatMessage,
};
use tracing::debug;

use crate::pagination::ScrollDirective;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub partner: UserId,
    pub offset: usize,
    pub initial: bool,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub partner: UserId,
    pub initial: bool,
    pub received: usize,
    pub inserted: usize,
    pub exhausted: bool,
    pub scroll: ScrollDirective,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    Appended { partner: UserId },
    Duplicate,
    Unread { partner: UserId },
    Ignored,
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    ids: HashSet<MessageId>,
    pagination_offset: usize,
    exhausted: bool,
    fetch_in_flight: bool,
    epoch: u64,
}

impl Conversation {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Server offset of the next older page.
    pub fn pagination_offset(&self) -> usize {
        self.pagination_offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_fetch_in_flight(&self) -> bool {
        self.fetch_in_flight
    }

    fn reset(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.pagination_offset = 0;
        self.exhausted = false;
        self.fetch_in_flight = false;
        self.epoch += 1;
    }

    fn push_back(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        self.pagination_offset = self.messages.len();
        true
    }

    fn prepend(&mut self, page: Vec<ChatMessage>) -> usize {
        let mut merged = Vec::with_capacity(page.len() + self.messages.len());
        for message in page {
            if self.ids.insert(message.id.clone()) {
                merged.push(message);
            }
        }
        let inserted = merged.len();
        merged.append(&mut self.messages);
        self.messages = merged;
        self.pagination_offset = self.messages.len();
        inserted
    }
}

#[derive(Debug)]
pub struct ConversationStore {
    conversations: HashMap<UserId, Conversation>,
    active: Option<UserId>,
    page_size: usize,
}

impl ConversationStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            conversations: HashMap::new(),
            active: None,
            page_size: page_size.max(1),
        }
    }

    pub fn active(&self) -> Option<&UserId> {
        self.active.as_ref()
    }

    pub fn conversation(&self, partner: &UserId) -> Option<&Conversation> {
        self.conversations.get(partner)
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active
            .as_ref()
            .and_then(|partner| self.conversations.get(partner))
    }

    pub fn open(&mut self, partner: UserId) -> FetchTicket {
        let conversation = self.conversations.entry(partner.clone()).or_default();
        conversation.reset();
        conversation.fetch_in_flight = true;
        let ticket = FetchTicket {
            partner: partner.clone(),
            offset: 0,
            initial: true,
            epoch: conversation.epoch,
        };
        self.active = Some(partner);
        ticket
    }

    pub fn close(&mut self) -> Option<UserId> {
        self.active.take()
    }

    /// `None` while another fetch for this conversation is in flight, or when
    /// an older page is asked of an exhausted conversation.
    pub fn begin_fetch(
        &mut self,
        partner: &UserId,
        offset: usize,
        initial: bool,
    ) -> Option<FetchTicket> {
        let conversation = self.conversations.entry(partner.clone()).or_default();
        if conversation.fetch_in_flight {
            debug!(partner_id = %partner, offset, "history: fetch already in flight");
            return None;
        }
        if !initial && conversation.exhausted {
            return None;
        }
        conversation.fetch_in_flight = true;
        Some(FetchTicket {
            partner: partner.clone(),
            offset,
            initial,
            epoch: conversation.epoch,
        })
    }

    pub fn begin_older_fetch(&mut self) -> Option<FetchTicket> {
        let partner = self.active.clone()?;
        let offset = self.conversations.get(&partner)?.pagination_offset;
        self.begin_fetch(&partner, offset, false)
    }

    /// Applies a page to the ticket's own conversation, whichever partner is
    /// active now. `None` when the ticket belongs to an earlier open.
    pub fn complete_fetch(
        &mut self,
        ticket: &FetchTicket,
        page: Vec<ChatMessage>,
    ) -> Option<FetchOutcome> {
        let page_size = self.page_size;
        let conversation = self.conversations.get_mut(&ticket.partner)?;
        if conversation.epoch != ticket.epoch {
            debug!(
                partner_id = %ticket.partner,
                offset = ticket.offset,
                "history: discarding page for a previous open"
            );
            return None;
        }

        conversation.fetch_in_flight = false;
        let received = page.len();
        let page = normalize_page(page);
        let inserted = if ticket.initial {
            // Live messages that arrived while the first page was in flight
            // are newer than anything on it.
            let live = std::mem::take(&mut conversation.messages);
            conversation.ids.clear();
            let inserted = conversation.prepend(page);
            for message in live {
                conversation.push_back(message);
            }
            inserted
        } else {
            conversation.prepend(page)
        };
        if received < page_size {
            conversation.exhausted = true;
        }

        Some(FetchOutcome {
            partner: ticket.partner.clone(),
            initial: ticket.initial,
            received,
            inserted,
            exhausted: conversation.exhausted,
            scroll: if ticket.initial {
                ScrollDirective::ToBottom
            } else {
                ScrollDirective::PreserveFromBottom
            },
        })
    }

    pub fn abort_fetch(&mut self, ticket: &FetchTicket) -> bool {
        match self.conversations.get_mut(&ticket.partner) {
            Some(conversation) if conversation.epoch == ticket.epoch => {
                conversation.fetch_in_flight = false;
                true
            }
            _ => false,
        }
    }

    /// Routes a pushed message: appended when it belongs to the active
    /// conversation, otherwise counted as unread for its sender.
    pub fn append_live(&mut self, message: ChatMessage, me: Option<&UserId>) -> LiveOutcome {
        if let Some(partner) = self.active.clone() {
            if message.involves(&partner) && message.sender_id != message.receiver_id {
                let conversation = self.conversations.entry(partner.clone()).or_default();
                return if conversation.push_back(message) {
                    LiveOutcome::Appended { partner }
                } else {
                    LiveOutcome::Duplicate
                };
            }
        }

        if me == Some(&message.sender_id) {
            return LiveOutcome::Ignored;
        }
        let partner = message.sender_id;
        self.conversations.entry(partner.clone()).or_default();
        LiveOutcome::Unread { partner }
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.active = None;
    }
}

/// Orders a page oldest to newest, judging by its first and last timestamps.
/// A tie counts as newest-first.
pub fn normalize_page(mut page: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let ascending = match (page.first(), page.last()) {
        (Some(first), Some(last)) => first.created_at < last.created_at,
        _ => true,
    };
    if !ascending {
        page.reverse();
    }
    page
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
