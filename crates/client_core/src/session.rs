use shared::{
    domain::{ComposeContext, PostId, UserId},
    protocol::{AccountSummary, ChatMessage, ClientRequest, PostSummary, UserPresence, VoteUpdate},
};
use tracing::{debug, info};

use crate::{
    config::ClientSettings,
    connection::ConnectionManager,
    conversation::{ConversationStore, FetchOutcome, FetchTicket, LiveOutcome},
    dispatcher::{take_send_command, ComposeSlots},
    error::SendRejected,
    feed::PostFeed,
    pagination::{PaginationTrigger, TriggerGuards, Viewport},
    presence::{badge_label, PresenceTracker},
    router::EventHandler,
    view::{ChatView, MessageRow, PartnerHeader, PresenceRow},
};

/// Proof of a logged-in session. Without it the client never connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMarker {
    pub token: String,
    pub account: AccountSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEffect {
    PresenceUpdated { active_online: Option<bool> },
    MessageAppended { partner: UserId },
    MessageDuplicate,
    UnreadChanged { partner: UserId, count: u32, total: u32 },
    PostAdded { post_id: PostId },
    VotesUpdated { post_id: PostId },
    TeardownRequested { reason: Option<String> },
    Ignored,
}

#[derive(Debug)]
pub struct ChatSession {
    marker: Option<SessionMarker>,
    pub connection: ConnectionManager,
    pub conversations: ConversationStore,
    pub presence: PresenceTracker,
    pub trigger: PaginationTrigger,
    pub compose: ComposeSlots,
    pub feed: PostFeed,
    active_partner: Option<UserPresence>,
}

impl ChatSession {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            marker: None,
            connection: ConnectionManager::new(settings.reconnect_delay),
            conversations: ConversationStore::new(settings.history_page_size),
            presence: PresenceTracker::default(),
            trigger: PaginationTrigger::default(),
            compose: ComposeSlots::default(),
            feed: PostFeed::default(),
            active_partner: None,
        }
    }

    pub fn marker(&self) -> Option<&SessionMarker> {
        self.marker.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.marker.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.marker.as_ref().map(|marker| marker.token.as_str())
    }

    pub fn me(&self) -> Option<&UserId> {
        self.marker.as_ref().map(|marker| &marker.account.id)
    }

    pub fn active_partner(&self) -> Option<&UserPresence> {
        self.active_partner.as_ref()
    }

    pub fn begin(&mut self, marker: SessionMarker) {
        self.clear_stores();
        self.connection.resume();
        info!(user_id = %marker.account.id, "session: started");
        self.marker = Some(marker);
    }

    /// Drops the session marker and all session state. Returns the released
    /// connection generation.
    pub fn teardown(&mut self) -> u64 {
        let released = self.connection.teardown();
        self.marker = None;
        self.clear_stores();
        released
    }

    fn clear_stores(&mut self) {
        self.conversations.clear();
        self.presence.clear();
        self.trigger.disarm();
        self.compose.clear();
        self.feed.clear();
        self.active_partner = None;
    }

    pub fn open_conversation(&mut self, partner: UserPresence) -> FetchTicket {
        let partner = self
            .presence
            .get(&partner.id)
            .cloned()
            .unwrap_or(partner);
        self.presence.reset_unread(&partner.id);
        self.compose.leave(ComposeContext::Chat);
        let ticket = self.conversations.open(partner.id.clone());
        self.trigger.rearm();
        debug!(partner_id = %partner.id, "conversation: opened");
        self.active_partner = Some(partner);
        ticket
    }

    pub fn close_conversation(&mut self) -> Option<UserId> {
        self.trigger.disarm();
        self.compose.leave(ComposeContext::Chat);
        self.active_partner = None;
        self.conversations.close()
    }

    /// Hiding the feed leaves the post context.
    pub fn set_feed_visible(&mut self, visible: bool) {
        self.feed.set_visible(visible);
        if !visible {
            self.compose.leave(ComposeContext::Post);
        }
    }

    pub fn on_top_edge_visible(&mut self, viewport: &Viewport) -> Option<FetchTicket> {
        let guards = match self.conversations.active_conversation() {
            Some(conversation) => TriggerGuards {
                conversation_active: true,
                fetch_in_flight: conversation.is_fetch_in_flight(),
                exhausted: conversation.is_exhausted(),
            },
            None => TriggerGuards {
                conversation_active: false,
                fetch_in_flight: false,
                exhausted: false,
            },
        };
        if !self.trigger.should_fire(true, guards, viewport) {
            return None;
        }
        self.conversations.begin_older_fetch()
    }

    pub fn layout_settled(&mut self) -> bool {
        self.trigger.layout_settled()
    }

    pub fn complete_fetch(
        &mut self,
        ticket: &FetchTicket,
        page: Vec<ChatMessage>,
    ) -> Option<FetchOutcome> {
        let outcome = self.conversations.complete_fetch(ticket, page)?;
        if outcome.initial && self.conversations.active() == Some(&outcome.partner) {
            self.trigger.initial_batch_loaded();
        }
        Some(outcome)
    }

    pub fn abort_fetch(&mut self, ticket: &FetchTicket) -> bool {
        self.conversations.abort_fetch(ticket)
    }

    pub fn take_send_command(&mut self) -> Result<ClientRequest, SendRejected> {
        let state = self.connection.state();
        let partner = self.active_partner.as_ref().map(|partner| &partner.id);
        take_send_command(&mut self.compose.chat, partner, state)
    }

    pub fn view(&self) -> ChatView {
        let me = self.me();
        let active_id = self.active_partner.as_ref().map(|partner| &partner.id);
        let presence = self
            .presence
            .ordered()
            .map(|user| {
                let unread = self.presence.unread(&user.id);
                PresenceRow {
                    id: user.id.clone(),
                    nickname: user.nickname.clone(),
                    online: user.online,
                    unread,
                    badge: badge_label(unread),
                    active: active_id == Some(&user.id),
                }
            })
            .collect();
        let conversation = self.conversations.active_conversation();
        let unread_total = self.presence.unread_total();

        ChatView {
            connection: self.connection.state(),
            presence,
            partner: self.active_partner.as_ref().map(|partner| PartnerHeader {
                id: partner.id.clone(),
                nickname: partner.nickname.clone(),
                online: partner.online,
            }),
            messages: conversation
                .map(|c| {
                    c.messages()
                        .iter()
                        .map(|message| MessageRow::from_message(message, me))
                        .collect()
                })
                .unwrap_or_default(),
            exhausted: conversation.is_some_and(|c| c.is_exhausted()),
            loading: conversation.is_some_and(|c| c.is_fetch_in_flight()),
            unread_total,
            nav_badge: badge_label(unread_total),
            chat_attachment: self.compose.chat.pending_attachment.clone(),
            post_attachment: self.compose.post.pending_attachment.clone(),
            posts: self.feed.posts().to_vec(),
        }
    }
}

impl EventHandler for ChatSession {
    type Output = RouteEffect;

    fn on_user_list(&mut self, users: Vec<UserPresence>) -> RouteEffect {
        let active = self.active_partner.as_ref().map(|partner| partner.id.clone());
        let active_online = self.presence.replace_snapshot(users, active.as_ref());
        if let (Some(online), Some(partner)) = (active_online, self.active_partner.as_mut()) {
            partner.online = online;
        }
        RouteEffect::PresenceUpdated { active_online }
    }

    fn on_new_message(&mut self, message: ChatMessage) -> RouteEffect {
        let me = self.marker.as_ref().map(|marker| marker.account.id.clone());
        match self.conversations.append_live(message, me.as_ref()) {
            LiveOutcome::Appended { partner } => RouteEffect::MessageAppended { partner },
            LiveOutcome::Duplicate => RouteEffect::MessageDuplicate,
            LiveOutcome::Unread { partner } => {
                let count = self.presence.increment_unread(&partner);
                RouteEffect::UnreadChanged {
                    partner,
                    count,
                    total: self.presence.unread_total(),
                }
            }
            LiveOutcome::Ignored => RouteEffect::Ignored,
        }
    }

    fn on_new_post(&mut self, post: PostSummary) -> RouteEffect {
        let post_id = post.id.clone();
        let me = self.marker.as_ref().map(|marker| &marker.account.id);
        if self.feed.apply_new_post(post, me) {
            RouteEffect::PostAdded { post_id }
        } else {
            RouteEffect::Ignored
        }
    }

    fn on_vote_update(&mut self, update: VoteUpdate) -> RouteEffect {
        if self.feed.apply_vote_update(&update) {
            RouteEffect::VotesUpdated {
                post_id: update.post_id,
            }
        } else {
            RouteEffect::Ignored
        }
    }

    fn on_force_logout(&mut self, reason: Option<String>) -> RouteEffect {
        RouteEffect::TeardownRequested { reason }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
