use std::sync::Arc;

use anyhow::Result;
use shared::{
    domain::{CommentId, ComposeContext, PostId, UserId, VoteValue},
    protocol::{
        AccountSummary, Comment, NewCommentRequest, NewPostRequest, PostQuery, PostSummary,
        UserPresence, VoteRequest, VoteSummary,
    },
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

pub mod api;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod pagination;
pub mod presence;
pub mod router;
pub mod session;
pub mod transport;
pub mod view;

pub use api::{ChatApi, HttpChatApi, ImageUpload};
pub use config::ClientSettings;
pub use connection::{CloseDecision, CloseReason, ConnectionState, ReconnectPlan};
pub use conversation::FetchOutcome;
pub use error::{SendRejected, SessionError};
pub use pagination::{ScrollDirective, Viewport};
pub use session::{ChatSession, RouteEffect, SessionMarker};
pub use transport::{PushChannel, PushConnector, TransportEvent, WebSocketConnector};
pub use view::ChatView;

use config::{push_endpoint, redacted_endpoint};
use conversation::FetchTicket;
use router::route_frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionChanged(ConnectionState),
    PresenceUpdated {
        active_online: Option<bool>,
    },
    ConversationUpdated {
        partner: UserId,
    },
    HistoryLoaded {
        partner: UserId,
        inserted: usize,
        exhausted: bool,
        scroll: ScrollDirective,
    },
    UnreadChanged {
        partner: UserId,
        count: u32,
        total: u32,
    },
    PostAdded {
        post_id: PostId,
    },
    PostRemoved {
        post_id: PostId,
    },
    VotesUpdated {
        post_id: PostId,
    },
    LoggedOut {
        reason: Option<String>,
    },
    Error(String),
}

/// The live socket owned by the client. Dropping it closes the socket.
struct PushLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
}

pub struct ClientState {
    pub session: ChatSession,
    link: Option<PushLink>,
}

pub struct ChatClient {
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn PushConnector>,
    settings: ClientSettings,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(settings: ClientSettings) -> Arc<Self> {
        let api = Arc::new(HttpChatApi::new(settings.server_url.clone()));
        Self::new_with_dependencies(settings, api, Arc::new(WebSocketConnector))
    }

    pub fn new_with_dependencies(
        settings: ClientSettings,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn PushConnector>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Arc::new(Self {
            api,
            connector,
            inner: Mutex::new(ClientState {
                session: ChatSession::new(&settings),
                link: None,
            }),
            settings,
            events,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub async fn view(&self) -> ChatView {
        self.inner.lock().await.session.view()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.session.connection.state()
    }

    pub async fn account(&self) -> Option<AccountSummary> {
        let guard = self.inner.lock().await;
        guard.session.marker().map(|marker| marker.account.clone())
    }

    pub async fn find_user(&self, nickname: &str) -> Option<UserPresence> {
        let guard = self.inner.lock().await;
        guard.session.presence.find_by_nickname(nickname).cloned()
    }

    async fn token(&self) -> Result<String> {
        let guard = self.inner.lock().await;
        let token = guard.session.token().ok_or(SessionError::NotLoggedIn)?;
        Ok(token.to_string())
    }

    pub async fn login(self: &Arc<Self>, identifier: &str, password: &str) -> Result<AccountSummary> {
        let response = self.api.login(identifier, password).await?;
        if response.token.is_empty() {
            return Err(SessionError::MissingToken.into());
        }
        let account = response.user.clone();
        self.restore(SessionMarker {
            token: response.token,
            account: response.user,
        })
        .await?;
        info!(user_id = %account.id, nickname = %account.nickname, "session: logged in");
        Ok(account)
    }

    pub async fn restore(self: &Arc<Self>, marker: SessionMarker) -> Result<()> {
        let previous = {
            let mut guard = self.inner.lock().await;
            let previous = guard.link.take();
            if guard.session.has_session() {
                guard.session.teardown();
            }
            guard.session.begin(marker);
            previous
        };
        drop(previous);
        self.connect().await?;
        Ok(())
    }

    /// Explicit logout. Server errors are ignored; local teardown always
    /// happens. A no-op without a session.
    pub async fn logout(self: &Arc<Self>) {
        let token = {
            let guard = self.inner.lock().await;
            guard.session.token().map(str::to_string)
        };
        let Some(token) = token else {
            return;
        };
        self.teardown(None).await;
        if let Err(err) = self.api.logout(&token).await {
            warn!("session: logout request failed: {err:#}");
        }
    }

    /// Releases the owned socket before it closes so its close event is
    /// ignored, then clears the session.
    async fn teardown(&self, reason: Option<String>) {
        let link = {
            let mut guard = self.inner.lock().await;
            let link = guard.link.take();
            let released = guard.session.teardown();
            debug!(released, "push: connection released");
            link
        };
        drop(link);
        info!(reason = reason.as_deref().unwrap_or(""), "session: torn down");
        self.emit(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
        self.emit(ClientEvent::LoggedOut { reason });
    }

    pub async fn connect(self: &Arc<Self>) -> Result<bool> {
        let (generation, token) = {
            let mut guard = self.inner.lock().await;
            let has_session = guard.session.has_session();
            let Some(attempt) = guard.session.connection.connect(has_session) else {
                return Ok(false);
            };
            let token = guard
                .session
                .token()
                .ok_or(SessionError::NotLoggedIn)?
                .to_string();
            (attempt.generation, token)
        };
        self.emit(ClientEvent::ConnectionChanged(ConnectionState::Connecting));
        self.open_link(generation, token).await;
        Ok(true)
    }

    async fn open_link(self: &Arc<Self>, generation: u64, token: String) {
        let channel = match push_endpoint(&self.settings.server_url, &token) {
            Ok(endpoint) => {
                info!(
                    generation,
                    endpoint = %redacted_endpoint(&endpoint),
                    "push: connecting"
                );
                self.connector.connect(endpoint).await
            }
            Err(err) => Err(err),
        };

        match channel {
            Ok(channel) => self.attach_channel(generation, channel).await,
            Err(err) => {
                warn!(generation, "push: connect failed: {err:#}");
                self.emit(ClientEvent::Error(format!("push connect failed: {err}")));
                self.handle_closed(generation, CloseReason::ConnectFailed(err.to_string()))
                    .await;
            }
        }
    }

    async fn attach_channel(self: &Arc<Self>, generation: u64, channel: PushChannel) {
        let PushChannel { outbound, inbound } = channel;
        {
            let mut guard = self.inner.lock().await;
            if !guard.session.connection.on_open(generation) {
                debug!(generation, "push: dropping socket opened for a stale attempt");
                return;
            }
            guard.link = Some(PushLink {
                generation,
                outbound,
            });
        }
        info!(generation, "push: connected");
        self.emit(ClientEvent::ConnectionChanged(ConnectionState::Open));
        self.spawn_pump(generation, inbound);
    }

    fn spawn_pump(
        self: &Arc<Self>,
        generation: u64,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                if let TransportEvent::Closed(reason) = event {
                    client
                        .handle_closed(generation, CloseReason::Remote(reason))
                        .await;
                    return;
                }
                client.handle_transport_event(generation, event).await;
            }
            client
                .handle_closed(generation, CloseReason::Remote(None))
                .await;
        });
    }

    async fn handle_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => {
                let effect = {
                    let mut guard = self.inner.lock().await;
                    if !guard.session.connection.is_current(generation) {
                        return;
                    }
                    route_frame(&mut guard.session, &text)
                };
                match effect {
                    Some(RouteEffect::TeardownRequested { reason }) => {
                        warn!(
                            reason = reason.as_deref().unwrap_or(""),
                            "session: forced logout by server"
                        );
                        self.teardown(reason).await;
                    }
                    Some(effect) => self.emit_route_effect(effect),
                    None => {}
                }
            }
            TransportEvent::Error(err) => {
                let released = {
                    let mut guard = self.inner.lock().await;
                    if !guard.session.connection.on_error(generation) {
                        return;
                    }
                    take_link(&mut guard, generation)
                };
                warn!(generation, "push: transport error, closing: {err}");
                drop(released);
                self.emit(ClientEvent::ConnectionChanged(ConnectionState::Closing));
            }
            TransportEvent::Closed(reason) => {
                self.handle_closed(generation, CloseReason::Remote(reason))
                    .await;
            }
        }
    }

    fn emit_route_effect(&self, effect: RouteEffect) {
        let event = match effect {
            RouteEffect::PresenceUpdated { active_online } => {
                ClientEvent::PresenceUpdated { active_online }
            }
            RouteEffect::MessageAppended { partner } => ClientEvent::ConversationUpdated { partner },
            RouteEffect::UnreadChanged {
                partner,
                count,
                total,
            } => ClientEvent::UnreadChanged {
                partner,
                count,
                total,
            },
            RouteEffect::PostAdded { post_id } => ClientEvent::PostAdded { post_id },
            RouteEffect::VotesUpdated { post_id } => ClientEvent::VotesUpdated { post_id },
            RouteEffect::MessageDuplicate
            | RouteEffect::Ignored
            | RouteEffect::TeardownRequested { .. } => return,
        };
        self.emit(event);
    }

    async fn handle_closed(self: &Arc<Self>, generation: u64, reason: CloseReason) {
        let decision = {
            let mut guard = self.inner.lock().await;
            let has_session = guard.session.has_session();
            let decision = guard
                .session
                .connection
                .on_closed(generation, reason.clone(), has_session);
            if decision != CloseDecision::Stale {
                drop(take_link(&mut guard, generation));
            }
            decision
        };

        match decision {
            CloseDecision::Stale => {
                debug!(generation, "push: ignoring close of a released socket");
            }
            CloseDecision::Closed => {
                info!(generation, ?reason, "push: closed");
                self.emit(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
            }
            CloseDecision::Reconnect(plan) => {
                info!(
                    generation,
                    ?reason,
                    delay_ms = plan.delay.as_millis() as u64,
                    "push: connection lost, reconnect scheduled"
                );
                self.emit(ClientEvent::ConnectionChanged(ConnectionState::Disconnected));
                self.schedule_reconnect(plan);
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, plan: ReconnectPlan) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(plan.delay).await;
            client.reconnect_due(plan).await;
        });
    }

    async fn reconnect_due(self: &Arc<Self>, plan: ReconnectPlan) {
        let (generation, token) = {
            let mut guard = self.inner.lock().await;
            let has_session = guard.session.has_session();
            let Some(attempt) = guard.session.connection.on_reconnect_due(plan, has_session)
            else {
                return;
            };
            let Some(token) = guard.session.token() else {
                return;
            };
            (attempt.generation, token.to_string())
        };
        info!(generation, "push: reconnecting");
        self.emit(ClientEvent::ConnectionChanged(ConnectionState::Connecting));
        self.open_link(generation, token).await;
    }

    pub async fn open_conversation(&self, partner: UserPresence) -> Result<Option<FetchOutcome>> {
        let (ticket, token, total) = {
            let mut guard = self.inner.lock().await;
            let token = guard
                .session
                .token()
                .ok_or(SessionError::NotLoggedIn)?
                .to_string();
            let ticket = guard.session.open_conversation(partner);
            (ticket, token, guard.session.presence.unread_total())
        };
        self.emit(ClientEvent::UnreadChanged {
            partner: ticket.partner.clone(),
            count: 0,
            total,
        });
        self.emit(ClientEvent::ConversationUpdated {
            partner: ticket.partner.clone(),
        });
        self.run_fetch(ticket, token).await
    }

    pub async fn close_conversation(&self) -> Option<UserId> {
        self.inner.lock().await.session.close_conversation()
    }

    /// Fetches one page for `partner`. `Ok(None)` when another fetch for that
    /// conversation is in flight, its history is exhausted, or the response
    /// arrived for an earlier open.
    pub async fn fetch_history(
        &self,
        partner: &UserId,
        offset: usize,
        initial: bool,
    ) -> Result<Option<FetchOutcome>> {
        let (ticket, token) = {
            let mut guard = self.inner.lock().await;
            let token = guard
                .session
                .token()
                .ok_or(SessionError::NotLoggedIn)?
                .to_string();
            let Some(ticket) = guard.session.conversations.begin_fetch(partner, offset, initial)
            else {
                return Ok(None);
            };
            (ticket, token)
        };
        self.run_fetch(ticket, token).await
    }

    /// Reported by the render layer when the top edge of the message region
    /// becomes visible.
    pub async fn top_edge_visible(&self, viewport: Viewport) -> Result<Option<FetchOutcome>> {
        let (ticket, token) = {
            let mut guard = self.inner.lock().await;
            let Some(token) = guard.session.token().map(str::to_string) else {
                return Ok(None);
            };
            let Some(ticket) = guard.session.on_top_edge_visible(&viewport) else {
                return Ok(None);
            };
            (ticket, token)
        };
        self.run_fetch(ticket, token).await
    }

    pub async fn layout_settled(&self) -> bool {
        self.inner.lock().await.session.layout_settled()
    }

    async fn run_fetch(&self, ticket: FetchTicket, token: String) -> Result<Option<FetchOutcome>> {
        debug!(
            partner_id = %ticket.partner,
            offset = ticket.offset,
            initial = ticket.initial,
            "history: fetching page"
        );
        match self
            .api
            .fetch_history(&token, &ticket.partner, ticket.offset)
            .await
        {
            Ok(page) => {
                let outcome = self.inner.lock().await.session.complete_fetch(&ticket, page);
                if let Some(outcome) = &outcome {
                    self.emit(ClientEvent::HistoryLoaded {
                        partner: outcome.partner.clone(),
                        inserted: outcome.inserted,
                        exhausted: outcome.exhausted,
                        scroll: outcome.scroll,
                    });
                }
                Ok(outcome)
            }
            Err(err) => {
                self.inner.lock().await.session.abort_fetch(&ticket);
                warn!(
                    partner_id = %ticket.partner,
                    offset = ticket.offset,
                    "history: request failed: {err:#}"
                );
                self.emit(ClientEvent::Error(format!("history request failed: {err}")));
                Err(err)
            }
        }
    }

    pub async fn set_compose_text(&self, context: ComposeContext, text: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        guard.session.compose.get_mut(context).text = text.into();
    }

    /// Uploads an image and keeps its URL as the pending attachment of
    /// `context`. `Ok(None)` when `context` was left while uploading.
    pub async fn attach_image(
        &self,
        context: ComposeContext,
        upload: ImageUpload,
    ) -> Result<Option<String>> {
        let (token, epoch) = {
            let guard = self.inner.lock().await;
            let token = guard
                .session
                .token()
                .ok_or(SessionError::NotLoggedIn)?
                .to_string();
            (token, guard.session.compose.epoch(context))
        };
        let url = self.api.upload_image(&token, upload).await?;
        let mut guard = self.inner.lock().await;
        if !guard.session.compose.attach(context, epoch, url.clone()) {
            debug!(?context, "compose: dropping upload for a context that was left");
            return Ok(None);
        }
        Ok(Some(url))
    }

    pub async fn remove_attachment(&self, context: ComposeContext) -> Option<String> {
        self.inner
            .lock()
            .await
            .session
            .compose
            .remove_attachment(context)
    }

    /// Sends the chat composer to the active partner. The message itself
    /// arrives later through the push channel.
    pub async fn send_message(&self) -> std::result::Result<(), SendRejected> {
        let mut guard = self.inner.lock().await;
        let command = guard.session.take_send_command()?;
        // An open connection always has its link attached.
        let Some(link) = guard.link.as_ref() else {
            return Err(SendRejected::NotConnected(ConnectionState::Disconnected));
        };
        match serde_json::to_string(&command) {
            Ok(frame) => {
                if link.outbound.send(frame).is_err() {
                    warn!(generation = link.generation, "push: send on a closed socket");
                }
            }
            Err(err) => warn!("push: failed to encode send command: {err}"),
        }
        Ok(())
    }

    pub async fn send_text(&self, text: &str) -> std::result::Result<(), SendRejected> {
        self.set_compose_text(ComposeContext::Chat, text).await;
        self.send_message().await
    }

    pub async fn set_feed_visible(&self, visible: bool) {
        self.inner.lock().await.session.set_feed_visible(visible);
    }

    pub async fn load_posts(&self, query: PostQuery) -> Result<usize> {
        let token = self.token().await?;
        let posts = self.api.list_posts(&token, &query).await?;
        let mut guard = self.inner.lock().await;
        guard.session.feed.replace(posts, query);
        Ok(guard.session.feed.posts().len())
    }

    pub async fn create_post(
        &self,
        title: &str,
        content: &str,
        categories: Vec<String>,
    ) -> Result<PostSummary> {
        let (token, image_url) = {
            let guard = self.inner.lock().await;
            let token = guard
                .session
                .token()
                .ok_or(SessionError::NotLoggedIn)?
                .to_string();
            let image_url = guard
                .session
                .compose
                .get(ComposeContext::Post)
                .pending_attachment
                .clone()
                .unwrap_or_default();
            (token, image_url)
        };
        let draft = NewPostRequest {
            title: title.trim().to_string(),
            content: content.trim().to_string(),
            categories,
            image_url,
        };
        let post = self.api.create_post(&token, &draft).await?;

        let inserted = {
            let mut guard = self.inner.lock().await;
            guard.session.compose.get_mut(ComposeContext::Post).clear();
            guard.session.feed.insert_own_post(post.clone())
        };
        if inserted {
            self.emit(ClientEvent::PostAdded {
                post_id: post.id.clone(),
            });
        }
        Ok(post)
    }

    pub async fn submit_vote(&self, post_id: &PostId, value: VoteValue) -> Result<VoteSummary> {
        let token = self.token().await?;
        let request = VoteRequest {
            post_id: post_id.clone(),
            value: value.as_i8(),
        };
        let summary = self.api.vote(&token, &request).await?;
        let applied = self
            .inner
            .lock()
            .await
            .session
            .feed
            .apply_vote_summary(post_id, &summary);
        if applied {
            self.emit(ClientEvent::VotesUpdated {
                post_id: post_id.clone(),
            });
        }
        Ok(summary)
    }

    pub async fn delete_post(&self, post_id: &PostId) -> Result<()> {
        let token = self.token().await?;
        self.api.delete_post(&token, post_id).await?;
        let removed = self.inner.lock().await.session.feed.remove(post_id);
        if removed {
            self.emit(ClientEvent::PostRemoved {
                post_id: post_id.clone(),
            });
        }
        Ok(())
    }

    pub async fn load_comments(&self, post_id: &PostId) -> Result<Vec<Comment>> {
        let token = self.token().await?;
        self.api.list_comments(&token, post_id).await
    }

    pub async fn add_comment(&self, post_id: &PostId, content: &str) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendRejected::Empty.into());
        }
        let token = self.token().await?;
        let request = NewCommentRequest {
            post_id: post_id.clone(),
            content: content.to_string(),
        };
        self.api.create_comment(&token, &request).await
    }

    pub async fn delete_comment(&self, comment_id: &CommentId) -> Result<()> {
        let token = self.token().await?;
        self.api.delete_comment(&token, comment_id).await
    }
}

fn take_link(state: &mut ClientState, generation: u64) -> Option<PushLink> {
    match &state.link {
        Some(link) if link.generation == generation => state.link.take(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
