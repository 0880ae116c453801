use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Remote(Option<String>),
    TransportError(String),
    ConnectFailed(String),
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAttempt {
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPlan {
    pub generation: u64,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// The event belongs to a socket this manager no longer owns.
    Stale,
    Closed,
    Reconnect(ReconnectPlan),
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    generation: u64,
    retry_delay: Duration,
    last_close_reason: Option<CloseReason>,
    torn_down: bool,
    pending_reconnect: Option<u64>,
    scheduled_reconnects: u64,
}

impl ConnectionManager {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            generation: 0,
            retry_delay,
            last_close_reason: None,
            torn_down: false,
            pending_reconnect: None,
            scheduled_reconnects: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn last_close_reason(&self) -> Option<&CloseReason> {
        self.last_close_reason.as_ref()
    }

    pub fn scheduled_reconnects(&self) -> u64 {
        self.scheduled_reconnects
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn is_current(&self, generation: u64) -> bool {
        !self.torn_down && generation == self.generation
    }

    pub fn resume(&mut self) {
        self.torn_down = false;
    }

    /// No-op while a socket is connecting or open; a closing socket does not
    /// count as alive.
    pub fn connect(&mut self, has_session: bool) -> Option<ConnectAttempt> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return None;
        }
        if self.torn_down || !has_session {
            return None;
        }

        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.pending_reconnect = None;
        Some(ConnectAttempt {
            generation: self.generation,
        })
    }

    pub fn on_open(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Open;
        true
    }

    pub fn on_error(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing | ConnectionState::Disconnected => false,
        }
    }

    pub fn on_closed(
        &mut self,
        generation: u64,
        reason: CloseReason,
        has_session: bool,
    ) -> CloseDecision {
        if !self.is_current(generation) || self.state == ConnectionState::Disconnected {
            return CloseDecision::Stale;
        }

        self.state = ConnectionState::Disconnected;
        self.last_close_reason = Some(reason);
        if !has_session {
            return CloseDecision::Closed;
        }

        self.scheduled_reconnects += 1;
        self.pending_reconnect = Some(generation);
        CloseDecision::Reconnect(ReconnectPlan {
            generation,
            delay: self.retry_delay,
        })
    }

    /// Called when a reconnect timer fires. Only the timer scheduled by the
    /// latest close may start a new attempt.
    pub fn on_reconnect_due(
        &mut self,
        plan: ReconnectPlan,
        has_session: bool,
    ) -> Option<ConnectAttempt> {
        if self.pending_reconnect != Some(plan.generation) {
            return None;
        }
        self.pending_reconnect = None;
        self.connect(has_session)
    }

    /// Releases the owned socket before it is closed. Returns the released
    /// generation; any later event carrying it is stale.
    pub fn teardown(&mut self) -> u64 {
        let released = self.generation;
        self.generation += 1;
        self.torn_down = true;
        self.state = ConnectionState::Disconnected;
        self.pending_reconnect = None;
        self.last_close_reason = Some(CloseReason::Teardown);
        released
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
