#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    /// A region without a scrollbar always shows its top edge.
    pub fn is_scrollable(&self) -> bool {
        self.scroll_height > self.client_height
    }

    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.client_height - self.scroll_top).max(0.0)
    }
}

/// Keeps the distance between the viewport and the bottom of the content
/// constant when `new_height - old_height` worth of content is prepended.
pub fn new_scroll_offset(old_height: f64, new_height: f64, old_offset: f64) -> f64 {
    (old_offset + (new_height - old_height)).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirective {
    ToBottom,
    PreserveFromBottom,
}

impl ScrollDirective {
    pub fn resolve(self, before: Viewport, new_height: f64) -> f64 {
        match self {
            Self::ToBottom => (new_height - before.client_height).max(0.0),
            Self::PreserveFromBottom => {
                new_scroll_offset(before.scroll_height, new_height, before.scroll_top)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Disarmed,
    AwaitingInitialBatch,
    AwaitingLayout,
    Observing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerGuards {
    pub conversation_active: bool,
    pub fetch_in_flight: bool,
    pub exhausted: bool,
}

#[derive(Debug, Default)]
pub struct PaginationTrigger {
    state: TriggerState,
}

impl PaginationTrigger {
    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn is_observing(&self) -> bool {
        self.state == TriggerState::Observing
    }

    pub fn rearm(&mut self) {
        self.state = TriggerState::AwaitingInitialBatch;
    }

    pub fn initial_batch_loaded(&mut self) {
        if self.state == TriggerState::AwaitingInitialBatch {
            self.state = TriggerState::AwaitingLayout;
        }
    }

    /// The render layer reports the initial batch is laid out and scrolled to
    /// the bottom. Returns whether observation started.
    pub fn layout_settled(&mut self) -> bool {
        if self.state != TriggerState::AwaitingLayout {
            return false;
        }
        self.state = TriggerState::Observing;
        true
    }

    pub fn disarm(&mut self) {
        self.state = TriggerState::Disarmed;
    }

    pub fn should_fire(
        &self,
        top_edge_visible: bool,
        guards: TriggerGuards,
        viewport: &Viewport,
    ) -> bool {
        self.is_observing()
            && top_edge_visible
            && guards.conversation_active
            && !guards.fetch_in_flight
            && !guards.exhausted
            && viewport.is_scrollable()
    }
}

#[cfg(test)]
#[path = "tests/pagination_tests.rs"]
mod tests;
