use super::*;

const READY: TriggerGuards = TriggerGuards {
    conversation_active: true,
    fetch_in_flight: false,
    exhausted: false,
};

fn observing() -> PaginationTrigger {
    let mut trigger = PaginationTrigger::default();
    trigger.rearm();
    trigger.initial_batch_loaded();
    assert!(trigger.layout_settled());
    trigger
}

#[test]
fn prepend_preserves_distance_from_bottom() {
    let before = Viewport::new(0.0, 400.0, 200.0);
    let offset = new_scroll_offset(before.scroll_height, 800.0, before.scroll_top);
    assert_eq!(offset, 400.0);

    let after = Viewport::new(offset, 800.0, 200.0);
    assert_eq!(after.distance_from_bottom(), before.distance_from_bottom());
}

#[test]
fn prepend_anchor_respects_a_partially_scrolled_viewport() {
    let before = Viewport::new(35.0, 400.0, 200.0);
    let offset = ScrollDirective::PreserveFromBottom.resolve(before, 640.0);
    assert_eq!(offset, 275.0);
    assert_eq!(
        Viewport::new(offset, 640.0, 200.0).distance_from_bottom(),
        before.distance_from_bottom()
    );
}

#[test]
fn initial_batch_scrolls_to_bottom() {
    let before = Viewport::new(0.0, 0.0, 200.0);
    assert_eq!(ScrollDirective::ToBottom.resolve(before, 400.0), 200.0);
    assert_eq!(ScrollDirective::ToBottom.resolve(before, 120.0), 0.0);
}

#[test]
fn does_not_observe_before_layout_settles() {
    let mut trigger = PaginationTrigger::default();
    let viewport = Viewport::new(0.0, 400.0, 200.0);

    trigger.rearm();
    assert!(!trigger.should_fire(true, READY, &viewport));
    assert!(!trigger.layout_settled());

    trigger.initial_batch_loaded();
    assert_eq!(trigger.state(), TriggerState::AwaitingLayout);
    assert!(!trigger.should_fire(true, READY, &viewport));

    assert!(trigger.layout_settled());
    assert!(trigger.should_fire(true, READY, &viewport));
}

#[test]
fn short_conversation_without_scrollbar_never_fires() {
    let trigger = observing();
    let viewport = Viewport::new(0.0, 150.0, 200.0);
    assert!(!trigger.should_fire(true, READY, &viewport));
}

#[test]
fn every_guard_must_hold() {
    let trigger = observing();
    let viewport = Viewport::new(0.0, 400.0, 200.0);

    assert!(!trigger.should_fire(false, READY, &viewport));
    assert!(!trigger.should_fire(
        true,
        TriggerGuards {
            fetch_in_flight: true,
            ..READY
        },
        &viewport
    ));
    assert!(!trigger.should_fire(
        true,
        TriggerGuards {
            exhausted: true,
            ..READY
        },
        &viewport
    ));
    assert!(!trigger.should_fire(
        true,
        TriggerGuards {
            conversation_active: false,
            ..READY
        },
        &viewport
    ));
}

#[test]
fn disarm_stops_observation_until_rearmed() {
    let mut trigger = observing();
    trigger.disarm();
    assert!(!trigger.should_fire(true, READY, &Viewport::new(0.0, 400.0, 200.0)));
    assert!(!trigger.layout_settled());
}
