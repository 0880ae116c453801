use super::*;

fn composer(text: &str, attachment: Option<&str>) -> Composer {
    Composer {
        text: text.to_string(),
        pending_attachment: attachment.map(str::to_string),
    }
}

#[test]
fn accepted_send_trims_text_and_clears_composer() {
    let bob = UserId::from("bob");
    let mut draft = composer("  hello there \n", None);

    let command = take_send_command(&mut draft, Some(&bob), ConnectionState::Open)
        .expect("send accepted");

    assert_eq!(
        command,
        ClientRequest::SendMessage {
            receiver_id: bob,
            content: "hello there".into(),
            image_url: String::new(),
        }
    );
    assert_eq!(draft, Composer::default());
}

#[test]
fn attachment_alone_is_a_valid_message() {
    let bob = UserId::from("bob");
    let mut draft = composer("   ", Some("/uploads/cat.png"));

    let ClientRequest::SendMessage {
        content, image_url, ..
    } = take_send_command(&mut draft, Some(&bob), ConnectionState::Open).expect("accepted");

    assert_eq!(content, "");
    assert_eq!(image_url, "/uploads/cat.png");
    assert_eq!(draft.pending_attachment, None);
}

#[test]
fn rejections_leave_compose_state_unchanged() {
    let bob = UserId::from("bob");

    let mut empty = composer(" \t", None);
    assert_eq!(
        take_send_command(&mut empty, Some(&bob), ConnectionState::Open),
        Err(SendRejected::Empty)
    );

    let mut orphan = composer("hi", None);
    assert_eq!(
        take_send_command(&mut orphan, None, ConnectionState::Open),
        Err(SendRejected::NoActiveConversation)
    );
    assert_eq!(orphan.text, "hi");

    for state in [
        ConnectionState::Connecting,
        ConnectionState::Closing,
        ConnectionState::Disconnected,
    ] {
        let mut draft = composer("hi", Some("/uploads/a.png"));
        assert_eq!(
            take_send_command(&mut draft, Some(&bob), state),
            Err(SendRejected::NotConnected(state))
        );
        assert_eq!(draft, composer("hi", Some("/uploads/a.png")));
    }
}

#[test]
fn each_context_holds_one_attachment() {
    let mut slots = ComposeSlots::default();
    assert!(slots.attach(ComposeContext::Chat, 0, "/uploads/1.png".into()));
    assert!(slots.attach(ComposeContext::Chat, 0, "/uploads/2.png".into()));
    assert!(slots.attach(ComposeContext::Post, 0, "/uploads/3.png".into()));

    assert_eq!(
        slots.get(ComposeContext::Chat).pending_attachment.as_deref(),
        Some("/uploads/2.png")
    );
    assert_eq!(
        slots.remove_attachment(ComposeContext::Post).as_deref(),
        Some("/uploads/3.png")
    );
    assert_eq!(slots.get(ComposeContext::Post).pending_attachment, None);
}

#[test]
fn upload_for_a_left_context_is_not_stored() {
    let mut slots = ComposeSlots::default();
    let chat_epoch = slots.epoch(ComposeContext::Chat);
    let post_epoch = slots.epoch(ComposeContext::Post);
    assert!(slots.attach(ComposeContext::Chat, chat_epoch, "/uploads/old.png".into()));

    assert_eq!(
        slots.leave(ComposeContext::Chat).as_deref(),
        Some("/uploads/old.png")
    );
    assert!(!slots.attach(ComposeContext::Chat, chat_epoch, "/uploads/late.png".into()));
    assert_eq!(slots.chat.pending_attachment, None);

    assert!(slots.attach(ComposeContext::Post, post_epoch, "/uploads/post.png".into()));
    slots.clear();
    assert_eq!(slots.get(ComposeContext::Post).pending_attachment, None);
    assert_ne!(slots.epoch(ComposeContext::Post), post_epoch);
}
