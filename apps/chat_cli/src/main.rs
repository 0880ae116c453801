use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::{load_settings, load_settings_from},
    view::{display_time, MessageRow},
    ChatClient, ClientEvent, ImageUpload, Viewport,
};
use shared::{
    domain::{ComposeContext, PostId, VoteValue},
    protocol::PostQuery,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing_subscriber::EnvFilter;

/// Terminal rows treated as the visible message region.
const WINDOW_ROWS: f64 = 8.0;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    identifier: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    if let Some(server_url) = &args.server_url {
        settings = settings.with_server_url(server_url);
    }

    let client = ChatClient::new(settings);
    tokio::spawn(print_events(client.clone()));

    let account = client.login(&args.identifier, &args.password).await?;
    println!("Logged in as {} ({})", account.nickname, account.id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match run_command(&client, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => println!("! {err:#}"),
        }
    }
    Ok(())
}

/// Returns `false` once the user asked to quit.
async fn run_command(client: &Arc<ChatClient>, line: &str) -> Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "/users" => print_users(client).await,
        "/open" => {
            let partner = client
                .find_user(rest)
                .await
                .with_context(|| format!("no user named '{rest}'"))?;
            client.open_conversation(partner).await?;
            print_conversation(client).await;
            client.layout_settled().await;
        }
        "/more" => {
            let rows = client.view().await.messages.len() as f64;
            let outcome = client
                .top_edge_visible(Viewport::new(0.0, rows, WINDOW_ROWS))
                .await?;
            match outcome {
                Some(outcome) if outcome.inserted > 0 => print_conversation(client).await,
                _ if client.view().await.exhausted => println!("(start of conversation)"),
                _ => println!("(nothing to load)"),
            }
        }
        "/attach" => attach(client, ComposeContext::Chat, rest).await?,
        "/attach-post" => attach(client, ComposeContext::Post, rest).await?,
        "/posts" => {
            client.set_feed_visible(true).await;
            client.load_posts(PostQuery::default()).await?;
            print_posts(client).await;
        }
        "/chat" => client.set_feed_visible(false).await,
        "/post" => {
            let (title, content) = rest.split_once('|').unwrap_or((rest, ""));
            let post = client.create_post(title, content, Vec::new()).await?;
            println!("posted {}", post.id);
        }
        "/vote" => {
            let (id, direction) = rest.split_once(' ').unwrap_or((rest, "up"));
            let value = match direction.trim() {
                "down" => VoteValue::Down,
                _ => VoteValue::Up,
            };
            let summary = client.submit_vote(&PostId::from(id), value).await?;
            println!("+{} -{}", summary.upvotes, summary.downvotes);
        }
        "/comments" => {
            for comment in client.load_comments(&PostId::from(rest)).await? {
                println!(
                    "[{}] {}: {}",
                    display_time(&comment.created_at),
                    comment.nickname,
                    comment.content
                );
            }
        }
        "/comment" => {
            let (id, text) = rest.split_once(' ').unwrap_or((rest, ""));
            client.add_comment(&PostId::from(id), text).await?;
        }
        "/close" => {
            client.close_conversation().await;
        }
        "/logout" => {
            client.logout().await;
            return Ok(false);
        }
        "/quit" => return Ok(false),
        _ => client.send_text(line).await?,
    }
    Ok(true)
}

async fn attach(client: &ChatClient, context: ComposeContext, path: &str) -> Result<()> {
    let path = PathBuf::from(path);
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    let upload = ImageUpload {
        filename,
        mime_type: None,
        bytes,
    };
    match client.attach_image(context, upload).await? {
        Some(url) => println!("attached {url}"),
        None => println!("(attachment discarded)"),
    }
    Ok(())
}

async fn print_posts(client: &ChatClient) {
    for post in client.view().await.posts {
        println!(
            "{} [{}] {} by {} (+{} -{})",
            post.id, post.category, post.title, post.nickname, post.upvotes, post.downvotes
        );
    }
}

async fn print_users(client: &ChatClient) {
    for row in client.view().await.presence {
        let marker = if row.online { '*' } else { ' ' };
        let badge = row.badge.map(|b| format!(" [{b}]")).unwrap_or_default();
        println!("{marker} {}{badge}", row.nickname);
    }
}

async fn print_conversation(client: &ChatClient) {
    let view = client.view().await;
    if let Some(partner) = &view.partner {
        let status = if partner.online { "online" } else { "offline" };
        println!("--- {} ({status}) ---", partner.nickname);
    }
    for row in &view.messages {
        print_message(row);
    }
}

fn print_message(row: &MessageRow) {
    let image = row
        .image_url
        .as_deref()
        .map(|url| format!(" <{url}>"))
        .unwrap_or_default();
    println!("[{}] {}: {}{image}", row.time, row.author, row.text);
}

async fn print_events(client: Arc<ChatClient>) {
    let mut events = BroadcastStream::new(client.subscribe_events());
    while let Some(event) = events.next().await {
        let Ok(event) = event else {
            continue;
        };
        match event {
            ClientEvent::ConnectionChanged(state) => println!("(connection {state:?})"),
            ClientEvent::ConversationUpdated { .. } => {
                if let Some(row) = client.view().await.messages.last() {
                    print_message(row);
                }
            }
            ClientEvent::UnreadChanged {
                count, total, ..
            } if count > 0 => println!("(new message, {total} unread)"),
            ClientEvent::PostAdded { post_id } => println!("(new post {post_id})"),
            ClientEvent::PostRemoved { post_id } => println!("(post {post_id} deleted)"),
            ClientEvent::LoggedOut { reason } => {
                println!("(logged out{})", reason.map(|r| format!(": {r}")).unwrap_or_default());
            }
            ClientEvent::Error(message) => println!("! {message}"),
            _ => {}
        }
    }
}
