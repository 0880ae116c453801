use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::{
    domain::{CommentId, PostId},
    error::ErrorCode,
};
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

const TOKEN: &str = "tok-123";

#[derive(Clone, Default)]
struct ServerState {
    history_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    uploads: Arc<Mutex<Vec<(String, String, usize)>>>,
    deletions: Arc<Mutex<Vec<String>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        == Some(TOKEN)
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized"})),
    )
}

async fn handle_login(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] != "hunter2" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid credentials"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "user": {"id": "u-me", "nickname": body["identifier"], "email": "me@example.com"},
            "token": TOKEN
        })),
    )
}

async fn handle_messages(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    let offset = query.get("offset").cloned().unwrap_or_default();
    state.history_queries.lock().await.push(query);
    if offset != "0" {
        return (StatusCode::OK, Json(Value::Null));
    }
    (
        StatusCode::OK,
        Json(json!([
            {"id": "m2", "sender_id": "u-bob", "receiver_id": "u-me", "sender_name": "bob",
             "content": "second", "image_url": "", "created_at": "2024-05-01 10:02:00"},
            {"id": "m1", "sender_id": "u-me", "receiver_id": "u-bob", "sender_name": "me",
             "content": "first", "image_url": "/uploads/a.png", "created_at": "2024-05-01 10:01:00"}
        ])),
    )
}

async fn handle_upload(
    State(state): State<ServerState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or_default().to_string();
        let size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        state.uploads.lock().await.push((name, filename, size));
    }
    (
        StatusCode::OK,
        Json(json!({"url": "/uploads/stored.png"})),
    )
}

async fn handle_vote(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    if body["value"] != 1 && body["value"] != -1 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "post_id and value (1 or -1) are required"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"upvotes": 3, "downvotes": 1, "user_vote": body["value"]})),
    )
}

async fn handle_posts(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::OK, Json(Value::Null))
}

async fn handle_list_comments(
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    match query.get("post_id").map(String::as_str) {
        Some("p1") => (
            StatusCode::OK,
            Json(json!([
                {"id": "c1", "post_id": "p1", "user_id": "u-bob", "nickname": "bob",
                 "content": "first!", "created_at": "2024-05-01 10:00:00"},
                {"id": "c2", "post_id": "p1", "user_id": "u-me", "nickname": "me",
                 "content": "welcome", "created_at": "2024-05-01 10:05:00"}
            ])),
        ),
        Some(_) => (StatusCode::OK, Json(json!([]))),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "post_id is required"})),
        ),
    }
}

async fn handle_create_comment(
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    let content = body["content"].as_str().unwrap_or_default().trim().to_string();
    if content.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "post_id and content are required"})),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "id": "c9", "post_id": body["post_id"], "user_id": "u-me", "nickname": "me",
            "content": content, "created_at": "2024-05-01 11:00:00"
        })),
    )
}

async fn handle_delete(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    let target = body["post_id"]
        .as_str()
        .or_else(|| body["comment_id"].as_str())
        .unwrap_or_default()
        .to_string();
    if target.ends_with("-other") {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden"})));
    }
    state.deletions.lock().await.push(target);
    (StatusCode::OK, Json(json!({"message": "deleted"})))
}

async fn handle_logout() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn spawn_api_server() -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/messages", get(handle_messages))
        .route("/api/upload", post(handle_upload))
        .route("/api/votes", post(handle_vote))
        .route("/api/posts", get(handle_posts))
        .route("/api/posts/delete", post(handle_delete))
        .route(
            "/api/comments",
            get(handle_list_comments).post(handle_create_comment),
        )
        .route("/api/comments/delete", post(handle_delete))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn api_exception(err: &anyhow::Error) -> &ApiException {
    err.downcast_ref::<ApiException>()
        .unwrap_or_else(|| panic!("expected ApiException, got {err:#}"))
}

#[tokio::test]
async fn login_returns_account_and_token() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);

    let response = api.login("ann", "hunter2").await.expect("login");
    assert_eq!(response.user.id, UserId::from("u-me"));
    assert_eq!(response.user.nickname, "ann");
    assert_eq!(response.token, TOKEN);

    let err = api.login("ann", "wrong").await.expect_err("bad password");
    let exception = api_exception(&err);
    assert_eq!(exception.code, ErrorCode::Unauthorized);
    assert_eq!(exception.message, "invalid credentials");
    assert!(exception.requires_reauth());
}

#[tokio::test]
async fn history_sends_partner_offset_and_token() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);
    let bob = UserId::from("u-bob");

    let page = api.fetch_history(TOKEN, &bob, 0).await.expect("page");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].image_url, None);
    assert_eq!(page[1].image_url.as_deref(), Some("/uploads/a.png"));

    let empty = api.fetch_history(TOKEN, &bob, 10).await.expect("null page");
    assert!(empty.is_empty());

    let queries = state.history_queries.lock().await;
    assert_eq!(queries[0].get("with").map(String::as_str), Some("u-bob"));
    assert_eq!(queries[1].get("offset").map(String::as_str), Some("10"));
}

#[tokio::test]
async fn history_without_session_is_rejected() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);

    let err = api
        .fetch_history("stale", &UserId::from("u-bob"), 0)
        .await
        .expect_err("unauthorized");
    assert_eq!(api_exception(&err).status, 401);
}

#[tokio::test]
async fn upload_posts_multipart_image_field() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);

    let url = api
        .upload_image(
            TOKEN,
            ImageUpload {
                filename: "cat.png".into(),
                mime_type: Some("image/png".into()),
                bytes: vec![0x89, b'P', b'N', b'G'],
            },
        )
        .await
        .expect("upload");

    assert_eq!(url, "/uploads/stored.png");
    assert_eq!(
        state.uploads.lock().await.as_slice(),
        &[("image".to_string(), "cat.png".to_string(), 4)]
    );
}

#[tokio::test]
async fn vote_and_posts_round_trip() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);

    let summary = api
        .vote(
            TOKEN,
            &VoteRequest {
                post_id: PostId::from("p1"),
                value: -1,
            },
        )
        .await
        .expect("vote");
    assert_eq!(
        summary,
        VoteSummary {
            upvotes: 3,
            downvotes: 1,
            user_vote: -1
        }
    );

    let err = api
        .vote(
            TOKEN,
            &VoteRequest {
                post_id: PostId::from("p1"),
                value: 0,
            },
        )
        .await
        .expect_err("invalid vote");
    assert_eq!(api_exception(&err).code, ErrorCode::Validation);

    let posts = api
        .list_posts(TOKEN, &PostQuery::default())
        .await
        .expect("posts");
    assert!(posts.is_empty());
}

#[tokio::test]
async fn error_without_json_body_uses_status_reason() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);

    let err = api.logout(TOKEN).await.expect_err("server error");
    let exception = api_exception(&err);
    assert_eq!(exception.code, ErrorCode::Internal);
    assert_eq!(exception.message, "Internal Server Error");
}

#[tokio::test]
async fn comments_are_listed_and_created_for_a_post() {
    let (server_url, _) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);
    let p1 = PostId::from("p1");

    let comments = api.list_comments(TOKEN, &p1).await.expect("comments");
    let ids: Vec<&str> = comments.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(comments[0].nickname, "bob");
    assert!(api
        .list_comments(TOKEN, &PostId::from("p2"))
        .await
        .expect("empty")
        .is_empty());

    let created = api
        .create_comment(
            TOKEN,
            &NewCommentRequest {
                post_id: p1.clone(),
                content: "  nice post ".into(),
            },
        )
        .await
        .expect("create");
    assert_eq!(created.post_id, p1);
    assert_eq!(created.content, "nice post");

    let err = api
        .create_comment(
            TOKEN,
            &NewCommentRequest {
                post_id: p1,
                content: "   ".into(),
            },
        )
        .await
        .expect_err("blank comment");
    assert_eq!(api_exception(&err).code, ErrorCode::Validation);
}

#[tokio::test]
async fn deletes_send_the_target_id_and_surface_forbidden() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpChatApi::new(server_url);

    api.delete_post(TOKEN, &PostId::from("p1"))
        .await
        .expect("delete post");
    api.delete_comment(TOKEN, &CommentId::from("c1"))
        .await
        .expect("delete comment");
    assert_eq!(
        state.deletions.lock().await.as_slice(),
        &["p1".to_string(), "c1".to_string()]
    );

    let err = api
        .delete_comment(TOKEN, &CommentId::from("c-other"))
        .await
        .expect_err("not the author");
    assert_eq!(api_exception(&err).code, ErrorCode::Forbidden);
}
