use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{CommentId, PostId, UserId},
    error::{ApiErrorBody, ApiException},
    protocol::{
        ChatMessage, Comment, DeleteCommentRequest, DeletePostRequest, LoginRequest,
        LoginResponse, NewCommentRequest, NewPostRequest, PostQuery, PostSummary, UploadResponse,
        VoteRequest, VoteSummary,
    },
};

pub const SESSION_HEADER: &str = "X-Session-Token";

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn login(&self, identifier: &str, password: &str) -> Result<LoginResponse>;
    async fn logout(&self, token: &str) -> Result<()>;
    /// One page of the conversation with `partner`, skipping `offset` newest messages.
    async fn fetch_history(
        &self,
        token: &str,
        partner: &UserId,
        offset: usize,
    ) -> Result<Vec<ChatMessage>>;
    async fn upload_image(&self, token: &str, upload: ImageUpload) -> Result<String>;
    async fn list_posts(&self, token: &str, query: &PostQuery) -> Result<Vec<PostSummary>>;
    async fn create_post(&self, token: &str, draft: &NewPostRequest) -> Result<PostSummary>;
    async fn vote(&self, token: &str, request: &VoteRequest) -> Result<VoteSummary>;
    async fn delete_post(&self, token: &str, post_id: &PostId) -> Result<()>;
    /// Oldest first.
    async fn list_comments(&self, token: &str, post_id: &PostId) -> Result<Vec<Comment>>;
    async fn create_comment(&self, token: &str, request: &NewCommentRequest) -> Result<Comment>;
    async fn delete_comment(&self, token: &str, comment_id: &CommentId) -> Result<()>;
}

pub struct HttpChatApi {
    http: Client,
    server_url: String,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    fn authed(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder.header(SESSION_HEADER, token)
    }
}

/// Turns a non-success status into an [`ApiException`], using the server's
/// `{error}` body when it has one.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ApiErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(ApiException::new(status.as_u16(), message).into())
}

/// The server encodes an empty list as `null`.
async fn json_list<T: DeserializeOwned>(response: Response) -> Result<Vec<T>> {
    let items: Option<Vec<T>> = response.json().await.context("invalid list body")?;
    Ok(items.unwrap_or_default())
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn login(&self, identifier: &str, password: &str) -> Result<LoginResponse> {
        let response = self
            .http
            .post(self.url("/api/login"))
            .json(&LoginRequest {
                identifier: identifier.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .context("login request failed")?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn logout(&self, token: &str) -> Result<()> {
        let response = self
            .authed(self.http.post(self.url("/api/logout")), token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_history(
        &self,
        token: &str,
        partner: &UserId,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        let offset = offset.to_string();
        let response = self
            .authed(self.http.get(self.url("/api/messages")), token)
            .query(&[("with", partner.as_str()), ("offset", offset.as_str())])
            .send()
            .await
            .with_context(|| format!("history request failed for partner {partner}"))?;
        json_list(check_status(response).await?).await
    }

    async fn upload_image(&self, token: &str, upload: ImageUpload) -> Result<String> {
        let mut part = multipart::Part::bytes(upload.bytes).file_name(upload.filename);
        if let Some(mime_type) = upload.mime_type.as_deref() {
            part = part
                .mime_str(mime_type)
                .with_context(|| format!("invalid mime type '{mime_type}'"))?;
        }
        let form = multipart::Form::new().part("image", part);

        let response = self
            .authed(self.http.post(self.url("/api/upload")), token)
            .multipart(form)
            .send()
            .await
            .context("upload request failed")?;
        let body: UploadResponse = check_status(response).await?.json().await?;
        Ok(body.url)
    }

    async fn list_posts(&self, token: &str, query: &PostQuery) -> Result<Vec<PostSummary>> {
        let response = self
            .authed(self.http.get(self.url("/api/posts")), token)
            .query(query)
            .send()
            .await?;
        json_list(check_status(response).await?).await
    }

    async fn create_post(&self, token: &str, draft: &NewPostRequest) -> Result<PostSummary> {
        let response = self
            .authed(self.http.post(self.url("/api/posts")), token)
            .json(draft)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn vote(&self, token: &str, request: &VoteRequest) -> Result<VoteSummary> {
        let response = self
            .authed(self.http.post(self.url("/api/votes")), token)
            .json(request)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn delete_post(&self, token: &str, post_id: &PostId) -> Result<()> {
        let response = self
            .authed(self.http.post(self.url("/api/posts/delete")), token)
            .json(&DeletePostRequest {
                post_id: post_id.clone(),
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn list_comments(&self, token: &str, post_id: &PostId) -> Result<Vec<Comment>> {
        let response = self
            .authed(self.http.get(self.url("/api/comments")), token)
            .query(&[("post_id", post_id.as_str())])
            .send()
            .await
            .with_context(|| format!("comments request failed for post {post_id}"))?;
        json_list(check_status(response).await?).await
    }

    async fn create_comment(&self, token: &str, request: &NewCommentRequest) -> Result<Comment> {
        let response = self
            .authed(self.http.post(self.url("/api/comments")), token)
            .json(request)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn delete_comment(&self, token: &str, comment_id: &CommentId) -> Result<()> {
        let response = self
            .authed(self.http.post(self.url("/api/comments/delete")), token)
            .json(&DeleteCommentRequest {
                comment_id: comment_id.clone(),
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
