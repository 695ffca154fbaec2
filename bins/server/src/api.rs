use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use event_publisher::{MediaJob, MediaJobOutcome, MediaJobQueue, PublishError};
use feed::FeedService;
use outbox::{EngagementService, OutboxError};
use reelz_api::{ErrorKind, FeedItem, MediaUpload, OneOrMany, PostId, UserId};

use crate::error::ServerError;

/// Acting user header; authentication happens in front of this service.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub engagement: Arc<EngagementService>,
    pub feed: Arc<FeedService>,
    pub media: Arc<MediaJobQueue>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/feed", get(handle_feed))
        .route("/api/users", post(handle_create_user))
        .route("/api/users/{id}/follow", post(handle_follow))
        .route("/api/users/{id}/unfollow", post(handle_unfollow))
        .route("/api/posts", post(handle_create_post))
        .route("/api/posts/{id}/like", post(handle_like))
        .route("/api/posts/{id}/comment", post(handle_comment))
        .route("/api/posts/{id}/view", post(handle_view))
        .route("/api/posts/{id}/media-jobs", post(handle_media_job))
        .with_state(state)
}

pub async fn bind(port: u16) -> Result<TcpListener, ServerError> {
    TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| ServerError::Api(format!("bind api :{port}: {e}")))
}

pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<(), ServerError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ServerError::Api(format!("axum serve: {e}")))
}

// ════════════════════════════════════════════════════════════════
//  Errors & extractors
// ════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Constraint => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Format => StatusCode::BAD_REQUEST,
        ErrorKind::Io => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Config | ErrorKind::Logic => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<OutboxError> for ApiError {
    fn from(e: OutboxError) -> Self {
        let status = match &e {
            OutboxError::Invalid(_) => StatusCode::BAD_REQUEST,
            other => status_for(other.kind()),
        };
        Self::new(status, e.to_string())
    }
}

impl From<PublishError> for ApiError {
    fn from(e: PublishError) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "success": false, "message": self.message }))).into_response()
    }
}

/// User id taken from the `x-user-id` header.
pub struct ActingUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing x-user-id header"))?
            .to_str()
            .map_err(|_| ApiError::new(StatusCode::UNAUTHORIZED, "x-user-id is not ASCII"))?;
        raw.trim()
            .parse::<UserId>()
            .map(ActingUser)
            .map_err(|e| ApiError::new(StatusCode::UNAUTHORIZED, e.to_string()))
    }
}

// ════════════════════════════════════════════════════════════════
//  Feed
// ════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct FeedResponse {
    success: bool,
    feed: Vec<FeedItem>,
    degraded: bool,
}

async fn handle_feed(State(state): State<AppState>, ActingUser(user): ActingUser) -> Json<FeedResponse> {
    let feed = state.feed.feed_for(user).await;
    Json(FeedResponse { success: true, feed: feed.items, degraded: feed.degraded })
}

// ════════════════════════════════════════════════════════════════
//  Users
// ════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct CreateUserBody {
    username: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    is_private: bool,
}

async fn handle_create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state
        .engagement
        .register_user(&body.username, &body.first_name, &body.last_name, body.is_private)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "user_id": id }))))
}

async fn handle_follow(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(followed): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.engagement.follow(user, followed).await?;
    Ok(Json(json!({ "success": true, "status": outcome.status, "weight": outcome.edge.weight })))
}

async fn handle_unfollow(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(followed): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.engagement.unfollow(user, followed).await?;
    Ok(Json(json!({ "success": true, "status": status })))
}

// ════════════════════════════════════════════════════════════════
//  Posts
// ════════════════════════════════════════════════════════════════

fn default_upload_type() -> String {
    "post".to_string()
}

#[derive(Deserialize)]
struct CreatePostBody {
    #[serde(default)]
    caption: Option<String>,
    media: OneOrMany<MediaUpload>,
    #[serde(default = "default_upload_type")]
    upload_type: String,
}

/// Media job status as reported by `POST /api/posts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum MediaJobStatus {
    Queued,
    Degraded,
    /// The post exists but the job reached neither topic.
    Failed,
}

fn media_urls(media: &OneOrMany<MediaUpload>) -> OneOrMany<String> {
    match media {
        OneOrMany::SingleItem(m) => OneOrMany::SingleItem(m.url.clone()),
        OneOrMany::MultipleItems(items) => OneOrMany::MultipleItems(items.iter().map(|m| m.url.clone()).collect()),
    }
}

async fn handle_create_post(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Json(body): Json<CreatePostBody>,
) -> Result<impl IntoResponse, ApiError> {
    let urls = media_urls(&body.media);
    let post_id = state.engagement.create_post(user, body.caption, body.media).await?;

    let job = MediaJob::new(post_id, urls, body.upload_type);
    let media_job = match state.media.enqueue(&job).await {
        Ok(MediaJobOutcome::Queued) => MediaJobStatus::Queued,
        Ok(MediaJobOutcome::Degraded) => MediaJobStatus::Degraded,
        Err(e) => {
            tracing::error!(%post_id, error = %e, "media job not enqueued");
            MediaJobStatus::Failed
        }
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "post_id": post_id, "media_job": media_job })),
    ))
}

async fn handle_like(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(post): Path<PostId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engagement.like_post(user, post).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct CommentBody {
    text: String,
    #[serde(default)]
    parent_comment_id: Option<Uuid>,
}

async fn handle_comment(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(post): Path<PostId>,
    Json(body): Json<CommentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state
        .engagement
        .comment_on_post(user, post, &body.text, body.parent_comment_id)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "comment_id": id }))))
}

async fn handle_view(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(post): Path<PostId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let first_view = state.engagement.mark_viewed(user, post).await?;
    Ok(Json(json!({ "success": true, "first_view": first_view })))
}

#[derive(Deserialize)]
struct MediaJobBody {
    urls: OneOrMany<String>,
    #[serde(default = "default_upload_type")]
    upload_type: String,
}

async fn handle_media_job(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(post): Path<PostId>,
    Json(body): Json<MediaJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job = MediaJob::new(post, body.urls, body.upload_type);
    let status = match state.media.enqueue(&job).await? {
        MediaJobOutcome::Queued => MediaJobStatus::Queued,
        MediaJobOutcome::Degraded => MediaJobStatus::Degraded,
    };
    tracing::debug!(%user, %post, trace_id = %job.trace_id, "media job requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "status": status, "trace_id": job.trace_id })),
    ))
}
