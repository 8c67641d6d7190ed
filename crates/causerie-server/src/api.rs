use std::net::SocketAddr;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use causerie_shared::{AttachmentRef, Content, ConversationId, MessageId, RequestId, UserId};
use causerie_store::{Conversation, Message, ProfileUpdate, User};
use causerie_sync::{ConversationManager, ConversationSummary, StreamUpdate};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub manager: ConversationManager,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/users", get(search_users))
        .route("/users/:id", get(get_user).put(upsert_profile))
        .route("/users/:id/presence", put(set_presence))
        .route("/users/:id/presence/stream", get(presence_stream))
        .route("/users/:id/wallpaper", get(get_wallpaper).put(set_wallpaper))
        .route("/users/:id/conversations", get(conversations_for))
        .route("/direct", post(open_direct))
        .route("/groups", post(create_group))
        .route("/conversations/:id", get(get_conversation))
        .route(
            "/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/:id/clear", post(clear_conversation))
        .route("/conversations/:id/read", post(mark_read))
        .route("/conversations/:id/unread/:user", get(unread_count))
        .route("/conversations/:id/stream", get(conversation_stream))
        .route("/messages/:id", delete(delete_message))
        .route("/attachments", post(register_attachment))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct PresenceRequest {
    online: bool,
}

#[derive(Serialize)]
struct PresenceEvent {
    online: bool,
}

#[derive(Serialize, Deserialize)]
struct WallpaperBody {
    wallpaper: Option<AttachmentRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenDirectRequest {
    user_id: UserId,
    other_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    creator_id: UserId,
    member_ids: Vec<UserId>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    sender_id: UserId,
    content: Content,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest {
    user_id: UserId,
}

#[derive(Serialize)]
struct UnreadResponse {
    unread: u32,
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: usize,
}

#[derive(Deserialize)]
struct RegisterAttachmentRequest {
    kind: String,
    handle: String,
}

fn parse_user(raw: &str) -> Result<UserId, ApiError> {
    UserId::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ─── Users ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn upsert_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(profile): Json<ProfileUpdate>,
) -> Result<Json<User>, ApiError> {
    let id = parse_user(&id)?;
    Ok(Json(state.manager.upsert_profile(&id, &profile)?))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let id = parse_user(&id)?;
    Ok(Json(state.manager.user(&id)?))
}

async fn search_users(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.manager.search_users(&params.q)?))
}

async fn set_presence(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PresenceRequest>,
) -> Result<StatusCode, ApiError> {
    let id = parse_user(&id)?;
    state.manager.set_online(&id, req.online)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Latest-value presence feed: the current flag first, then every change.
async fn presence_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let id = parse_user(&id)?;
    let rx = state.manager.watch_presence(&id)?;
    debug!(user = %id, "Presence stream opened");

    let events = stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let online = *rx.borrow_and_update();
        let event = Event::default()
            .event("presence")
            .json_data(PresenceEvent { online });
        Some((event, (rx, false)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn get_wallpaper(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WallpaperBody>, ApiError> {
    let id = parse_user(&id)?;
    Ok(Json(WallpaperBody {
        wallpaper: state.manager.get_wallpaper(&id)?,
    }))
}

async fn set_wallpaper(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WallpaperBody>,
) -> Result<StatusCode, ApiError> {
    let id = parse_user(&id)?;
    state.manager.set_wallpaper(&id, body.wallpaper.as_ref())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn conversations_for(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let id = parse_user(&id)?;
    Ok(Json(state.manager.conversations_for(&id)?))
}

// ─── Conversations ───

async fn open_direct(
    State(state): State<AppState>,
    Json(req): Json<OpenDirectRequest>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(state.manager.open_direct(&req.user_id, &req.other_id)?))
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let group = state
        .manager
        .create_group(&req.creator_id, &req.member_ids, req.name)?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(state.manager.conversation(&ConversationId::from_raw(id))?))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(
        state.manager.list_messages(&ConversationId::from_raw(id))?,
    ))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let request_id = req.request_id.map(RequestId);
    let message = state.manager.send_message(
        &ConversationId::from_raw(id),
        &req.sender_id,
        req.content,
        request_id.as_ref(),
    )?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn clear_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClearResponse>, ApiError> {
    let cleared = state
        .manager
        .clear_conversation(&ConversationId::from_raw(id))?;
    Ok(Json(ClearResponse { cleared }))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MarkReadRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .manager
        .mark_read(&req.user_id, &ConversationId::from_raw(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unread_count(
    State(state): State<AppState>,
    Path((id, user)): Path<(String, String)>,
) -> Result<Json<UnreadResponse>, ApiError> {
    let user = parse_user(&user)?;
    let unread = state
        .manager
        .unread_count(&user, &ConversationId::from_raw(id))?;
    Ok(Json(UnreadResponse { unread }))
}

/// Ordered message feed: a snapshot, then appends, retractions and clears.
async fn conversation_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let subscription = state.manager.stream(&ConversationId::from_raw(id))?;
    info!(
        conversation = %subscription.conversation_id(),
        subscription = subscription.id(),
        "Conversation stream opened"
    );

    let events = stream::unfold(subscription, |mut subscription| async move {
        let update = subscription.recv().await?;
        Some((update_event(&update), subscription))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn update_event(update: &StreamUpdate) -> Result<Event, axum::Error> {
    let name = match update {
        StreamUpdate::Snapshot { .. } => "snapshot",
        StreamUpdate::Appended { .. } => "appended",
        StreamUpdate::Retracted { .. } => "retracted",
        StreamUpdate::Cleared => "cleared",
        StreamUpdate::Disconnected { .. } => "disconnected",
    };
    Event::default().event(name).json_data(update)
}

// ─── Messages & attachments ───

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Message>, ApiError> {
    Ok(Json(state.manager.delete_message(MessageId(id))?))
}

async fn register_attachment(
    State(state): State<AppState>,
    Json(req): Json<RegisterAttachmentRequest>,
) -> Result<(StatusCode, Json<AttachmentRef>), ApiError> {
    let attachment = state
        .manager
        .attachments()
        .register(&req.kind, &req.handle)?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
