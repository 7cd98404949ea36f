//! HTTP surface of the router.
//!
//! Endpoints:
//! - `POST   /api/messages`                                             inbound turn from a channel or a root bot
//! - `POST   /v3/conversations/{routing_key}/activities`                skill sends into its conversation
//! - `POST   /v3/conversations/{routing_key}/activities/{activity_id}`  skill replies to an activity
//! - `PUT    /v3/conversations/{routing_key}/activities/{activity_id}`  skill updates an activity
//! - `DELETE /api/conversations/{channel_id}/{conversation_id}`         forget a parent conversation
//!
//! Every request is authenticated before any routing state is read. A skill's
//! `endOfConversation` and `event` activities run a turn on the parent conversation; every
//! other activity is queued for proactive delivery.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use skillrelay_auth::{
    parse_bearer, AuthResult, CallerContext, Claims, InboundAuthenticator, CHANNEL_SERVICE_HEADER,
};
use skillrelay_core::errors::{ApplicationError, InterfaceError};
use skillrelay_core::{Activity, ActivityType, CorrelationEntry, ProactiveJob, RoutingKey};
use skillrelay_router::{routes_as_skill_turn, ConnectorClient, ProactiveHandle, TurnRouter};
use tracing::{error, info, warn};
use uuid::Uuid;

const EMULATOR_CHANNEL: &str = "emulator";

#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<TurnRouter>,
    pub authenticator: InboundAuthenticator,
    pub connector: Arc<dyn ConnectorClient>,
    pub proactive: ProactiveHandle,
    /// Fallback when a request carries no channel-service header.
    pub channel_service: String,
    /// Replies travel back in the response body only; nothing is posted to the caller.
    pub skill_mode: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnReplies {
    pub activities: Vec<Activity>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDeleted {
    pub channel_id: String,
    pub conversation_id: String,
    pub correlations_removed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/messages", post(messages))
        .route("/v3/conversations/{routing_key}/activities", post(skill_callback))
        .route(
            "/v3/conversations/{routing_key}/activities/{activity_id}",
            post(skill_reply).put(skill_update),
        )
        .route("/api/conversations/{channel_id}/{conversation_id}", delete(delete_conversation))
        .with_state(state)
}

pub async fn messages(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> ApiResult<Json<TurnReplies>> {
    let correlation_id = activity.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let caller = CallerContext {
        service_url: activity.service_url.clone(),
        conversation_id: Some(activity.conversation.id.clone()),
    };
    admit(&state, &headers, &caller, &correlation_id).await?;

    let outcome = state
        .router
        .process(activity)
        .await
        .map_err(|failure| reject(failure.into_interface(&correlation_id)))?;

    if !state.skill_mode {
        post_replies(state.connector.as_ref(), &outcome.responses, &correlation_id).await;
    }

    Ok(Json(TurnReplies { activities: outcome.responses }))
}

/// Where a skill's activity lands in the parent conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
enum CallbackTarget {
    Conversation,
    ReplyTo(String),
    Update(String),
}

/// A skill posting into the conversation it was given. The routing key stands in for the
/// parent conversation id; the caller must be the skill the key was issued to.
pub async fn skill_callback(
    State(state): State<ApiState>,
    Path(routing_key): Path<String>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> ApiResult<Json<ResourceResponse>> {
    accept_skill_activity(state, RoutingKey(routing_key), headers, activity, CallbackTarget::Conversation)
        .await
}

/// A skill answering a specific activity, which is how skills reply when they do not use
/// `expectReplies`.
pub async fn skill_reply(
    State(state): State<ApiState>,
    Path((routing_key, activity_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> ApiResult<Json<ResourceResponse>> {
    let target = CallbackTarget::ReplyTo(activity_id);
    accept_skill_activity(state, RoutingKey(routing_key), headers, activity, target).await
}

pub async fn skill_update(
    State(state): State<ApiState>,
    Path((routing_key, activity_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(activity): Json<Activity>,
) -> ApiResult<Json<ResourceResponse>> {
    let target = CallbackTarget::Update(activity_id);
    accept_skill_activity(state, RoutingKey(routing_key), headers, activity, target).await
}

async fn accept_skill_activity(
    state: ApiState,
    routing_key: RoutingKey,
    headers: HeaderMap,
    activity: Activity,
    target: CallbackTarget,
) -> ApiResult<Json<ResourceResponse>> {
    let correlation_id = Uuid::new_v4().to_string();
    let caller = CallerContext {
        service_url: activity.service_url.clone(),
        conversation_id: Some(routing_key.0.clone()),
    };
    let claims = admit(&state, &headers, &caller, &correlation_id).await?;

    let entry = state
        .router
        .correlator()
        .resolve(&routing_key)
        .await
        .map_err(|failure| reject(failure.into_interface(&correlation_id)))?;

    if let Some(claims) = claims {
        if claims.app_id() != Some(entry.authorized_scope.as_str()) {
            warn!(
                event_name = "api.callback.scope_mismatch",
                correlation_id = %correlation_id,
                routing_key = %routing_key,
                app_id = claims.app_id().unwrap_or_default(),
                "caller does not own this routing key"
            );
            return Err(reject(
                ApplicationError::AuthenticationDenied.into_interface(&correlation_id),
            ));
        }
    }

    let activity_type = activity.activity_type.clone();
    if routes_as_skill_turn(&activity_type) && !matches!(target, CallbackTarget::Update(_)) {
        let id = activity.id.clone().unwrap_or_else(|| correlation_id.clone());
        info!(
            event_name = "api.callback.turn",
            correlation_id = %correlation_id,
            skill_id = %entry.skill_id,
            activity_type = activity_type.as_str(),
            "skill activity routed into the parent conversation"
        );
        // The skill may call back while its own invocation still holds this conversation's
        // lock, so the turn must not block the response.
        tokio::spawn(run_skill_turn(state, entry, activity, correlation_id));
        return Ok(Json(ResourceResponse { id }));
    }

    let job = ProactiveJob::new(routing_key, activity).with_correlation_id(&correlation_id);
    let job = match target {
        CallbackTarget::Conversation => job,
        CallbackTarget::ReplyTo(activity_id) => job.in_reply_to(activity_id),
        CallbackTarget::Update(activity_id) => job.replacing(activity_id),
    };
    let id = job.id.0.clone();
    state
        .proactive
        .enqueue(job)
        .map_err(|failure| reject(failure.into_interface(&correlation_id)))?;

    info!(
        event_name = "api.callback.enqueued",
        correlation_id = %correlation_id,
        skill_id = %entry.skill_id,
        activity_type = activity_type.as_str(),
        "skill activity queued for proactive delivery"
    );
    Ok(Json(ResourceResponse { id }))
}

async fn run_skill_turn(
    state: ApiState,
    entry: CorrelationEntry,
    activity: Activity,
    correlation_id: String,
) {
    match state.router.process_skill_activity(&entry, activity).await {
        Ok(outcome) => {
            post_replies(state.connector.as_ref(), &outcome.responses, &correlation_id).await;
        }
        Err(failure) => {
            error!(
                event_name = "api.callback.turn_failed",
                correlation_id = %correlation_id,
                skill_id = %entry.skill_id,
                error = %failure,
                "skill activity could not be routed"
            );
        }
    }
}

pub async fn delete_conversation(
    State(state): State<ApiState>,
    Path((channel_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<ConversationDeleted>> {
    let correlation_id = Uuid::new_v4().to_string();
    let caller =
        CallerContext { service_url: String::new(), conversation_id: Some(conversation_id.clone()) };
    admit(&state, &headers, &caller, &correlation_id).await?;

    let correlations_removed = state
        .router
        .delete_conversation(&channel_id, &conversation_id)
        .await
        .map_err(|failure| reject(failure.into_interface(&correlation_id)))?;

    info!(
        event_name = "api.conversation.deleted",
        correlation_id = %correlation_id,
        conversation_id = %conversation_id,
        correlations_removed,
        "parent conversation forgotten"
    );
    Ok(Json(ConversationDeleted { channel_id, conversation_id, correlations_removed }))
}

async fn admit(
    state: &ApiState,
    headers: &HeaderMap,
    caller: &CallerContext,
    correlation_id: &str,
) -> ApiResult<Option<Claims>> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer);
    let channel_service = headers
        .get(CHANNEL_SERVICE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(state.channel_service.as_str());

    match state.authenticator.check(bearer, caller, channel_service).await {
        AuthResult::Allowed { claims } => Ok(claims),
        AuthResult::Denied { reason } => {
            warn!(
                event_name = "api.request_denied",
                correlation_id,
                reason = %reason,
                service_url = %caller.service_url,
                "inbound request rejected"
            );
            Err(reject(ApplicationError::AuthenticationDenied.into_interface(correlation_id)))
        }
    }
}

async fn post_replies(connector: &dyn ConnectorClient, replies: &[Activity], correlation_id: &str) {
    for reply in replies.iter().filter(|reply| deliverable(reply)) {
        if let Err(failure) = connector.send_to_conversation(reply).await {
            error!(
                event_name = "api.reply_failed",
                correlation_id,
                conversation_id = %reply.conversation.id,
                error = %failure,
                "could not post reply to the channel"
            );
        }
    }
}

/// Traces only reach the emulator; channels drop them.
fn deliverable(activity: &Activity) -> bool {
    activity.activity_type != ActivityType::Trace || activity.channel_id == EMULATOR_CHANNEL
}

fn reject(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(
            event_name = "api.request_failed",
            correlation_id = error.correlation_id(),
            error = %error,
            "request failed"
        );
    }
    (
        status,
        Json(ApiError {
            error: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
