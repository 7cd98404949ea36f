use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use skillrelay_auth::InboundAuthenticator;
use skillrelay_db::{ping, DbPool};
use skillrelay_router::ProactiveHandle;

use crate::bootstrap::Application;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    authenticator: InboundAuthenticator,
    proactive: ProactiveHandle,
    skills: Vec<String>,
    skill_mode: bool,
}

impl HealthState {
    pub fn for_application(app: &Application) -> Self {
        Self {
            db_pool: app.db_pool.clone(),
            authenticator: app.authenticator.clone(),
            proactive: app.proactive.handle(),
            skills: app.config.skills.iter().map(|skill| skill.id.clone()).collect(),
            skill_mode: app.config.router.skill_mode,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoutingSummary {
    /// `root` answers a channel; `skill` answers another bot.
    pub mode: &'static str,
    pub skills: Vec<String>,
    pub authentication: &'static str,
    pub allowed_callers: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub routing: RoutingSummary,
    pub correlation_store: HealthCheck,
    pub proactive_queue: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let correlation_store = store_check(&state.db_pool).await;
    let proactive_queue = queue_check(&state.proactive);
    let ready = correlation_store.status == "ready" && proactive_queue.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        routing: RoutingSummary {
            mode: if state.skill_mode { "skill" } else { "root" },
            skills: state.skills.clone(),
            authentication: if state.authenticator.is_enabled() { "enabled" } else { "disabled" },
            allowed_callers: state.authenticator.allowed_caller_count(),
        },
        correlation_store,
        proactive_queue,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn store_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "routing keys resolvable".to_string() },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("correlation store unreachable: {error}"),
        },
    }
}

/// A full queue turns skill callbacks away with 503.
fn queue_check(proactive: &ProactiveHandle) -> HealthCheck {
    let queued = proactive.queued();
    let capacity = proactive.capacity();
    HealthCheck {
        status: if queued < capacity { "ready" } else { "degraded" },
        detail: format!("{queued} of {capacity} deliveries queued"),
    }
}
