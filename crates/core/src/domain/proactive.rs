use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::activity::Activity;
use crate::domain::correlation::RoutingKey;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProactiveJobId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactiveJobState {
    Queued,
    Running,
    Delivered,
    /// No correlation entry for the key. Dropped, never retried.
    Dropped,
    FailedTerminal,
}

impl ProactiveJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Delivered => "delivered",
            Self::Dropped => "dropped",
            Self::FailedTerminal => "failed_terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Dropped | Self::FailedTerminal)
    }
}

/// What the connector does with a job's payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ProactiveOperation {
    /// Post as a new activity, threaded under `reply_to_id` when the payload has one.
    #[default]
    Send,
    /// Replace an activity already posted to the conversation.
    Update { activity_id: String },
}

/// One unit of out-of-band work: deliver `payload` into whatever parent conversation
/// `routing_key` resolves to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProactiveJob {
    pub id: ProactiveJobId,
    pub routing_key: RoutingKey,
    pub payload: Activity,
    #[serde(default)]
    pub operation: ProactiveOperation,
    pub correlation_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl ProactiveJob {
    pub fn new(routing_key: RoutingKey, payload: Activity) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            id: ProactiveJobId(id.clone()),
            routing_key,
            payload,
            operation: ProactiveOperation::Send,
            correlation_id: id,
            enqueued_at: Utc::now(),
        }
    }

    /// Threads the payload under an activity of the parent conversation.
    pub fn in_reply_to(mut self, activity_id: impl Into<String>) -> Self {
        self.payload.reply_to_id = Some(activity_id.into());
        self
    }

    pub fn replacing(mut self, activity_id: impl Into<String>) -> Self {
        self.operation = ProactiveOperation::Update { activity_id: activity_id.into() };
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ProactiveJob, ProactiveJobState, ProactiveOperation};
    use crate::domain::activity::Activity;
    use crate::domain::correlation::RoutingKey;

    #[test]
    fn reply_and_update_jobs_keep_the_target_activity() {
        let key = RoutingKey("rk_1".to_owned());
        let reply = ProactiveJob::new(key.clone(), Activity::message("hi")).in_reply_to("act-7");
        assert_eq!(reply.payload.reply_to_id.as_deref(), Some("act-7"));
        assert_eq!(reply.operation, ProactiveOperation::Send);

        let update = ProactiveJob::new(key, Activity::message("edited")).replacing("act-8");
        assert_eq!(update.operation, ProactiveOperation::Update { activity_id: "act-8".to_owned() });
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!ProactiveJobState::Queued.is_terminal());
        assert!(!ProactiveJobState::Running.is_terminal());
        assert!(ProactiveJobState::Dropped.is_terminal());
    }
}
