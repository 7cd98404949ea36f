use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use skillrelay_core::errors::ApplicationError;
use skillrelay_core::{Activity, ActivityType, RoutingKey, SkillDefinition, SkillId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::TurnContext;
use crate::handler::{DialogFrame, FrameContext, FrameStatus};

/// Event a skill receives when the root wants it to repeat its last prompt.
pub const REPROMPT_EVENT: &str = "repromptDialog";

/// One call into a remote skill. `activity` is already addressed to the routing key so
/// the parent conversation id never leaves this service.
#[derive(Clone, Debug, PartialEq)]
pub struct SkillInvocation {
    pub skill_id: SkillId,
    pub endpoint: String,
    pub app_identity: String,
    pub activity: Activity,
    pub routing_key: RoutingKey,
    pub required_auth_connections: BTreeSet<String>,
}

impl SkillInvocation {
    pub fn new(skill: &SkillDefinition, routing_key: RoutingKey, activity: &Activity) -> Self {
        let mut activity = activity.clone();
        activity.conversation.id = routing_key.0.clone();
        Self {
            skill_id: skill.id.clone(),
            endpoint: skill.endpoint.clone(),
            app_identity: skill.app_identity.clone(),
            activity,
            routing_key,
            required_auth_connections: skill.required_auth_connections.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkillResponse {
    pub activities: Vec<Activity>,
}

impl SkillResponse {
    pub fn is_complete(&self) -> bool {
        self.activities
            .iter()
            .any(|activity| activity.activity_type == ActivityType::EndOfConversation)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkillClientError {
    #[error("skill transport failed: {0}")]
    Transport(String),
    #[error("skill answered with status {status}")]
    Status { status: u16 },
    #[error("skill response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SkillClient: Send + Sync {
    async fn invoke(&self, invocation: SkillInvocation) -> Result<SkillResponse, SkillClientError>;
}

/// Remote skill occupying the active slot.
pub struct SkillFrame {
    skill: Arc<SkillDefinition>,
    client: Arc<dyn SkillClient>,
    timeout: Duration,
}

impl SkillFrame {
    pub fn new(skill: Arc<SkillDefinition>, client: Arc<dyn SkillClient>, timeout: Duration) -> Self {
        Self { skill, client, timeout }
    }

    fn routing_key(&self, frame: &FrameContext) -> Result<RoutingKey, ApplicationError> {
        frame.routing_key.clone().ok_or_else(|| ApplicationError::SkillInvocation {
            skill_id: self.skill.id.to_string(),
            message: "no routing key for skill frame".to_owned(),
        })
    }

    async fn invoke(
        &self,
        activity: &Activity,
        frame: &FrameContext,
    ) -> Result<SkillResponse, ApplicationError> {
        let invocation = SkillInvocation::new(&self.skill, self.routing_key(frame)?, activity);
        debug!(
            event_name = "skill.invoke",
            skill_id = %self.skill.id,
            routing_key = %invocation.routing_key,
            activity_type = invocation.activity.activity_type.as_str(),
            "invoking skill"
        );

        match tokio::time::timeout(self.timeout, self.client.invoke(invocation)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => {
                warn!(event_name = "skill.invoke_failed", skill_id = %self.skill.id, error = %error, "skill call failed");
                Err(ApplicationError::SkillInvocation {
                    skill_id: self.skill.id.to_string(),
                    message: error.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    event_name = "skill.invoke_timed_out",
                    skill_id = %self.skill.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "skill call timed out"
                );
                Err(ApplicationError::SkillInvocation {
                    skill_id: self.skill.id.to_string(),
                    message: format!("timed out after {}ms", self.timeout.as_millis()),
                })
            }
        }
    }

    /// Relays what the skill said to the user and reports whether it finished.
    async fn exchange(
        &self,
        turn: &mut TurnContext,
        activity: &Activity,
        frame: &FrameContext,
    ) -> Result<FrameStatus, ApplicationError> {
        let response = self.invoke(activity, frame).await?;
        let status = if response.is_complete() { FrameStatus::Complete } else { FrameStatus::Waiting };
        for reply in response.activities {
            if reply.activity_type != ActivityType::EndOfConversation {
                turn.send(reply);
            }
        }
        Ok(status)
    }
}

#[async_trait]
impl DialogFrame for SkillFrame {
    async fn begin(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<FrameStatus, ApplicationError> {
        let activity = turn.activity().clone();
        self.exchange(turn, &activity, frame).await
    }

    async fn continue_dialog(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<FrameStatus, ApplicationError> {
        let activity = turn.activity().clone();
        self.exchange(turn, &activity, frame).await
    }

    async fn reprompt(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<(), ApplicationError> {
        let reprompt = addressed_like(turn.activity(), Activity::event(REPROMPT_EVENT, None));
        self.exchange(turn, &reprompt, frame).await.map(|_| ())
    }

    async fn cancel(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<(), ApplicationError> {
        let end = addressed_like(turn.activity(), Activity::end_of_conversation());
        // The skill's answer to an end-of-conversation is not shown to the user.
        self.invoke(&end, frame).await.map(|_| ())
    }
}

/// Gives `activity` the addressing of the inbound turn, as if the user had sent it.
fn addressed_like(inbound: &Activity, activity: Activity) -> Activity {
    Activity {
        id: inbound.id.clone(),
        channel_id: inbound.channel_id.clone(),
        conversation: inbound.conversation.clone(),
        from: inbound.from.clone(),
        recipient: inbound.recipient.clone(),
        service_url: inbound.service_url.clone(),
        locale: inbound.locale.clone(),
        ..activity
    }
}
