use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use skillrelay_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use skillrelay_core::config::RouterConfig;
use skillrelay_core::errors::{ApplicationError, DomainError};
use skillrelay_core::routing::{SkillRoutingFlow, TransitionOutcome};
use skillrelay_core::{
    Activity, ActivityType, ConversationKey, CorrelationEntry, InterruptionAction, RouterAction,
    RouterContext, RouterEvent, RouterPhase, RouterState, RoutingEngine, SkillDefinition, SkillId,
    SkillRegistry, TOKEN_RESPONSE_EVENT,
};
use skillrelay_db::{RepositoryError, RouterStateRepository};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::TurnContext;
use crate::correlator::ConversationCorrelator;
use crate::handler::{DialogFrame, FrameContext, FrameStatus, LocalRoute, RootHandler};
use crate::locks::ConversationLocks;
use crate::recognizer::Recognizer;
use crate::skill_client::{SkillClient, SkillFrame};

const ACTOR: &str = "turn_router";
const TURN_ERROR_LABEL: &str = "TurnError";

/// Who the turn's activity came from.
#[derive(Clone, Copy)]
enum TurnSource<'a> {
    /// The channel or calling bot, through the messages endpoint.
    Caller,
    /// A skill posting out of band through the routing key of `entry`.
    Skill(&'a CorrelationEntry),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterSettings {
    pub skill_timeout: Duration,
    pub skill_mode: bool,
    pub suppress_completion_message: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            skill_timeout: Duration::from_secs(30),
            skill_mode: false,
            suppress_completion_message: false,
        }
    }
}

impl From<&RouterConfig> for RouterSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            skill_timeout: Duration::from_secs(config.skill_timeout_secs),
            skill_mode: config.skill_mode,
            suppress_completion_message: config.suppress_completion_message,
        }
    }
}

/// Everything the router talks to. Built once by the host and shared across turns.
#[derive(Clone)]
pub struct RouterServices {
    pub registry: Arc<SkillRegistry>,
    pub correlator: Arc<ConversationCorrelator>,
    pub recognizer: Arc<dyn Recognizer>,
    pub skills: Arc<dyn SkillClient>,
    pub root: Arc<dyn RootHandler>,
    pub states: Arc<dyn RouterStateRepository>,
    pub locks: Arc<ConversationLocks>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub responses: Vec<Activity>,
    pub state: RouterState,
}

impl TurnOutcome {
    pub fn phase(&self) -> RouterPhase {
        self.state.phase()
    }
}

pub struct TurnRouter {
    services: RouterServices,
    dialogs: HashMap<String, Arc<dyn DialogFrame>>,
    engine: RoutingEngine<SkillRoutingFlow>,
    settings: RouterSettings,
}

impl TurnRouter {
    pub fn new(services: RouterServices, settings: RouterSettings) -> Self {
        Self { services, dialogs: HashMap::new(), engine: RoutingEngine::default(), settings }
    }

    /// Registers a locally hosted dialog the root can begin from `RootHandler::route`.
    pub fn with_dialog(mut self, dialog_id: impl Into<String>, dialog: Arc<dyn DialogFrame>) -> Self {
        self.dialogs.insert(dialog_id.into(), dialog);
        self
    }

    pub fn correlator(&self) -> &Arc<ConversationCorrelator> {
        &self.services.correlator
    }

    pub fn locks(&self) -> &Arc<ConversationLocks> {
        &self.services.locks
    }

    /// Runs one turn to completion under the conversation's lock. Failures inside the turn
    /// are contained; only loading or saving router state can fail the call.
    pub async fn process(&self, activity: Activity) -> Result<TurnOutcome, ApplicationError> {
        self.run(activity, TurnSource::Caller).await
    }

    /// Runs a turn on the parent conversation of `entry` for an activity its skill sent out
    /// of band. `endOfConversation` completes the skill's frame and releases the routing
    /// key; events go to the root. The outcome's responses are addressed to the user.
    pub async fn process_skill_activity(
        &self,
        entry: &CorrelationEntry,
        activity: Activity,
    ) -> Result<TurnOutcome, ApplicationError> {
        if !routes_as_skill_turn(&activity.activity_type) {
            return Err(DomainError::InvariantViolation(format!(
                "skill activity of type `{}` is delivered, not routed",
                activity.activity_type.as_str()
            ))
            .into());
        }
        let activity = activity.as_sent_into(&entry.parent_reference);
        self.run(activity, TurnSource::Skill(entry)).await
    }

    async fn run(
        &self,
        activity: Activity,
        source: TurnSource<'_>,
    ) -> Result<TurnOutcome, ApplicationError> {
        let key = activity.conversation_key();
        let correlation_id = activity.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let _guard = self.services.locks.lock(&key).await;

        let mut state = self.services.states.load(&key).await.map_err(persistence)?.unwrap_or_default();
        state.turn_count += 1;

        let audit = AuditContext::new(
            Some(key.to_string()),
            state.active_skill_id.as_ref().map(ToString::to_string),
            correlation_id.clone(),
            ACTOR,
        );
        debug!(
            event_name = "router.turn_started",
            correlation_id = %correlation_id,
            conversation_id = %key,
            activity_type = activity.activity_type.as_str(),
            phase = ?state.phase(),
            "turn started"
        );

        let mut turn = TurnContext::new(activity, correlation_id.clone());
        let result = match source {
            TurnSource::Caller => self.run_turn(&mut turn, &mut state, &audit).await,
            TurnSource::Skill(entry) => self.run_skill_turn(&mut turn, &mut state, entry, &audit).await,
        };
        if let Err(error) = result {
            self.contain_failure(&mut turn, &mut state, &error, &audit).await;
        }

        self.services.states.save(&key, &state).await.map_err(persistence)?;
        info!(
            event_name = "router.turn_completed",
            correlation_id = %correlation_id,
            conversation_id = %key,
            phase = ?state.phase(),
            responses = turn.responses().len(),
            "turn completed"
        );
        Ok(TurnOutcome { responses: turn.into_responses(), state })
    }

    /// Forgets a parent conversation: its skill correlations and its router state.
    pub async fn delete_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<u64, ApplicationError> {
        let key = ConversationKey::new(channel_id, conversation_id);
        let _guard = self.services.locks.lock(&key).await;
        let removed =
            self.services.correlator.delete_for_conversation(channel_id, conversation_id).await?;
        self.services.states.delete(&key).await.map_err(persistence)?;
        Ok(removed)
    }

    async fn run_turn(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let activity_type = turn.activity().activity_type.clone();
        match activity_type {
            ActivityType::ConversationUpdate if turn.activity().is_start_activity() => {
                if !state.started {
                    state.started = true;
                    self.services.root.on_start(turn).await?;
                }
                Ok(())
            }
            ActivityType::Message => {
                // Card submits arrive as messages that carry only a value.
                if turn.activity().text().is_none() && turn.activity().value.is_some() {
                    self.services.root.on_event(turn).await.map(|_| ())
                } else {
                    self.route_message(turn, state, audit).await
                }
            }
            ActivityType::Event => self.route_event(turn, state, audit).await,
            ActivityType::Invoke if !state.is_idle() => self.continue_active(turn, state, audit).await,
            ActivityType::EndOfConversation => {
                let outcome = self.transition(state, RouterEvent::CancelRequested, audit)?;
                self.leave_frame(turn, state, &outcome).await
            }
            _ => self.services.root.on_system_message(turn).await,
        }
    }

    async fn run_skill_turn(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        entry: &CorrelationEntry,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let activity_type = turn.activity().activity_type.clone();
        match activity_type {
            ActivityType::EndOfConversation
                if state.active_skill_key() == Some(&entry.routing_key) =>
            {
                info!(
                    event_name = "router.skill_ended_out_of_band",
                    correlation_id = turn.correlation_id(),
                    skill_id = %entry.skill_id,
                    routing_key = %entry.routing_key,
                    "skill ended its conversation"
                );
                self.after_frame(turn, state, FrameStatus::Complete, audit).await
            }
            ActivityType::EndOfConversation => {
                // The frame is already gone; only the key is left to release.
                debug!(
                    event_name = "router.stale_skill_end",
                    correlation_id = turn.correlation_id(),
                    skill_id = %entry.skill_id,
                    "skill ended a conversation that is no longer active"
                );
                self.services.correlator.delete(&entry.routing_key).await.map(|_| ())
            }
            _ => {
                let name = turn.activity().name.clone().unwrap_or_default();
                if !self.services.root.on_event(turn).await? {
                    turn.send_trace(
                        "Unknown Event",
                        format!("Unknown Event '{name}' was received but not processed."),
                    );
                }
                Ok(())
            }
        }
    }

    async fn route_event(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let name = turn.activity().name.clone().unwrap_or_default();
        if name == TOKEN_RESPONSE_EVENT && !state.is_idle() {
            return self.continue_active(turn, state, audit).await;
        }
        if !self.services.root.on_event(turn).await? {
            turn.send_trace(
                "Unknown Event",
                format!("Unknown Event '{name}' was received but not processed."),
            );
        }
        Ok(())
    }

    async fn route_message(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let interruption = match self.services.recognizer.recognize_interruption(turn.activity()).await
        {
            Ok(interruption) => interruption,
            Err(error) => {
                warn!(
                    event_name = "router.interruption_recognition_failed",
                    correlation_id = turn.correlation_id(),
                    error = %error,
                    "interruption check failed; continuing without one"
                );
                None
            }
        };

        if let Some(interruption) = interruption {
            let phase = state.phase();
            let action = self.services.root.on_interrupt(turn, interruption, &phase).await?;
            info!(
                event_name = "router.interrupted",
                correlation_id = turn.correlation_id(),
                interruption = interruption.as_str(),
                action = ?action,
                "global interruption recognized"
            );
            let outcome =
                self.transition(state, RouterEvent::Interrupted { interruption, action }, audit)?;
            if outcome.requires(&RouterAction::RepromptFrame) {
                let (frame, context) = self.active_frame(state)?;
                frame.reprompt(turn, &context).await?;
            }
            self.leave_frame(turn, state, &outcome).await?;

            match action {
                InterruptionAction::Resume | InterruptionAction::Handled => return Ok(()),
                InterruptionAction::StartNew | InterruptionAction::NoAction => {}
            }
        }

        match state.phase() {
            RouterPhase::Active(_) => self.continue_active(turn, state, audit).await,
            RouterPhase::Idle => self.route_idle(turn, state, audit).await,
        }
    }

    async fn route_idle(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let intent = self.services.recognizer.recognize_intent(turn.activity()).await?;
        if let Some(skill) =
            intent.as_deref().and_then(|intent| self.services.registry.resolve_skill_for_intent(intent))
        {
            return self.start_skill(turn, state, skill, audit).await;
        }

        let outcome = self.transition(state, RouterEvent::NoSkillMatched, audit)?;
        if outcome.requires(&RouterAction::HandleLocally) {
            match self.services.root.route(turn, intent.as_deref()).await? {
                LocalRoute::Handled => {}
                LocalRoute::BeginDialog(dialog_id) => {
                    self.start_dialog(turn, state, dialog_id, audit).await?;
                }
            }
        }
        Ok(())
    }

    async fn start_skill(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        skill: Arc<SkillDefinition>,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let outcome =
            self.transition(state, RouterEvent::SkillSelected { skill_id: skill.id.0.clone() }, audit)?;

        if !outcome.requires(&RouterAction::CreateCorrelation) {
            return Err(DomainError::InvariantViolation(format!(
                "skill `{}` selected without a correlation",
                skill.id
            ))
            .into());
        }
        let parent = turn.activity().conversation_reference();
        let routing_key =
            self.services.correlator.create(&parent, &skill.id, &skill.app_identity).await?;
        state.push_skill(skill.id.clone(), routing_key.clone());
        state.suppress_completion_message = self.settings.suppress_completion_message;
        info!(
            event_name = "router.skill_selected",
            correlation_id = turn.correlation_id(),
            skill_id = %skill.id,
            routing_key = %routing_key,
            "handing conversation to skill"
        );

        if !outcome.requires(&RouterAction::DispatchToSkill) {
            return Ok(());
        }
        let context = FrameContext { frame_id: skill.id.0.clone(), routing_key: Some(routing_key) };
        let status = self.skill_frame(skill).begin(turn, &context).await?;
        self.after_frame(turn, state, status, audit).await
    }

    async fn start_dialog(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        dialog_id: String,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let dialog = self.local_dialog(&dialog_id)?;
        let outcome =
            self.transition(state, RouterEvent::DialogBegun { dialog_id: dialog_id.clone() }, audit)?;
        state.push_dialog(dialog_id.clone());
        state.suppress_completion_message = self.settings.suppress_completion_message;

        if !outcome.requires(&RouterAction::BeginDialog) {
            return Ok(());
        }
        let context = FrameContext { frame_id: dialog_id, routing_key: None };
        let status = dialog.begin(turn, &context).await?;
        self.after_frame(turn, state, status, audit).await
    }

    async fn continue_active(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let (frame, context) = self.active_frame(state)?;
        let status = frame.continue_dialog(turn, &context).await?;
        self.after_frame(turn, state, status, audit).await
    }

    async fn after_frame(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        status: FrameStatus,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let event = match status {
            FrameStatus::Waiting => RouterEvent::FrameWaiting,
            FrameStatus::Complete => RouterEvent::FrameCompleted,
        };
        let outcome = self.transition(state, event, audit)?;
        self.leave_frame(turn, state, &outcome).await
    }

    /// Runs the exit actions of a transition and clears the frame stack when it lands on
    /// `Idle`.
    async fn leave_frame(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        outcome: &TransitionOutcome,
    ) -> Result<(), ApplicationError> {
        if outcome.requires(&RouterAction::CancelFrame) {
            let (frame, context) = self.active_frame(state)?;
            if let Err(error) = frame.cancel(turn, &context).await {
                warn!(
                    event_name = "router.frame_cancel_failed",
                    correlation_id = turn.correlation_id(),
                    frame_id = %context.frame_id,
                    error = %error,
                    "frame did not acknowledge cancellation"
                );
            }
        }
        if outcome.requires(&RouterAction::SendCompletionMessage) {
            let frame_id = state.active_frame().unwrap_or_default().to_owned();
            self.services.root.on_frame_complete(turn, &frame_id).await?;
        }
        if outcome.requires(&RouterAction::DeleteCorrelation) {
            if let Some(routing_key) = state.active_skill_key() {
                self.services.correlator.delete(routing_key).await?;
            }
        }
        if outcome.requires(&RouterAction::SendEndOfConversation) {
            turn.send(Activity::end_of_conversation());
        }
        if outcome.to.is_idle() {
            state.clear_frames();
        }
        Ok(())
    }

    async fn contain_failure(
        &self,
        turn: &mut TurnContext,
        state: &mut RouterState,
        failure: &ApplicationError,
        audit: &AuditContext,
    ) {
        error!(
            event_name = "router.turn_failed",
            correlation_id = turn.correlation_id(),
            conversation_id = audit.conversation_key.as_deref().unwrap_or("unknown"),
            frame_id = state.active_frame().unwrap_or("none"),
            error = %failure,
            "turn failed; resetting conversation"
        );

        let outcome = self.transition(state, RouterEvent::TurnFailed, audit).unwrap_or_else(|_| {
            TransitionOutcome {
                from: state.phase(),
                to: RouterPhase::Idle,
                event: RouterEvent::TurnFailed,
                actions: vec![
                    RouterAction::SendApology,
                    RouterAction::EmitDiagnosticTrace,
                    RouterAction::ResetState,
                    RouterAction::DeleteCorrelation,
                ],
            }
        });

        if outcome.requires(&RouterAction::SendApology) {
            turn.send(self.services.root.apology());
        }
        if outcome.requires(&RouterAction::EmitDiagnosticTrace) {
            turn.send_trace(TURN_ERROR_LABEL, failure.to_string());
        }
        if outcome.requires(&RouterAction::DeleteCorrelation) {
            if let Some(routing_key) = state.active_skill_key() {
                if let Err(error) = self.services.correlator.delete(routing_key).await {
                    warn!(
                        event_name = "router.correlation_cleanup_failed",
                        correlation_id = turn.correlation_id(),
                        routing_key = %routing_key,
                        error = %error,
                        "could not remove correlation of failed skill"
                    );
                }
            }
        }
        if outcome.requires(&RouterAction::ResetState) {
            state.reset();
        }

        self.services.audit.emit(
            AuditEvent::from_context(audit, "router.turn_failed", AuditCategory::Routing, AuditOutcome::Failed)
                .with_metadata("error", failure.to_string()),
        );
    }

    fn transition(
        &self,
        state: &RouterState,
        event: RouterEvent,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let context = RouterContext {
            active_is_skill: state.active_frame_is_skill(),
            suppress_completion_message: state.suppress_completion_message,
            skill_mode: self.settings.skill_mode,
        };
        self.engine
            .apply_with_audit(&state.phase(), &event, &context, self.services.audit.as_ref(), audit)
            .map_err(|error| DomainError::from(error).into())
    }

    fn active_frame(
        &self,
        state: &RouterState,
    ) -> Result<(Arc<dyn DialogFrame>, FrameContext), ApplicationError> {
        let frame_id = state
            .active_frame()
            .ok_or_else(|| DomainError::InvariantViolation("no active frame".to_owned()))?
            .to_owned();

        match active_skill(state) {
            Some(skill_id) => {
                let skill = self
                    .services
                    .registry
                    .get(&skill_id)
                    .ok_or_else(|| DomainError::UnknownSkill(skill_id.to_string()))?;
                let routing_key = state.active_skill_key().cloned().ok_or_else(|| {
                    DomainError::InvariantViolation(format!("skill `{skill_id}` has no routing key"))
                })?;
                Ok((self.skill_frame(skill), FrameContext { frame_id, routing_key: Some(routing_key) }))
            }
            None => {
                let dialog = self.local_dialog(&frame_id)?;
                Ok((dialog, FrameContext { frame_id, routing_key: None }))
            }
        }
    }

    fn local_dialog(&self, dialog_id: &str) -> Result<Arc<dyn DialogFrame>, ApplicationError> {
        self.dialogs.get(dialog_id).cloned().ok_or_else(|| {
            DomainError::InvariantViolation(format!("no local dialog registered as `{dialog_id}`"))
                .into()
        })
    }

    fn skill_frame(&self, skill: Arc<SkillDefinition>) -> Arc<dyn DialogFrame> {
        Arc::new(SkillFrame::new(skill, Arc::clone(&self.services.skills), self.settings.skill_timeout))
    }
}

fn active_skill(state: &RouterState) -> Option<SkillId> {
    state.active_skill_id.clone().filter(|_| state.active_frame_is_skill())
}

/// Skill activities that change the parent conversation's routing. Everything else a skill
/// sends is posted to the user as is.
pub fn routes_as_skill_turn(activity_type: &ActivityType) -> bool {
    matches!(activity_type, ActivityType::EndOfConversation | ActivityType::Event)
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
