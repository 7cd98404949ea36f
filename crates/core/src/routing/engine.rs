use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::routing::states::{
    Interruption, InterruptionAction, RouterAction, RouterContext, RouterEvent, RouterPhase,
    TransitionOutcome,
};

pub trait RoutingDefinition {
    fn initial_phase(&self) -> RouterPhase;
    fn transition(
        &self,
        current: &RouterPhase,
        event: &RouterEvent,
        context: &RouterContext,
    ) -> Result<TransitionOutcome, RouterTransitionError>;
}

/// Single-frame routing: at most one skill or local dialog is active per conversation.
#[derive(Clone, Debug, Default)]
pub struct SkillRoutingFlow;

impl RoutingDefinition for SkillRoutingFlow {
    fn initial_phase(&self) -> RouterPhase {
        RouterPhase::Idle
    }

    fn transition(
        &self,
        current: &RouterPhase,
        event: &RouterEvent,
        context: &RouterContext,
    ) -> Result<TransitionOutcome, RouterTransitionError> {
        transition_skill_routing(current, event, context)
    }
}

#[derive(Clone, Debug)]
pub struct RoutingEngine<F> {
    flow: F,
}

impl<F> RoutingEngine<F>
where
    F: RoutingDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_phase(&self) -> RouterPhase {
        self.flow.initial_phase()
    }

    pub fn apply(
        &self,
        current: &RouterPhase,
        event: &RouterEvent,
        context: &RouterContext,
    ) -> Result<TransitionOutcome, RouterTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &RouterPhase,
        event: &RouterEvent,
        context: &RouterContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, RouterTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "router.transition_applied",
                        AuditCategory::Routing,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "router.transition_rejected",
                        AuditCategory::Routing,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for RoutingEngine<SkillRoutingFlow> {
    fn default() -> Self {
        Self::new(SkillRoutingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouterTransitionError {
    #[error("invalid router transition from {phase:?} using event {event:?}")]
    InvalidTransition { phase: RouterPhase, event: RouterEvent },
}

/// Built-in answer to a global interruption when the root handler does not override it.
pub fn default_interruption_action(
    interruption: Interruption,
    phase: &RouterPhase,
) -> InterruptionAction {
    match (interruption, phase) {
        (Interruption::Cancel, _) => InterruptionAction::Handled,
        (Interruption::Help, RouterPhase::Active(_)) => InterruptionAction::Resume,
        (Interruption::Help, RouterPhase::Idle) => InterruptionAction::Handled,
        (Interruption::Repeat, RouterPhase::Active(_)) => InterruptionAction::Resume,
        (Interruption::Repeat, RouterPhase::Idle) => InterruptionAction::NoAction,
        (Interruption::StartOver, _) => InterruptionAction::StartNew,
    }
}

fn transition_skill_routing(
    current: &RouterPhase,
    event: &RouterEvent,
    context: &RouterContext,
) -> Result<TransitionOutcome, RouterTransitionError> {
    use InterruptionAction::{Handled, NoAction, Resume, StartNew};
    use RouterAction::{
        BeginDialog, CancelFrame, CreateCorrelation, DeleteCorrelation, DispatchToSkill,
        EmitDiagnosticTrace, HandleLocally, RepromptFrame, ResetState, SendApology,
        SendCompletionMessage, SendEndOfConversation,
    };
    use RouterPhase::{Active, Idle};

    let release_frame = |actions: &mut Vec<RouterAction>| {
        if context.active_is_skill {
            actions.push(DeleteCorrelation);
        }
    };
    let end_for_caller = |actions: &mut Vec<RouterAction>| {
        if context.skill_mode {
            actions.push(SendEndOfConversation);
        }
    };

    let (to, actions) = match (current, event) {
        (Active(_), RouterEvent::Interrupted { interruption: Interruption::Cancel, action: Handled })
        | (Active(_), RouterEvent::CancelRequested) => {
            let mut actions = vec![CancelFrame];
            release_frame(&mut actions);
            end_for_caller(&mut actions);
            (Idle, actions)
        }
        (Idle, RouterEvent::Interrupted { interruption: Interruption::Cancel, action: Handled })
        | (Idle, RouterEvent::CancelRequested) => {
            let mut actions = Vec::new();
            end_for_caller(&mut actions);
            (Idle, actions)
        }
        (Active(frame), RouterEvent::Interrupted { action: Resume, .. }) => {
            (Active(frame.clone()), vec![RepromptFrame])
        }
        (Active(_), RouterEvent::Interrupted { action: StartNew, .. }) => {
            let mut actions = vec![CancelFrame];
            release_frame(&mut actions);
            (Idle, actions)
        }
        (Idle, RouterEvent::Interrupted { action: StartNew, .. }) => (Idle, Vec::new()),
        (phase, RouterEvent::Interrupted { action: Handled | NoAction, .. }) => {
            (phase.clone(), Vec::new())
        }
        (Idle, RouterEvent::SkillSelected { skill_id }) => {
            (Active(skill_id.clone()), vec![CreateCorrelation, DispatchToSkill])
        }
        (Idle, RouterEvent::DialogBegun { dialog_id }) => {
            (Active(dialog_id.clone()), vec![BeginDialog])
        }
        (Idle, RouterEvent::NoSkillMatched) => (Idle, vec![HandleLocally]),
        (Active(frame), RouterEvent::FrameWaiting) => (Active(frame.clone()), Vec::new()),
        (Active(_), RouterEvent::FrameCompleted) => {
            let mut actions = Vec::new();
            if !context.suppress_completion_message {
                actions.push(SendCompletionMessage);
            }
            release_frame(&mut actions);
            end_for_caller(&mut actions);
            (Idle, actions)
        }
        (_, RouterEvent::TurnFailed) => {
            let mut actions = vec![SendApology, EmitDiagnosticTrace, ResetState];
            release_frame(&mut actions);
            (Idle, actions)
        }
        _ => {
            return Err(RouterTransitionError::InvalidTransition {
                phase: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}
