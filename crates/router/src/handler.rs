use async_trait::async_trait;
use skillrelay_core::errors::ApplicationError;
use skillrelay_core::routing::default_interruption_action;
use skillrelay_core::{Activity, Interruption, InterruptionAction, RouterPhase, RoutingKey};

use crate::context::TurnContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame expects more input on a later turn.
    Waiting,
    Complete,
}

/// Per-turn facts a frame may need. Local dialogs get no routing key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameContext {
    pub frame_id: String,
    pub routing_key: Option<RoutingKey>,
}

/// A unit of conversation that can occupy the active slot: a remote skill or a dialog
/// hosted by this service.
#[async_trait]
pub trait DialogFrame: Send + Sync {
    async fn begin(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<FrameStatus, ApplicationError>;

    async fn continue_dialog(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<FrameStatus, ApplicationError>;

    async fn reprompt(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<(), ApplicationError>;

    async fn cancel(
        &self,
        turn: &mut TurnContext,
        frame: &FrameContext,
    ) -> Result<(), ApplicationError>;
}

/// What the root does with a turn no skill claimed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalRoute {
    /// The root already answered.
    Handled,
    BeginDialog(String),
}

/// Hooks the hosting bot implements. Everything except `route` has a sensible default.
#[async_trait]
pub trait RootHandler: Send + Sync {
    async fn on_start(&self, _turn: &mut TurnContext) -> Result<(), ApplicationError> {
        Ok(())
    }

    async fn route(
        &self,
        turn: &mut TurnContext,
        intent: Option<&str>,
    ) -> Result<LocalRoute, ApplicationError>;

    /// Returns `false` when the event is not one the root knows about.
    async fn on_event(&self, _turn: &mut TurnContext) -> Result<bool, ApplicationError> {
        Ok(false)
    }

    async fn on_system_message(&self, _turn: &mut TurnContext) -> Result<(), ApplicationError> {
        Ok(())
    }

    async fn on_interrupt(
        &self,
        _turn: &mut TurnContext,
        interruption: Interruption,
        phase: &RouterPhase,
    ) -> Result<InterruptionAction, ApplicationError> {
        Ok(default_interruption_action(interruption, phase))
    }

    async fn on_frame_complete(
        &self,
        _turn: &mut TurnContext,
        _frame_id: &str,
    ) -> Result<(), ApplicationError> {
        Ok(())
    }

    fn apology(&self) -> Activity {
        Activity::message(DEFAULT_APOLOGY)
    }
}

pub const DEFAULT_APOLOGY: &str = "Sorry, it looks like something went wrong.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootMessages {
    pub greeting: String,
    pub not_understood: String,
    pub cancelled: String,
    pub nothing_to_cancel: String,
    pub help: String,
    pub completed: String,
    pub apology: String,
}

impl Default for RootMessages {
    fn default() -> Self {
        Self {
            greeting: "Hi! What can I do for you?".to_owned(),
            not_understood: "Sorry, I didn't understand that.".to_owned(),
            cancelled: "Okay, I've cancelled that.".to_owned(),
            nothing_to_cancel: "There's nothing to cancel right now.".to_owned(),
            help: "I can hand you over to one of my skills. Just tell me what you need.".to_owned(),
            completed: "Is there anything else I can help with?".to_owned(),
            apology: DEFAULT_APOLOGY.to_owned(),
        }
    }
}

/// Root handler with fixed wording and no local dialogs.
#[derive(Clone, Debug, Default)]
pub struct DefaultRootHandler {
    messages: RootMessages,
}

impl DefaultRootHandler {
    pub fn new(messages: RootMessages) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl RootHandler for DefaultRootHandler {
    async fn on_start(&self, turn: &mut TurnContext) -> Result<(), ApplicationError> {
        turn.send_text(&self.messages.greeting);
        Ok(())
    }

    async fn route(
        &self,
        turn: &mut TurnContext,
        _intent: Option<&str>,
    ) -> Result<LocalRoute, ApplicationError> {
        turn.send_text(&self.messages.not_understood);
        Ok(LocalRoute::Handled)
    }

    async fn on_interrupt(
        &self,
        turn: &mut TurnContext,
        interruption: Interruption,
        phase: &RouterPhase,
    ) -> Result<InterruptionAction, ApplicationError> {
        let action = default_interruption_action(interruption, phase);
        match (interruption, phase) {
            (Interruption::Cancel, RouterPhase::Active(_)) => turn.send_text(&self.messages.cancelled),
            (Interruption::Cancel, RouterPhase::Idle) => {
                turn.send_text(&self.messages.nothing_to_cancel)
            }
            (Interruption::Help, _) => turn.send_text(&self.messages.help),
            (Interruption::Repeat | Interruption::StartOver, _) => {}
        }
        Ok(action)
    }

    async fn on_frame_complete(
        &self,
        turn: &mut TurnContext,
        _frame_id: &str,
    ) -> Result<(), ApplicationError> {
        turn.send_text(&self.messages.completed);
        Ok(())
    }

    fn apology(&self) -> Activity {
        Activity::message(&self.messages.apology)
    }
}
