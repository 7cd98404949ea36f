use serde::{Deserialize, Serialize};

/// Where a conversation sits between turns. `Active` names the innermost frame, which is
/// either a remote skill id or a local dialog id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterPhase {
    Idle,
    Active(String),
}

impl RouterPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn frame_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Active(frame) => Some(frame),
        }
    }
}

/// Global intents evaluated before any routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    Cancel,
    Help,
    Repeat,
    StartOver,
}

impl Interruption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Help => "help",
            Self::Repeat => "repeat",
            Self::StartOver => "start_over",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cancel" => Some(Self::Cancel),
            "help" => Some(Self::Help),
            "repeat" => Some(Self::Repeat),
            "start_over" => Some(Self::StartOver),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionAction {
    /// Reprompt the active frame and stay where we are.
    Resume,
    /// A response was produced; routing stops for this turn.
    Handled,
    /// Drop the active frame and route the turn as if the conversation were idle.
    StartNew,
    NoAction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterEvent {
    Interrupted { interruption: Interruption, action: InterruptionAction },
    SkillSelected { skill_id: String },
    DialogBegun { dialog_id: String },
    NoSkillMatched,
    FrameWaiting,
    FrameCompleted,
    /// The caller ended the conversation.
    CancelRequested,
    TurnFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouterContext {
    pub active_is_skill: bool,
    pub suppress_completion_message: bool,
    /// This service is itself running as a skill for some other root.
    pub skill_mode: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterAction {
    CreateCorrelation,
    DispatchToSkill,
    BeginDialog,
    RepromptFrame,
    CancelFrame,
    HandleLocally,
    SendCompletionMessage,
    SendEndOfConversation,
    DeleteCorrelation,
    SendApology,
    EmitDiagnosticTrace,
    ResetState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RouterPhase,
    pub to: RouterPhase,
    pub event: RouterEvent,
    pub actions: Vec<RouterAction>,
}

impl TransitionOutcome {
    pub fn requires(&self, action: &RouterAction) -> bool {
        self.actions.contains(action)
    }
}
