//! Turn routing between a root conversation and the skills it delegates to.
//!
//! - `ConversationCorrelator`: routing keys for skill conversations
//! - `TurnRouter`: interruption handling, intent routing and frame lifecycle per turn
//! - `ProactiveQueue`: out-of-band skill replies delivered into parent conversations

pub mod context;
pub mod correlator;
pub mod handler;
pub mod locks;
pub mod proactive;
pub mod recognizer;
pub mod skill_client;
pub mod turn;

pub use context::TurnContext;
pub use correlator::ConversationCorrelator;
pub use handler::{
    DefaultRootHandler, DialogFrame, FrameContext, FrameStatus, LocalRoute, RootHandler,
    RootMessages,
};
pub use locks::ConversationLocks;
pub use proactive::{
    ConnectorClient, ConnectorError, ProactiveDeliverer, ProactiveHandle, ProactiveQueue,
};
pub use recognizer::{KeywordRecognizer, Recognizer};
pub use skill_client::{
    SkillClient, SkillClientError, SkillFrame, SkillInvocation, SkillResponse, REPROMPT_EVENT,
};
pub use turn::{routes_as_skill_turn, RouterServices, RouterSettings, TurnOutcome, TurnRouter};
