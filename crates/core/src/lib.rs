pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod registry;
pub mod routing;
pub mod routing_key;

pub use chrono;

pub use domain::activity::{
    Activity, ActivityType, ChannelAccount, ConversationAccount, ConversationKey,
    ConversationReference, EXPECT_REPLIES, TOKEN_RESPONSE_EVENT,
};
pub use domain::correlation::{CorrelationEntry, RoutingKey};
pub use domain::proactive::{ProactiveJob, ProactiveJobId, ProactiveJobState, ProactiveOperation};
pub use domain::router_state::RouterState;
pub use domain::skill::{SkillDefinition, SkillId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use registry::{RegistryError, SkillRegistry};
pub use routing::{
    Interruption, InterruptionAction, RouterAction, RouterContext, RouterEvent, RouterPhase,
    RoutingEngine,
};
pub use routing_key::{RoutingKeyError, RoutingKeyFactory};
