pub mod engine;
pub mod states;

pub use engine::{
    default_interruption_action, RouterTransitionError, RoutingDefinition, RoutingEngine,
    SkillRoutingFlow,
};
pub use states::{
    Interruption, InterruptionAction, RouterAction, RouterContext, RouterEvent, RouterPhase,
    TransitionOutcome,
};
