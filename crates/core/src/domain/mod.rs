pub mod activity;
pub mod correlation;
pub mod proactive;
pub mod router_state;
pub mod skill;
