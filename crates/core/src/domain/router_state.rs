use serde::{Deserialize, Serialize};

use crate::domain::correlation::RoutingKey;
use crate::domain::skill::SkillId;
use crate::routing::RouterPhase;

/// Per-conversation snapshot persisted by the turn router at the end of every turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterState {
    pub active_skill_id: Option<SkillId>,
    /// Key issued to the active skill. Kept so a restarted process with a different
    /// correlation secret still addresses the skill conversation it began.
    #[serde(default)]
    pub active_routing_key: Option<RoutingKey>,
    /// Frame ids, innermost last.
    pub dialog_stack: Vec<String>,
    pub suppress_completion_message: bool,
    /// The start hook already ran for this conversation.
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub turn_count: u64,
}

impl RouterState {
    pub fn phase(&self) -> RouterPhase {
        match self.dialog_stack.last() {
            Some(frame) => RouterPhase::Active(frame.clone()),
            None => RouterPhase::Idle,
        }
    }

    pub fn active_frame(&self) -> Option<&str> {
        self.dialog_stack.last().map(String::as_str)
    }

    pub fn is_idle(&self) -> bool {
        self.dialog_stack.is_empty()
    }

    /// Whether the innermost frame is the active remote skill.
    pub fn active_frame_is_skill(&self) -> bool {
        match (&self.active_skill_id, self.active_frame()) {
            (Some(skill), Some(frame)) => skill.as_str() == frame,
            _ => false,
        }
    }

    pub fn push_skill(&mut self, skill_id: SkillId, routing_key: RoutingKey) {
        self.dialog_stack.push(skill_id.0.clone());
        self.active_skill_id = Some(skill_id);
        self.active_routing_key = Some(routing_key);
    }

    /// Routing key of the innermost frame when that frame is the active skill.
    pub fn active_skill_key(&self) -> Option<&RoutingKey> {
        self.active_routing_key.as_ref().filter(|_| self.active_frame_is_skill())
    }

    pub fn push_dialog(&mut self, dialog_id: impl Into<String>) {
        self.dialog_stack.push(dialog_id.into());
    }

    /// Clears every frame. `started` survives so the start hook never fires twice.
    pub fn clear_frames(&mut self) {
        self.dialog_stack.clear();
        self.active_skill_id = None;
        self.active_routing_key = None;
        self.suppress_completion_message = false;
    }

    /// Fresh state after an unrecoverable turn failure.
    pub fn reset(&mut self) {
        *self = Self { started: self.started, turn_count: self.turn_count, ..Self::default() };
    }
}
