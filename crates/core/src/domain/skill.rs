use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkillId(pub String);

impl SkillId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SkillId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remotely deployed skill the root may delegate to. Built once at startup and never
/// mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub id: SkillId,
    /// Identity the skill authenticates as when it calls back into the root.
    pub app_identity: String,
    pub endpoint: String,
    pub trigger_intents: BTreeSet<String>,
    /// Named OAuth connections the skill needs before it can run.
    pub required_auth_connections: BTreeSet<String>,
}

impl SkillDefinition {
    pub fn handles_intent(&self, intent: &str) -> bool {
        self.trigger_intents.contains(intent)
    }
}
