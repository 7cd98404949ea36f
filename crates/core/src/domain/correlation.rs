use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::activity::ConversationReference;
use crate::domain::skill::SkillId;

/// Opaque key a skill uses in place of the parent conversation id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingKey(pub String);

impl RoutingKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub routing_key: RoutingKey,
    pub parent_reference: ConversationReference,
    pub skill_id: SkillId,
    /// App identity allowed to address the parent conversation through this key.
    pub authorized_scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CorrelationEntry {
    pub fn new(
        routing_key: RoutingKey,
        parent_reference: ConversationReference,
        skill_id: SkillId,
        authorized_scope: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            routing_key,
            parent_reference,
            skill_id,
            authorized_scope: authorized_scope.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-creation for the same (parent, skill) pair keeps the original creation time and
    /// takes the newer parent reference, which may carry a different service URL.
    pub fn refreshed_by(self, newer: CorrelationEntry) -> Self {
        Self { created_at: self.created_at, ..newer }
    }
}
