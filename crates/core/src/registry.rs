use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::config::SkillConfig;
use crate::domain::skill::{SkillDefinition, SkillId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("skill id must not be empty")]
    EmptySkillId,
    #[error("skill `{0}` is registered more than once")]
    DuplicateSkillId(SkillId),
    #[error("intent `{intent}` is claimed by both `{existing}` and `{conflicting}`")]
    AmbiguousSkillRegistration { intent: String, existing: SkillId, conflicting: SkillId },
}

/// Immutable table of known skills. Built once at startup and shared read-only between
/// turns; every lookup is an exact match.
#[derive(Clone, Debug, Default)]
pub struct SkillRegistry {
    skills: BTreeMap<SkillId, Arc<SkillDefinition>>,
    by_intent: HashMap<String, SkillId>,
}

impl SkillRegistry {
    pub fn new(definitions: Vec<SkillDefinition>) -> Result<Self, RegistryError> {
        let mut skills = BTreeMap::new();
        let mut by_intent: HashMap<String, SkillId> = HashMap::new();

        for definition in definitions {
            if definition.id.0.trim().is_empty() {
                return Err(RegistryError::EmptySkillId);
            }
            if skills.contains_key(&definition.id) {
                return Err(RegistryError::DuplicateSkillId(definition.id));
            }

            for intent in &definition.trigger_intents {
                if let Some(existing) = by_intent.get(intent) {
                    return Err(RegistryError::AmbiguousSkillRegistration {
                        intent: intent.clone(),
                        existing: existing.clone(),
                        conflicting: definition.id.clone(),
                    });
                }
                by_intent.insert(intent.clone(), definition.id.clone());
            }

            skills.insert(definition.id.clone(), Arc::new(definition));
        }

        Ok(Self { skills, by_intent })
    }

    pub fn from_config(skills: &[SkillConfig]) -> Result<Self, RegistryError> {
        Self::new(skills.iter().map(SkillConfig::to_definition).collect())
    }

    pub fn resolve_skill_for_intent(&self, intent: &str) -> Option<Arc<SkillDefinition>> {
        self.by_intent.get(intent).and_then(|skill_id| self.skills.get(skill_id)).cloned()
    }

    pub fn get(&self, skill_id: &SkillId) -> Option<Arc<SkillDefinition>> {
        self.skills.get(skill_id).cloned()
    }

    pub fn contains(&self, skill_id: &SkillId) -> bool {
        self.skills.contains_key(skill_id)
    }

    pub fn skills(&self) -> impl Iterator<Item = &SkillDefinition> {
        self.skills.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{RegistryError, SkillRegistry};
    use crate::config::SkillConfig;
    use crate::domain::skill::{SkillDefinition, SkillId};

    fn skill(id: &str, intents: &[&str]) -> SkillDefinition {
        SkillDefinition {
            id: SkillId(id.to_owned()),
            app_identity: format!("{id}-app"),
            endpoint: format!("https://{id}.example.net/api/skill/messages"),
            trigger_intents: intents.iter().map(|intent| (*intent).to_owned()).collect(),
            required_auth_connections: BTreeSet::new(),
        }
    }

    #[test]
    fn resolves_intent_to_the_claiming_skill() {
        let registry = SkillRegistry::new(vec![
            skill("flightSkill", &["bookFlight", "cancelFlight"]),
            skill("calendarSkill", &["createEvent"]),
        ])
        .expect("registry");

        let resolved = registry.resolve_skill_for_intent("bookFlight").expect("flight skill");
        assert_eq!(resolved.id, SkillId("flightSkill".to_owned()));
        assert!(registry.resolve_skill_for_intent("unknown").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn intent_lookup_is_case_sensitive() {
        let registry = SkillRegistry::new(vec![skill("flightSkill", &["bookFlight"])])
            .expect("registry");
        assert!(registry.resolve_skill_for_intent("bookflight").is_none());
    }

    #[test]
    fn ambiguous_intent_fails_at_construction() {
        let error = SkillRegistry::new(vec![
            skill("flightSkill", &["book"]),
            skill("hotelSkill", &["book"]),
        ])
        .expect_err("ambiguous registration must fail");

        assert_eq!(
            error,
            RegistryError::AmbiguousSkillRegistration {
                intent: "book".to_owned(),
                existing: SkillId("flightSkill".to_owned()),
                conflicting: SkillId("hotelSkill".to_owned()),
            }
        );
    }

    #[test]
    fn duplicate_and_empty_ids_are_rejected() {
        let duplicate =
            SkillRegistry::new(vec![skill("flightSkill", &["a"]), skill("flightSkill", &["b"])]);
        assert!(matches!(duplicate, Err(RegistryError::DuplicateSkillId(_))));

        let empty = SkillRegistry::new(vec![skill(" ", &["a"])]);
        assert_eq!(empty.err(), Some(RegistryError::EmptySkillId));
    }

    #[test]
    fn builds_from_skill_config() {
        let registry = SkillRegistry::from_config(&[SkillConfig {
            id: "todoSkill".to_owned(),
            app_id: "todo-app".to_owned(),
            endpoint: "https://todo.example.net/api/skill/messages".to_owned(),
            trigger_intents: vec!["addToDo".to_owned()],
            required_auth_connections: vec!["Outlook".to_owned()],
        }])
        .expect("registry");

        let todo = registry.get(&SkillId("todoSkill".to_owned())).expect("todo skill");
        assert_eq!(todo.app_identity, "todo-app");
        assert!(todo.required_auth_connections.contains("Outlook"));
        assert!(todo.handles_intent("addToDo"));
    }
}
