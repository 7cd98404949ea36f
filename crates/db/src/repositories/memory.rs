use std::collections::HashMap;

use tokio::sync::RwLock;

use skillrelay_core::domain::activity::ConversationKey;
use skillrelay_core::domain::correlation::{CorrelationEntry, RoutingKey};
use skillrelay_core::domain::router_state::RouterState;

use super::{CorrelationRepository, RepositoryError, RouterStateRepository};

#[derive(Default)]
pub struct InMemoryCorrelationRepository {
    entries: RwLock<HashMap<String, CorrelationEntry>>,
}

fn same_parent(entry: &CorrelationEntry, channel_id: &str, conversation_id: &str) -> bool {
    entry.parent_reference.channel_id == channel_id
        && entry.parent_reference.conversation_id == conversation_id
}

#[async_trait::async_trait]
impl CorrelationRepository for InMemoryCorrelationRepository {
    async fn find(
        &self,
        routing_key: &RoutingKey,
    ) -> Result<Option<CorrelationEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.get(routing_key.as_str()).cloned())
    }

    async fn save(&self, entry: CorrelationEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.retain(|key, existing| {
            key == entry.routing_key.as_str()
                || existing.skill_id != entry.skill_id
                || !same_parent(
                    existing,
                    &entry.parent_reference.channel_id,
                    &entry.parent_reference.conversation_id,
                )
        });

        let stored = match entries.remove(entry.routing_key.as_str()) {
            Some(existing) => existing.refreshed_by(entry),
            None => entry,
        };
        entries.insert(stored.routing_key.0.clone(), stored);
        Ok(())
    }

    async fn delete(&self, routing_key: &RoutingKey) -> Result<bool, RepositoryError> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(routing_key.as_str()).is_some())
    }

    async fn delete_for_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<u64, RepositoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !same_parent(entry, channel_id, conversation_id));
        Ok((before - entries.len()) as u64)
    }

    async fn list_for_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<CorrelationEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<CorrelationEntry> = entries
            .values()
            .filter(|entry| same_parent(entry, channel_id, conversation_id))
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.skill_id.cmp(&right.skill_id));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryRouterStateRepository {
    states: RwLock<HashMap<String, RouterState>>,
}

#[async_trait::async_trait]
impl RouterStateRepository for InMemoryRouterStateRepository {
    async fn load(&self, key: &ConversationKey) -> Result<Option<RouterState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(key.as_str()).cloned())
    }

    async fn save(&self, key: &ConversationKey, state: &RouterState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        states.insert(key.0.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<bool, RepositoryError> {
        let mut states = self.states.write().await;
        Ok(states.remove(key.as_str()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use skillrelay_core::domain::activity::{ConversationKey, ConversationReference};
    use skillrelay_core::domain::correlation::{CorrelationEntry, RoutingKey};
    use skillrelay_core::domain::router_state::RouterState;
    use skillrelay_core::domain::skill::SkillId;

    use crate::repositories::{
        CorrelationRepository, InMemoryCorrelationRepository, InMemoryRouterStateRepository,
        RouterStateRepository,
    };

    fn reference(conversation_id: &str, service_url: &str) -> ConversationReference {
        ConversationReference {
            channel_id: "msteams".to_string(),
            conversation_id: conversation_id.to_string(),
            service_url: service_url.to_string(),
            bot_id: "bot-1".to_string(),
            user_id: "user-1".to_string(),
            locale: None,
            activity_id: None,
        }
    }

    fn entry(key: &str, conversation_id: &str, service_url: &str) -> CorrelationEntry {
        CorrelationEntry::new(
            RoutingKey(key.to_string()),
            reference(conversation_id, service_url),
            SkillId("flightSkill".to_string()),
            "root-app",
        )
    }

    #[tokio::test]
    async fn resave_refreshes_reference_and_keeps_created_at() {
        let repo = InMemoryCorrelationRepository::default();
        let first = entry("rk_1", "conv123", "https://old.example.net/");
        let created_at = first.created_at;
        repo.save(first).await.expect("save");
        repo.save(entry("rk_1", "conv123", "https://new.example.net/")).await.expect("resave");

        let found = repo.find(&RoutingKey("rk_1".to_string())).await.expect("find").expect("entry");
        assert_eq!(found.parent_reference.service_url, "https://new.example.net/");
        assert_eq!(found.created_at, created_at);
    }

    #[tokio::test]
    async fn new_key_for_same_pair_replaces_the_stale_entry() {
        let repo = InMemoryCorrelationRepository::default();
        repo.save(entry("rk_old", "conv123", "https://a/")).await.expect("save");
        repo.save(entry("rk_new", "conv123", "https://a/")).await.expect("save");

        assert!(repo.find(&RoutingKey("rk_old".to_string())).await.expect("find").is_none());
        assert_eq!(repo.list_for_conversation("msteams", "conv123").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_conversation_purge_counts_rows() {
        let repo = InMemoryCorrelationRepository::default();
        repo.save(entry("rk_1", "conv123", "https://a/")).await.expect("save");
        repo.save(entry("rk_2", "conv999", "https://a/")).await.expect("save");

        assert!(repo.delete(&RoutingKey("rk_1".to_string())).await.expect("delete"));
        assert!(!repo.delete(&RoutingKey("rk_1".to_string())).await.expect("delete again"));
        assert_eq!(repo.delete_for_conversation("msteams", "conv999").await.expect("purge"), 1);
        assert_eq!(repo.delete_for_conversation("msteams", "conv999").await.expect("purge"), 0);
    }

    #[tokio::test]
    async fn router_state_round_trip() {
        let repo = InMemoryRouterStateRepository::default();
        let key = ConversationKey::new("msteams", "conv123");
        let mut state = RouterState { started: true, ..RouterState::default() };
        state.push_skill(SkillId("flightSkill".to_string()), RoutingKey("rk_1".to_string()));

        repo.save(&key, &state).await.expect("save");
        assert_eq!(repo.load(&key).await.expect("load"), Some(state));
        assert!(repo.delete(&key).await.expect("delete"));
        assert_eq!(repo.load(&key).await.expect("load"), None);
    }
}
