use std::sync::Arc;

use skillrelay_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use skillrelay_core::errors::{ApplicationError, DomainError};
use skillrelay_core::{
    ConversationReference, CorrelationEntry, RoutingKey, RoutingKeyFactory, SkillId,
    SkillRegistry,
};
use skillrelay_db::{CorrelationRepository, RepositoryError};
use tracing::{debug, info};

const ACTOR: &str = "correlator";

/// Maps opaque routing keys handed to skills back to the parent conversation that
/// started them.
pub struct ConversationCorrelator {
    registry: Arc<SkillRegistry>,
    keys: RoutingKeyFactory,
    store: Arc<dyn CorrelationRepository>,
    audit: Arc<dyn AuditSink>,
}

impl ConversationCorrelator {
    pub fn new(
        registry: Arc<SkillRegistry>,
        keys: RoutingKeyFactory,
        store: Arc<dyn CorrelationRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { registry, keys, store, audit }
    }

    pub fn routing_key_for(
        &self,
        parent_reference: &ConversationReference,
        skill_id: &SkillId,
    ) -> RoutingKey {
        self.keys.derive(&parent_reference.channel_id, &parent_reference.conversation_id, skill_id)
    }

    /// Idempotent. A repeat call for the same parent and skill returns the same key and
    /// refreshes the stored parent reference.
    pub async fn create(
        &self,
        parent_reference: &ConversationReference,
        skill_id: &SkillId,
        authorized_scope: &str,
    ) -> Result<RoutingKey, ApplicationError> {
        if !self.registry.contains(skill_id) {
            return Err(DomainError::UnknownSkill(skill_id.to_string()).into());
        }

        let routing_key = self.routing_key_for(parent_reference, skill_id);
        let fresh = CorrelationEntry::new(
            routing_key.clone(),
            parent_reference.clone(),
            skill_id.clone(),
            authorized_scope,
        );
        let existing = self.store.find(&routing_key).await.map_err(persistence)?;
        let refreshed = existing.is_some();
        let entry = match existing {
            Some(existing) => existing.refreshed_by(fresh),
            None => fresh,
        };
        self.store.save(entry).await.map_err(persistence)?;

        let event_type = if refreshed { "correlation.refreshed" } else { "correlation.created" };
        info!(
            event_name = event_type,
            routing_key = %routing_key,
            skill_id = %skill_id,
            conversation_id = %parent_reference.conversation_key(),
            "skill conversation correlated"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(parent_reference.conversation_key().to_string()),
                Some(skill_id.to_string()),
                routing_key.to_string(),
                event_type,
                AuditCategory::Correlation,
                ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("authorized_scope", authorized_scope),
        );
        Ok(routing_key)
    }

    /// A miss is `CorrelationNotFound`: the key was never issued or the skill
    /// conversation has already ended.
    pub async fn resolve(&self, routing_key: &RoutingKey) -> Result<CorrelationEntry, ApplicationError> {
        self.store.find(routing_key).await.map_err(persistence)?.ok_or_else(|| {
            DomainError::CorrelationNotFound { routing_key: routing_key.clone() }.into()
        })
    }

    pub async fn delete(&self, routing_key: &RoutingKey) -> Result<(), ApplicationError> {
        let removed = self.store.delete(routing_key).await.map_err(persistence)?;
        if removed {
            debug!(event_name = "correlation.deleted", routing_key = %routing_key, "correlation removed");
            self.audit.emit(AuditEvent::new(
                None,
                None,
                routing_key.to_string(),
                "correlation.deleted",
                AuditCategory::Correlation,
                ACTOR,
                AuditOutcome::Success,
            ));
        }
        Ok(())
    }

    /// Drops every skill conversation whose parent is the given conversation.
    pub async fn delete_for_conversation(
        &self,
        channel_id: &str,
        conversation_id: &str,
    ) -> Result<u64, ApplicationError> {
        let removed = self
            .store
            .delete_for_conversation(channel_id, conversation_id)
            .await
            .map_err(persistence)?;
        let conversation_key = format!("{channel_id}/{conversation_id}");
        info!(
            event_name = "correlation.conversation_purged",
            conversation_id = %conversation_key,
            removed,
            "parent conversation correlations removed"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(conversation_key.clone()),
                None,
                conversation_key,
                "correlation.conversation_purged",
                AuditCategory::Correlation,
                ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("removed", removed.to_string()),
        );
        Ok(removed)
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
