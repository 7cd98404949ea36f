use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Ingress,
    Routing,
    Correlation,
    Proactive,
    Persistence,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub conversation_key: Option<String>,
    pub skill_id: Option<String>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        conversation_key: Option<String>,
        skill_id: Option<String>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { conversation_key, skill_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub conversation_key: Option<String>,
    pub skill_id: Option<String>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        conversation_key: Option<String>,
        skill_id: Option<String>,
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            conversation_key,
            skill_id,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn from_context(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self::new(
            context.conversation_key.clone(),
            context.skill_id.clone(),
            context.correlation_id.clone(),
            event_type,
            category,
            context.actor.clone(),
            outcome,
        )
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Writes audit events to the structured log.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                event_name = %event.event_type,
                category = ?event.category,
                correlation_id = %event.correlation_id,
                conversation_id = event.conversation_key.as_deref().unwrap_or(""),
                skill_id = event.skill_id.as_deref().unwrap_or(""),
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => tracing::warn!(
                event_name = %event.event_type,
                category = ?event.category,
                outcome = ?event.outcome,
                correlation_id = %event.correlation_id,
                conversation_id = event.conversation_key.as_deref().unwrap_or(""),
                skill_id = event.skill_id.as_deref().unwrap_or(""),
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{
        AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
        TracingAuditSink,
    };

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                Some("msteams/conv123".to_owned()),
                Some("flightSkill".to_owned()),
                "req-123",
                "correlation.created",
                AuditCategory::Correlation,
                "correlator",
                AuditOutcome::Success,
            )
            .with_metadata("routing_key", "rk_abc"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].conversation_key.as_deref(), Some("msteams/conv123"));
        assert_eq!(events[0].skill_id.as_deref(), Some("flightSkill"));
        assert!(events[0].metadata.contains_key("routing_key"));
    }

    #[test]
    fn events_can_be_built_from_context_and_filtered() {
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new(None, None, "req-7", "proactive-worker");
        sink.emit(AuditEvent::from_context(
            &context,
            "proactive.dropped",
            AuditCategory::Proactive,
            AuditOutcome::Rejected,
        ));
        sink.emit(AuditEvent::from_context(
            &context,
            "proactive.delivered",
            AuditCategory::Proactive,
            AuditOutcome::Success,
        ));
        TracingAuditSink.emit(AuditEvent::from_context(
            &context,
            "proactive.dropped",
            AuditCategory::Proactive,
            AuditOutcome::Rejected,
        ));

        let dropped = sink.events_of_type("proactive.dropped");
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].actor, "proactive-worker");
    }
}
