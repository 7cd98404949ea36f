use std::sync::Arc;

use async_trait::async_trait;
use skillrelay_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use skillrelay_core::errors::ApplicationError;
use skillrelay_core::{Activity, ProactiveJob, ProactiveJobState, ProactiveOperation};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::correlator::ConversationCorrelator;
use crate::locks::ConversationLocks;

const ACTOR: &str = "proactive_worker";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("channel rejected the activity with status {status}")]
    Status { status: u16 },
    #[error("channel unreachable: {0}")]
    Transport(String),
}

/// Posts an activity into an existing channel conversation. The activity is already
/// addressed (service URL, conversation, recipient).
#[async_trait]
pub trait ConnectorClient: Send + Sync {
    async fn send_to_conversation(&self, activity: &Activity) -> Result<(), ConnectorError>;

    /// Replaces the posted activity whose id is `activity.id`.
    async fn update_activity(&self, activity: &Activity) -> Result<(), ConnectorError>;
}

/// Resolves a job's routing key and posts its payload into the parent conversation.
pub struct ProactiveDeliverer {
    correlator: Arc<ConversationCorrelator>,
    connector: Arc<dyn ConnectorClient>,
    locks: Arc<ConversationLocks>,
    audit: Arc<dyn AuditSink>,
}

impl ProactiveDeliverer {
    pub fn new(
        correlator: Arc<ConversationCorrelator>,
        connector: Arc<dyn ConnectorClient>,
        locks: Arc<ConversationLocks>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { correlator, connector, locks, audit }
    }

    /// Never retries. A routing key with no correlation entry is dropped.
    pub async fn deliver(&self, job: ProactiveJob) -> ProactiveJobState {
        let entry = match self.correlator.resolve(&job.routing_key).await {
            Ok(entry) => entry,
            Err(error) if error.is_correlation_miss() => {
                warn!(
                    event_name = "proactive.dropped",
                    correlation_id = %job.correlation_id,
                    routing_key = %job.routing_key,
                    "no conversation for routing key; dropping proactive activity"
                );
                self.record(&job, None, "proactive.dropped", AuditOutcome::Rejected, &error);
                return ProactiveJobState::Dropped;
            }
            Err(error) => {
                error!(
                    event_name = "proactive.resolve_failed",
                    correlation_id = %job.correlation_id,
                    routing_key = %job.routing_key,
                    error = %error,
                    "could not resolve routing key"
                );
                self.record(&job, None, "proactive.failed", AuditOutcome::Failed, &error);
                return ProactiveJobState::FailedTerminal;
            }
        };

        let conversation_key = entry.parent_reference.conversation_key();
        let mut activity = job.payload.clone().apply_conversation_reference(&entry.parent_reference);
        let _guard = self.locks.lock(&conversation_key).await;

        let sent = match &job.operation {
            ProactiveOperation::Send => self.connector.send_to_conversation(&activity).await,
            ProactiveOperation::Update { activity_id } => {
                activity.id = Some(activity_id.clone());
                self.connector.update_activity(&activity).await
            }
        };
        match sent {
            Ok(()) => {
                info!(
                    event_name = "proactive.delivered",
                    correlation_id = %job.correlation_id,
                    conversation_id = %conversation_key,
                    skill_id = %entry.skill_id,
                    "proactive activity delivered"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(conversation_key.to_string()),
                        Some(entry.skill_id.to_string()),
                        job.correlation_id.clone(),
                        "proactive.delivered",
                        AuditCategory::Proactive,
                        ACTOR,
                        AuditOutcome::Success,
                    )
                    .with_metadata("routing_key", job.routing_key.to_string()),
                );
                ProactiveJobState::Delivered
            }
            Err(connector_error) => {
                let failure = ApplicationError::Delivery(connector_error.to_string());
                error!(
                    event_name = "proactive.delivery_failed",
                    correlation_id = %job.correlation_id,
                    conversation_id = %conversation_key,
                    error = %failure,
                    "proactive delivery failed"
                );
                self.record(
                    &job,
                    Some(conversation_key.to_string()),
                    "proactive.failed",
                    AuditOutcome::Failed,
                    &failure,
                );
                ProactiveJobState::FailedTerminal
            }
        }
    }

    fn record(
        &self,
        job: &ProactiveJob,
        conversation_key: Option<String>,
        event_type: &str,
        outcome: AuditOutcome,
        failure: &ApplicationError,
    ) {
        self.audit.emit(
            AuditEvent::new(
                conversation_key,
                None,
                job.correlation_id.clone(),
                event_type,
                AuditCategory::Proactive,
                ACTOR,
                outcome,
            )
            .with_metadata("routing_key", job.routing_key.to_string())
            .with_metadata("error", failure.to_string()),
        );
    }
}

/// Bounded queue of proactive jobs drained by a fixed pool of workers.
pub struct ProactiveQueue {
    sender: mpsc::Sender<ProactiveJob>,
    workers: Vec<JoinHandle<()>>,
}

impl ProactiveQueue {
    pub fn start(deliverer: Arc<ProactiveDeliverer>, capacity: usize, workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let deliverer = Arc::clone(&deliverer);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(job) = next else {
                            debug!(worker, "proactive queue closed; worker exiting");
                            break;
                        };
                        let state = deliverer.deliver(job).await;
                        debug!(worker, state = state.as_str(), "proactive job finished");
                    }
                })
            })
            .collect();

        Self { sender, workers }
    }

    pub fn handle(&self) -> ProactiveHandle {
        ProactiveHandle { sender: self.sender.clone() }
    }

    /// Stops accepting work and waits for queued jobs to drain.
    pub async fn shutdown(self) {
        let Self { sender, workers } = self;
        drop(sender);
        for worker in workers {
            if let Err(join_error) = worker.await {
                warn!(error = %join_error, "proactive worker ended abnormally");
            }
        }
    }
}

/// Cloneable enqueue side of a `ProactiveQueue`.
#[derive(Clone, Debug)]
pub struct ProactiveHandle {
    sender: mpsc::Sender<ProactiveJob>,
}

impl ProactiveHandle {
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Rejects instead of waiting when the queue is full.
    pub fn enqueue(&self, job: ProactiveJob) -> Result<(), ApplicationError> {
        self.sender.try_send(job).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => {
                ApplicationError::Delivery("proactive queue is full".to_owned())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ApplicationError::Delivery("proactive queue is shut down".to_owned())
            }
        })
    }

    pub async fn enqueue_wait(&self, job: ProactiveJob) -> Result<(), ApplicationError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| ApplicationError::Delivery("proactive queue is shut down".to_owned()))
    }
}
