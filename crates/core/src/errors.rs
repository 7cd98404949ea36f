use thiserror::Error;

use crate::{domain::correlation::RoutingKey, registry::RegistryError, routing::RouterTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("no correlation entry for routing key `{routing_key}`")]
    CorrelationNotFound { routing_key: RoutingKey },
    #[error("skill `{0}` is not registered")]
    UnknownSkill(String),
    #[error(transparent)]
    RouterTransition(#[from] RouterTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("caller was not admitted")]
    AuthenticationDenied,
    #[error("skill `{skill_id}` invocation failed: {message}")]
    SkillInvocation { skill_id: String, message: String },
    #[error("interruption recognition failed: {0}")]
    Recognition(String),
    #[error("delivery failure: {0}")]
    Delivery(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn is_correlation_miss(&self) -> bool {
        matches!(self, Self::Domain(DomainError::CorrelationNotFound { .. }))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "The caller is not allowed to use this endpoint.",
            Self::NotFound { .. } => "The conversation is unknown or has already ended.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::AuthenticationDenied => Self::Unauthorized {
                message: "bearer token rejected".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Domain(DomainError::CorrelationNotFound { routing_key }) => {
                Self::NotFound {
                    message: format!("routing key `{routing_key}` is unknown"),
                    correlation_id: unassigned(),
                }
            }
            ApplicationError::Domain(DomainError::UnknownSkill(_))
            | ApplicationError::Domain(DomainError::RouterTransition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Persistence(message)
            | ApplicationError::Delivery(message)
            | ApplicationError::SkillInvocation { message, .. } => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::Registry(error)) => {
                Self::Internal { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Recognition(message) | ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}
