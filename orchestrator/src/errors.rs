//! Custom error types for the hosting orchestrator
//!
//! Validation and invariant failures are rejected synchronously with these
//! types and never mutate state; transient external failures are wrapped in
//! `External` variants and retried by the operation executor.

use std::fmt;

/// Main error type for the orchestrator
#[derive(Debug)]
pub enum OrchestratorError {
    /// Caller supplied something malformed (bad archive, unknown record type,
    /// invalid plan change). Never retried.
    Validation(ValidationError),

    /// A state-machine or data invariant would be broken. No mutation occurs.
    Invariant(InvariantError),

    /// A referenced entity does not exist
    NotFound { entity: &'static str, id: String },

    /// An external process (runtime, DNS server, proxy) failed or timed out
    External(ExternalError),

    /// Other errors with context
    Other(String),
}

/// Validation error variants
#[derive(Debug)]
pub enum ValidationError {
    /// Uploaded archive is unusable
    InvalidArchive { reason: String },

    /// A plan change request was rejected
    InvalidPlanChange { reason: String },

    /// A DNS zone or record is malformed
    InvalidDnsInput { reason: String },

    /// Generic invalid field
    InvalidValue { field: String, reason: String },
}

/// Invariant violation variants
#[derive(Debug)]
pub enum InvariantError {
    /// A state transition outside the transition table was requested
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// The (zone, name, type) uniqueness rule would be broken
    DuplicateDnsRecord {
        zone: String,
        name: String,
        record_type: String,
    },

    /// A subscription already has a live container
    ContainerExists { subscription_id: i64 },

    /// Running totals may only grow
    MonotonicTotal { field: &'static str },

    /// An image gate was not satisfied (approval, completion)
    ImageNotEligible { image_id: i64, reason: String },

    /// The target is busy with another exclusive operation
    SubscriptionBusy {
        subscription_id: i64,
        current_operation: String,
    },
}

/// External process failure variants
#[derive(Debug)]
pub enum ExternalError {
    /// Container runtime call failed
    Runtime { operation: String, reason: String },

    /// DNS server control call failed
    DnsControl { reason: String },

    /// Proxy test/reload command failed
    ProxyControl { reason: String },

    /// Object storage call failed
    Storage { key: String, reason: String },

    /// An external call exceeded its deadline
    Timeout { operation: String, seconds: u64 },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Validation(e) => write!(f, "Validation error: {}", e),
            OrchestratorError::Invariant(e) => write!(f, "Invariant violation: {}", e),
            OrchestratorError::NotFound { entity, id } => {
                write!(f, "{} '{}' not found", entity, id)
            }
            OrchestratorError::External(e) => write!(f, "External failure: {}", e),
            OrchestratorError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidArchive { reason } => {
                write!(f, "Invalid build archive: {}", reason)
            }
            ValidationError::InvalidPlanChange { reason } => {
                write!(f, "Invalid plan change: {}", reason)
            }
            ValidationError::InvalidDnsInput { reason } => {
                write!(f, "Invalid DNS input: {}", reason)
            }
            ValidationError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantError::IllegalTransition { entity, from, to } => {
                write!(f, "{} may not move from {} to {}", entity, from, to)
            }
            InvariantError::DuplicateDnsRecord {
                zone,
                name,
                record_type,
            } => {
                write!(
                    f,
                    "Record {} {} already exists in zone {}",
                    record_type, name, zone
                )
            }
            InvariantError::ContainerExists { subscription_id } => {
                write!(
                    f,
                    "Subscription {} already owns a live container",
                    subscription_id
                )
            }
            InvariantError::MonotonicTotal { field } => {
                write!(f, "'{}' may not decrease", field)
            }
            InvariantError::ImageNotEligible { image_id, reason } => {
                write!(f, "Image {} is not eligible: {}", image_id, reason)
            }
            InvariantError::SubscriptionBusy {
                subscription_id,
                current_operation,
            } => {
                write!(
                    f,
                    "Subscription {} is busy with: {}",
                    subscription_id, current_operation
                )
            }
        }
    }
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalError::Runtime { operation, reason } => {
                write!(f, "Runtime {} failed: {}", operation, reason)
            }
            ExternalError::DnsControl { reason } => {
                write!(f, "DNS control plane: {}", reason)
            }
            ExternalError::ProxyControl { reason } => {
                write!(f, "Proxy control plane: {}", reason)
            }
            ExternalError::Storage { key, reason } => {
                write!(f, "Object storage '{}': {}", key, reason)
            }
            ExternalError::Timeout { operation, seconds } => {
                write!(f, "'{}' timed out after {}s", operation, seconds)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}
impl std::error::Error for ValidationError {}
impl std::error::Error for InvariantError {}
impl std::error::Error for ExternalError {}

impl From<ValidationError> for OrchestratorError {
    fn from(err: ValidationError) -> Self {
        OrchestratorError::Validation(err)
    }
}

impl From<InvariantError> for OrchestratorError {
    fn from(err: InvariantError) -> Self {
        OrchestratorError::Invariant(err)
    }
}

impl From<ExternalError> for OrchestratorError {
    fn from(err: ExternalError) -> Self {
        OrchestratorError::External(err)
    }
}
