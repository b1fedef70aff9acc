//! Error types for reconciliation.
//!
//! Two layers: [`ApiError`] is the payload a [`ControlPlane`](crate::api::ControlPlane)
//! returns for a failed remote call, and [`ReconcileError`] is what the
//! fetcher, guard and reconciler surface to callers.

use std::fmt;

use thiserror::Error;

use crate::kind::ResourceKind;
use crate::schema::Diagnostic;

/// Errors returned by a control-plane implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The addressed object does not exist (or is not visible yet).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// An object with the same identity already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Request rate or quota exceeded.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The call timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The object still has dependents attached.
    #[error("Dependency violation: {0}")]
    DependencyViolation(String),

    /// The request was rejected as malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other service error, carrying the provider's error code.
    #[error("{code}: {message}")]
    Service {
        /// Provider error code (e.g. `InvalidGroup.Duplicate`).
        code: String,
        /// Provider error message.
        message: String,
    },
}

impl ApiError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::Throttled(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::DependencyViolation(msg)
            | Self::InvalidRequest(msg) => msg,
            Self::Service { message, .. } => message,
        }
    }

    /// A short machine-readable code for the error.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::Throttled(_) => "Throttled",
            Self::Unavailable(_) => "Unavailable",
            Self::DeadlineExceeded(_) => "DeadlineExceeded",
            Self::DependencyViolation(_) => "DependencyViolation",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Service { code, .. } => code,
        }
    }
}

/// The remote mutation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Creating a new object.
    Create,
    /// Updating an object in place.
    Update,
    /// Detaching a dependent before delete.
    Detach,
    /// Deleting an object.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Detach => write!(f, "detach"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Errors surfaced by the reconciliation core.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Listing remote objects failed.
    #[error("Failed to list {kind} in {region}: {cause}")]
    Fetch {
        /// Region whose listing failed.
        region: String,
        /// Kind being listed.
        kind: ResourceKind,
        /// Provider error.
        #[source]
        cause: ApiError,
    },

    /// A desired change touches an attribute fixed at creation time.
    #[error("{kind} attribute '{attribute}' is read-only once created")]
    ReadOnlyViolation {
        /// Kind of the resource.
        kind: ResourceKind,
        /// The offending attribute.
        attribute: String,
    },

    /// A remote create, update, detach or delete call failed.
    #[error("Failed to {operation} {kind} '{name}': {cause}")]
    Mutation {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Name of the resource.
        name: String,
        /// The failed operation.
        operation: Operation,
        /// Provider error.
        #[source]
        cause: ApiError,
    },

    /// A post-create step kept failing after the bounded number of attempts.
    #[error("Post-create {step} of {kind} '{name}' failed after {attempts} attempt(s): {cause}")]
    RetryExhausted {
        /// The step that was retried, such as `tag`.
        step: String,
        /// Kind of the resource.
        kind: ResourceKind,
        /// Name of the resource.
        name: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last provider error.
        #[source]
        cause: ApiError,
    },

    /// The desired record is malformed.
    #[error("Invalid {kind} '{name}': {}", summarize(.diagnostics))]
    InvalidResource {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Name of the resource.
        name: String,
        /// What is wrong with it.
        diagnostics: Vec<Diagnostic>,
    },

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownKind(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ReconcileError {
    /// Build an [`ReconcileError::InvalidResource`] from a single message.
    pub fn invalid(kind: ResourceKind, name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::InvalidResource {
            kind,
            name: name.into(),
            diagnostics: vec![Diagnostic::error(summary)],
        }
    }

    /// Whether the error was raised locally, before any remote call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ReadOnlyViolation { .. }
                | Self::InvalidResource { .. }
                | Self::UnknownKind(_)
                | Self::Configuration(_)
        )
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.attribute {
            Some(attr) => format!("{} (at {})", d.summary, attr),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::NotFound("vpc-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: vpc-123");

        let err = ApiError::Service {
            code: "InvalidGroup.Duplicate".to_string(),
            message: "group exists".to_string(),
        };
        assert_eq!(format!("{}", err), "InvalidGroup.Duplicate: group exists");
    }

    #[test]
    fn test_api_error_message_and_code() {
        let err = ApiError::Throttled("slow down".to_string());
        assert_eq!(err.message(), "slow down");
        assert_eq!(err.code(), "Throttled");

        let err = ApiError::Service {
            code: "Boom".to_string(),
            message: "it broke".to_string(),
        };
        assert_eq!(err.message(), "it broke");
        assert_eq!(err.code(), "Boom");
    }

    #[test]
    fn test_reconcile_error_display() {
        let err = ReconcileError::ReadOnlyViolation {
            kind: ResourceKind::Instance,
            attribute: "image_id".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "ec2_instance attribute 'image_id' is read-only once created"
        );

        let err = ReconcileError::Mutation {
            kind: ResourceKind::Vpc,
            name: "test-vpc".to_string(),
            operation: Operation::Delete,
            cause: ApiError::DependencyViolation("has subnets".to_string()),
        };
        assert_eq!(
            format!("{}", err),
            "Failed to delete ec2_vpc 'test-vpc': Dependency violation: has subnets"
        );

        let err = ReconcileError::Fetch {
            region: "eu-west-1".to_string(),
            kind: ResourceKind::SecurityGroup,
            cause: ApiError::Unavailable("try later".to_string()),
        };
        assert_eq!(
            format!("{}", err),
            "Failed to list ec2_securitygroup in eu-west-1: Service unavailable: try later"
        );
    }

    #[test]
    fn test_invalid_resource_display() {
        let err = ReconcileError::InvalidResource {
            kind: ResourceKind::Vpc,
            name: "test-vpc".to_string(),
            diagnostics: vec![
                Diagnostic::error("Missing required attribute 'cidr_block'")
                    .with_attribute("cidr_block"),
                Diagnostic::error("Unsupported attribute 'color'"),
            ],
        };
        let display = format!("{}", err);
        assert!(display.starts_with("Invalid ec2_vpc 'test-vpc'"));
        assert!(display.contains("(at cidr_block)"));
        assert!(display.contains("Unsupported attribute 'color'"));
    }

    #[test]
    fn test_is_local() {
        assert!(ReconcileError::UnknownKind("nope".to_string()).is_local());
        assert!(ReconcileError::invalid(ResourceKind::IamUser, "bob", "bad").is_local());

        let err = ReconcileError::RetryExhausted {
            step: "tag".to_string(),
            kind: ResourceKind::Vpc,
            name: "v".to_string(),
            attempts: 5,
            cause: ApiError::NotFound("vpc-1".to_string()),
        };
        assert!(!err.is_local());
        assert_eq!(
            err.to_string(),
            "Post-create tag of ec2_vpc 'v' failed after 5 attempt(s): Resource not found: vpc-1"
        );
    }
}
