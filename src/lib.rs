//! Hemmer Reconcile
//!
//! Desired-state reconciliation for cloud resources. Callers declare the
//! resources they want (`name`, `ensure: present | absent`, attributes); the
//! reconciler lists what actually exists, pairs the two sides and issues the
//! create, update, tag, detach and delete calls that close the gap.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Resource kinds**: EC2 instances, security groups, load balancers, VPCs,
//!   subnets, internet gateways, route tables, volumes, IAM users and Route53
//!   zones and records, each with its attribute schema
//! - **Inventory fetcher**: Paginated, region-aware listing via [`Fetcher`]
//! - **Matcher**: Pairs desired resources with observed records by name and
//!   region
//! - **Reconciler**: A plan/apply state machine with bounded post-create retry
//! - **Read-only guard**: Rejects changes to attributes fixed at creation time
//! - **ControlPlane trait**: The seam to the actual cloud API
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_reconcile::{
//!     init_logging, ControlPlane, DesiredResource, ProviderConfig, Reconciler, ResourceKind,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let api = MyCloudApi::connect().await?;
//!     let reconciler = Reconciler::new(api, ProviderConfig::from_env())?;
//!
//!     let desired = vec![DesiredResource::present("web-sg")
//!         .in_region("us-west-2")
//!         .with_attribute("description", "web servers")];
//!
//!     for outcome in reconciler.reconcile(ResourceKind::SecurityGroup, desired).await? {
//!         println!("{} {}: {:?}", outcome.name, outcome.action, outcome.error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Reconciliation Pass
//!
//! One pass over one kind is a strictly sequential series of remote calls:
//!
//! - **List**: every page of the kind in each target region
//! - **Match**: bind desired resources to observed records
//! - **Plan**: create, update, destroy or noop per binding, guarded locally
//! - **Apply**: execute the plan; failures stay with their resource
//!
//! Observed objects that no desired resource names are reported as unmanaged
//! and never deleted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod kind;
pub mod logging;
pub mod matcher;
pub mod reconcile;
pub mod retry;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use api::{ControlPlane, CreateRequest, Page, RemoteObject};
pub use config::{ProviderConfig, RetryPolicy};
pub use error::{ApiError, Operation, ReconcileError};
pub use fetch::Fetcher;
pub use guard::{check_mutation, plan_update};
pub use kind::{RecordType, ResourceKind};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use matcher::{match_resources, Matched};
pub use reconcile::Reconciler;
pub use types::{
    Action, AttributeChange, Binding, Dependent, DesiredResource, Ensure, ObservedRecord, Outcome,
    Plan, PlanSummary, PlannedAction, PlannedChange,
};
pub use validation::{is_valid, validate_desired, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
