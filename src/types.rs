//! Records exchanged between the fetcher, matcher and reconciler.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::kind::{Relation, ResourceKind};

/// Whether a resource should exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// The resource should exist.
    #[default]
    Present,
    /// The resource should not exist.
    Absent,
}

/// A resource the operator wants to exist (or not).
///
/// Deserializes from a flat JSON object: everything besides `name`, `ensure`
/// and `region` is an attribute.
///
/// ```
/// use hemmer_reconcile::types::{DesiredResource, Ensure};
///
/// let desired: DesiredResource = serde_json::from_value(serde_json::json!({
///     "name": "web-sg",
///     "region": "us-west-2",
///     "description": "web servers",
/// }))
/// .unwrap();
/// assert_eq!(desired.ensure, Ensure::Present);
/// assert_eq!(desired.attributes["description"], "web servers");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredResource {
    /// Name of the resource; the matching key.
    pub name: String,
    /// Desired existence.
    #[serde(default)]
    pub ensure: Ensure,
    /// Region; defaults to the configured region for region-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Desired attribute values. Only attributes named here are managed.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl DesiredResource {
    /// A resource that should exist.
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensure: Ensure::Present,
            region: None,
            attributes: Map::new(),
        }
    }

    /// A resource that should not exist.
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            ensure: Ensure::Absent,
            ..Self::present(name)
        }
    }

    /// Pin the resource to a region.
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set a desired attribute value.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Desired tags, if the record manages tags.
    pub fn tags(&self) -> BTreeMap<String, String> {
        string_map(self.attributes.get("tags"))
    }
}

/// A dependent relationship of an observed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    /// How the dependent is attached.
    pub relation: Relation,
    /// Identifier of the dependent (VPC id, instance id, ...).
    pub target: String,
}

impl Dependent {
    /// Create a dependent.
    pub fn new(relation: Relation, target: impl Into<String>) -> Self {
        Self {
            relation,
            target: target.into(),
        }
    }
}

/// Snapshot of a remote object, normalized to the kind's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedRecord {
    /// Kind of the object.
    pub kind: ResourceKind,
    /// Name of the object.
    pub name: String,
    /// Region the object was listed in.
    pub region: String,
    /// Provider-assigned identifiers; `id` is the primary one.
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
    /// Current attribute values.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Dependents to unwind before delete, in teardown order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<Dependent>,
}

impl ObservedRecord {
    /// Create a record with no identifiers or attributes.
    pub fn new(kind: ResourceKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            region: region.into(),
            identifiers: BTreeMap::new(),
            attributes: Map::new(),
            dependents: Vec::new(),
        }
    }

    /// Set the primary identifier.
    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_identifier("id", id)
    }

    /// Set a named identifier.
    pub fn with_identifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.identifiers.insert(key.into(), value.into());
        self
    }

    /// Set an attribute value.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a dependent.
    pub fn with_dependent(mut self, dependent: Dependent) -> Self {
        self.dependents.push(dependent);
        self
    }

    /// The primary identifier, falling back to the name for kinds that are
    /// addressed by name.
    pub fn id(&self) -> &str {
        self.identifiers
            .get("id")
            .map(String::as_str)
            .unwrap_or(&self.name)
    }
}

/// A change to a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The attribute that changed.
    pub path: String,
    /// The value before the change (None if unset).
    pub before: Option<Value>,
    /// The value after the change (None if unset).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a newly set attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// Association of a desired resource with its observed counterpart for one
/// pass. `observed == None` means the resource is actually absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// The desired side, with its region resolved.
    pub desired: DesiredResource,
    /// The observed side, if the object exists.
    pub observed: Option<ObservedRecord>,
}

impl Binding {
    /// Name of the bound resource.
    pub fn name(&self) -> &str {
        &self.desired.name
    }

    /// Region of the bound resource.
    pub fn region(&self) -> &str {
        self.desired.region.as_deref().unwrap_or_default()
    }
}

/// What the reconciler did to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// The resource was created.
    Created,
    /// The resource was updated in place.
    Updated,
    /// The resource was destroyed.
    Destroyed,
    /// Nothing was changed.
    Noop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Created => write!(f, "created"),
            Action::Updated => write!(f, "updated"),
            Action::Destroyed => write!(f, "destroyed"),
            Action::Noop => write!(f, "noop"),
        }
    }
}

/// The decision for one binding, before anything is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// Create the resource.
    Create,
    /// Apply these in-place changes.
    Update(Vec<AttributeChange>),
    /// Detach these dependents in order, then delete.
    Destroy(Vec<Dependent>),
    /// Nothing to do.
    Noop,
}

/// One entry of a [`Plan`].
#[derive(Debug)]
pub struct PlannedChange {
    /// The binding the decision was made for.
    pub binding: Binding,
    /// The decision.
    pub action: PlannedAction,
    /// A local precondition failure; when set, the action is `Noop`.
    pub error: Option<ReconcileError>,
}

impl PlannedChange {
    /// A decision for a valid binding.
    pub fn new(binding: Binding, action: PlannedAction) -> Self {
        Self {
            binding,
            action,
            error: None,
        }
    }

    /// A rejected binding.
    pub fn rejected(binding: Binding, error: ReconcileError) -> Self {
        Self {
            binding,
            action: PlannedAction::Noop,
            error: Some(error),
        }
    }
}

/// The decisions for one reconciliation pass over one kind.
#[derive(Debug)]
pub struct Plan {
    /// Kind the plan is for.
    pub kind: ResourceKind,
    /// One entry per desired resource.
    pub changes: Vec<PlannedChange>,
    /// Observed records no desired resource refers to. They are never
    /// destroyed implicitly.
    pub unmanaged: Vec<ObservedRecord>,
}

impl Plan {
    /// Whether executing the plan would issue any mutation.
    pub fn has_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.error.is_none() && c.action != PlannedAction::Noop)
    }

    /// Count the planned actions.
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            if change.error.is_some() {
                summary.rejected += 1;
                continue;
            }
            match change.action {
                PlannedAction::Create => summary.create += 1,
                PlannedAction::Update(_) => summary.update += 1,
                PlannedAction::Destroy(_) => summary.destroy += 1,
                PlannedAction::Noop => summary.unchanged += 1,
            }
        }
        summary
    }
}

/// Counts of planned actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update.
    pub update: usize,
    /// Resources to destroy.
    pub destroy: usize,
    /// Resources already in the desired state.
    pub unchanged: usize,
    /// Resources rejected before any remote call.
    pub rejected: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to destroy, {} unchanged, {} rejected",
            self.create, self.update, self.destroy, self.unchanged, self.rejected
        )
    }
}

/// The result of reconciling one desired resource.
#[derive(Debug)]
pub struct Outcome {
    /// Name of the resource.
    pub name: String,
    /// Region of the resource.
    pub region: String,
    /// What actually happened.
    pub action: Action,
    /// Why the resource did not fully reach its desired state.
    pub error: Option<ReconcileError>,
    /// The record after the transition; `None` once destroyed or if the
    /// resource never existed.
    pub record: Option<ObservedRecord>,
}

impl Outcome {
    /// Whether the resource reached its desired state.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the resource was created but its post-create tagging step
    /// never succeeded.
    ///
    /// For kinds named by a tag the created object carries no name, so later
    /// passes cannot match it: it shows up as neither managed nor unmanaged
    /// and the next pass creates a fresh object. Degraded objects have to be
    /// tagged or removed out of band using the id in [`Outcome::record`].
    pub fn is_degraded(&self) -> bool {
        self.action == Action::Created
            && matches!(self.error, Some(ReconcileError::RetryExhausted { .. }))
    }
}

pub(crate) fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use serde_json::json;

    #[test]
    fn test_desired_resource_serde() {
        let desired: DesiredResource = serde_json::from_value(json!({
            "name": "test-vpc",
            "ensure": "absent",
        }))
        .unwrap();
        assert_eq!(desired.ensure, Ensure::Absent);
        assert!(desired.region.is_none());
        assert!(desired.attributes.is_empty());

        let value = serde_json::to_value(
            DesiredResource::present("web-sg")
                .in_region("us-west-2")
                .with_attribute("description", "web"),
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"name": "web-sg", "ensure": "present", "region": "us-west-2", "description": "web"})
        );
    }

    #[test]
    fn test_desired_tags() {
        let desired = DesiredResource::present("web")
            .with_attribute("tags", json!({"env": "prod", "team": "edge"}));
        let tags = desired.tags();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["env"], "prod");
        assert!(DesiredResource::present("bare").tags().is_empty());
    }

    #[test]
    fn test_observed_record_id() {
        let record = ObservedRecord::new(ResourceKind::Vpc, "test-vpc", "us-east-1").with_id("vpc-123");
        assert_eq!(record.id(), "vpc-123");

        let record = ObservedRecord::new(ResourceKind::IamUser, "alice", "us-east-1");
        assert_eq!(record.id(), "alice");
    }

    #[test]
    fn test_plan_summary() {
        let binding = Binding {
            desired: DesiredResource::present("a").in_region("us-east-1"),
            observed: None,
        };
        let plan = Plan {
            kind: ResourceKind::Vpc,
            changes: vec![
                PlannedChange::new(binding.clone(), PlannedAction::Create),
                PlannedChange::new(binding.clone(), PlannedAction::Noop),
                PlannedChange::rejected(
                    binding,
                    ReconcileError::invalid(ResourceKind::Vpc, "a", "bad"),
                ),
            ],
            unmanaged: vec![],
        };

        assert!(plan.has_changes());
        let summary = plan.summary();
        assert_eq!(summary.create, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(
            summary.to_string(),
            "1 to create, 0 to update, 0 to destroy, 1 unchanged, 1 rejected"
        );
    }

    #[test]
    fn test_outcome_degraded() {
        let outcome = Outcome {
            name: "web".to_string(),
            region: "us-east-1".to_string(),
            action: Action::Created,
            error: Some(ReconcileError::RetryExhausted {
                step: "tag".to_string(),
                kind: ResourceKind::Instance,
                name: "web".to_string(),
                attempts: 5,
                cause: ApiError::NotFound("i-1".to_string()),
            }),
            record: None,
        };
        assert!(outcome.is_degraded());
        assert!(!outcome.is_success());
    }
}
