//! Testing utilities for reconciliation.
//!
//! [`MockControlPlane`] is an in-memory [`ControlPlane`] with paging, a call
//! log and failure injection, so reconciliation passes can be exercised
//! without a cloud account.
//!
//! # Example
//!
//! ```
//! use hemmer_reconcile::config::{ProviderConfig, RetryPolicy};
//! use hemmer_reconcile::kind::ResourceKind;
//! use hemmer_reconcile::reconcile::Reconciler;
//! use hemmer_reconcile::testing::{assert_created, MockControlPlane};
//! use hemmer_reconcile::types::DesiredResource;
//!
//! # tokio_test::block_on(async {
//! let api = MockControlPlane::new().with_regions(["us-east-1"]);
//! let config = ProviderConfig::default().with_retry(RetryPolicy::immediate(5));
//! let reconciler = Reconciler::new(api, config).unwrap();
//!
//! let desired = DesiredResource::present("test-vpc")
//!     .in_region("us-east-1")
//!     .with_attribute("cidr_block", "10.0.0.0/16");
//! let outcomes = reconciler
//!     .reconcile(ResourceKind::Vpc, vec![desired])
//!     .await
//!     .unwrap();
//!
//! assert_created(&outcomes, "test-vpc");
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::api::{ControlPlane, CreateRequest, Page, RemoteObject};
use crate::error::{ApiError, ReconcileError};
use crate::kind::{NameSource, ResourceKind};
use crate::schema::Diagnostic;
use crate::types::{Action, AttributeChange, Dependent, ObservedRecord, Outcome};

/// Objects returned per listing page unless overridden.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A call recorded by [`MockControlPlane`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `regions()`
    Regions,
    /// `list()` of one page.
    List {
        /// Kind listed.
        kind: ResourceKind,
        /// Region listed.
        region: String,
        /// Marker the page was requested with.
        marker: Option<String>,
    },
    /// `create()`
    Create {
        /// Kind created.
        kind: ResourceKind,
        /// Region created in.
        region: String,
        /// The request.
        request: CreateRequest,
    },
    /// `update()`
    Update {
        /// Kind updated.
        kind: ResourceKind,
        /// Identifier of the updated object.
        id: String,
        /// Changes applied.
        changes: Vec<AttributeChange>,
    },
    /// `tag()`
    Tag {
        /// Kind tagged.
        kind: ResourceKind,
        /// Identifier of the tagged object.
        id: String,
        /// Tags applied.
        tags: BTreeMap<String, String>,
    },
    /// `detach()`
    Detach {
        /// Kind of the object being torn down.
        kind: ResourceKind,
        /// Identifier of the object being torn down.
        id: String,
        /// The dependent detached.
        dependent: Dependent,
    },
    /// `delete()`
    Delete {
        /// Kind deleted.
        kind: ResourceKind,
        /// Identifier of the deleted object.
        id: String,
    },
}

impl Call {
    /// Whether the call changes remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Regions | Call::List { .. })
    }
}

#[derive(Default)]
struct State {
    objects: HashMap<(ResourceKind, String), Vec<RemoteObject>>,
    calls: Vec<Call>,
    next_id: u32,
    tag_failures: u32,
    list_failures: HashMap<String, ApiError>,
    scripted_pages: HashMap<String, VecDeque<Page>>,
    create_failures: HashMap<String, ApiError>,
    update_failures: HashMap<String, ApiError>,
    delete_failures: HashMap<String, ApiError>,
}

/// An in-memory control plane.
///
/// Objects live per `(kind, region)` in insertion order. Created objects get
/// generated identifiers, tag-named kinds only become visible by name once
/// tagged, and deleting an object that still has dependents attached fails
/// with [`ApiError::DependencyViolation`].
pub struct MockControlPlane {
    regions: Vec<String>,
    page_size: usize,
    state: Mutex<State>,
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPlane {
    /// Create an empty control plane with a single `us-east-1` region.
    pub fn new() -> Self {
        Self {
            regions: vec!["us-east-1".to_string()],
            page_size: DEFAULT_PAGE_SIZE,
            state: Mutex::new(State::default()),
        }
    }

    /// Set the regions reported by `regions()`.
    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of objects per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an existing remote object.
    pub fn insert(&self, kind: ResourceKind, region: &str, object: RemoteObject) {
        self.state()
            .objects
            .entry((kind, region.to_string()))
            .or_default()
            .push(object);
    }

    /// Objects of `kind` currently in `region`.
    pub fn objects(&self, kind: ResourceKind, region: &str) -> Vec<RemoteObject> {
        self.state()
            .objects
            .get(&(kind, region.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one object by identifier.
    pub fn find(&self, kind: ResourceKind, region: &str, id: &str) -> Option<RemoteObject> {
        self.objects(kind, region).into_iter().find(|o| o.id == id)
    }

    /// Make the next `count` tag calls fail with [`ApiError::NotFound`], as a
    /// freshly created identifier does before it becomes visible.
    pub fn fail_tags(&self, count: u32) {
        self.state().tag_failures = count;
    }

    /// Make every listing of `region` fail.
    pub fn fail_list(&self, region: &str, error: ApiError) {
        self.state().list_failures.insert(region.to_string(), error);
    }

    /// Serve `pages` verbatim, one per listing of `region`, before falling
    /// back to the stored objects. Markers are returned as given.
    pub fn script_pages(&self, region: &str, pages: impl IntoIterator<Item = Page>) {
        self.state()
            .scripted_pages
            .entry(region.to_string())
            .or_default()
            .extend(pages);
    }

    /// Make creating an object named `name` fail.
    pub fn fail_create(&self, name: &str, error: ApiError) {
        self.state().create_failures.insert(name.to_string(), error);
    }

    /// Make updating the object with identifier `id` fail.
    pub fn fail_update(&self, id: &str, error: ApiError) {
        self.state().update_failures.insert(id.to_string(), error);
    }

    /// Make deleting the object with identifier `id` fail.
    pub fn fail_delete(&self, id: &str, error: ApiError) {
        self.state().delete_failures.insert(id.to_string(), error);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Every mutating call made so far, in order.
    pub fn mutations(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl State {
    fn object_mut(
        &mut self,
        kind: ResourceKind,
        region: &str,
        id: &str,
    ) -> Result<&mut RemoteObject, ApiError> {
        self.objects
            .get_mut(&(kind, region.to_string()))
            .and_then(|objects| objects.iter_mut().find(|o| o.id == id))
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    fn generate_id(&mut self, kind: ResourceKind, name: &str) -> String {
        self.next_id += 1;
        let prefix = match kind {
            ResourceKind::Instance => "i-",
            ResourceKind::SecurityGroup => "sg-",
            ResourceKind::Vpc => "vpc-",
            ResourceKind::Subnet => "subnet-",
            ResourceKind::InternetGateway => "igw-",
            ResourceKind::RouteTable => "rtb-",
            ResourceKind::Volume => "vol-",
            ResourceKind::IamUser => "AIDA",
            ResourceKind::Route53Zone => "Z",
            ResourceKind::LoadBalancer | ResourceKind::Route53Record(_) => {
                return name.to_string()
            },
        };
        format!("{}{:08x}", prefix, self.next_id)
    }
}

fn created_object(kind: ResourceKind, id: String, request: &CreateRequest) -> RemoteObject {
    let mut object = RemoteObject::new(id.as_str());
    for (key, value) in &request.attributes {
        if key == "tags" {
            object
                .tags
                .extend(crate::types::string_map(Some(value)));
        } else {
            object.properties.insert(key.clone(), value.clone());
        }
    }
    if let NameSource::Field(field) = kind.name_source() {
        object
            .properties
            .insert(field.to_string(), Value::String(request.name.clone()));
    }

    match kind {
        ResourceKind::Instance => {
            object = object.with_property("state", "running");
        },
        ResourceKind::Volume => {
            object = object.with_property("state", "available");
        },
        ResourceKind::LoadBalancer => {
            object = object.with_property(
                "dns_name",
                format!("{}-1234567890.elb.amazonaws.com", request.name),
            );
        },
        ResourceKind::IamUser => {
            object = object
                .with_property(
                    "arn",
                    format!("arn:aws:iam::123456789012:user/{}", request.name),
                )
                .with_property("user_id", id);
        },
        ResourceKind::Route53Zone => {
            object = object.with_property("caller_reference", format!("hemmer-{}", id));
        },
        _ => {},
    }
    object
}

fn detach_from(object: &mut RemoteObject, property: &str, target: &str) -> bool {
    match object.properties.get_mut(property) {
        Some(Value::String(s)) if s == target => {
            object.properties.remove(property);
            true
        },
        Some(Value::Array(items)) => {
            let before = items.len();
            items.retain(|v| v.as_str() != Some(target));
            items.len() != before
        },
        _ => false,
    }
}

fn has_dependents(kind: ResourceKind, object: &RemoteObject) -> bool {
    kind.teardown_relations()
        .iter()
        .any(|step| match object.property(step.property) {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            _ => false,
        })
}

#[async_trait::async_trait]
impl ControlPlane for MockControlPlane {
    async fn regions(&self) -> Result<Vec<String>, ApiError> {
        self.state().calls.push(Call::Regions);
        Ok(self.regions.clone())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        region: &str,
        marker: Option<&str>,
    ) -> Result<Page, ApiError> {
        let mut state = self.state();
        state.calls.push(Call::List {
            kind,
            region: region.to_string(),
            marker: marker.map(str::to_string),
        });
        if let Some(error) = state.list_failures.get(region) {
            return Err(error.clone());
        }
        if let Some(page) = state
            .scripted_pages
            .get_mut(region)
            .and_then(VecDeque::pop_front)
        {
            return Ok(page);
        }

        let start = match marker {
            Some(m) => m
                .parse::<usize>()
                .map_err(|_| ApiError::InvalidRequest(format!("Invalid marker '{}'", m)))?,
            None => 0,
        };
        let objects = state
            .objects
            .get(&(kind, region.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let end = (start + self.page_size).min(objects.len());
        let page = objects.get(start..end).unwrap_or_default().to_vec();

        Ok(if end < objects.len() {
            Page::more(page, end.to_string())
        } else {
            Page::last(page)
        })
    }

    async fn create(
        &self,
        kind: ResourceKind,
        region: &str,
        request: &CreateRequest,
    ) -> Result<RemoteObject, ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Create {
            kind,
            region: region.to_string(),
            request: request.clone(),
        });
        if let Some(error) = state.create_failures.get(&request.name) {
            return Err(error.clone());
        }

        let id = state.generate_id(kind, &request.name);
        let object = created_object(kind, id, request);
        state
            .objects
            .entry((kind, region.to_string()))
            .or_default()
            .push(object.clone());
        Ok(object)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        record: &ObservedRecord,
        changes: &[AttributeChange],
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Update {
            kind,
            id: record.id().to_string(),
            changes: changes.to_vec(),
        });
        if let Some(error) = state.update_failures.get(record.id()) {
            return Err(error.clone());
        }

        let object = state.object_mut(kind, &record.region, record.id())?;
        for change in changes {
            match (change.path.as_str(), &change.after) {
                ("tags", after) => {
                    let name_tag = match kind.name_source() {
                        NameSource::Tag(tag) => object.tags.remove_entry(tag),
                        NameSource::Field(_) => None,
                    };
                    object.tags = crate::types::string_map(after.as_ref());
                    object.tags.extend(name_tag);
                },
                (path, Some(value)) => {
                    object.properties.insert(path.to_string(), value.clone());
                },
                (path, None) => {
                    object.properties.remove(path);
                },
            }
        }
        Ok(())
    }

    async fn tag(
        &self,
        kind: ResourceKind,
        region: &str,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Tag {
            kind,
            id: id.to_string(),
            tags: tags.clone(),
        });
        if state.tag_failures > 0 {
            state.tag_failures -= 1;
            return Err(ApiError::NotFound(id.to_string()));
        }

        let object = state.object_mut(kind, region, id)?;
        object
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn detach(
        &self,
        kind: ResourceKind,
        record: &ObservedRecord,
        dependent: &Dependent,
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Detach {
            kind,
            id: record.id().to_string(),
            dependent: dependent.clone(),
        });

        let object = state.object_mut(kind, &record.region, record.id())?;
        let detached = kind
            .teardown_relations()
            .iter()
            .filter(|step| step.relation == dependent.relation)
            .any(|step| detach_from(&mut *object, step.property, &dependent.target));
        if detached {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!(
                "{} {} of {}",
                dependent.relation,
                dependent.target,
                record.id()
            )))
        }
    }

    async fn delete(&self, kind: ResourceKind, record: &ObservedRecord) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.push(Call::Delete {
            kind,
            id: record.id().to_string(),
        });
        if let Some(error) = state.delete_failures.get(record.id()) {
            return Err(error.clone());
        }

        let object = state.object_mut(kind, &record.region, record.id())?;
        if has_dependents(kind, object) {
            return Err(ApiError::DependencyViolation(format!(
                "{} has dependent objects attached",
                record.id()
            )));
        }
        if let Some(objects) = state.objects.get_mut(&(kind, record.region.clone())) {
            objects.retain(|o| o.id != record.id());
        }
        Ok(())
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Find the outcome for `name`.
///
/// # Panics
///
/// Panics if there is no outcome with that name.
pub fn outcome<'a>(outcomes: &'a [Outcome], name: &str) -> &'a Outcome {
    outcomes
        .iter()
        .find(|o| o.name == name)
        .unwrap_or_else(|| {
            panic!(
                "No outcome for '{}'. Outcomes: {:?}",
                name,
                outcomes.iter().map(|o| &o.name).collect::<Vec<_>>()
            )
        })
}

fn assert_action<'a>(outcomes: &'a [Outcome], name: &str, action: Action) -> &'a Outcome {
    let found = outcome(outcomes, name);
    assert_eq!(
        found.action, action,
        "Expected '{}' to be {}, but it was {} (error: {:?})",
        name, action, found.action, found.error
    );
    found
}

/// Assert that `name` was created without error.
///
/// # Panics
///
/// Panics if the resource was not created or the outcome carries an error.
pub fn assert_created(outcomes: &[Outcome], name: &str) {
    let found = assert_action(outcomes, name, Action::Created);
    assert!(
        found.error.is_none(),
        "Expected '{}' to be created cleanly, but got: {:?}",
        name,
        found.error
    );
}

/// Assert that `name` was updated in place without error.
///
/// # Panics
///
/// Panics if the resource was not updated.
pub fn assert_updated(outcomes: &[Outcome], name: &str) {
    let found = assert_action(outcomes, name, Action::Updated);
    assert!(found.error.is_none(), "Unexpected error: {:?}", found.error);
}

/// Assert that `name` was destroyed.
///
/// # Panics
///
/// Panics if the resource was not destroyed.
pub fn assert_destroyed(outcomes: &[Outcome], name: &str) {
    let found = assert_action(outcomes, name, Action::Destroyed);
    assert!(found.error.is_none(), "Unexpected error: {:?}", found.error);
}

/// Assert that nothing was done to `name` and nothing went wrong.
///
/// # Panics
///
/// Panics if the resource was changed or the outcome carries an error.
pub fn assert_noop(outcomes: &[Outcome], name: &str) {
    let found = assert_action(outcomes, name, Action::Noop);
    assert!(found.error.is_none(), "Unexpected error: {:?}", found.error);
}

/// Assert that `name` was created but never tagged.
///
/// # Panics
///
/// Panics if the outcome is not degraded.
pub fn assert_degraded(outcomes: &[Outcome], name: &str) {
    let found = outcome(outcomes, name);
    assert!(
        found.is_degraded(),
        "Expected '{}' to be created but untagged, got {} (error: {:?})",
        name,
        found.action,
        found.error
    );
}

/// Assert that `name` failed, returning its error.
///
/// # Panics
///
/// Panics if the outcome carries no error.
pub fn assert_failed<'a>(outcomes: &'a [Outcome], name: &str) -> &'a ReconcileError {
    let found = outcome(outcomes, name);
    found
        .error
        .as_ref()
        .unwrap_or_else(|| panic!("Expected '{}' to fail, but it was {}", name, found.action))
}

/// Assert that no mutating call reached the control plane.
///
/// # Panics
///
/// Panics if any create, update, tag, detach or delete call was recorded.
pub fn assert_no_mutations(api: &MockControlPlane) {
    let mutations = api.mutations();
    assert!(
        mutations.is_empty(),
        "Expected no mutations, but got {}: {:?}",
        mutations.len(),
        mutations
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains(substring)),
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Relation;
    use serde_json::{json, Map};

    fn request(name: &str) -> CreateRequest {
        CreateRequest {
            name: name.to_string(),
            attributes: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_create_generates_ids() {
        let api = MockControlPlane::new();
        let vpc = api
            .create(ResourceKind::Vpc, "us-east-1", &request("a"))
            .await
            .unwrap();
        assert!(vpc.id.starts_with("vpc-"));
        assert!(vpc.tags.is_empty());

        let sg = api
            .create(ResourceKind::SecurityGroup, "us-east-1", &request("web-sg"))
            .await
            .unwrap();
        assert!(sg.id.starts_with("sg-"));
        assert_eq!(sg.property("group_name"), Some(&json!("web-sg")));

        let lb = api
            .create(ResourceKind::LoadBalancer, "us-east-1", &request("web-lb"))
            .await
            .unwrap();
        assert_eq!(lb.id, "web-lb");
        assert_eq!(api.objects(ResourceKind::Vpc, "us-east-1").len(), 1);
    }

    #[tokio::test]
    async fn test_list_pages() {
        let api = MockControlPlane::new().with_page_size(2);
        for id in ["a", "b", "c"] {
            api.insert(ResourceKind::Vpc, "us-east-1", RemoteObject::new(id));
        }

        let first = api.list(ResourceKind::Vpc, "us-east-1", None).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.next_marker.as_deref(), Some("2"));

        let second = api
            .list(ResourceKind::Vpc, "us-east-1", Some("2"))
            .await
            .unwrap();
        assert_eq!(second.objects.len(), 1);
        assert!(second.next_marker.is_none());

        let empty = api.list(ResourceKind::Vpc, "eu-west-1", None).await.unwrap();
        assert_eq!(empty, Page::last(vec![]));

        let err = api
            .list(ResourceKind::Vpc, "us-east-1", Some("bogus"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_tag_failures_are_consumed() {
        let api = MockControlPlane::new();
        let vpc = api
            .create(ResourceKind::Vpc, "us-east-1", &request("a"))
            .await
            .unwrap();
        let tags = BTreeMap::from([("Name".to_string(), "a".to_string())]);

        api.fail_tags(1);
        assert!(api
            .tag(ResourceKind::Vpc, "us-east-1", &vpc.id, &tags)
            .await
            .is_err());
        api.tag(ResourceKind::Vpc, "us-east-1", &vpc.id, &tags)
            .await
            .unwrap();

        let stored = api.find(ResourceKind::Vpc, "us-east-1", &vpc.id).unwrap();
        assert_eq!(stored.tags["Name"], "a");
    }

    #[tokio::test]
    async fn test_delete_requires_detach() {
        let api = MockControlPlane::new();
        api.insert(
            ResourceKind::InternetGateway,
            "us-east-1",
            RemoteObject::new("igw-1")
                .with_tag("Name", "edge")
                .with_property("vpc", "vpc-9"),
        );
        let record = ObservedRecord::new(ResourceKind::InternetGateway, "edge", "us-east-1")
            .with_id("igw-1");

        let err = api
            .delete(ResourceKind::InternetGateway, &record)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DependencyViolation(_)));

        let dependent = Dependent::new(Relation::VpcAttachment, "vpc-9");
        api.detach(ResourceKind::InternetGateway, &record, &dependent)
            .await
            .unwrap();
        api.delete(ResourceKind::InternetGateway, &record)
            .await
            .unwrap();
        assert!(api
            .objects(ResourceKind::InternetGateway, "us-east-1")
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_name_tag() {
        let api = MockControlPlane::new();
        api.insert(
            ResourceKind::Vpc,
            "us-east-1",
            RemoteObject::new("vpc-1")
                .with_tag("Name", "a")
                .with_tag("env", "dev"),
        );
        let record = ObservedRecord::new(ResourceKind::Vpc, "a", "us-east-1").with_id("vpc-1");
        let changes = vec![
            AttributeChange::modified("tags", json!({"env": "dev"}), json!({"env": "prod"})),
            AttributeChange::added("dhcp_options", json!("dopt-1")),
        ];
        api.update(ResourceKind::Vpc, &record, &changes).await.unwrap();

        let stored = api.find(ResourceKind::Vpc, "us-east-1", "vpc-1").unwrap();
        assert_eq!(stored.tags["Name"], "a");
        assert_eq!(stored.tags["env"], "prod");
        assert_eq!(stored.property("dhcp_options"), Some(&json!("dopt-1")));
    }

    #[tokio::test]
    async fn test_call_log() {
        let api = MockControlPlane::new();
        api.regions().await.unwrap();
        api.list(ResourceKind::Vpc, "us-east-1", None).await.unwrap();
        assert_eq!(api.calls().len(), 2);
        assert_no_mutations(&api);

        api.fail_create("a", ApiError::PermissionDenied("ec2:CreateVpc".to_string()));
        assert!(api
            .create(ResourceKind::Vpc, "us-east-1", &request("a"))
            .await
            .is_err());
        assert_eq!(api.mutations().len(), 1);

        api.clear_calls();
        assert!(api.calls().is_empty());
    }

    #[test]
    #[should_panic(expected = "Expected no mutations")]
    fn test_assert_no_mutations_fails() {
        let api = MockControlPlane::new();
        api.state().calls.push(Call::Delete {
            kind: ResourceKind::Vpc,
            id: "vpc-1".to_string(),
        });
        assert_no_mutations(&api);
    }

    #[test]
    fn test_outcome_assertions() {
        let outcomes = vec![
            Outcome {
                name: "a".to_string(),
                region: "us-east-1".to_string(),
                action: Action::Created,
                error: None,
                record: None,
            },
            Outcome {
                name: "b".to_string(),
                region: "us-east-1".to_string(),
                action: Action::Noop,
                error: Some(ReconcileError::invalid(ResourceKind::Vpc, "b", "bad")),
                record: None,
            },
        ];
        assert_created(&outcomes, "a");
        let err = assert_failed(&outcomes, "b");
        assert!(err.is_local());
    }

    #[test]
    #[should_panic(expected = "No outcome for 'missing'")]
    fn test_outcome_missing() {
        outcome(&[], "missing");
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![
            Diagnostic::warning("Retry delay is long"),
            Diagnostic::error("Missing required attribute 'cidr_block'"),
        ];
        assert_error_contains(&diagnostics, "cidr_block");
    }
}
