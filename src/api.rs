//! The control-plane seam.
//!
//! The reconciliation core never speaks a wire protocol itself. It consumes a
//! [`ControlPlane`] implementation that offers region-scoped list, create,
//! update, tag, detach and delete calls for every [`ResourceKind`], and it
//! treats the raw objects those calls return as [`RemoteObject`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::kind::ResourceKind;
use crate::types::{AttributeChange, Dependent, ObservedRecord};

/// A remote object as returned by a listing or create call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Primary provider-assigned identifier (instance id, group id, ...).
    pub id: String,
    /// Raw properties of the object.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Tags attached to the object.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RemoteObject {
    /// Create an object with the given identifier and no properties.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Look up a property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Objects on this page (may be empty).
    pub objects: Vec<RemoteObject>,
    /// Continuation marker; `None` when the listing is exhausted.
    pub next_marker: Option<String>,
}

impl Page {
    /// A final page.
    pub fn last(objects: Vec<RemoteObject>) -> Self {
        Self {
            objects,
            next_marker: None,
        }
    }

    /// A page followed by more pages.
    pub fn more(objects: Vec<RemoteObject>, marker: impl Into<String>) -> Self {
        Self {
            objects,
            next_marker: Some(marker.into()),
        }
    }
}

/// What a create call is asked to build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateRequest {
    /// Name of the new object.
    pub name: String,
    /// Attributes to create it with. For kinds that are tagged after
    /// creation this excludes `tags`.
    pub attributes: Map<String, Value>,
}

/// A region-scoped cloud control-plane API.
///
/// Every call blocks the pass until it returns; a timed out call must be
/// reported as [`ApiError::DeadlineExceeded`].
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// All regions the account can use.
    async fn regions(&self) -> Result<Vec<String>, ApiError>;

    /// List one page of objects of `kind` in `region`, starting at `marker`.
    ///
    /// Objects should carry every schema property the service reports.
    /// Properties marked write-only may be left out. A page may be empty and
    /// still carry a marker, but a marker must never be handed out twice.
    async fn list(
        &self,
        kind: ResourceKind,
        region: &str,
        marker: Option<&str>,
    ) -> Result<Page, ApiError>;

    /// Create a new object and return it with its assigned identifier.
    async fn create(
        &self,
        kind: ResourceKind,
        region: &str,
        request: &CreateRequest,
    ) -> Result<RemoteObject, ApiError>;

    /// Apply in-place changes to an existing object.
    async fn update(
        &self,
        kind: ResourceKind,
        record: &ObservedRecord,
        changes: &[AttributeChange],
    ) -> Result<(), ApiError>;

    /// Apply tags to a freshly created object.
    async fn tag(
        &self,
        kind: ResourceKind,
        region: &str,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ApiError>;

    /// Unwind one dependent relationship of an object.
    async fn detach(
        &self,
        kind: ResourceKind,
        record: &ObservedRecord,
        dependent: &Dependent,
    ) -> Result<(), ApiError>;

    /// Delete an object whose dependents have been detached.
    async fn delete(&self, kind: ResourceKind, record: &ObservedRecord) -> Result<(), ApiError>;
}

#[async_trait::async_trait]
impl<T: ControlPlane + ?Sized> ControlPlane for Arc<T> {
    async fn regions(&self) -> Result<Vec<String>, ApiError> {
        (**self).regions().await
    }

    async fn list(
        &self,
        kind: ResourceKind,
        region: &str,
        marker: Option<&str>,
    ) -> Result<Page, ApiError> {
        (**self).list(kind, region, marker).await
    }

    async fn create(
        &self,
        kind: ResourceKind,
        region: &str,
        request: &CreateRequest,
    ) -> Result<RemoteObject, ApiError> {
        (**self).create(kind, region, request).await
    }

    async fn update(
        &self,
        kind: ResourceKind,
        record: &ObservedRecord,
        changes: &[AttributeChange],
    ) -> Result<(), ApiError> {
        (**self).update(kind, record, changes).await
    }

    async fn tag(
        &self,
        kind: ResourceKind,
        region: &str,
        id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        (**self).tag(kind, region, id, tags).await
    }

    async fn detach(
        &self,
        kind: ResourceKind,
        record: &ObservedRecord,
        dependent: &Dependent,
    ) -> Result<(), ApiError> {
        (**self).detach(kind, record, dependent).await
    }

    async fn delete(&self, kind: ResourceKind, record: &ObservedRecord) -> Result<(), ApiError> {
        (**self).delete(kind, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_object_builder() {
        let object = RemoteObject::new("vpc-123")
            .with_property("cidr_block", "10.0.0.0/16")
            .with_tag("Name", "test-vpc");

        assert_eq!(object.id, "vpc-123");
        assert_eq!(object.property("cidr_block"), Some(&json!("10.0.0.0/16")));
        assert_eq!(object.tags["Name"], "test-vpc");
        assert!(object.property("missing").is_none());
    }

    #[test]
    fn test_page_constructors() {
        let page = Page::more(vec![RemoteObject::new("a")], "2");
        assert_eq!(page.next_marker.as_deref(), Some("2"));

        let page = Page::last(vec![]);
        assert!(page.objects.is_empty());
        assert!(page.next_marker.is_none());
    }
}
