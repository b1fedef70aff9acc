//! Remote inventory fetching.
//!
//! [`Fetcher::list`] walks every page of a kind's listing in each target
//! region and normalizes the raw objects into [`ObservedRecord`]s. The result
//! is a plain value: there is no inventory cache, every pass lists afresh.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, instrument, trace};

use crate::api::{ControlPlane, RemoteObject};
use crate::config::ProviderConfig;
use crate::error::{ApiError, ReconcileError};
use crate::kind::{NameSource, ResourceKind};
use crate::types::{Dependent, ObservedRecord};

/// Placeholder region reported when the region listing itself fails.
pub const ALL_REGIONS: &str = "*";

/// Error code reported when a listing hands back a marker it already gave.
pub const REPEATED_MARKER: &str = "RepeatedMarker";

/// Lists remote inventory through a [`ControlPlane`].
pub struct Fetcher<'a, C: ?Sized> {
    api: &'a C,
}

impl<'a, C: ControlPlane + ?Sized> Fetcher<'a, C> {
    /// Create a fetcher over `api`.
    pub fn new(api: &'a C) -> Self {
        Self { api }
    }

    /// Regions to list `kind` in: the global region for global kinds, the
    /// configured region if one is set, otherwise every region the control
    /// plane reports.
    pub async fn target_regions(
        &self,
        kind: ResourceKind,
        config: &ProviderConfig,
    ) -> Result<Vec<String>, ReconcileError> {
        if !kind.is_region_scoped() {
            return Ok(vec![config.global_region.clone()]);
        }
        if let Some(region) = &config.region {
            return Ok(vec![region.clone()]);
        }
        self.api
            .regions()
            .await
            .map_err(|cause| ReconcileError::Fetch {
                region: ALL_REGIONS.to_string(),
                kind,
                cause,
            })
    }

    /// List every object of `kind` in `regions`, flattened across regions.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn list(
        &self,
        kind: ResourceKind,
        regions: &[String],
    ) -> Result<Vec<ObservedRecord>, ReconcileError> {
        let mut records = Vec::new();
        for region in regions {
            records.extend(self.list_region(kind, region).await?);
        }
        debug!(count = records.len(), "Listed inventory");
        Ok(records)
    }

    async fn list_region(
        &self,
        kind: ResourceKind,
        region: &str,
    ) -> Result<Vec<ObservedRecord>, ReconcileError> {
        let mut records = Vec::new();
        let mut marker: Option<String> = None;
        let mut seen = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .api
                .list(kind, region, marker.as_deref())
                .await
                .map_err(|cause| ReconcileError::Fetch {
                    region: region.to_string(),
                    kind,
                    cause,
                })?;
            pages += 1;

            records.extend(
                page.objects
                    .into_iter()
                    .filter_map(|object| normalize(kind, region, object)),
            );

            match page.next_marker {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(ReconcileError::Fetch {
                        region: region.to_string(),
                        kind,
                        cause: ApiError::Service {
                            code: REPEATED_MARKER.to_string(),
                            message: format!("Listing returned marker '{}' twice", next),
                        },
                    });
                },
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        trace!(region, pages, count = records.len(), "Listed region");
        Ok(records)
    }
}

/// Convert a raw remote object into an [`ObservedRecord`].
///
/// Returns `None` for objects without a resolvable name and for objects the
/// kind considers gone (terminated instances, deleting volumes).
pub fn normalize(kind: ResourceKind, region: &str, object: RemoteObject) -> Option<ObservedRecord> {
    if kind.is_gone(&object) {
        trace!(id = %object.id, "Skipping object that is being deleted");
        return None;
    }

    let name = match kind.name_source() {
        NameSource::Tag(tag) => object.tags.get(tag).cloned(),
        NameSource::Field(field) => object
            .property(field)
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        trace!(id = %object.id, "Skipping unnamed object");
        return None;
    };

    Some(to_record(kind, region, name, &object))
}

/// Build the record for a remote object whose name is already known.
pub(crate) fn to_record(
    kind: ResourceKind,
    region: &str,
    name: String,
    object: &RemoteObject,
) -> ObservedRecord {
    let mut record = ObservedRecord::new(kind, name, region).with_id(object.id.as_str());
    for key in kind.identifier_keys() {
        if let Some(value) = object.property(key).and_then(Value::as_str) {
            record.identifiers.insert(key.to_string(), value.to_string());
        }
    }

    for relation in kind.teardown_relations() {
        for target in string_values(object.property(relation.property)) {
            record.dependents.push(Dependent::new(relation.relation, target));
        }
    }

    record.attributes = attributes(kind, object);
    record
}

fn attributes(kind: ResourceKind, object: &RemoteObject) -> Map<String, Value> {
    let schema = kind.schema();
    let mut attributes: Map<String, Value> = object
        .properties
        .iter()
        .filter(|(key, _)| key.as_str() != "tags" && schema.attribute(key).is_some())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if schema.attribute("tags").is_some() {
        let name_tag = match kind.name_source() {
            NameSource::Tag(tag) => Some(tag),
            NameSource::Field(_) => None,
        };
        let tags: Map<String, Value> = object
            .tags
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != name_tag)
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        attributes.insert("tags".to_string(), Value::Object(tags));
    }

    attributes
}

fn string_values(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Page;
    use crate::kind::Relation;
    use crate::testing::{Call, MockControlPlane};
    use serde_json::json;

    fn named_vpc(id: &str, name: &str) -> RemoteObject {
        RemoteObject::new(id)
            .with_property("cidr_block", "10.0.0.0/16")
            .with_tag("Name", name)
    }

    #[test]
    fn test_normalize_tag_named_kind() {
        let object = named_vpc("vpc-123", "test-vpc")
            .with_tag("env", "prod")
            .with_property("owner_id", "123456789012");
        let record = normalize(ResourceKind::Vpc, "us-east-1", object).unwrap();

        assert_eq!(record.name, "test-vpc");
        assert_eq!(record.region, "us-east-1");
        assert_eq!(record.id(), "vpc-123");
        assert_eq!(record.attributes["cidr_block"], "10.0.0.0/16");
        assert_eq!(record.attributes["tags"], json!({"env": "prod"}));
        assert!(!record.attributes.contains_key("owner_id"));
    }

    #[test]
    fn test_normalize_field_named_kind() {
        let object = RemoteObject::new("AIDAEXAMPLE")
            .with_property("user_name", "alice")
            .with_property("arn", "arn:aws:iam::123456789012:user/alice")
            .with_property("path", "/");
        let record = normalize(ResourceKind::IamUser, "us-east-1", object).unwrap();

        assert_eq!(record.name, "alice");
        assert_eq!(
            record.identifiers["arn"],
            "arn:aws:iam::123456789012:user/alice"
        );
        assert_eq!(record.attributes["path"], "/");
        assert!(!record.attributes.contains_key("tags"));
    }

    #[test]
    fn test_normalize_skips_unnamed_and_terminated() {
        let unnamed = RemoteObject::new("vpc-1").with_property("cidr_block", "10.0.0.0/16");
        assert!(normalize(ResourceKind::Vpc, "us-east-1", unnamed).is_none());

        let terminated = RemoteObject::new("i-1")
            .with_tag("Name", "web")
            .with_property("state", "terminated");
        assert!(normalize(ResourceKind::Instance, "us-east-1", terminated).is_none());
    }

    #[test]
    fn test_normalize_collects_dependents() {
        let gateway = RemoteObject::new("igw-1")
            .with_tag("Name", "edge")
            .with_property("vpc", "vpc-9");
        let record = normalize(ResourceKind::InternetGateway, "us-east-1", gateway).unwrap();
        assert_eq!(
            record.dependents,
            vec![Dependent::new(Relation::VpcAttachment, "vpc-9")]
        );

        let lb = RemoteObject::new("web-lb")
            .with_property("load_balancer_name", "web-lb")
            .with_property("dns_name", "web-lb-1.elb.amazonaws.com")
            .with_property("instances", json!(["i-1", "i-2"]));
        let record = normalize(ResourceKind::LoadBalancer, "us-east-1", lb).unwrap();
        assert_eq!(record.dependents.len(), 2);
        assert_eq!(record.identifiers["dns_name"], "web-lb-1.elb.amazonaws.com");
    }

    #[tokio::test]
    async fn test_list_follows_pagination() {
        let api = MockControlPlane::new()
            .with_regions(["us-east-1"])
            .with_page_size(2);
        for i in 0..5 {
            api.insert(
                ResourceKind::Vpc,
                "us-east-1",
                named_vpc(&format!("vpc-{}", i), &format!("net-{}", i)),
            );
        }

        let fetcher = Fetcher::new(&api);
        let records = fetcher
            .list(ResourceKind::Vpc, &["us-east-1".to_string()])
            .await
            .unwrap();

        assert_eq!(records.len(), 5);
        let lists = api
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::List { .. }))
            .count();
        assert_eq!(lists, 3);
    }

    #[tokio::test]
    async fn test_list_continues_past_empty_page_with_marker() {
        let api = MockControlPlane::new();
        api.script_pages(
            "us-east-1",
            [
                Page::more(vec![], "a"),
                Page::more(vec![named_vpc("vpc-1", "one")], "b"),
                Page::last(vec![named_vpc("vpc-2", "two")]),
            ],
        );

        let fetcher = Fetcher::new(&api);
        let records = fetcher
            .list(ResourceKind::Vpc, &["us-east-1".to_string()])
            .await
            .unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        let markers: Vec<_> = api
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::List { marker, .. } => Some(marker),
                _ => None,
            })
            .collect();
        assert_eq!(
            markers,
            vec![None, Some("a".to_string()), Some("b".to_string())]
        );
    }

    #[tokio::test]
    async fn test_list_stops_on_repeated_marker() {
        let api = MockControlPlane::new();
        api.script_pages(
            "us-east-1",
            [
                Page::more(vec![named_vpc("vpc-1", "one")], "a"),
                Page::more(vec![], "a"),
                Page::last(vec![]),
            ],
        );

        let fetcher = Fetcher::new(&api);
        let err = fetcher
            .list(ResourceKind::Vpc, &["us-east-1".to_string()])
            .await
            .unwrap_err();

        match err {
            ReconcileError::Fetch { region, cause, .. } => {
                assert_eq!(region, "us-east-1");
                assert_eq!(cause.code(), REPEATED_MARKER);
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_list_flattens_regions_and_tolerates_empty() {
        let api = MockControlPlane::new().with_regions(["us-east-1", "eu-west-1", "ap-south-1"]);
        api.insert(ResourceKind::Vpc, "us-east-1", named_vpc("vpc-1", "a"));
        api.insert(ResourceKind::Vpc, "ap-south-1", named_vpc("vpc-2", "b"));

        let fetcher = Fetcher::new(&api);
        let regions = fetcher
            .target_regions(ResourceKind::Vpc, &ProviderConfig::default())
            .await
            .unwrap();
        assert_eq!(regions.len(), 3);

        let records = fetcher.list(ResourceKind::Vpc, &regions).await.unwrap();
        let names: Vec<_> = records.iter().map(|r| (r.name.as_str(), r.region.as_str())).collect();
        assert_eq!(names, vec![("a", "us-east-1"), ("b", "ap-south-1")]);
    }

    #[tokio::test]
    async fn test_target_regions() {
        let api = MockControlPlane::new().with_regions(["us-east-1", "eu-west-1"]);
        let fetcher = Fetcher::new(&api);

        let config = ProviderConfig::default().with_region("eu-west-1");
        let regions = fetcher
            .target_regions(ResourceKind::Subnet, &config)
            .await
            .unwrap();
        assert_eq!(regions, vec!["eu-west-1"]);

        let regions = fetcher
            .target_regions(ResourceKind::IamUser, &config)
            .await
            .unwrap();
        assert_eq!(regions, vec!["us-east-1"]);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_reports_region() {
        let api = MockControlPlane::new().with_regions(["us-east-1", "eu-west-1"]);
        api.fail_list("eu-west-1", ApiError::Unavailable("maintenance".to_string()));

        let fetcher = Fetcher::new(&api);
        let regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];
        let err = fetcher
            .list(ResourceKind::SecurityGroup, &regions)
            .await
            .unwrap_err();

        match err {
            ReconcileError::Fetch { region, kind, cause } => {
                assert_eq!(region, "eu-west-1");
                assert_eq!(kind, ResourceKind::SecurityGroup);
                assert_eq!(cause, ApiError::Unavailable("maintenance".to_string()));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
