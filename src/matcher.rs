//! Pairing desired resources with observed records.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::kind::ResourceKind;
use crate::types::{Binding, DesiredResource, ObservedRecord};

/// The result of matching one kind's desired resources against its inventory.
#[derive(Debug, Default)]
pub struct Matched {
    /// One binding per distinct desired resource, in input order.
    pub bindings: Vec<Binding>,
    /// Desired resources whose key was already declared earlier.
    pub duplicates: Vec<DesiredResource>,
    /// Observed records no desired resource refers to.
    pub unbound: Vec<ObservedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    name: String,
    region: Option<String>,
}

impl MatchKey {
    fn new(kind: ResourceKind, name: &str, region: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            region: if kind.is_region_scoped() {
                region.map(str::to_string)
            } else {
                None
            },
        }
    }
}

/// Pair `desired` with `observed` by name, and by region for region-scoped
/// kinds.
///
/// Desired resources must have their region resolved. A desired resource
/// with no counterpart binds to an absent observed side. Observed records
/// with no counterpart are returned as [`Matched::unbound`] and are never
/// scheduled for deletion.
pub fn match_resources(
    kind: ResourceKind,
    desired: Vec<DesiredResource>,
    observed: Vec<ObservedRecord>,
) -> Matched {
    let mut index: HashMap<MatchKey, usize> = HashMap::new();
    let mut slots: Vec<Option<ObservedRecord>> = Vec::with_capacity(observed.len());
    let mut unbound = Vec::new();

    for record in observed {
        let key = MatchKey::new(kind, &record.name, Some(&record.region));
        if index.contains_key(&key) {
            warn!(
                kind = %kind,
                name = %record.name,
                region = %record.region,
                id = %record.id(),
                "Multiple remote objects share a name; using the first"
            );
            unbound.push(record);
            continue;
        }
        index.insert(key, slots.len());
        slots.push(Some(record));
    }

    let mut matched = Matched::default();
    let mut declared = HashSet::new();

    for resource in desired {
        let key = MatchKey::new(kind, &resource.name, resource.region.as_deref());
        if !declared.insert(key.clone()) {
            matched.duplicates.push(resource);
            continue;
        }

        let observed = index.get(&key).and_then(|&i| slots[i].take());
        debug!(
            kind = %kind,
            name = %resource.name,
            found = observed.is_some(),
            "Bound desired resource"
        );
        matched.bindings.push(Binding {
            desired: resource,
            observed,
        });
    }

    matched.unbound = slots.into_iter().flatten().chain(unbound).collect();
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::RecordType;

    fn vpc(name: &str, region: &str, id: &str) -> ObservedRecord {
        ObservedRecord::new(ResourceKind::Vpc, name, region).with_id(id)
    }

    #[test]
    fn test_binds_by_name_and_region() {
        let matched = match_resources(
            ResourceKind::Vpc,
            vec![DesiredResource::present("test-vpc").in_region("us-east-1")],
            vec![vpc("test-vpc", "us-east-1", "vpc-123")],
        );
        assert_eq!(matched.bindings.len(), 1);
        assert_eq!(
            matched.bindings[0].observed.as_ref().map(|r| r.id()),
            Some("vpc-123")
        );
        assert!(matched.unbound.is_empty());
    }

    #[test]
    fn test_region_scoped_kinds_never_cross_regions() {
        let matched = match_resources(
            ResourceKind::Vpc,
            vec![DesiredResource::present("test-vpc").in_region("us-west-2")],
            vec![vpc("test-vpc", "us-east-1", "vpc-123")],
        );
        assert_eq!(matched.bindings.len(), 1);
        assert!(matched.bindings[0].observed.is_none());
        assert_eq!(matched.unbound.len(), 1);
    }

    #[test]
    fn test_global_kinds_ignore_region() {
        let kind = ResourceKind::Route53Record(RecordType::Cname);
        let matched = match_resources(
            kind,
            vec![DesiredResource::present("www.example.com.").in_region("us-east-1")],
            vec![ObservedRecord::new(kind, "www.example.com.", "eu-west-1")],
        );
        assert!(matched.bindings[0].observed.is_some());
    }

    #[test]
    fn test_unmatched_observed_left_unbound() {
        let matched = match_resources(
            ResourceKind::Vpc,
            vec![DesiredResource::present("a").in_region("us-east-1")],
            vec![
                vpc("b", "us-east-1", "vpc-2"),
                vpc("a", "us-east-1", "vpc-1"),
                vpc("c", "us-east-1", "vpc-3"),
            ],
        );
        let unbound: Vec<_> = matched.unbound.iter().map(|r| r.id()).collect();
        assert_eq!(unbound, vec!["vpc-2", "vpc-3"]);
    }

    #[test]
    fn test_duplicate_desired_resources() {
        let matched = match_resources(
            ResourceKind::Vpc,
            vec![
                DesiredResource::present("a").in_region("us-east-1"),
                DesiredResource::present("a").in_region("us-west-2"),
                DesiredResource::absent("a").in_region("us-east-1"),
            ],
            vec![],
        );
        assert_eq!(matched.bindings.len(), 2);
        assert_eq!(matched.duplicates.len(), 1);
        assert_eq!(matched.duplicates[0].region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_first_observed_wins() {
        let matched = match_resources(
            ResourceKind::Vpc,
            vec![DesiredResource::present("a").in_region("us-east-1")],
            vec![vpc("a", "us-east-1", "vpc-1"), vpc("a", "us-east-1", "vpc-2")],
        );
        assert_eq!(
            matched.bindings[0].observed.as_ref().map(|r| r.id()),
            Some("vpc-1")
        );
        assert_eq!(matched.unbound.len(), 1);
        assert_eq!(matched.unbound[0].id(), "vpc-2");
    }
}
