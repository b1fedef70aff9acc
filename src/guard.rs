//! Read-only attribute guard and attribute diffing.
//!
//! Every change headed for an in-place update passes through
//! [`check_mutation`] first. The check is local: a rejected change never
//! reaches the control plane.

use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::kind::ResourceKind;
use crate::schema::{AttributeType, KindSchema};
use crate::types::{AttributeChange, DesiredResource, ObservedRecord};

/// Check whether `attribute` of `kind` may be changed on an existing object.
pub fn check_mutation(kind: ResourceKind, attribute: &str) -> Result<(), ReconcileError> {
    check_with_schema(kind, &kind.schema(), attribute)
}

fn check_with_schema(
    kind: ResourceKind,
    schema: &KindSchema,
    attribute: &str,
) -> Result<(), ReconcileError> {
    match schema.attribute(attribute) {
        Some(attr) if attr.read_only || attr.flags.computed => {
            Err(ReconcileError::ReadOnlyViolation {
                kind,
                attribute: attribute.to_string(),
            })
        },
        Some(_) => Ok(()),
        None => Err(ReconcileError::invalid(
            kind,
            attribute,
            format!("Unsupported attribute '{}'", attribute),
        )),
    }
}

/// Compute the attribute changes needed to bring `observed` to `desired`.
///
/// Only attributes named in the desired record are compared; a null desired
/// value means the attribute is not managed. Set-typed attributes compare
/// without regard to order. A write-only attribute missing from the observed
/// record is taken as in sync, since listings never report it.
pub fn diff(
    kind: ResourceKind,
    desired: &DesiredResource,
    observed: &ObservedRecord,
) -> Vec<AttributeChange> {
    diff_with_schema(&kind.schema(), desired, observed)
}

fn diff_with_schema(
    schema: &KindSchema,
    desired: &DesiredResource,
    observed: &ObservedRecord,
) -> Vec<AttributeChange> {
    desired
        .attributes
        .iter()
        .filter(|(_, want)| !want.is_null())
        .filter_map(|(name, want)| {
            let have = observed.attributes.get(name).filter(|v| !v.is_null());
            let in_sync = match schema.attribute(name) {
                Some(attr) if attr.write_only && have.is_none() => true,
                Some(attr) => values_equal(&attr.attr_type, want, have),
                None => have == Some(want),
            };
            (!in_sync).then(|| AttributeChange::new(name.as_str(), have.cloned(), Some(want.clone())))
        })
        .collect()
}

/// Diff `desired` against `observed` and guard every resulting change.
///
/// Returns the changes for an in-place update (empty when in sync), or the
/// first [`ReconcileError::ReadOnlyViolation`] in attribute order.
pub fn plan_update(
    kind: ResourceKind,
    desired: &DesiredResource,
    observed: &ObservedRecord,
) -> Result<Vec<AttributeChange>, ReconcileError> {
    let schema = kind.schema();
    let changes = diff_with_schema(&schema, desired, observed);
    for change in &changes {
        check_with_schema(kind, &schema, &change.path)?;
    }
    Ok(changes)
}

fn values_equal(attr_type: &AttributeType, want: &Value, have: Option<&Value>) -> bool {
    let Some(have) = have else {
        return is_empty_collection(want);
    };

    match attr_type {
        AttributeType::Int64 => match (want.as_f64(), have.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => want == have,
        },
        AttributeType::String | AttributeType::Bool => want == have,
        AttributeType::List(element_type) => match (want.as_array(), have.as_array()) {
            (Some(a), Some(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| values_equal(element_type, x, Some(y)))
            },
            _ => want == have,
        },
        AttributeType::Set(element_type) => match (want.as_array(), have.as_array()) {
            (Some(a), Some(b)) => same_members(element_type, a, b),
            _ => want == have,
        },
        AttributeType::Map(value_type) => match (want.as_object(), have.as_object()) {
            (Some(a), Some(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| values_equal(value_type, v, b.get(k)))
            },
            _ => want == have,
        },
        AttributeType::Object(fields) => match (want.as_object(), have.as_object()) {
            (Some(a), Some(b)) => objects_equal(fields, a, b),
            _ => want == have,
        },
    }
}

fn objects_equal(
    fields: &std::collections::HashMap<String, AttributeType>,
    a: &Map<String, Value>,
    b: &Map<String, Value>,
) -> bool {
    let present = |map: &Map<String, Value>, key: &str| map.get(key).filter(|v| !v.is_null()).cloned();
    a.keys().chain(b.keys()).all(|key| {
        let (x, y) = (present(a, key), present(b, key));
        match (x, fields.get(key)) {
            (None, _) => y.is_none(),
            (Some(x), Some(field_type)) => values_equal(field_type, &x, y.as_ref()),
            (Some(x), None) => y.as_ref() == Some(&x),
        }
    })
}

fn same_members(element_type: &AttributeType, a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut unmatched: Vec<&Value> = b.iter().collect();
    for x in a {
        match unmatched
            .iter()
            .position(|y| values_equal(element_type, x, Some(y)))
        {
            Some(i) => {
                unmatched.swap_remove(i);
            },
            None => return false,
        }
    }
    true
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}
