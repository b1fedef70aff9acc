//! Local validation of desired records.
//!
//! A malformed desired record is a local precondition failure: it is reported
//! as diagnostics before any remote call is made and is never retried.
//!
//! # Example
//!
//! ```
//! use hemmer_reconcile::kind::ResourceKind;
//! use hemmer_reconcile::types::DesiredResource;
//! use hemmer_reconcile::validation::validate_desired;
//!
//! let desired = DesiredResource::present("test-vpc")
//!     .in_region("us-east-1")
//!     .with_attribute("cidr_block", 16);
//!
//! let diagnostics = validate_desired(ResourceKind::Vpc, &desired);
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("cidr_block".to_string()));
//! ```

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::kind::{NameSource, ResourceKind};
use crate::schema::{AttributeType, Diagnostic, DiagnosticSeverity, KindSchema};
use crate::types::{DesiredResource, Ensure};

/// Validate a desired record against its kind's schema.
///
/// # Validation Rules
///
/// - The name must be non-empty
/// - Attributes must be known to the kind and not computed by the provider
/// - Attribute types must match the schema (null means "not managed")
/// - Required attributes must be present when `ensure` is `present`
/// - Kinds named by a tag must not set that tag through `tags`
pub fn validate_desired(kind: ResourceKind, desired: &DesiredResource) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if desired.name.trim().is_empty() {
        diagnostics.push(Diagnostic::error("Resource name must not be empty"));
    }

    let schema = kind.schema();
    validate_attributes(&schema, &desired.attributes, &mut diagnostics);

    if let NameSource::Tag(key) = kind.name_source() {
        let reserved = desired
            .attributes
            .get("tags")
            .and_then(Value::as_object)
            .is_some_and(|tags| tags.contains_key(key));
        if reserved {
            diagnostics.push(
                Diagnostic::error(format!("Tag '{}' is reserved for the resource name", key))
                    .with_detail(format!("{} resources are named by their '{}' tag", kind, key))
                    .with_attribute("tags"),
            );
        }
    }

    if desired.ensure == Ensure::Present {
        for (name, attr) in &schema.attributes {
            let missing = matches!(desired.attributes.get(name), None | Some(Value::Null));
            if attr.flags.required && missing {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", name))
                        .with_detail(format!("{} resources must set this attribute", kind))
                        .with_attribute(name.as_str()),
                );
            }
        }
    }

    diagnostics
}

/// Validate a desired record, returning an
/// [`ReconcileError::InvalidResource`] carrying the error diagnostics.
pub fn validate_result(kind: ResourceKind, desired: &DesiredResource) -> Result<(), ReconcileError> {
    let errors: Vec<_> = validate_desired(kind, desired)
        .into_iter()
        .filter(Diagnostic::is_error)
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::InvalidResource {
            kind,
            name: desired.name.clone(),
            diagnostics: errors,
        })
    }
}

/// Check if a desired record is valid.
pub fn is_valid(kind: ResourceKind, desired: &DesiredResource) -> bool {
    validate_desired(kind, desired)
        .iter()
        .all(|d| d.severity != DiagnosticSeverity::Error)
}

fn validate_attributes(
    schema: &KindSchema,
    attributes: &Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, value) in attributes {
        let Some(attr) = schema.attribute(name) else {
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", name))
                    .with_attribute(name.as_str()),
            );
            continue;
        };

        if value.is_null() {
            continue;
        }

        if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
            diagnostics.push(
                Diagnostic::error(format!("Attribute '{}' is computed by the provider", name))
                    .with_detail("Computed attributes are reported, not set")
                    .with_attribute(name.as_str()),
            );
            continue;
        }

        validate_attribute_type(&attr.attr_type, value, name, diagnostics);
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                let expected = if matches!(attr_type, AttributeType::Set(_)) {
                    "set"
                } else {
                    "list"
                };
                diagnostics.push(type_error(path, expected, value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
        AttributeType::Object(fields) => {
            if let Some(obj) = value.as_object() {
                validate_object_type(fields, obj, path, diagnostics);
            } else {
                diagnostics.push(type_error(path, "object", value));
            }
        },
    }
}

fn validate_object_type(
    fields: &HashMap<String, AttributeType>,
    obj: &Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, value) in obj {
        let field_path = format!("{}.{}", path, name);
        match fields.get(name) {
            Some(_) if value.is_null() => {},
            Some(field_type) => validate_attribute_type(field_type, value, &field_path, diagnostics),
            None => diagnostics.push(
                Diagnostic::error(format!("Unsupported field '{}'", field_path))
                    .with_attribute(field_path),
            ),
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64()
                || n.as_f64()
                    .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
