//! # Variable Transform
//!
//! Turns the proto-JSON payload of an RPC request into the `variables` object of a GraphQL
//! request. Two rules apply, both driven by the request message's schema:
//!
//! 1. **Field renaming:** a field carrying the `gqlrpc.options.v1.graphql_variable_name` option
//!    is emitted under the option's value instead of its JSON name.
//! 2. **Enum normalization:** proto enum values carry their type as a prefix
//!    (`MOOD_HAPPY` for enum `Mood`), GraphQL enum values don't (`HAPPY`). The prefix is
//!    stripped; the `*_UNSPECIFIED` sentinel is dropped entirely, since it stands for "no
//!    value" on the GraphQL side.
//!
//! Payloads that need neither rule are returned as the original bytes.
//!
//! ## Schema access
//!
//! The walk only needs three facts about a field, exposed by [`MessageSchema`]. The trait is
//! implemented for [`MessageDescriptor`] and keeps the reflection runtime out of the
//! algorithm.
use crate::schema::GRAPHQL_VARIABLE_NAME_FIELD_NUMBER;
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};
use serde_json::{Map, Value};
use std::{borrow::Cow, collections::HashSet};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid JSON payload: expected an object")]
    NotAnObject,
}

/// Schema facts needed by the transform, looked up by field name.
pub trait MessageSchema {
    /// Resolves a field by its proto-JSON name, falling back to its declared name.
    fn field(&self, name: &str) -> Option<FieldSchema>;
}

/// What the transform needs to know about one field.
pub struct FieldSchema {
    /// Value of the `graphql_variable_name` option, if set.
    pub graphql_variable_name: Option<String>,
    /// Simple name of the enum type, for enum fields.
    pub enum_name: Option<String>,
    /// Schema of the nested message, for message fields.
    pub message: Option<Box<dyn MessageSchema>>,
}

impl MessageSchema for MessageDescriptor {
    fn field(&self, name: &str) -> Option<FieldSchema> {
        let field = self
            .fields()
            .find(|f| f.json_name() == name)
            .or_else(|| self.get_field_by_name(name))?;

        Some(FieldSchema::from(&field))
    }
}

impl From<&FieldDescriptor> for FieldSchema {
    fn from(field: &FieldDescriptor) -> Self {
        let (enum_name, message) = match field.kind() {
            Kind::Enum(e) => (Some(e.name().to_string()), None),
            // Map entries are keyed by data, not by field names.
            Kind::Message(_) if field.is_map() => (None, None),
            Kind::Message(m) => (None, Some(Box::new(m) as Box<dyn MessageSchema>)),
            _ => (None, None),
        };

        FieldSchema {
            graphql_variable_name: graphql_variable_name(field),
            enum_name,
            message,
        }
    }
}

fn graphql_variable_name(field: &FieldDescriptor) -> Option<String> {
    let options = field.options();

    options.extensions().find_map(|(extension, value)| {
        if extension.number() != GRAPHQL_VARIABLE_NAME_FIELD_NUMBER {
            return None;
        }

        value
            .as_str()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    })
}

/// Converts a proto-JSON payload into GraphQL variables.
///
/// Empty input becomes `{}`. When nothing needs rewriting the input is returned borrowed.
pub fn to_graphql_variables<'a>(
    schema: &dyn MessageSchema,
    proto_json: &'a [u8],
) -> Result<Cow<'a, [u8]>, TransformError> {
    if proto_json.iter().all(u8::is_ascii_whitespace) {
        return Ok(Cow::Borrowed(b"{}"));
    }

    let Value::Object(data) = serde_json::from_slice::<Value>(proto_json)? else {
        return Err(TransformError::NotAnObject);
    };

    if !needs_transformation(&data, schema) {
        return Ok(Cow::Borrowed(proto_json));
    }

    let mut unspecified = HashSet::new();
    let converted = convert_object(&data, Some(schema), "", &mut unspecified);

    if !unspecified.is_empty() {
        tracing::debug!(paths = ?unspecified, "Dropped unspecified enum values");
    }

    Ok(Cow::Owned(serde_json::to_vec(&Value::Object(converted))?))
}

/// Dry run of the transform: `true` when at least one rule would change the payload.
pub fn needs_transformation(data: &Map<String, Value>, schema: &dyn MessageSchema) -> bool {
    data.iter().any(|(key, value)| {
        let Some(field) = schema.field(key) else {
            return false;
        };

        if field.graphql_variable_name.is_some() {
            return true;
        }

        if field.enum_name.is_some() {
            return match value {
                Value::String(s) => !s.is_empty(),
                Value::Array(items) => items
                    .iter()
                    .any(|item| matches!(item, Value::String(s) if !s.is_empty())),
                _ => false,
            };
        }

        match (&field.message, value) {
            (Some(nested), Value::Object(map)) => needs_transformation(map, nested.as_ref()),
            (Some(nested), Value::Array(items)) => items.iter().any(|item| match item {
                Value::Object(map) => needs_transformation(map, nested.as_ref()),
                _ => false,
            }),
            _ => false,
        }
    })
}

fn convert_object(
    data: &Map<String, Value>,
    schema: Option<&dyn MessageSchema>,
    prefix: &str,
    unspecified: &mut HashSet<String>,
) -> Map<String, Value> {
    let mut result = Map::with_capacity(data.len());

    for (key, value) in data {
        let path = format!("{prefix}{key}");
        let field = schema.and_then(|s| s.field(key));

        let converted = convert_value(value, field.as_ref(), &path, unspecified);

        if converted.as_str() == Some("") && unspecified.contains(&path) {
            continue;
        }

        let key = field
            .and_then(|f| f.graphql_variable_name)
            .unwrap_or_else(|| key.clone());

        result.insert(key, converted);
    }

    result
}

fn convert_value(
    value: &Value,
    field: Option<&FieldSchema>,
    path: &str,
    unspecified: &mut HashSet<String>,
) -> Value {
    match value {
        Value::Object(map) => {
            let nested = field.and_then(|f| f.message.as_deref());
            Value::Object(convert_object(map, nested, &format!("{path}."), unspecified))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| convert_value(item, field, &format!("{path}[{i}]"), unspecified))
                .collect(),
        ),
        Value::String(s) => match field.and_then(|f| f.enum_name.as_deref()) {
            Some(enum_name) => {
                let stripped = strip_enum_prefix(s, enum_name);
                if stripped.is_empty() && !s.is_empty() {
                    unspecified.insert(path.to_string());
                }
                Value::String(stripped)
            }
            None => value.clone(),
        },
        other => other.clone(),
    }
}

/// Strips the `UPPER_SNAKE(EnumName)_` prefix from an enum value.
///
/// `*_UNSPECIFIED` becomes the empty string; values without the prefix are returned unchanged.
pub fn strip_enum_prefix(value: &str, enum_name: &str) -> String {
    let prefix = format!("{}_", to_upper_snake_case(enum_name));

    match value.strip_prefix(&prefix) {
        Some("UNSPECIFIED") => String::new(),
        Some(rest) => rest.to_string(),
        None => value.to_string(),
    }
}

/// `EmployeeStatus` -> `EMPLOYEE_STATUS`.
///
/// Names that already contain `_` or are all uppercase are only uppercased.
pub fn to_upper_snake_case(name: &str) -> String {
    if name.contains('_') || name == name.to_uppercase() {
        return name.to_uppercase();
    }

    let mut result = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;

    for c in name.chars() {
        if c.is_ascii_uppercase() && previous_lower {
            result.push('_');
        }
        previous_lower = c.is_ascii_lowercase();
        result.extend(c.to_uppercase());
    }

    result
}
