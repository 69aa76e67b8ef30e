//! # GraphQL Wire Types
//!
//! The JSON envelopes exchanged with the upstream GraphQL endpoint.
//!
//! Variables and `data` are kept as raw JSON ([`RawValue`]) so the bridge never re-orders or
//! re-encodes what the caller sent or what the engine returned.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, value::RawValue};

/// Request body sent to the GraphQL endpoint.
#[derive(Debug, Serialize)]
pub struct GraphQLRequest<'a> {
    pub query: &'a str,
    pub variables: &'a RawValue,
}

/// Response envelope returned by the GraphQL endpoint.
///
/// `data` is `None` both when the key is absent and when it is `null`. Likewise `errors` is
/// empty when absent or `null`.
#[derive(Debug, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<GraphQLError>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A single GraphQL error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

/// A source location inside the GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_missing_data_are_both_absent() {
        let missing: GraphQLResponse =
            serde_json::from_str(r#"{"errors":[{"message":"x"}]}"#).unwrap();
        let null: GraphQLResponse =
            serde_json::from_str(r#"{"data":null,"errors":[{"message":"x"}]}"#).unwrap();

        assert!(missing.data.is_none());
        assert!(null.data.is_none());
        assert_eq!(null.errors.len(), 1);
    }

    #[test]
    fn null_errors_are_no_errors() {
        let response: GraphQLResponse =
            serde_json::from_str(r#"{"data":{"a":1},"errors":null}"#).unwrap();

        assert!(response.errors.is_empty());
        assert_eq!(response.data.unwrap().get(), r#"{"a":1}"#);
    }

    #[test]
    fn data_is_kept_verbatim() {
        let response: GraphQLResponse =
            serde_json::from_str(r#"{"data":{"b":1, "a":[2]}}"#).unwrap();

        assert_eq!(response.data.unwrap().get(), r#"{"b":1, "a":[2]}"#);
        assert!(response.errors.is_empty());
    }

    #[test]
    fn errors_keep_path_locations_and_extensions() {
        let raw = r#"{"message":"boom","path":["user",0],"locations":[{"line":1,"column":3}],"extensions":{"code":"X"}}"#;
        let error: GraphQLError = serde_json::from_str(raw).unwrap();

        assert_eq!(error.message, "boom");
        assert_eq!(error.locations, Some(vec![Location { line: 1, column: 3 }]));
        assert_eq!(serde_json::to_string(&error).unwrap(), raw);
    }

    #[test]
    fn request_embeds_variables_untouched() {
        let variables = RawValue::from_string(r#"{"id":"1"}"#.to_string()).unwrap();
        let request = GraphQLRequest {
            query: "query Q { a }",
            variables: &variables,
        };

        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"query":"query Q { a }","variables":{"id":"1"}}"#
        );
    }
}
