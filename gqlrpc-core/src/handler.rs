//! # RPC Handler
//!
//! Executes one RPC call against the upstream GraphQL endpoint:
//!
//! 1. Resolves the operation named after the method, within the method's own service.
//! 2. Turns the proto-JSON request into GraphQL variables ([`crate::transform`]).
//! 3. POSTs `{query, variables}` upstream, forwarding the caller's headers
//!    ([`crate::headers`]).
//! 4. Classifies the outcome into a JSON response or an [`RpcError`].
//!
//! ## Error classification
//!
//! | Upstream outcome                  | Result                                             |
//! |-----------------------------------|----------------------------------------------------|
//! | Non-2xx status                    | Code from [`http_status_to_code`], `CRITICAL`       |
//! | Unparsable envelope               | `internal`, message `internal server error`        |
//! | `errors` and no `data`            | `unknown`, `CRITICAL`, errors in metadata          |
//! | `errors` and `data`               | `unknown`, `PARTIAL`, errors and data in metadata  |
//! | No `errors`                       | `data` verbatim (or `{}`)                          |
//!
//! Upstream response bodies of failed calls are only logged, never returned to the caller.
use crate::{
    error::{
        ErrorClassification, META_ERROR_CLASSIFICATION, META_GRAPHQL_ERRORS,
        META_GRAPHQL_PARTIAL_DATA, META_HTTP_STATUS, RpcError,
    },
    graphql::{GraphQLError, GraphQLRequest, GraphQLResponse},
    headers::forwardable_headers,
    operations::OperationRegistry,
    schema::SchemaLoader,
    status::http_status_to_code,
    transform::{TransformError, to_graphql_variables},
};
use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::value::RawValue;
use std::{borrow::Cow, sync::Arc};
use tonic::Code;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum HandlerConfigError {
    #[error("graphql endpoint cannot be empty")]
    EmptyEndpoint,
    #[error("invalid graphql endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: http::uri::InvalidUri,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("failed to execute GraphQL request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("failed to read GraphQL response body: {0}")]
    ReadBody(#[source] reqwest::Error),
    #[error("failed to encode GraphQL request: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Everything an [`RpcHandler`] needs.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub graphql_endpoint: String,
    pub http_client: reqwest::Client,
    pub operation_registry: Arc<OperationRegistry>,
    pub schema: Arc<SchemaLoader>,
}

/// Per-request data carried from the transport into the handler.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Headers of the inbound request.
    pub headers: HeaderMap,
}

#[derive(Debug)]
pub struct RpcHandler {
    graphql_endpoint: String,
    http_client: reqwest::Client,
    operation_registry: Arc<OperationRegistry>,
    schema: Arc<SchemaLoader>,
}

impl RpcHandler {
    /// Creates a handler. An endpoint without a scheme is treated as `http://`.
    pub fn new(config: HandlerConfig) -> Result<Self, HandlerConfigError> {
        let endpoint = config.graphql_endpoint.trim();

        if endpoint.is_empty() {
            return Err(HandlerConfigError::EmptyEndpoint);
        }

        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };

        if let Err(source) = endpoint.parse::<http::Uri>() {
            return Err(HandlerConfigError::InvalidEndpoint { endpoint, source });
        }

        Ok(Self {
            graphql_endpoint: endpoint,
            http_client: config.http_client,
            operation_registry: config.operation_registry,
            schema: config.schema,
        })
    }

    pub fn graphql_endpoint(&self) -> &str {
        &self.graphql_endpoint
    }

    /// Number of operations this handler can dispatch to.
    pub fn operation_count(&self) -> usize {
        self.operation_registry.count()
    }

    /// Handles a JSON-encoded RPC request and returns the JSON-encoded response.
    pub async fn handle_rpc(
        &self,
        ctx: &RequestContext,
        service: &str,
        method: &str,
        request_json: &[u8],
    ) -> Result<Bytes, HandlerError> {
        tracing::debug!(service, method, "Handling RPC request");

        let Some(operation) = self
            .operation_registry
            .get_operation_for_service(service, method)
        else {
            let available: Vec<&str> = self
                .operation_registry
                .get_all_operations_for_service(service)
                .into_iter()
                .map(|op| op.name.as_str())
                .collect();

            tracing::error!(
                service,
                method,
                available = ?available,
                "Operation not found"
            );

            return Err(RpcError::not_found(format!(
                "operation not found for service {service}: {method}"
            ))
            .into());
        };

        tracing::debug!(
            service,
            method,
            kind = %operation.kind,
            file = %operation.file_path.display(),
            "Resolved operation"
        );

        let variables = self.variables(service, method, request_json)?;

        self.execute_graphql(ctx, &operation.operation, &variables)
            .await
    }

    fn variables<'a>(
        &self,
        service: &str,
        method: &str,
        request_json: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, RpcError> {
        let invalid = |err: TransformError| {
            RpcError::invalid_argument(format!("invalid request payload: {err}"))
        };

        match self.schema.method(service, method) {
            Ok(definition) => {
                to_graphql_variables(&definition.input, request_json).map_err(invalid)
            }
            Err(err) => {
                tracing::debug!(
                    service,
                    method,
                    error = %err,
                    "No schema for method, sending payload as-is"
                );

                if request_json.iter().all(u8::is_ascii_whitespace) {
                    Ok(Cow::Borrowed(b"{}"))
                } else {
                    serde_json::from_slice::<&RawValue>(request_json)
                        .map_err(|e| invalid(TransformError::InvalidJson(e)))?;
                    Ok(Cow::Borrowed(request_json))
                }
            }
        }
    }

    async fn execute_graphql(
        &self,
        ctx: &RequestContext,
        query: &str,
        variables: &[u8],
    ) -> Result<Bytes, HandlerError> {
        let variables: &RawValue = serde_json::from_slice(variables).map_err(|e| {
            RpcError::invalid_argument(format!("invalid request payload: {e}"))
        })?;

        let body = serde_json::to_vec(&GraphQLRequest { query, variables })
            .map_err(HandlerError::Encode)?;

        let mut headers = forwardable_headers(&ctx.headers);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self
            .http_client
            .post(self.graphql_endpoint.as_str())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(HandlerError::Transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(HandlerError::ReadBody)?;

        if !status.is_success() {
            tracing::error!(
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "GraphQL request failed"
            );

            return Err(RpcError::new(
                http_status_to_code(status.as_u16()),
                format!("GraphQL request failed with HTTP {}", status.as_u16()),
            )
            .with_metadata(META_HTTP_STATUS, status.as_u16().to_string())
            .with_metadata(
                META_ERROR_CLASSIFICATION,
                ErrorClassification::Critical.as_str(),
            )
            .into());
        }

        let envelope: GraphQLResponse = serde_json::from_slice(&body).map_err(|err| {
            tracing::error!(
                error = %err,
                body = %String::from_utf8_lossy(&body),
                "Failed to parse GraphQL response"
            );
            RpcError::internal_server_error()
        })?;

        classify(envelope, status.as_u16()).map_err(HandlerError::from)
    }
}

/// Turns a parsed GraphQL envelope into the RPC result.
pub fn classify(envelope: GraphQLResponse, http_status: u16) -> Result<Bytes, RpcError> {
    let GraphQLResponse { data, errors } = envelope;

    if errors.is_empty() {
        return Ok(match data {
            Some(data) => Bytes::copy_from_slice(data.get().as_bytes()),
            None => Bytes::from_static(b"{}"),
        });
    }

    match data {
        None => Err(critical_error(&errors, http_status)),
        Some(data) => Err(partial_error(&errors, &data, http_status)),
    }
}

fn errors_json(errors: &[GraphQLError]) -> String {
    serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string())
}

fn critical_error(errors: &[GraphQLError], http_status: u16) -> RpcError {
    let first = errors.first().map_or("", |e| e.message.as_str());

    tracing::warn!(
        errors = errors.len(),
        first = first,
        "GraphQL operation failed"
    );

    RpcError::new(Code::Unknown, format!("GraphQL operation failed: {first}"))
        .with_metadata(
            META_ERROR_CLASSIFICATION,
            ErrorClassification::Critical.as_str(),
        )
        .with_metadata(META_GRAPHQL_ERRORS, errors_json(errors))
        .with_metadata(META_HTTP_STATUS, http_status.to_string())
}

fn partial_error(errors: &[GraphQLError], data: &RawValue, http_status: u16) -> RpcError {
    tracing::warn!(errors = errors.len(), "GraphQL partial success with errors");

    let compact = serde_json::from_str::<serde_json::Value>(data.get())
        .map(|value| value.to_string())
        .unwrap_or_else(|_| data.get().to_string());

    RpcError::new(Code::Unknown, "GraphQL partial success with errors")
        .with_metadata(
            META_ERROR_CLASSIFICATION,
            ErrorClassification::Partial.as_str(),
        )
        .with_metadata(META_GRAPHQL_ERRORS, errors_json(errors))
        .with_metadata(META_GRAPHQL_PARTIAL_DATA, compact)
        .with_metadata(META_HTTP_STATUS, http_status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(raw: &str) -> GraphQLResponse {
        serde_json::from_str(raw).unwrap()
    }

    fn handler(endpoint: &str) -> Result<RpcHandler, HandlerConfigError> {
        RpcHandler::new(HandlerConfig {
            graphql_endpoint: endpoint.to_string(),
            http_client: reqwest::Client::new(),
            operation_registry: Arc::new(OperationRegistry::default()),
            schema: Arc::new(SchemaLoader::new()),
        })
    }

    #[test]
    fn endpoint_gets_a_default_scheme() {
        let plain = handler("localhost:3002/graphql").unwrap();
        assert_eq!(plain.graphql_endpoint(), "http://localhost:3002/graphql");

        let tls = handler("https://example.com/graphql").unwrap();
        assert_eq!(tls.graphql_endpoint(), "https://example.com/graphql");
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(matches!(handler("  "), Err(HandlerConfigError::EmptyEndpoint)));
    }

    #[test]
    fn success_returns_data_verbatim() {
        let out = classify(envelope(r#"{"data":{"b":1,"a":2}}"#), 200).unwrap();
        assert_eq!(&out[..], br#"{"b":1,"a":2}"#);

        let out = classify(envelope(r#"{}"#), 200).unwrap();
        assert_eq!(&out[..], b"{}");
    }

    #[test]
    fn errors_without_data_are_critical() {
        let err = classify(
            envelope(r#"{"data":null,"errors":[{"message":"boom"},{"message":"bang"}]}"#),
            200,
        )
        .unwrap_err();

        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(err.message(), "GraphQL operation failed: boom");
        assert_eq!(err.classification(), Some(ErrorClassification::Critical));
        assert_eq!(err.metadata_value(META_HTTP_STATUS), Some("200"));
        assert_eq!(err.metadata_value(META_GRAPHQL_PARTIAL_DATA), None);

        let errors: Vec<GraphQLError> =
            serde_json::from_str(err.metadata_value(META_GRAPHQL_ERRORS).unwrap()).unwrap();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn errors_with_data_are_partial() {
        let err = classify(
            envelope(r#"{"data":{ "user" : { "id": 1 } },"errors":[{"message":"x","path":["user","name"]}]}"#),
            200,
        )
        .unwrap_err();

        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(err.message(), "GraphQL partial success with errors");
        assert_eq!(err.classification(), Some(ErrorClassification::Partial));
        assert_eq!(
            err.metadata_value(META_GRAPHQL_PARTIAL_DATA),
            Some(r#"{"user":{"id":1}}"#)
        );
    }
}
