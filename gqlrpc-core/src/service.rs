//! # Bridge Service
//!
//! The single JSON entry point behind every wire protocol. [`crate::transcode`] normalizes each
//! inbound call into a [`JsonRequest`] (Connect-style JSON) and hands it to
//! [`BridgeService::handle`], which:
//!
//! 1. Extracts the method from the `/package.Service/Method` path and checks it exists.
//! 2. Takes the payload from the `message` query parameter (GET) or the body (POST).
//! 3. Runs the [`RpcHandler`] with the inbound headers.
//! 4. Sanitizes failures: [`RpcError`]s pass through, anything else is logged and replaced by
//!    `internal server error`.
//!
//! Errors are rendered on the JSON wire as [`ErrorBody`]:
//!
//! ```json
//! {"code": "unknown", "message": "GraphQL operation failed: boom (and 1 more errors)", "graphql_errors": [...]}
//! ```
use crate::{
    error::{META_GRAPHQL_ERRORS, RpcError},
    graphql::GraphQLError,
    handler::{HandlerError, RequestContext, RpcHandler},
    schema::{MethodDefinition, SchemaLoader},
    status::{code_name, code_to_http_status},
};
use axum::{
    extract::Query,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

#[derive(Debug, thiserror::Error)]
pub enum BridgeServiceError {
    #[error("no proto services found")]
    NoServices,
}

/// A call normalized to Connect-style JSON.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// JSON error body written on the Connect and plain JSON wires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphql_errors: Option<Vec<GraphQLError>>,
}

impl From<&RpcError> for ErrorBody {
    fn from(err: &RpcError) -> Self {
        let graphql_errors = err
            .metadata_value(META_GRAPHQL_ERRORS)
            .and_then(|raw| serde_json::from_str::<Vec<GraphQLError>>(raw).ok())
            .filter(|errors| !errors.is_empty());

        let message = match &graphql_errors {
            Some(errors) if errors.len() > 1 => {
                format!("{} (and {} more errors)", err.message(), errors.len() - 1)
            }
            _ => err.message().to_string(),
        };

        ErrorBody {
            code: code_name(err.code()).to_string(),
            message,
            graphql_errors,
        }
    }
}

/// Renders an error as a Connect JSON error response.
pub fn error_response(err: &RpcError) -> Response {
    let status = StatusCode::from_u16(code_to_http_status(err.code()))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = serde_json::to_vec(&ErrorBody::from(err)).unwrap_or_default();

    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}

/// Summary of a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub full_name: String,
    pub service_name: String,
    pub methods: Vec<String>,
}

/// Extracts `Method` from `/package.Service/Method`, requiring the service to match.
pub fn extract_method_name<'a>(path: &'a str, service: &str) -> Option<&'a str> {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match parts.as_slice() {
        [svc, method] if *svc == service && !method.is_empty() => Some(*method),
        _ => None,
    }
}

/// Serves the compiled services through one [`RpcHandler`].
#[derive(Debug)]
pub struct BridgeService {
    handler: Arc<RpcHandler>,
    schema: Arc<SchemaLoader>,
}

impl BridgeService {
    pub fn new(
        handler: Arc<RpcHandler>,
        schema: Arc<SchemaLoader>,
    ) -> Result<Self, BridgeServiceError> {
        if schema.services().next().is_none() {
            return Err(BridgeServiceError::NoServices);
        }

        let methods: usize = schema.services().map(|s| s.methods.len()).sum();
        let packages: HashSet<&str> =
            schema.services().map(|s| s.package.as_str()).collect();

        tracing::info!(
            packages = packages.len(),
            services = schema.service_names().len(),
            methods,
            "Registering services"
        );

        for service in schema.services() {
            for method in &service.methods {
                tracing::debug!(
                    service = %service.full_name,
                    method = %method.name,
                    input = %method.input_type,
                    output = %method.output_type,
                    "Registered method"
                );
            }
        }

        Ok(Self { handler, schema })
    }

    /// Handles a JSON call addressed to `service`.
    pub async fn handle(&self, service: &str, request: JsonRequest) -> Result<Bytes, RpcError> {
        let path = request.uri.path();

        let result = match extract_method_name(path, service) {
            None => Err(RpcError::not_found("invalid path format")),
            Some(method) => self.dispatch(service, method, &request).await,
        };

        result.inspect_err(|err| {
            tracing::error!(
                service,
                path,
                code = code_name(err.code()),
                http_status = code_to_http_status(err.code()),
                error = err.message(),
                "RPC handler error"
            );
        })
    }

    async fn dispatch(
        &self,
        service: &str,
        method: &str,
        request: &JsonRequest,
    ) -> Result<Bytes, RpcError> {
        self.validate_method(service, method)?;

        let payload = if request.method == Method::GET {
            message_param(&request.uri).map_or(Bytes::from_static(b"{}"), Bytes::from)
        } else {
            request.body.clone()
        };

        let ctx = RequestContext {
            headers: request.headers.clone(),
        };

        match self.handler.handle_rpc(&ctx, service, method, &payload).await {
            Ok(response) => Ok(response),
            Err(HandlerError::Rpc(err)) => Err(err),
            Err(err) => {
                tracing::error!(
                    service,
                    method,
                    error = %err,
                    "Internal error during RPC handling"
                );
                Err(RpcError::internal_server_error())
            }
        }
    }

    pub fn service_count(&self) -> usize {
        self.schema.services().count()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.schema.service_names()
    }

    pub fn validate_service(&self, service: &str) -> Result<(), RpcError> {
        match self.schema.service(service) {
            Some(_) => Ok(()),
            None => Err(RpcError::not_found(format!("service not found: {service}"))),
        }
    }

    pub fn validate_method(&self, service: &str, method: &str) -> Result<(), RpcError> {
        self.method_info(service, method).map(|_| ())
    }

    pub fn method_info(&self, service: &str, method: &str) -> Result<&MethodDefinition, RpcError> {
        self.schema
            .method(service, method)
            .map_err(|_| RpcError::not_found(format!("method not found: {method}")))
    }

    pub fn service_info(&self, service: &str) -> Result<ServiceInfo, RpcError> {
        let definition = self
            .schema
            .service(service)
            .ok_or_else(|| RpcError::not_found(format!("service not found: {service}")))?;

        Ok(ServiceInfo {
            full_name: definition.full_name.clone(),
            service_name: definition.service_name.clone(),
            methods: definition.methods.iter().map(|m| m.name.clone()).collect(),
        })
    }

    pub fn schema(&self) -> &SchemaLoader {
        &self.schema
    }

    pub fn handler(&self) -> &RpcHandler {
        &self.handler
    }
}

/// The URL-decoded `message` query parameter, when present and non-empty.
fn message_param(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.get("message").filter(|m| !m.is_empty()).cloned()
}
