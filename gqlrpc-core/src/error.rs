//! # RPC Errors
//!
//! [`RpcError`] is the structured error every part of the request path speaks. It carries an
//! RPC [`Code`], a client-visible message and a string metadata map. The metadata is how the
//! GraphQL handler hands classification details (`error-classification`, `graphql-errors`,
//! `http-status`, ...) to the protocol layer that finally writes the error out.
use crate::status::code_name;
use std::collections::BTreeMap;
use tonic::Code;

/// Metadata key holding the upstream HTTP status as a decimal string.
pub const META_HTTP_STATUS: &str = "http-status";
/// Metadata key holding the [`ErrorClassification`] of a GraphQL failure.
pub const META_ERROR_CLASSIFICATION: &str = "error-classification";
/// Metadata key holding the JSON array of GraphQL errors.
pub const META_GRAPHQL_ERRORS: &str = "graphql-errors";
/// Metadata key holding the compacted `data` of a partially successful response.
pub const META_GRAPHQL_PARTIAL_DATA: &str = "graphql-partial-data";

/// How a failed GraphQL call is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// The call produced no usable data.
    Critical,
    /// The call produced data alongside errors.
    Partial,
}

impl ErrorClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::Critical => "CRITICAL",
            ErrorClassification::Partial => "PARTIAL",
        }
    }
}

/// A structured RPC error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{}] {message}", code_name(*code))]
pub struct RpcError {
    code: Code,
    message: String,
    metadata: BTreeMap<String, String>,
}

impl RpcError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// The sanitized error used whenever an internal failure must not leak to the caller.
    pub fn internal_server_error() -> Self {
        Self::new(Code::Internal, "internal server error")
    }

    /// Adds (or replaces) a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Looks up a single metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// The classification recorded by the GraphQL handler, if any.
    pub fn classification(&self) -> Option<ErrorClassification> {
        match self.metadata_value(META_ERROR_CLASSIFICATION)? {
            "CRITICAL" => Some(ErrorClassification::Critical),
            "PARTIAL" => Some(ErrorClassification::Partial),
            _ => None,
        }
    }
}
