//! Wire protocol detection.
use crate::codec::Encoding;
use http::{HeaderMap, Method, header::CONTENT_TYPE};

/// The wire protocol of an inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    GrpcWeb,
    /// Connect unary over POST, also used for plain JSON callers.
    Connect,
    /// Connect unary over GET, payload in the query string.
    ConnectGet,
}

/// Why a request could not be mapped to a protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsupported {
    Method(Method),
    ContentType(String),
}

impl Protocol {
    /// `Content-Type` of a successful response.
    pub fn content_type(&self, encoding: Encoding) -> &'static str {
        match (self, encoding) {
            (Protocol::Grpc, Encoding::Proto) => "application/grpc+proto",
            (Protocol::Grpc, Encoding::Json) => "application/grpc+json",
            (Protocol::GrpcWeb, Encoding::Proto) => "application/grpc-web+proto",
            (Protocol::GrpcWeb, Encoding::Json) => "application/grpc-web+json",
            (_, Encoding::Proto) => "application/proto",
            (_, Encoding::Json) => "application/json",
        }
    }
}

/// Classifies a request by HTTP method, `Content-Type` and, for GET, the `encoding` parameter.
pub fn detect(
    method: &Method,
    headers: &HeaderMap,
    get_encoding: Option<&str>,
) -> Result<(Protocol, Encoding), Unsupported> {
    if method == Method::GET {
        return match get_encoding.unwrap_or("json") {
            "json" => Ok((Protocol::ConnectGet, Encoding::Json)),
            "proto" => Ok((Protocol::ConnectGet, Encoding::Proto)),
            other => Err(Unsupported::ContentType(other.to_string())),
        };
    }

    if method != Method::POST {
        return Err(Unsupported::Method(method.clone()));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .unwrap_or_default();

    match content_type.as_str() {
        "application/grpc" | "application/grpc+proto" => Ok((Protocol::Grpc, Encoding::Proto)),
        "application/grpc+json" => Ok((Protocol::Grpc, Encoding::Json)),
        "application/grpc-web" | "application/grpc-web+proto" => {
            Ok((Protocol::GrpcWeb, Encoding::Proto))
        }
        "application/grpc-web+json" => Ok((Protocol::GrpcWeb, Encoding::Json)),
        "application/proto" | "application/protobuf" | "application/x-protobuf" => {
            Ok((Protocol::Connect, Encoding::Proto))
        }
        "" | "application/json" => Ok((Protocol::Connect, Encoding::Json)),
        other if other.ends_with("+json") && !other.starts_with("application/grpc") => {
            Ok((Protocol::Connect, Encoding::Json))
        }
        other => Err(Unsupported::ContentType(other.to_string())),
    }
}
