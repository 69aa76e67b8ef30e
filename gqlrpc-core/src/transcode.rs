//! # Protocol Transcoding
//!
//! Serves every registered service under several wire protocols at `/package.Service/Method`:
//!
//! | Protocol      | Request                                                       | Errors                                  |
//! |---------------|---------------------------------------------------------------|-----------------------------------------|
//! | gRPC          | `application/grpc[+proto\|+json]`, length-prefixed frame      | `grpc-status` / `grpc-message` trailers |
//! | gRPC-Web      | `application/grpc-web[+proto\|+json]`, length-prefixed frame  | trailer frame (flag `0x80`) or headers  |
//! | Connect       | POST `application/json` or `application/proto`                | HTTP status + JSON [`ErrorBody`]        |
//! | Connect GET   | `?message=..&encoding=json\|proto&base64=1`                   | HTTP status + JSON [`ErrorBody`]        |
//! | Plain JSON    | POST JSON without Connect headers                             | HTTP status + JSON [`ErrorBody`]        |
//!
//! Whatever the protocol, the call is normalized into a Connect-style [`JsonRequest`] and
//! handled by the [`BridgeService`] of the generation current when the request arrived.
//! Binary payloads go through the [`JsonCodec`] of the method; gRPC and gRPC-Web calls are
//! served by `tonic::server::Grpc` on top of it.
//!
//! Only unary methods are served. Compressed payloads are rejected: gRPC through tonic, which
//! accepts no compression, and Connect with `unimplemented`.
//!
//! [`ErrorBody`]: crate::service::ErrorBody
mod grpc;
mod protocol;

pub use crate::codec::Encoding;
pub use protocol::Protocol;

use crate::{
    auth::Authenticator,
    codec::JsonCodec,
    error::RpcError,
    schema::MethodDefinition,
    server::Generation,
    service::{BridgeService, JsonRequest, error_response, extract_method_name},
};
use arc_swap::ArcSwap;
use axum::{
    Router,
    body::Body,
    extract::{Query, Request, State},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use http::{
    HeaderValue, Method, StatusCode, Uri,
    header::{ALLOW, CONTENT_ENCODING, CONTENT_TYPE},
    request::Parts,
};
use protocol::Unsupported;
use std::{collections::HashMap, sync::Arc};

/// Largest request body accepted, in bytes.
pub const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

/// Shared state of the transcoding router.
#[derive(Clone)]
pub struct TranscodeState {
    generation: Arc<ArcSwap<Generation>>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

/// Builds the router serving every service of the current generation.
pub fn router(
    generation: Arc<ArcSwap<Generation>>,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> Router {
    Router::new().fallback(serve).with_state(TranscodeState {
        generation,
        authenticator,
    })
}

async fn serve(State(state): State<TranscodeState>, request: Request) -> Response {
    // One snapshot per request, even if a reload happens meanwhile.
    let generation = state.generation.load_full();

    let (parts, body) = request.into_parts();
    let params = query_params(&parts.uri);

    let (protocol, encoding) = match protocol::detect(
        &parts.method,
        &parts.headers,
        params.get("encoding").map(String::as_str),
    ) {
        Ok(detected) => detected,
        Err(Unsupported::Method(method)) => {
            tracing::debug!(%method, path = parts.uri.path(), "Unsupported HTTP method");
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                [(ALLOW, HeaderValue::from_static("GET, POST"))],
            )
                .into_response();
        }
        Err(Unsupported::ContentType(content_type)) => {
            tracing::debug!(%content_type, path = parts.uri.path(), "Unsupported content type");
            return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
        }
    };

    let target = match resolve(&state, &generation.service, &parts).await {
        Ok(target) => target,
        Err(err) => return respond_error(protocol, encoding, &err),
    };

    match protocol {
        Protocol::Grpc | Protocol::GrpcWeb => {
            let request = Request::from_parts(parts, body);
            grpc::serve(generation.service.clone(), target, protocol, encoding, request).await
        }
        Protocol::Connect | Protocol::ConnectGet => {
            let call = Call {
                protocol,
                encoding,
                parts,
                params,
            };

            match call.execute(&generation.service, target, body).await {
                Ok(payload) => (
                    StatusCode::OK,
                    [(
                        CONTENT_TYPE,
                        HeaderValue::from_static(protocol.content_type(encoding)),
                    )],
                    payload,
                )
                    .into_response(),
                Err(err) => respond_error(protocol, encoding, &err),
            }
        }
    }
}

fn query_params(uri: &Uri) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default()
}

fn respond_error(protocol: Protocol, encoding: Encoding, err: &RpcError) -> Response {
    tracing::debug!(?protocol, code = ?err.code(), error = err.message(), "Call failed");

    match protocol {
        Protocol::Connect | Protocol::ConnectGet => error_response(err),
        Protocol::Grpc | Protocol::GrpcWeb => grpc::error_response(protocol, encoding, err),
    }
}

/// The unary method a call is addressed to.
struct Target {
    service: String,
    method: MethodDefinition,
}

/// Authenticates the caller, then resolves the method named by the path.
async fn resolve(
    state: &TranscodeState,
    service: &BridgeService,
    parts: &Parts,
) -> Result<Target, RpcError> {
    if let Some(authenticator) = &state.authenticator {
        authenticator
            .authenticate(&parts.headers)
            .await
            .map_err(|err| {
                tracing::debug!(error = %err, "Authentication failed");
                RpcError::unauthenticated(err.to_string())
            })?;
    }

    let path = parts.uri.path();
    let service_name = path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    service.validate_service(&service_name)?;

    let method_name = extract_method_name(path, &service_name)
        .ok_or_else(|| RpcError::not_found("invalid path format"))?;
    let method = service.method_info(&service_name, method_name)?;

    if method.is_streaming() {
        return Err(RpcError::unimplemented(format!(
            "streaming method {} is not supported",
            method.full_name
        )));
    }

    Ok(Target {
        service: service_name,
        method: method.clone(),
    })
}

/// A Connect (or plain JSON) call.
struct Call {
    protocol: Protocol,
    encoding: Encoding,
    parts: Parts,
    params: HashMap<String, String>,
}

impl Call {
    async fn execute(
        self,
        service: &BridgeService,
        target: Target,
        body: Body,
    ) -> Result<Bytes, RpcError> {
        self.reject_compression()?;

        let codec = JsonCodec::new(target.method.input.clone(), target.method.output.clone());

        let body = axum::body::to_bytes(body, MAX_REQUEST_BYTES)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "Failed to read request body");
                RpcError::invalid_argument("failed to read request")
            })?;

        let (http_method, json) = match self.protocol {
            Protocol::ConnectGet if self.encoding == Encoding::Json && !self.is_base64() => {
                (Method::GET, Bytes::new())
            }
            Protocol::ConnectGet => {
                let message = self.get_message()?;
                (Method::POST, self.to_json(&codec, &message)?)
            }
            _ => (Method::POST, self.to_json(&codec, &body)?),
        };

        let request = JsonRequest {
            method: http_method,
            uri: self.parts.uri.clone(),
            headers: self.parts.headers.clone(),
            body: json,
        };

        let response = service.handle(&target.service, request).await?;

        match self.encoding {
            Encoding::Json => Ok(response),
            Encoding::Proto => codec.encode_response(&response).map(Bytes::from),
        }
    }

    fn to_json(&self, codec: &JsonCodec, payload: &[u8]) -> Result<Bytes, RpcError> {
        match self.encoding {
            Encoding::Json => Ok(Bytes::copy_from_slice(payload)),
            Encoding::Proto => codec.decode_request(payload).map(Bytes::from),
        }
    }

    fn is_base64(&self) -> bool {
        self.params.get("base64").is_some_and(|v| v == "1")
    }

    fn get_message(&self) -> Result<Vec<u8>, RpcError> {
        let raw = self.params.get("message").map_or("", String::as_str);

        if self.is_base64() {
            URL_SAFE_NO_PAD
                .decode(raw.trim_end_matches('='))
                .map_err(|e| RpcError::invalid_argument(format!("invalid base64 message: {e}")))
        } else {
            Ok(raw.as_bytes().to_vec())
        }
    }

    fn reject_compression(&self) -> Result<(), RpcError> {
        let encoding = match self.protocol {
            Protocol::ConnectGet => self.params.get("compression").cloned(),
            _ => self
                .parts
                .headers
                .get(CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };

        match encoding {
            Some(encoding) if encoding != "identity" => Err(RpcError::unimplemented(format!(
                "compression '{encoding}' is not supported"
            ))),
            _ => Ok(()),
        }
    }
}
