//! gRPC and gRPC-Web calls.
//!
//! `tonic::server::Grpc` drives the method's [`JsonCodec`] and owns message framing, status
//! trailers and `grpc-message` encoding. A gRPC-Web response is the same response with its
//! trailers moved into a final body frame flagged `0x80`.
use super::{MAX_REQUEST_BYTES, Protocol, Target};
use crate::{
    codec::{Encoding, JsonCodec},
    error::RpcError,
    service::{BridgeService, ErrorBody, JsonRequest},
};
use axum::{body::Body, extract::Request, response::Response};
use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, Method, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use std::sync::Arc;
use tonic::{Status, server::Grpc};

const TRAILERS_FLAG: u8 = 0x80;

/// The `tonic::Status` written for `err`.
pub(super) fn status(err: &RpcError) -> Status {
    Status::new(err.code(), ErrorBody::from(err).message)
}

/// A trailers-only response carrying `err` in its headers.
pub(super) fn error_response(protocol: Protocol, encoding: Encoding, err: &RpcError) -> Response {
    let mut response = status(err).into_http::<Body>();
    set_content_type(response.headers_mut(), protocol, encoding);
    response
}

/// Serves one resolved unary call.
pub(super) async fn serve(
    bridge: Arc<BridgeService>,
    target: Target,
    protocol: Protocol,
    encoding: Encoding,
    request: Request,
) -> Response {
    let Target { service, method } = target;
    let uri = request.uri().clone();
    let headers = request.headers().clone();

    let call = tower::service_fn(move |message: tonic::Request<Bytes>| {
        let bridge = bridge.clone();
        let service = service.clone();
        let request = JsonRequest {
            method: Method::POST,
            uri: uri.clone(),
            headers: headers.clone(),
            body: message.into_inner(),
        };

        async move {
            bridge
                .handle(&service, request)
                .await
                .map(tonic::Response::new)
                .map_err(|err| status(&err))
        }
    });

    let codec = JsonCodec::new(method.input.clone(), method.output.clone()).with_encoding(encoding);
    let mut grpc = Grpc::new(codec).max_decoding_message_size(MAX_REQUEST_BYTES);
    let response = grpc.unary(call, request).await;

    let mut response = match protocol {
        Protocol::GrpcWeb => into_grpc_web(response).await,
        _ => response.map(Body::new),
    };

    set_content_type(response.headers_mut(), protocol, encoding);
    response
}

/// Moves the trailers of a unary gRPC response into the gRPC-Web trailer frame.
async fn into_grpc_web(response: http::Response<tonic::body::Body>) -> Response {
    let (parts, body) = response.into_parts();

    let collected = match body.collect().await {
        Ok(collected) => collected,
        Err(status) => {
            tracing::error!(error = %status, "Failed to produce the gRPC-Web response");
            return status.into_http();
        }
    };

    let trailers = collected.trailers().cloned();
    let data = collected.to_bytes();

    let mut body = BytesMut::from(&data[..]);
    if let Some(trailers) = trailers {
        body.put_slice(&trailer_frame(&trailers));
    }

    Response::from_parts(parts, Body::from(body.freeze()))
}

fn trailer_frame(trailers: &HeaderMap) -> Bytes {
    let mut block = BytesMut::new();
    for (name, value) in trailers {
        block.put_slice(name.as_str().as_bytes());
        block.put_u8(b':');
        block.put_slice(value.as_bytes());
        block.put_slice(b"\r\n");
    }

    let mut frame = BytesMut::with_capacity(5 + block.len());
    frame.put_u8(TRAILERS_FLAG);
    frame.put_u32(block.len() as u32);
    frame.put_slice(&block);
    frame.freeze()
}

fn set_content_type(headers: &mut HeaderMap, protocol: Protocol, encoding: Encoding) {
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(protocol.content_type(encoding)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn trailer_frame_lists_every_trailer() {
        let mut trailers = HeaderMap::new();
        Status::new(Code::NotFound, "no user 42")
            .add_header(&mut trailers)
            .unwrap();

        let frame = trailer_frame(&trailers);

        assert_eq!(frame[0], TRAILERS_FLAG);
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert_eq!(frame.len(), 5 + len);

        let block = std::str::from_utf8(&frame[5..]).unwrap();
        assert!(block.contains("grpc-status:5\r\n"));
        assert!(block.contains("grpc-message:no%20user%2042\r\n"));
    }

    #[test]
    fn errors_are_trailers_only() {
        let err = RpcError::not_found("méthod not found: Nope");
        let response = error_response(Protocol::Grpc, Encoding::Proto, &err);

        assert_eq!(response.headers().get("grpc-status").unwrap(), "5");
        assert_eq!(
            response.headers().get("grpc-message").unwrap(),
            "m%C3%A9thod%20not%20found:%20Nope"
        );
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/grpc+proto"
        );
    }
}
