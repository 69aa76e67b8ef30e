//! Header forwarding policy for upstream GraphQL calls.
//!
//! Caller headers are copied onto the upstream request, except for the ones listed in
//! [`SKIPPED_HEADERS`]: hop-by-hop headers, content negotiation headers the bridge sets itself,
//! WebSocket handshake headers and the control headers of the RPC wire protocols.
use http::{HeaderMap, HeaderName};

/// Lowercase names of the headers never forwarded upstream.
pub const SKIPPED_HEADERS: &[&str] = &[
    // Hop-by-hop
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "http2-settings",
    // Content negotiation, set by the bridge or the HTTP client
    "host",
    "content-type",
    "content-length",
    "content-encoding",
    "content-md5",
    "accept",
    "accept-encoding",
    "accept-charset",
    "accept-language",
    "alt-svc",
    // WebSocket handshake
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "sec-websocket-protocol",
    "sec-websocket-accept",
    // gRPC and gRPC-Web
    "grpc-timeout",
    "grpc-encoding",
    "grpc-accept-encoding",
    "x-grpc-web",
    "x-user-agent",
    // Connect
    "connect-protocol-version",
    "connect-timeout-ms",
    "connect-content-encoding",
    "connect-accept-encoding",
];

/// Returns `true` when a caller header may be copied onto the upstream request.
pub fn is_forwardable(name: &HeaderName) -> bool {
    !SKIPPED_HEADERS.contains(&name.as_str())
}

/// Copies every forwardable header, keeping all values of multi-valued headers.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if is_forwardable(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }

    forwarded
}
