//! # Status Maps
//!
//! Two independent tables translate between HTTP statuses and RPC status codes:
//!
//! * [`http_status_to_code`] classifies a failed call to the upstream GraphQL endpoint.
//! * [`code_to_http_status`] picks the HTTP status used when an error produced by the bridge
//!   is written back on the Connect or plain JSON wire.
//!
//! Both are total functions: unknown input falls back to a default instead of panicking.
use tonic::Code;

/// Maps the HTTP status of an upstream GraphQL response to an RPC code.
///
/// A `400` from the GraphQL endpoint means the bridge sent a request the engine could not
/// accept, which is a bridge-side fault and therefore `internal`.
pub fn http_status_to_code(status: u16) -> Code {
    match status {
        400 => Code::Internal,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 | 501 => Code::Unimplemented,
        409 => Code::Aborted,
        429 | 502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}

/// Maps an RPC code to the HTTP status used on the Connect and JSON wires.
pub fn code_to_http_status(code: Code) -> u16 {
    match code {
        Code::Ok => 200,
        Code::Cancelled => 499,
        Code::Unknown | Code::Internal | Code::DataLoss => 500,
        Code::InvalidArgument | Code::OutOfRange => 400,
        Code::DeadlineExceeded => 504,
        Code::NotFound | Code::Unimplemented => 404,
        Code::AlreadyExists | Code::Aborted => 409,
        Code::PermissionDenied => 403,
        Code::ResourceExhausted => 429,
        Code::FailedPrecondition => 412,
        Code::Unavailable => 503,
        Code::Unauthenticated => 401,
    }
}

/// Returns the Connect protocol name of a code (e.g. `invalid_argument`).
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "canceled",
        Code::Unknown => "unknown",
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}

/// Every code of the RPC code table, in numeric order.
pub const ALL_CODES: [Code; 17] = [
    Code::Ok,
    Code::Cancelled,
    Code::Unknown,
    Code::InvalidArgument,
    Code::DeadlineExceeded,
    Code::NotFound,
    Code::AlreadyExists,
    Code::PermissionDenied,
    Code::ResourceExhausted,
    Code::FailedPrecondition,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unimplemented,
    Code::Internal,
    Code::Unavailable,
    Code::DataLoss,
    Code::Unauthenticated,
];

/// Parses a Connect code name back into a [`Code`].
pub fn code_from_name(name: &str) -> Option<Code> {
    ALL_CODES.into_iter().find(|code| code_name(*code) == name)
}
