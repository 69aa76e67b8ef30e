//! # gqlrpc Core
//!
//! `gqlrpc-core` is the engine behind the `gqlrpc` server. It exposes a directory of
//! GraphQL operations as strongly-typed RPC services described by Protobuf files, and
//! serves them over gRPC, gRPC-Web and Connect from a single JSON-based handler. The
//! business logic itself runs on an upstream GraphQL endpoint.
//!
//! ## Pipeline
//!
//! 1. **[`discovery`]:** Walks a services root. Every directory owning exactly one `.proto`
//!    file is a service; `.graphql` files below it are its operations.
//! 2. **[`schema`]:** Compiles the proto files of each service into a per-instance
//!    [`schema::TypeUniverse`]. Nothing is registered process-wide, so several bridges (or two
//!    generations of the same bridge) can live in one process.
//! 3. **[`operations`]:** Parses the operation files into an immutable
//!    [`operations::OperationRegistry`] scoped by service.
//! 4. **[`handler`]:** Resolves the operation of an RPC call, turns the proto-JSON payload into
//!    GraphQL variables ([`transform`]), executes it upstream and classifies the outcome.
//! 5. **[`service`] & [`transcode`]:** Adapt every wire protocol to the JSON handler and render
//!    errors back in the caller's protocol.
//! 6. **[`server`]:** Bundles the above into a [`server::Generation`] and swaps it atomically on
//!    reload.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost-reflect` and `tonic` so consumers use compatible versions of
//! the descriptor types and status codes it exposes.
pub mod auth;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod graphql;
pub mod handler;
pub mod headers;
pub mod operations;
pub mod schema;
pub mod server;
pub mod service;
pub mod status;
pub mod transcode;
pub mod transform;

// Re-exports
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
