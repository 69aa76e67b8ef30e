//! # CLI
//!
//! This module defines the command-line interface of `gqlrpc` using `clap`.
//!
//! Every flag can also be set through a `GQLRPC_*` environment variable. Values are validated
//! here so the server only ever sees a well-formed [`ServerConfig`].
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use gqlrpc_core::config::{DEFAULT_LISTEN_ADDR, ServerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "gqlrpc",
    version,
    about = "Serve GraphQL operations as gRPC, gRPC-Web and Connect services"
)]
pub struct Cli {
    /// Root directory holding one subdirectory per service (.proto + .graphql files)
    #[arg(long, env = "GQLRPC_SERVICES_DIR")]
    pub services_dir: PathBuf,

    /// Upstream GraphQL endpoint (e.g. http://localhost:3002/graphql)
    #[arg(long, env = "GQLRPC_GRAPHQL_ENDPOINT", value_parser = parse_endpoint)]
    pub graphql_endpoint: String,

    /// Address to listen on
    #[arg(long, env = "GQLRPC_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    /// Timeout of upstream GraphQL requests, in seconds
    #[arg(long, env = "GQLRPC_REQUEST_TIMEOUT", default_value = "30", value_parser = parse_timeout)]
    pub request_timeout: Duration,

    /// Log filter (e.g. "info", "gqlrpc_core=debug"). Overrides RUST_LOG.
    #[arg(long, env = "GQLRPC_LOG")]
    pub log_level: Option<String>,
}

impl From<&Cli> for ServerConfig {
    fn from(cli: &Cli) -> Self {
        ServerConfig {
            services_dir: cli.services_dir.clone(),
            listen_addr: cli.listen_addr,
            graphql_endpoint: cli.graphql_endpoint.clone(),
            request_timeout: cli.request_timeout,
        }
    }
}

fn parse_endpoint(value: &str) -> Result<String, String> {
    let value = value.trim();

    if value.is_empty() {
        return Err("GraphQL endpoint cannot be empty".to_string());
    }

    Ok(value.to_string())
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|e| format!("Invalid timeout '{value}': {e}"))?;

    if secs == 0 {
        return Err("Timeout must be greater than zero".to_string());
    }

    Ok(Duration::from_secs(secs))
}
