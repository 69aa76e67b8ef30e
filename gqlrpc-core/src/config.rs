//! Server configuration.
use serde::{Deserialize, Deserializer};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Default address the server listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5026";

/// Default timeout of upstream GraphQL requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory of the service directories.
    pub services_dir: PathBuf,
    pub listen_addr: SocketAddr,
    /// URL of the upstream GraphQL endpoint.
    pub graphql_endpoint: String,
    /// Timeout of upstream requests, in seconds when deserialized.
    #[serde(deserialize_with = "duration_from_secs")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            services_dir: PathBuf::new(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5026)),
            graphql_endpoint: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

fn duration_from_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"services_dir":"./services","graphql_endpoint":"localhost:3002/graphql","request_timeout":5}"#,
        )
        .unwrap();

        assert_eq!(config.services_dir, PathBuf::from("./services"));
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
