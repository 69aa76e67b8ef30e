//! # Server
//!
//! Wires discovery, schema loading, the operation registry, the handler and the bridge
//! service into a [`Generation`], and serves it over HTTP/1.1 and cleartext HTTP/2.
//!
//! ## Reload
//!
//! [`Server::reload`] builds a complete new generation next to the one serving traffic and
//! publishes it with a single atomic swap. Requests load the current generation once when
//! they arrive and finish against it, so a call never observes a mix of old and new schemas
//! or operations. A failed reload leaves the previous generation in place.
//!
//! ```rust,no_run
//! use gqlrpc_core::{config::ServerConfig, server::Server};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig {
//!     services_dir: "./services".into(),
//!     graphql_endpoint: "http://localhost:3002/graphql".into(),
//!     ..Default::default()
//! };
//!
//! let server = Server::new(config, None).await?;
//! server.start().await?;
//! // ...
//! server.reload().await?;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```
use crate::{
    auth::Authenticator,
    config::ServerConfig,
    discovery::{DiscoveryConfig, DiscoveryError, discover_services},
    handler::{HandlerConfig, HandlerConfigError, RpcHandler},
    operations::{OperationError, OperationRegistry, load_operations_for_service},
    schema::{SchemaError, SchemaLoader},
    service::{BridgeService, BridgeServiceError},
    transcode,
};
use arc_swap::ArcSwap;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex, sync::oneshot, task::JoinHandle};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("services directory cannot be empty")]
    MissingServicesDir,
    #[error("graphql endpoint cannot be empty")]
    MissingGraphQLEndpoint,
    #[error("failed to discover services: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("failed to load proto files: {0}")]
    Schema(#[from] SchemaError),
    #[error("failed to load operations: {0}")]
    Operations(#[from] OperationError),
    #[error("failed to create RPC handler: {0}")]
    Handler(#[from] HandlerConfigError),
    #[error("failed to create bridge service: {0}")]
    Service(#[from] BridgeServiceError),
    #[error("failed to bind '{addr}': {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server is already running")]
    AlreadyRunning,
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One immutable schema + registry + handler + service graph.
#[derive(Debug)]
pub struct Generation {
    pub schema: Arc<SchemaLoader>,
    pub registry: Arc<OperationRegistry>,
    pub handler: Arc<RpcHandler>,
    pub service: Arc<BridgeService>,
}

impl Generation {
    /// Runs the whole load pipeline against `config`.
    pub fn build(config: &ServerConfig, http_client: reqwest::Client) -> Result<Self, ServerError> {
        let discovered = discover_services(&DiscoveryConfig {
            services_dir: config.services_dir.clone(),
        })?;

        // Each service directory is compiled on its own, so services may share a package.
        let mut schema = SchemaLoader::new();
        for service in &discovered {
            schema.load_from_directory(&service.service_dir)?;
        }
        let schema = Arc::new(schema);

        let mut operations = HashMap::new();

        for service in &discovered {
            if service.operation_files.is_empty() {
                tracing::warn!(service = %service.full_name, "No operations found for service");
                continue;
            }

            let ops = load_operations_for_service(&service.full_name, &service.operation_files)?;
            operations.insert(service.full_name.clone(), ops);
        }

        let registry = Arc::new(OperationRegistry::new(operations));

        let handler = Arc::new(RpcHandler::new(HandlerConfig {
            graphql_endpoint: config.graphql_endpoint.clone(),
            http_client,
            operation_registry: registry.clone(),
            schema: schema.clone(),
        })?);

        let service = Arc::new(BridgeService::new(handler.clone(), schema.clone())?);

        tracing::info!(
            services = service.service_count(),
            operations = registry.count(),
            "Built generation"
        );

        Ok(Self {
            schema,
            registry,
            handler,
            service,
        })
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The bridge server.
pub struct Server {
    config: ServerConfig,
    http_client: reqwest::Client,
    current: Arc<ArcSwap<Generation>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Validates the configuration and builds the first generation.
    pub async fn new(
        config: ServerConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Self, ServerError> {
        if config.services_dir.as_os_str().is_empty() {
            return Err(ServerError::MissingServicesDir);
        }

        if config.graphql_endpoint.trim().is_empty() {
            return Err(ServerError::MissingGraphQLEndpoint);
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ServerError::HttpClient)?;

        let generation = build_blocking(config.clone(), http_client.clone()).await?;

        Ok(Self {
            config,
            http_client,
            current: Arc::new(ArcSwap::from_pointee(generation)),
            authenticator,
            running: Mutex::new(None),
        })
    }

    /// Binds the listener and starts serving in the background.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;

        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.listen_addr,
                source,
            })?;

        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.config.listen_addr,
            source,
        })?;

        let app = transcode::router(self.current.clone(), self.authenticator.clone());
        let (shutdown, signal) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = signal.await;
            });

            if let Err(err) = serve.await {
                tracing::error!(error = %err, "Server terminated with an error");
            }
        });

        tracing::info!(
            %addr,
            services = self.service_count(),
            operations = self.operation_count(),
            "Server listening"
        );

        *running = Some(Running {
            addr,
            shutdown,
            task,
        });

        Ok(addr)
    }

    /// Stops accepting connections and waits for in-flight requests to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(());

        if let Err(err) = running.task.await {
            tracing::error!(error = %err, "Server task failed");
        }

        tracing::info!(addr = %running.addr, "Server stopped");
    }

    /// Rebuilds the generation from disk and swaps it in.
    pub async fn reload(&self) -> Result<(), ServerError> {
        tracing::info!(services_dir = %self.config.services_dir.display(), "Reloading");

        let generation = build_blocking(self.config.clone(), self.http_client.clone())
            .await
            .inspect_err(|err| {
                tracing::error!(error = %err, "Reload failed, keeping the current generation")
            })?;

        self.current.store(Arc::new(generation));

        tracing::info!(
            services = self.service_count(),
            operations = self.operation_count(),
            "Reload complete"
        );

        Ok(())
    }

    /// Address the server is bound to, once started.
    pub async fn addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// The generation currently served.
    pub fn generation(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    pub fn service_count(&self) -> usize {
        self.current.load().service.service_count()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.current.load().service.service_names()
    }

    pub fn operation_count(&self) -> usize {
        self.current.load().handler.operation_count()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Runs [`Generation::build`] on the blocking pool.
async fn build_blocking(
    config: ServerConfig,
    http_client: reqwest::Client,
) -> Result<Generation, ServerError> {
    tokio::task::spawn_blocking(move || Generation::build(&config, http_client)).await?
}
