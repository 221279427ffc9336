//! SyncStack Server - local DynamoDB and AppSync emulator.
//!
//! Serves the DynamoDB JSON protocol on `/` and GraphQL operations on
//! `/graphql` from one listener. Tables, data sources and resolvers are
//! loaded from the definition file named by `SYNCSTACK_DEFINITION`.
//!
//! # Usage
//!
//! ```text
//! SYNCSTACK_DEFINITION=api.json syncstack-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SYNCSTACK_LISTEN` | `0.0.0.0:20002` | Bind address |
//! | `SYNCSTACK_DEFINITION` | *(unset)* | Emulator definition file |
//! | `DYNAMODB_MAX_ITEM_SIZE_BYTES` | `409600` | Item size cap in bytes |
//! | `APPSYNC_MAX_CONCURRENT_OPERATIONS` | `64` | In-flight GraphQL operations |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use syncstack_appsync_core::{AppSyncConfig, SyncStackAppSync};
use syncstack_appsync_model::Definition;
use syncstack_core::SyncStackConfig;
use syncstack_dynamodb_core::{DynamoDBConfig, SyncStackDynamoDB};
use syncstack_http::SyncStackHttpService;

/// Server version reported at start.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Parse the raw definition document.
fn parse_definition(raw: serde_json::Value) -> Result<Definition> {
    serde_json::from_value(raw).context("invalid emulator definition")
}

/// Build the providers and the HTTP service from configuration.
fn build_service(config: &SyncStackConfig) -> Result<SyncStackHttpService> {
    let dynamodb_config = DynamoDBConfig::from_env();
    let provider = Arc::new(SyncStackDynamoDB::new(dynamodb_config));

    let appsync = match config.read_definition()? {
        Some(raw) => {
            let definition = parse_definition(raw)?;
            let appsync_config = AppSyncConfig::from_env();
            info!(
                tables = definition.tables.len(),
                data_sources = definition.data_sources.len(),
                resolvers = definition.resolvers.len(),
                "loading emulator definition",
            );
            let api = SyncStackAppSync::from_definition(
                &definition,
                Arc::clone(&provider),
                None,
                &appsync_config,
            )
            .context("failed to load definition")?;
            Some(Arc::new(api))
        }
        None => {
            info!("no definition configured, serving the table protocol only");
            None
        }
    };

    Ok(SyncStackHttpService::new(provider, appsync))
}

/// Run the accept loop, serving connections until a shutdown signal is received.
async fn serve(listener: TcpListener, service: SyncStackHttpService) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.clone();
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

/// Probe the health endpoint of a running server.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET /health HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") && response.contains("\"running\"") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = SyncStackConfig::from_env();

    if std::env::args().any(|a| a == "--health-check") {
        let addr = config.gateway_listen.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&config.log_level)?;

    let service = build_service(&config)?;

    let addr: SocketAddr = config
        .gateway_listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.gateway_listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, version = VERSION, "starting SyncStack Server");

    serve(listener, service).await
}
