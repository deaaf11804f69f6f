use crate::config::Settings;
use crate::error::{error_response, ProxyErrorCode};
use crate::relay::{Relay, RelayError};
use crate::wake::{WakeCoordinator, WakeOutcome};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// The wake-on-request reverse proxy server
pub struct ProxyServer {
    bind_addr: SocketAddr,
    coordinator: Arc<WakeCoordinator>,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
}

impl ProxyServer {
    pub fn new(settings: &Settings, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let relay = Relay::new(settings.target_authority(), &settings.pool)
            .map_err(|e| anyhow::anyhow!("Invalid device address: {}", e))?;

        Ok(Self {
            bind_addr: settings.listen_addr,
            coordinator: Arc::new(WakeCoordinator::new(settings)),
            relay: Arc::new(relay),
            shutdown,
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            anyhow::anyhow!("Failed to bind {}: {}", self.bind_addr, e)
        })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    ///
    /// Once shutdown is signalled no new connections are accepted, and this
    /// returns after every open connection has finished its in-flight work.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            target = %self.relay.authority(),
            "Proxy server listening (HTTP/1.1 and HTTP/2)"
        );

        let connections = TaskTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let coordinator = Arc::clone(&self.coordinator);
                            let relay = Arc::clone(&self.relay);
                            let cancel = self.shutdown.child_token();

                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, coordinator, relay, cancel).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!(open_connections = connections.len(), "Proxy server shutting down");
                    break;
                }
            }
        }

        drop(listener);
        connections.close();
        connections.wait().await;
        debug!("All connections closed");

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    coordinator: Arc<WakeCoordinator>,
    relay: Arc<Relay>,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    // Anything still waiting on this connection stops once it closes
    let _guard = cancel.clone().drop_guard();
    let draining = cancel.clone();

    let service = service_fn(move |req: Request<Incoming>| {
        let coordinator = Arc::clone(&coordinator);
        let relay = Arc::clone(&relay);
        let cancel = cancel.clone();
        async move { handle_request(req, coordinator, relay, cancel, addr).await }
    });

    let mut builder = AutoBuilder::new(TokioExecutor::new());
    builder.http1().preserve_header_case(true);
    builder.http2().max_concurrent_streams(250);

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    // On shutdown, finish the in-flight response and then close
    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = draining.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    result.map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    coordinator: Arc<WakeCoordinator>,
    relay: Arc<Relay>,
    cancel: CancellationToken,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // Used for log correlation only; the forwarded request is left untouched
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    debug!(%client_addr, %method, path, request_id, "Incoming request");

    match coordinator.ensure_awake(&cancel).await {
        WakeOutcome::Ready { woken } => {
            if woken {
                info!(request_id, wait_ms = started.elapsed().as_millis() as u64, "Device woke up, forwarding request");
            }
        }
        WakeOutcome::TimedOut => {
            return Ok(error_response(
                ProxyErrorCode::WakeTimeout,
                format!(
                    "timeout waiting for device to wake after {}s",
                    coordinator.wake_timeout().as_secs_f64()
                ),
            ));
        }
        WakeOutcome::Cancelled => {
            info!(request_id, "Request cancelled while waiting for device");
            return Ok(error_response(ProxyErrorCode::ClientCancelled, "client cancelled"));
        }
    }

    match relay.forward(req, &cancel).await {
        Ok(response) => {
            debug!(request_id, %method, path, status = response.status().as_u16(), "Relaying response");
            Ok(response)
        }
        Err(RelayError::Cancelled) => {
            info!(request_id, "Request cancelled while waiting for device response");
            Ok(error_response(ProxyErrorCode::ClientCancelled, "client cancelled"))
        }
        Err(e @ RelayError::RequestBuild(_)) => {
            error!(request_id, error = %e, "Failed to create proxy request");
            Ok(error_response(ProxyErrorCode::InternalError, "internal error"))
        }
        Err(e) => {
            // No retry: the caller decides whether to try again
            warn!(request_id, target = %relay.authority(), error = %e, "Error forwarding request");
            Ok(error_response(ProxyErrorCode::ConnectionFailed, "error contacting device"))
        }
    }
}
