//! Per-connection HTTP serving
//!
//! Each accepted socket is served by hyper's HTTP/1 connection driver with
//! the axum router as the service. One request per connection; a stream
//! response keeps the connection until the viewer's `StreamHandler` ends.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tower::ServiceExt;

use crate::error::{Error, Result};
use crate::http::{error_page, SessionId};
use crate::server::config::ServerConfig;

/// Smallest read buffer hyper accepts
const MIN_REQUEST_BUFFER: usize = 8 * 1024;

/// Time a rejected client gets to send its request and read the 503
const REJECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A single accepted connection
pub(crate) struct Connection {
    session_id: u64,
    socket: TcpStream,
    peer_addr: SocketAddr,
    router: Router,
    config: Arc<ServerConfig>,
}

impl Connection {
    pub(crate) fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        router: Router,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            session_id,
            socket,
            peer_addr,
            router,
            config,
        }
    }

    /// Serve the connection to completion
    pub(crate) async fn run(self) -> Result<()> {
        let Connection {
            session_id,
            socket,
            peer_addr,
            router,
            config,
        } = self;

        let service = service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(ConnectInfo(peer_addr));
            request.extensions_mut().insert(SessionId(session_id));
            router.clone().oneshot(request)
        });

        http1_builder(&config)
            .serve_connection(TokioIo::new(socket), service)
            .await?;
        Ok(())
    }
}

/// Answer a connection over the limit with `503` and close it
pub(crate) async fn reject(socket: TcpStream, config: Arc<ServerConfig>) -> Result<()> {
    let service = service_fn(|_request: Request<Incoming>| async {
        Ok::<_, Infallible>(error_page(StatusCode::SERVICE_UNAVAILABLE))
    });

    let serve = http1_builder(&config).serve_connection(TokioIo::new(socket), service);
    match tokio::time::timeout(REJECT_TIMEOUT, serve).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout),
    }
}

/// HTTP/1 settings shared by every connection
///
/// Half-closed clients keep receiving their response: a viewer that shuts
/// down its sending side after the request is still watching.
fn http1_builder(config: &ServerConfig) -> http1::Builder {
    let mut builder = http1::Builder::new();
    builder
        .half_close(true)
        .keep_alive(false)
        .title_case_headers(true)
        .timer(TokioTimer::new())
        .header_read_timeout(config.request_timeout)
        .max_buf_size(config.max_request_size.max(MIN_REQUEST_BUFFER));
    builder
}
