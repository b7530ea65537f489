//! MJPEG server listener
//!
//! Handles TCP accept loop and spawns connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::Router;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::broker::FrameBroker;
use crate::error::Result;
use crate::http::{router, AppState};
use crate::server::config::ServerConfig;
use crate::server::connection::{reject, Connection};
use crate::stats::{ServerCounters, ServerStats};

/// MJPEG-over-HTTP server
pub struct MjpegServer {
    config: Arc<ServerConfig>,
    broker: Arc<FrameBroker>,
    counters: Arc<ServerCounters>,
    router: Router,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl MjpegServer {
    /// Create a server distributing the frames published to `broker`
    pub fn new(config: ServerConfig, broker: Arc<FrameBroker>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let config = Arc::new(config);
        let counters = Arc::new(ServerCounters::new());
        let router = router(AppState::new(
            Arc::clone(&config),
            Arc::clone(&broker),
            Arc::clone(&counters),
        ));

        Self {
            config,
            broker,
            counters,
            router,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the frame broker
    pub fn broker(&self) -> &Arc<FrameBroker> {
        &self.broker
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current server statistics
    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            addr = %listener.local_addr()?,
            width = self.config.frame_width,
            height = self.config.frame_height,
            rotation = self.config.rotation,
            "MJPEG server listening"
        );

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(()) => {
                tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                self.counters.connection_rejected();
                let config = Arc::clone(&self.config);
                tokio::spawn(async move {
                    if let Err(e) = reject(socket, config).await {
                        tracing::debug!(peer = %peer_addr, error = %e, "Rejection not delivered");
                    }
                });
                return;
            }
        };

        // Generate session ID
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        // Configure socket
        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        // Spawn connection handler
        let router = self.router.clone();
        let config = Arc::clone(&self.config);
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            let _permit = permit;
            counters.connection_opened();

            let connection = Connection::new(session_id, socket, peer_addr, router, config);
            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            counters.connection_closed();
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn try_acquire(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, ()> {
        match self.connection_semaphore {
            Some(ref sem) => sem.clone().try_acquire_owned().map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::broker::Frame;
    use crate::http::encode_part;

    struct TestServer {
        addr: SocketAddr,
        server: Arc<MjpegServer>,
        stop: Option<oneshot::Sender<()>>,
        task: JoinHandle<Result<()>>,
    }

    impl TestServer {
        async fn start(config: ServerConfig) -> Self {
            let broker = Arc::new(FrameBroker::new());
            let server = Arc::new(MjpegServer::new(config, broker));
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (stop, stopped) = oneshot::channel::<()>();

            let task = {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server
                        .serve(listener, async move {
                            let _ = stopped.await;
                        })
                        .await
                })
            };

            Self {
                addr,
                server,
                stop: Some(stop),
                task,
            }
        }

        fn broker(&self) -> &Arc<FrameBroker> {
            self.server.broker()
        }

        async fn wait_for_viewers(&self, count: u64) {
            while self.server.stats().active_viewers != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        async fn shutdown(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            self.task.await.unwrap().unwrap();
        }
    }

    /// Send raw request bytes and read the whole response
    async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        exchange(addr, format!("GET {} HTTP/1.0\r\n\r\n", path).as_bytes()).await
    }

    fn status_code(response: &str) -> u16 {
        response
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap()
    }

    /// Read until the end of the response head
    async fn read_head(stream: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    async fn open_stream(addr: SocketAddr) -> (TcpStream, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /stream.mjpg HTTP/1.0\r\n\r\n")
            .await
            .unwrap();
        let head = read_head(&mut stream).await;
        (stream, head)
    }

    async fn read_frame_part(stream: &mut TcpStream, frame: &Frame) -> Vec<u8> {
        let mut part = vec![0u8; encode_part(frame).len()];
        stream.read_exact(&mut part).await.unwrap();
        part
    }

    fn jpeg(n: u8) -> Frame {
        Frame::from(vec![0xFF, 0xD8, n, n, n, n, 0xFF, 0xD9])
    }

    #[tokio::test]
    async fn test_root_redirects() {
        let server = TestServer::start(ServerConfig::default()).await;

        let response = get(server.addr, "/").await;
        assert_eq!(status_code(&response), 301);
        assert!(response.contains("\r\nLocation: /index.html\r\n"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_index_page() {
        let server = TestServer::start(ServerConfig::default().rotation(180)).await;

        let response = get(server.addr, "/index.html").await;
        assert_eq!(status_code(&response), 200);
        assert!(response.contains("\r\nContent-Type: text/html\r\n"));
        assert!(response.contains("\r\nContent-Length: "));
        assert!(response.contains("rotate(180deg)"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_path_404() {
        let server = TestServer::start(ServerConfig::default()).await;

        let response = get(server.addr, "/nonexistent").await;
        assert_eq!(status_code(&response), 404);
        assert!(response.contains("<p>Error code: 404</p>"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_method_501() {
        let server = TestServer::start(ServerConfig::default()).await;

        let response = exchange(server.addr, b"POST /stream.mjpg HTTP/1.0\r\n\r\n").await;
        assert_eq!(status_code(&response), 501);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_400() {
        let server = TestServer::start(ServerConfig::default()).await;

        let response = exchange(server.addr, b"NONSENSE\r\n\r\n").await;
        assert_eq!(status_code(&response), 400);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_stream_headers_before_first_frame() {
        let server = TestServer::start(ServerConfig::default()).await;

        // No frame has been published yet, the head still arrives
        let (_stream, head) = open_stream(server.addr).await;
        assert_eq!(status_code(&head), 200);
        assert!(head.contains("\r\nAge: 0\r\n"));
        assert!(head.contains("\r\nCache-Control: no-cache, private\r\n"));
        assert!(head.contains("\r\nPragma: no-cache\r\n"));
        assert!(head.contains("\r\nContent-Type: multipart/x-mixed-replace; boundary=FRAME\r\n"));
        assert!(!head.contains("Content-Length"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_half_closed_viewer_keeps_streaming() {
        let server = TestServer::start(ServerConfig::default()).await;
        let broker = Arc::clone(server.broker());

        // Request, then shut down our sending side like `nc -N` does
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream
            .write_all(b"GET /stream.mjpg HTTP/1.0\r\n\r\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let head = read_head(&mut stream).await;
        assert_eq!(status_code(&head), 200);
        server.wait_for_viewers(1).await;

        for n in 1..=3 {
            broker.publish(jpeg(n).into_bytes());
            assert_eq!(
                read_frame_part(&mut stream, &jpeg(n)).await,
                encode_part(&jpeg(n)).to_vec()
            );
        }
        assert_eq!(server.server.stats().active_viewers, 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_stream_delivers_frames_and_survives_viewer_loss() {
        let server = TestServer::start(ServerConfig::default()).await;
        let broker = Arc::clone(server.broker());

        let (mut first, _) = open_stream(server.addr).await;
        let (mut second, _) = open_stream(server.addr).await;
        server.wait_for_viewers(2).await;

        broker.publish(jpeg(1).into_bytes());
        assert_eq!(read_frame_part(&mut first, &jpeg(1)).await, encode_part(&jpeg(1)).to_vec());
        assert_eq!(read_frame_part(&mut second, &jpeg(1)).await, encode_part(&jpeg(1)).to_vec());

        // The departed viewer is noticed on the writes that follow; the other
        // keeps receiving every frame meanwhile
        drop(first);
        let mut n = 2u8;
        while server.server.stats().active_viewers > 1 {
            broker.publish(jpeg(n).into_bytes());
            assert_eq!(
                read_frame_part(&mut second, &jpeg(n)).await,
                encode_part(&jpeg(n)).to_vec()
            );
            n = n.wrapping_add(1);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Closing the broker ends the remaining stream
        broker.close();
        let mut rest = Vec::new();
        second.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let server = TestServer::start(ServerConfig::default().max_connections(1)).await;

        let (_viewer, _) = open_stream(server.addr).await;

        let response = get(server.addr, "/index.html").await;
        assert_eq!(status_code(&response), 503);
        assert!(response.contains("Too many viewers"));
        assert_eq!(server.server.stats().rejected_connections, 1);

        server.shutdown().await;
    }
}
