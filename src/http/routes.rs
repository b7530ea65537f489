//! Routes and handlers
//!
//! | Path            | Response                                   |
//! |-----------------|--------------------------------------------|
//! | `/`             | `301` to `/index.html`                     |
//! | `/index.html`   | landing page                               |
//! | `/stream.mjpg`  | `multipart/x-mixed-replace` frame stream   |
//! | anything else   | `404`, or `501` for methods other than GET |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use bytes::Bytes;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use crate::broker::FrameBroker;
use crate::server::config::ServerConfig;
use crate::session::{StreamHandler, ViewerSession};
use crate::stats::ServerCounters;

use super::multipart::STREAM_CONTENT_TYPE;
use super::page::render_index;

/// Landing page path
pub const INDEX_PATH: &str = "/index.html";

/// MJPEG stream path
pub const STREAM_PATH: &str = "/stream.mjpg";

/// ID the listener assigns to each accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub u64);

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub broker: Arc<FrameBroker>,
    pub counters: Arc<ServerCounters>,
    /// Pre-rendered landing page
    pub index_page: Bytes,
}

impl AppState {
    pub fn new(
        config: Arc<ServerConfig>,
        broker: Arc<FrameBroker>,
        counters: Arc<ServerCounters>,
    ) -> Self {
        let index_page = Bytes::from(render_index(&config.page_title, config.rotation));
        Self {
            config,
            broker,
            counters,
            index_page,
        }
    }
}

/// Build the router
///
/// The stream handler needs `ConnectInfo<SocketAddr>` and a [`SessionId`] in
/// the request extensions; the listener inserts both per connection.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(redirect_to_index).fallback(not_implemented))
        .route(INDEX_PATH, get(index).fallback(not_implemented))
        .route(STREAM_PATH, get(stream).fallback(not_implemented))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn redirect_to_index() -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, INDEX_PATH)]).into_response()
}

async fn index(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/html")],
        state.index_page.clone(),
    )
        .into_response()
}

async fn stream(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    Extension(SessionId(session_id)): Extension<SessionId>,
) -> Response {
    let buffer_size = state.config.write_buffer_size;
    let (writer, reader) = tokio::io::duplex(buffer_size);

    let session = ViewerSession::new(session_id, peer_addr);
    let handler =
        StreamHandler::with_buffer_size(session, writer, state.broker.subscribe(), buffer_size)
            .write_timeout(state.config.write_timeout);

    state.counters.viewer_joined();
    tracing::info!(session_id = session_id, peer = %peer_addr, "Viewer joined");

    let counters = Arc::clone(&state.counters);
    tokio::spawn(async move {
        let session = handler.run().await;
        counters.viewer_left(&session.stats);
    });

    (
        [
            (header::AGE, "0"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
        ],
        Body::from_stream(ReaderStream::with_capacity(reader, buffer_size)),
    )
        .into_response()
}

async fn not_implemented() -> Response {
    error_page(StatusCode::NOT_IMPLEMENTED)
}

async fn fallback(method: Method) -> Response {
    if method == Method::GET || method == Method::HEAD {
        error_page(StatusCode::NOT_FOUND)
    } else {
        error_page(StatusCode::NOT_IMPLEMENTED)
    }
}

/// Error response with a small HTML explanation
pub fn error_page(status: StatusCode) -> Response {
    let explanation = match status {
        StatusCode::NOT_FOUND => "Nothing matches the given URI.",
        StatusCode::NOT_IMPLEMENTED => "Server does not support this operation.",
        StatusCode::SERVICE_UNAVAILABLE => "Too many viewers, try again later.",
        _ => "",
    };

    let page = format!(
        "<!DOCTYPE HTML>\n\
         <html lang=\"en\">\n\
         <head>\n<meta charset=\"utf-8\">\n<title>Error response</title>\n</head>\n\
         <body>\n<h1>Error response</h1>\n\
         <p>Error code: {code}</p>\n\
         <p>Message: {reason}.</p>\n\
         <p>Error code explanation: {code} - {explanation}</p>\n\
         </body>\n</html>\n",
        code = status.as_u16(),
        reason = status.canonical_reason().unwrap_or("Error"),
        explanation = explanation,
    );

    (
        status,
        [(header::CONTENT_TYPE, "text/html;charset=utf-8")],
        page,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use axum::http::Request;
    use futures::StreamExt;
    use tower::ServiceExt;

    use super::*;
    use crate::broker::Frame;
    use crate::http::encode_part;

    fn test_state(config: ServerConfig) -> AppState {
        AppState::new(
            Arc::new(config),
            Arc::new(FrameBroker::new()),
            Arc::new(ServerCounters::new()),
        )
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_root_redirects() {
        let app = router(test_state(ServerConfig::default()));

        let resp = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(resp.headers()[header::LOCATION], "/index.html");
    }

    #[tokio::test]
    async fn test_index_page() {
        let app = router(test_state(ServerConfig::default().rotation(180)));

        let resp = app.oneshot(get_request("/index.html")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html");

        let text = body_text(resp).await;
        assert!(text.contains("rotate(180deg)"));
        assert!(text.contains(r#"<img src="stream.mjpg""#));
    }

    #[tokio::test]
    async fn test_unknown_paths_404() {
        let app = router(test_state(ServerConfig::default()));

        for path in ["/nonexistent", "/stream.mjpg/", "/index.htm"] {
            let resp = app.clone().oneshot(get_request(path)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", path);
        }

        let resp = app.oneshot(get_request("/missing")).await.unwrap();
        assert!(body_text(resp).await.contains("<p>Error code: 404</p>"));
    }

    #[tokio::test]
    async fn test_query_string_ignored() {
        let app = router(test_state(ServerConfig::default()));

        let resp = app.oneshot(get_request("/index.html?t=1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_methods_501() {
        let app = router(test_state(ServerConfig::default()));

        for path in ["/", "/stream.mjpg", "/nonexistent"] {
            let request = Request::builder()
                .method(Method::POST)
                .uri(path)
                .body(Body::empty())
                .unwrap();
            let resp = app.clone().oneshot(request).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_stream_response() {
        let state = test_state(ServerConfig::default());
        let broker = Arc::clone(&state.broker);
        let counters = Arc::clone(&state.counters);
        let app = router(state);

        let frame = Frame::from(vec![0xFF, 0xD8, 7, 7, 7, 0xFF, 0xD9]);
        broker.publish(frame.clone().into_bytes());

        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40001);
        let request = Request::builder()
            .uri("/stream.mjpg")
            .extension(ConnectInfo(peer))
            .extension(SessionId(7))
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::AGE], "0");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache, private");
        assert_eq!(resp.headers()[header::PRAGMA], "no-cache");
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=FRAME"
        );
        assert!(resp.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(counters.snapshot().active_viewers, 1);

        let expected = encode_part(&frame);
        let mut body = resp.into_body().into_data_stream();
        let mut received = Vec::new();
        while received.len() < expected.len() {
            let chunk = body.next().await.unwrap().unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, expected.to_vec());

        // Closing the broker ends the body
        broker.close();
        while body.next().await.is_some() {}

        while counters.snapshot().active_viewers > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}
