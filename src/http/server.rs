//! HTTP and WebSocket serving loop.
//!
//! # Responsibilities
//! - Serve HTTP/1.1 on ports with `open_http_protocol` or `open_websocket_protocol`
//! - Buffer request bodies up to `max_body_bytes` (413 beyond)
//! - Hand upgrade requests to the port's handshake, then run the WebSocket session
//! - Run deferred work (`on_ws_open`) only after the `101` has been flushed
//!
//! # Data Flow
//! ```text
//! TcpStream → hyper http1 (with_upgrades)
//!     → plain request   → PortDispatch::request → Response (auto-ended)
//!     → upgrade request → PortDispatch::handshake
//!           ok   → 101, spawn session: await upgrade → run deferred → read frames
//!           err  → 400 (bad key) | 403 (policy)
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use futures_util::{SinkExt, StreamExt};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::Instrument;

use crate::config::ListenerSettings;
use crate::http::frame::RawFrame;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::websocket;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{
    ConnectionChannels, ConnectionId, ConnectionKind, ConnectionSignal, Connections, Outbound,
};
use crate::net::listener::{ConnectionPermit, DeferQueue, StreamListener};
use crate::net::router::PortDispatch;

/// How long a closing WebSocket gets to flush its close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept loop for an HTTP/WebSocket port.
pub(crate) async fn serve(
    listener: StreamListener,
    dispatch: Arc<PortDispatch>,
    settings: ListenerSettings,
    connections: Connections,
    shutdown: Shutdown,
) {
    let mut stop = shutdown.subscribe();
    tracing::info!(
        port = %dispatch.name(),
        websocket = dispatch.port().is_websocket(),
        "HTTP port serving"
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let session = Arc::new(HttpConnection {
                        conn: ConnectionId::new(),
                        peer,
                        dispatch: Arc::clone(&dispatch),
                        settings: settings.clone(),
                        connections: connections.clone(),
                        shutdown: shutdown.clone(),
                        _permit: permit,
                    });
                    tokio::spawn(session.serve(stream));
                }
                Err(e) => {
                    tracing::warn!(port = %dispatch.name(), error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = stop.wait() => break,
        }
    }

    tracing::info!(port = %dispatch.name(), "HTTP port stopped accepting");
}

/// State for one accepted HTTP connection, shared with its upgraded session.
///
/// The connection slot is released when the last holder drops.
struct HttpConnection {
    conn: ConnectionId,
    peer: SocketAddr,
    dispatch: Arc<PortDispatch>,
    settings: ListenerSettings,
    connections: Connections,
    shutdown: Shutdown,
    _permit: ConnectionPermit,
}

impl HttpConnection {
    async fn serve(self: Arc<Self>, stream: TcpStream) {
        let mut stop = self.shutdown.subscribe();
        let this = Arc::clone(&self);
        let service = service_fn(move |request| {
            let this = Arc::clone(&this);
            async move { Ok::<_, Infallible>(this.handle(request).await) }
        });

        let connection = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades();
        tokio::pin!(connection);

        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(conn = %self.conn, error = %e, "HTTP connection error");
                }
            }
            _ = stop.wait() => {
                connection.as_mut().graceful_shutdown();
                let _ = connection.await;
            }
        }
    }

    async fn handle(self: Arc<Self>, mut request: hyper::Request<Incoming>) -> hyper::Response<Body> {
        let on_upgrade = self
            .dispatch
            .port()
            .is_websocket()
            .then(|| hyper::upgrade::on(&mut request));

        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(Body::new(body), self.settings.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(conn = %self.conn, error = %e, "Request body rejected");
                return status_only(StatusCode::PAYLOAD_TOO_LARGE);
            }
        };

        let request = Request::from_parts(self.conn, Some(self.peer), parts, body);
        let span = tracing::debug_span!(
            "request",
            port = %self.dispatch.name(),
            request_id = %request.id(),
            method = %request.method(),
            path = %request.path(),
        );

        self.respond(request, on_upgrade)
            .instrument(span)
            .await
            .into_http()
    }

    async fn respond(self: &Arc<Self>, request: Request, on_upgrade: Option<OnUpgrade>) -> Response {
        let mut response = Response::new();

        match on_upgrade {
            Some(on_upgrade) if websocket::is_upgrade_request(&request) => {
                let deferred = DeferQueue::new();
                match self.dispatch.handshake(request, &mut response, &deferred).await {
                    Ok(()) => {
                        tokio::spawn(Arc::clone(self).run_websocket(on_upgrade, deferred));
                    }
                    Err(e) => {
                        tracing::debug!(conn = %self.conn, error = %e, "Upgrade not accepted");
                        if !response.is_ended() {
                            response.status(StatusCode::FORBIDDEN);
                            response.end();
                        }
                    }
                }
            }
            _ => self.dispatch.request(request, &mut response).await,
        }

        response
    }

    async fn run_websocket(self: Arc<Self>, on_upgrade: OnUpgrade, deferred: DeferQueue) {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::warn!(conn = %self.conn, error = %e, "Upgrade failed after 101");
                return;
            }
        };

        let stream = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        let (mut sink, mut frames) = stream.split();

        let ConnectionChannels {
            mut outbound,
            mut signals,
            watermark,
            guard,
        } = self.connections.register(
            self.conn,
            self.dispatch.name(),
            self.peer,
            ConnectionKind::WebSocket,
            self.settings.output_buffer_frames,
        );

        let conn = self.conn;
        let writer = tokio::spawn(async move {
            while let Some(item) = outbound.recv().await {
                let message = match item {
                    Outbound::Message(message) => message,
                    Outbound::Data(bytes) => Message::Binary(bytes),
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(conn = %conn, error = %e, "WebSocket write failed");
                    break;
                }
                watermark.drained(outbound.is_empty());
            }
            let _ = sink.close().await;
            watermark.closed();
        });

        tracing::debug!(conn = %self.conn, port = %self.dispatch.name(), "WebSocket open");
        deferred.run().await;

        let mut stop = self.shutdown.subscribe();
        loop {
            tokio::select! {
                next = frames.next() => match next {
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(message)) => {
                        let Some(raw) = RawFrame::from_message(self.conn, message) else {
                            continue;
                        };
                        let closing = raw.code.is_some();
                        self.dispatch.message(raw).await;
                        if closing {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(conn = %self.conn, error = %e, "WebSocket read failed");
                        break;
                    }
                    None => break,
                },
                signal = signals.recv() => {
                    if matches!(signal, Some(ConnectionSignal::Closed) | None) {
                        break;
                    }
                }
                _ = stop.wait() => break,
            }
        }

        drop(guard);
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await;
        tracing::debug!(conn = %self.conn, "WebSocket closed");
    }
}

fn status_only(status: StatusCode) -> hyper::Response<Body> {
    let mut response = Response::new();
    response.status(status);
    response.end();
    response.into_http()
}
