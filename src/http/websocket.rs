//! WebSocket relay between a client and the managed backend.
//!
//! # Data Flow
//! ```text
//! Client ←──── messages ────→ Edge ←──── messages ────→ Backend
//!          client→backend pump ─┐
//!          backend→client pump ─┴─ one SessionToken
//! ```
//!
//! # Session States
//! ```text
//! Connecting → Active → Closing → Closed
//! Connecting → Closed                (backend connect failed, client closed 1011)
//! ```
//!
//! # Design Decisions
//! - Message-level forwarding, one message in flight per direction
//! - Payloads are never inspected or rewritten
//! - Ping/pong answered by each transport, not relayed
//! - The first pump to stop cancels the token; each pump closes the sink it
//!   writes to, so both sockets are always closed together

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{close_code, CloseFrame, Message as ClientMessage, WebSocket},
    http::HeaderMap,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio::time;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as BackendMessage},
};
use url::Url;

use crate::error::EdgeError;
use crate::observability::metrics;

/// Upper bound for sending a close frame to a peer that may be gone.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a relay session, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Shared cancellation for the two pumps of a session.
#[derive(Debug, Clone)]
pub struct SessionToken {
    tx: Arc<watch::Sender<bool>>,
}

impl SessionToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The source sent a close frame or ended.
    SourceClosed,
    /// Reading from the source failed.
    SourceError(String),
    /// Writing to the destination failed.
    SinkError(String),
    /// The sibling pump stopped first.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub outcome: PumpOutcome,
    pub relayed: u64,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub session: SessionId,
    pub state: RelayState,
    pub client_to_backend: Option<PumpReport>,
    pub backend_to_client: Option<PumpReport>,
}

impl RelayReport {
    fn outcome_label(&self) -> &'static str {
        match (&self.client_to_backend, &self.backend_to_client) {
            (Some(up), Some(down)) => {
                let failed = |r: &PumpReport| {
                    matches!(r.outcome, PumpOutcome::SourceError(_) | PumpOutcome::SinkError(_))
                };
                if failed(up) || failed(down) {
                    "error"
                } else if up.outcome == PumpOutcome::SourceClosed {
                    "client_closed"
                } else {
                    "backend_closed"
                }
            }
            _ => "connect_failed",
        }
    }
}

/// What to do with one incoming message.
enum Frame<T> {
    Forward(T),
    Close,
    Skip,
}

fn client_frame(message: ClientMessage) -> Frame<BackendMessage> {
    match message {
        ClientMessage::Text(text) => Frame::Forward(BackendMessage::Text(text.as_str().into())),
        ClientMessage::Binary(data) => Frame::Forward(BackendMessage::Binary(data)),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => Frame::Skip,
        ClientMessage::Close(_) => Frame::Close,
    }
}

fn backend_frame(message: BackendMessage) -> Frame<ClientMessage> {
    match message {
        BackendMessage::Text(text) => Frame::Forward(ClientMessage::Text(text.as_str().into())),
        BackendMessage::Binary(data) => Frame::Forward(ClientMessage::Binary(data)),
        BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => Frame::Skip,
        BackendMessage::Close(_) => Frame::Close,
    }
}

/// Relay messages from `source` into `sink` until either ends or `token`
/// fires. Always cancels `token` and closes `sink` on the way out.
async fn pump<S, K, In, Out, E>(
    mut source: S,
    mut sink: K,
    token: SessionToken,
    convert: fn(In) -> Frame<Out>,
) -> PumpReport
where
    S: Stream<Item = Result<In, E>> + Unpin,
    E: Display,
    K: Sink<Out> + Unpin,
    K::Error: Display,
{
    let mut relayed: u64 = 0;
    let outcome = loop {
        let next = tokio::select! {
            _ = token.cancelled() => break PumpOutcome::Cancelled,
            next = source.next() => next,
        };
        let message = match next {
            None => break PumpOutcome::SourceClosed,
            Some(Err(e)) => break PumpOutcome::SourceError(e.to_string()),
            Some(Ok(message)) => message,
        };
        match convert(message) {
            Frame::Forward(out) => {
                let sent = tokio::select! {
                    _ = token.cancelled() => break PumpOutcome::Cancelled,
                    sent = sink.send(out) => sent,
                };
                if let Err(e) = sent {
                    break PumpOutcome::SinkError(e.to_string());
                }
                relayed += 1;
            }
            Frame::Close => break PumpOutcome::SourceClosed,
            Frame::Skip => {}
        }
    };

    tracing::debug!(state = ?RelayState::Closing, outcome = ?outcome, relayed, "Relay pump stopped");
    token.cancel();
    let _ = time::timeout(CLOSE_TIMEOUT, sink.close()).await;
    PumpReport { outcome, relayed }
}

/// Bridges client WebSockets to the backend.
pub struct StreamRelay {
    backend: Url,
    connect_timeout: Duration,
}

impl StreamRelay {
    /// `backend` is the HTTP base URL; its scheme is switched to `ws`.
    pub fn new(backend: &Url, connect_timeout: Duration) -> Result<Self, EdgeError> {
        let mut ws_base = backend.clone();
        ws_base
            .set_scheme("ws")
            .map_err(|_| EdgeError::UpstreamError(format!("cannot relay WebSockets to {}", backend)))?;
        Ok(Self {
            backend: ws_base,
            connect_timeout,
        })
    }

    pub fn backend_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.backend.as_str().trim_end_matches('/'), path_and_query)
    }

    /// Run one session to completion. `headers` are replayed on the backend
    /// handshake and must already be filtered.
    pub async fn run(&self, mut client: WebSocket, path_and_query: &str, headers: HeaderMap) -> RelayReport {
        let session = SessionId::new();
        let target = self.backend_url(path_and_query);
        tracing::debug!(session = %session, target = %target, state = ?RelayState::Connecting, "Relay session opening");

        let backend = match self.connect(&target, headers).await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Backend WebSocket unavailable, closing client");
                let close = ClientMessage::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "backend unavailable".into(),
                }));
                let _ = time::timeout(CLOSE_TIMEOUT, async {
                    let _ = client.send(close).await;
                    let _ = client.close().await;
                })
                .await;
                let report = RelayReport {
                    session,
                    state: RelayState::Closed,
                    client_to_backend: None,
                    backend_to_client: None,
                };
                metrics::record_session_rejected();
                return report;
            }
        };

        tracing::info!(session = %session, target = %target, state = ?RelayState::Active, "Relay session active");
        metrics::record_session_opened();

        let (client_tx, client_rx) = client.split();
        let (backend_tx, backend_rx) = backend.split();
        let token = SessionToken::new();

        let (up, down) = tokio::join!(
            pump(client_rx, backend_tx, token.clone(), client_frame),
            pump(backend_rx, client_tx, token.clone(), backend_frame),
        );

        let report = RelayReport {
            session,
            state: RelayState::Closed,
            client_to_backend: Some(up),
            backend_to_client: Some(down),
        };
        tracing::info!(
            session = %session,
            state = ?report.state,
            client_to_backend = ?report.client_to_backend,
            backend_to_client = ?report.backend_to_client,
            "Relay session closed"
        );
        metrics::record_session_closed(report.outcome_label());
        report
    }

    async fn connect(
        &self,
        target: &str,
        headers: HeaderMap,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        EdgeError,
    > {
        let unreachable = |detail: String| EdgeError::BackendUnreachable {
            url: target.to_string(),
            detail,
        };

        let mut request = target
            .into_client_request()
            .map_err(|e| EdgeError::UpstreamError(format!("invalid backend WebSocket URL: {}", e)))?;
        request.headers_mut().extend(headers);

        match time::timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Err(_) => Err(unreachable(format!("connect timed out after {:?}", self.connect_timeout))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Sink that remembers what it got and whether it was closed.
    struct Recorder<T> {
        items: Vec<T>,
        closed: bool,
    }

    impl<T> Default for Recorder<T> {
        fn default() -> Self {
            Self { items: Vec::new(), closed: false }
        }
    }

    impl<T: Unpin> Sink<T> for Recorder<T> {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: T) -> Result<(), Infallible> {
            self.get_mut().items.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            self.get_mut().closed = true;
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn backend_url_switches_scheme() {
        let relay = StreamRelay::new(&Url::parse("http://127.0.0.1:8002").unwrap(), Duration::from_secs(1)).unwrap();
        assert_eq!(relay.backend_url("/api/ws?room=a"), "ws://127.0.0.1:8002/api/ws?room=a");
    }

    #[tokio::test]
    async fn token_cancel_is_observed_by_every_clone() {
        let token = SessionToken::new();
        let sibling = token.clone();
        assert!(!sibling.is_cancelled());

        token.cancel();
        time::timeout(Duration::from_secs(1), sibling.cancelled())
            .await
            .expect("clone should observe cancellation");
        assert!(sibling.is_cancelled());
    }

    fn text(s: &str) -> ClientMessage {
        ClientMessage::Text(s.into())
    }

    #[tokio::test]
    async fn pump_preserves_order_and_cancels_sibling() {
        let source = stream::iter(vec![
            Ok::<_, String>(text("one")),
            Ok(ClientMessage::Ping(Default::default())),
            Ok(text("two")),
            Ok(ClientMessage::Close(None)),
            Ok(text("never")),
        ]);
        let mut received: Vec<BackendMessage> = Vec::new();
        let token = SessionToken::new();

        let report = pump(source, &mut received, token.clone(), client_frame).await;

        assert_eq!(report.outcome, PumpOutcome::SourceClosed);
        assert_eq!(report.relayed, 2);
        assert!(token.is_cancelled());
        assert_eq!(
            received,
            vec![BackendMessage::Text("one".into()), BackendMessage::Text("two".into())]
        );
    }

    #[tokio::test]
    async fn pump_stops_when_token_cancelled() {
        let source = stream::pending::<Result<ClientMessage, String>>();
        let token = SessionToken::new();

        let handle = tokio::spawn(pump(source, sink::drain(), token.clone(), client_frame));
        token.cancel();

        let report = time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pump should stop")
            .unwrap();
        assert_eq!(report.outcome, PumpOutcome::Cancelled);
    }

    #[tokio::test]
    async fn source_error_is_reported() {
        let source = stream::iter(vec![Ok(text("a")), Err("reset by peer".to_string())]);

        let report = pump(source, sink::drain(), SessionToken::new(), client_frame).await;
        assert_eq!(report.outcome, PumpOutcome::SourceError("reset by peer".to_string()));
        assert_eq!(report.relayed, 1);
    }

    #[tokio::test]
    async fn backend_close_frame_ends_pump() {
        let source = stream::iter(vec![
            Ok::<_, String>(BackendMessage::Text("tick".into())),
            Ok(BackendMessage::Close(None)),
        ]);
        let mut received: Vec<ClientMessage> = Vec::new();

        let report = pump(source, &mut received, SessionToken::new(), backend_frame).await;
        assert_eq!(report.outcome, PumpOutcome::SourceClosed);
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn client_close_closes_backend_sink() {
        let source = stream::iter(vec![Ok::<_, String>(text("bye")), Ok(ClientMessage::Close(None))]);
        let mut backend = Recorder::<BackendMessage>::default();

        let report = pump(source, &mut backend, SessionToken::new(), client_frame).await;
        assert_eq!(report.outcome, PumpOutcome::SourceClosed);
        assert_eq!(backend.items, vec![BackendMessage::Text("bye".into())]);
        assert!(backend.closed);
    }

    #[tokio::test]
    async fn cancelled_pump_still_closes_its_sink() {
        let token = SessionToken::new();
        token.cancel();
        let mut client = Recorder::<ClientMessage>::default();

        let report = pump(
            stream::pending::<Result<BackendMessage, String>>(),
            &mut client,
            token,
            backend_frame,
        )
        .await;
        assert_eq!(report.outcome, PumpOutcome::Cancelled);
        assert!(client.closed);
    }
}
