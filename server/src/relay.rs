//! WebSocket entry point for voice clients.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{future, Stream, StreamExt};
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::protocol::InboundFrame;
use crate::registry::ClientId;
use crate::session::{panic_message, Session, SessionContext};
use crate::transport::{inbound_frame, TransportError, WsSink};

pub async fn voice_ws(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let ctx = state.session_context();
    ws.on_upgrade(move |socket| serve_connection(socket, ClientId::from(client_id), ctx))
}

async fn serve_connection(socket: WebSocket, id: ClientId, ctx: SessionContext) {
    let (sender, receiver) = socket.split();
    let inbound = receiver.filter_map(|message| {
        future::ready(match message {
            Ok(message) => inbound_frame(message).map(Ok),
            Err(e) => Some(Err(TransportError(e.to_string()))),
        })
    });

    let session = Session::new(id, Box::new(WsSink::new(sender)), &ctx);
    attach(session, inbound, &ctx).await;
}

/// Register `session`, replacing any earlier session for the same client,
/// and drive it until it ends. The loop runs in its own task so that a panic
/// is logged and ends only this session.
pub async fn attach<S>(session: Arc<Session>, inbound: S, ctx: &SessionContext)
where
    S: Stream<Item = Result<InboundFrame, TransportError>> + Send + Unpin + 'static,
{
    let registry = &ctx.registry;
    ctx.metrics.record_connection();

    if let Some(previous) = registry.lookup(session.id().as_str()) {
        info!(client_id = %session.id(), "Replacing existing session");
        previous.stop().await;
    }
    if let Some(displaced) = registry.register(Arc::clone(&session)) {
        // a concurrent connection for the same id registered in between
        displaced.stop().await;
    }
    info!(
        client_id = %session.id(),
        generation = session.generation(),
        active_sessions = registry.len(),
        "Client connected"
    );

    let runner = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run(inbound).await }
    });

    if let Err(e) = runner.await {
        if e.is_panic() {
            let payload = e.into_panic();
            error!(
                client_id = %session.id(),
                "Session loop panicked: {}",
                panic_message(payload.as_ref())
            );
        } else {
            warn!(client_id = %session.id(), "Session loop cancelled: {}", e);
        }
    }
    session.stop().await;
}
