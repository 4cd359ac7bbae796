//! Live poll WebSocket
//!
//! GET /ws/{pollId}?userId=
//!
//! The server pushes `poll_data`, `vote_update` and `user_count` events as
//! JSON text frames. Client frames are ignored apart from close.

use super::connect_info::ClientMeta;
use super::http::ApiError;
use super::AppState;
use crate::identity;
use crate::polls::Subscription;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub user_id: Option<String>,
}

/// Subscribe first so an unknown poll is refused before the upgrade
pub async fn poll_socket(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
    Query(query): Query<WsQuery>,
    ClientMeta(meta): ClientMeta,
    ws: WebSocketUpgrade,
) -> Response {
    let voter_id = identity::resolve(query.user_id.as_deref(), &meta);
    let subscription = match state.registry.subscribe(&poll_id, &voter_id).await {
        Ok(subscription) => subscription,
        Err(err) => return ApiError::from(err).into_response(),
    };
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| poll_session(socket, subscription, shutdown))
}

async fn poll_session(socket: WebSocket, mut subscription: Subscription, shutdown: CancellationToken) {
    let (mut sink, mut stream) = socket.split();
    let poll_id = subscription.poll_id().to_string();
    let session_id = subscription.session_id();
    info!(
        poll_id = %poll_id,
        session_id,
        voter_id = %subscription.voter_id(),
        "viewer connected"
    );

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }

            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }

            event = subscription.recv() => {
                match event {
                    Some(payload) => {
                        if sink.send(Message::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Dropped by the hub, usually for falling behind
                        debug!(poll_id = %poll_id, session_id, "session dropped by hub");
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::AGAIN,
                                reason: "too slow, reconnect".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(poll_id = %poll_id, session_id, error = %err, "socket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(poll_id = %poll_id, session_id, "viewer disconnected");
}
