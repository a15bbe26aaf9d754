//! Fanout WebSocket endpoint.
//!
//! Auth happens before the upgrade: bearer token (header or `?token=`)
//! hashed and looked up in the operator-token collection.  After the
//! upgrade the connection gets its `initial_data` frame and then a
//! select loop over the outbound queue, inbound frames, the 30 s ping
//! schedule, and shutdown.

use crate::hub::ConnQueue;
use crate::state::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vf_protocol::fanout::{CLOSE_GOING_AWAY, CLOSE_TOO_BIG};
use vf_protocol::{ClientMessage, ServerMessage, MAX_FRAME_BYTES};

const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Disconnect after this many unanswered pings.
const MAX_MISSED_PONGS: u8 = 2;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
}

/// GET /ws — authenticate, then upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = bearer_token(&headers).or(query.token) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let hash = vf_model::fingerprint(token.as_bytes());
    match state.directory.operator_by_token_hash(&hash).await {
        Ok(Some(operator)) => ws
            .on_upgrade(move |socket| handle_socket(state, socket, operator.operator_id))
            .into_response(),
        Ok(None) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            debug!(error = %e, "operator token lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_socket(state: AppState, socket: WebSocket, operator_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, queue) = state.hub.register();
    info!(conn_id, operator_id = %operator_id, "fanout client connected");

    // Initial data: recent flow events, trailing-hour stats, and the
    // active emergencies from the store.
    let active_emergencies = state
        .observations
        .active_emergencies(50)
        .await
        .unwrap_or_default();
    let initial = ServerMessage::InitialData {
        recent_flow_events: state.hub.recent_events(),
        stats: state.hub.stats(Utc::now()),
        active_emergencies,
        server_time: Utc::now(),
    };
    if send_message(&mut sender, &initial).await.is_err() {
        state.hub.unregister(conn_id);
        return;
    }

    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.tick().await; // the first tick is immediate
    let mut missed_pongs: u8 = 0;
    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "shutting down".into(),
                    })))
                    .await;
                break;
            }
            outbound = queue.pop() => match outbound {
                Some(message) => {
                    if send_message(&mut sender, &message).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_GOING_AWAY,
                            reason: "shutting down".into(),
                        })))
                        .await;
                    break;
                }
            },
            _ = ping_timer.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    debug!(conn_id, "two pings unanswered; disconnecting");
                    break;
                }
                missed_pongs += 1;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > MAX_FRAME_BYTES {
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_TOO_BIG,
                                reason: "frame too large".into(),
                            })))
                            .await;
                        break;
                    }
                    missed_pongs = 0;
                    handle_client_message(&state, conn_id, &queue, &text);
                }
                Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sender.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Binary(_))) => {}
                Some(Err(_)) => break,
            }
        }
    }

    state.hub.unregister(conn_id);
    info!(conn_id, "fanout client disconnected");
}

fn handle_client_message(state: &AppState, conn_id: u64, queue: &Arc<ConnQueue>, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { room }) => {
            let subscribed = state.hub.subscribe(conn_id, &room);
            queue.push(ServerMessage::Subscription { room, subscribed });
        }
        Ok(ClientMessage::Unsubscribe { room }) => {
            state.hub.unsubscribe(conn_id, &room);
            queue.push(ServerMessage::Subscription {
                room,
                subscribed: false,
            });
        }
        Ok(ClientMessage::Ping) => queue.push(ServerMessage::Pong),
        Err(e) => debug!(conn_id, error = %e, "unparseable client frame ignored"),
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).unwrap_or_default();
    sender.send(Message::Text(json.into())).await
}
