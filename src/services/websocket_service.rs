use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::{
    StreamMap,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{debug, info, warn};

use crate::{
    dto::{
        events::{EVENT_LEADERBOARD, RoundEvent},
        validation::validate_round_id,
        ws::{
            ClientMessage, EVENT_ERROR, EVENT_JOINED_ROUND, EVENT_LEFT_ROUND, EVENT_PONG,
            EVENT_TAP_RESULT, ErrorMessage, RoundAck, ServerMessage, TapResult,
        },
    },
    services::round_service::{self, TapSubmission},
    state::{SharedState, user::AuthenticatedUser},
};

type Outbound = mpsc::UnboundedSender<Message>;

/// Failure that ends a WebSocket session.
#[derive(Debug, Error)]
enum SessionError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
}

#[derive(Serialize)]
struct Pong {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

/// Handle the full lifecycle of one client WebSocket connection.
///
/// The client always receives global round events; round topics are added
/// and removed with `join_round` / `leave_round`.
pub async fn handle_socket(state: SharedState, socket: WebSocket, user: AuthenticatedUser) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut global = BroadcastStream::new(state.hub().subscribe_global());
    let mut topics: StreamMap<String, BroadcastStream<RoundEvent>> = StreamMap::new();
    info!(user_id = %user.id, "websocket client connected");

    loop {
        let result = tokio::select! {
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&state, &user, &mut topics, &outbound_tx, text.as_str()).await
                }
                Some(Ok(Message::Ping(payload))) => outbound_tx
                    .send(Message::Pong(payload))
                    .map_err(|_| SessionError::ConnectionClosed),
                Some(Ok(Message::Close(frame))) => {
                    let _ = outbound_tx.send(Message::Close(frame));
                    break;
                }
                Some(Ok(Message::Binary(_) | Message::Pong(_))) => Ok(()),
                Some(Err(err)) => {
                    warn!(user_id = %user.id, error = %err, "websocket error");
                    break;
                }
                None => break,
            },
            Some(item) = global.next() => forward(&outbound_tx, &user, item),
            Some((_, item)) = topics.next(), if !topics.is_empty() => forward(&outbound_tx, &user, item),
        };

        if let Err(err) = result {
            debug!(user_id = %user.id, error = %err, "ending websocket session");
            break;
        }
    }

    info!(user_id = %user.id, rounds = topics.len(), "websocket client disconnected");
    let joined: Vec<String> = topics.keys().cloned().collect();
    drop(topics);
    for round_id in joined {
        state.hub().prune(&round_id);
    }
    finalize(writer_task, outbound_tx).await;
}

fn forward(
    tx: &Outbound,
    user: &AuthenticatedUser,
    item: Result<RoundEvent, BroadcastStreamRecvError>,
) -> Result<(), SessionError> {
    match item {
        Ok(event) => match ServerMessage::from_event(&event) {
            Ok(message) => send_message_to_websocket(tx, &message),
            Err(err) => {
                warn!(event = event.name(), error = %err, "failed to encode round event");
                Ok(())
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(user_id = %user.id, skipped, "websocket client lagging; events dropped");
            Ok(())
        }
    }
}

async fn handle_text(
    state: &SharedState,
    user: &AuthenticatedUser,
    topics: &mut StreamMap<String, BroadcastStream<RoundEvent>>,
    tx: &Outbound,
    text: &str,
) -> Result<(), SessionError> {
    let message = match ClientMessage::from_json_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(user_id = %user.id, error = %err, "failed to parse websocket message");
            return send(tx, EVENT_ERROR, &ErrorMessage {
                message: format!("invalid message: {err}"),
            });
        }
    };

    match message {
        ClientMessage::JoinRound { round_id } => {
            if let Err(err) = validate_round_id(&round_id) {
                return send(tx, EVENT_ERROR, &ErrorMessage {
                    message: err.to_string(),
                });
            }
            if !topics.contains_key(&round_id) {
                let receiver = state.hub().subscribe_round(&round_id);
                topics.insert(round_id.clone(), BroadcastStream::new(receiver));
            }
            debug!(user_id = %user.id, round_id = %round_id, "joined round topic");
            send(tx, EVENT_JOINED_ROUND, &RoundAck {
                round_id: round_id.clone(),
                success: true,
            })?;
            send_leaderboard(state, tx, &round_id).await
        }
        ClientMessage::LeaveRound { round_id } => {
            let success = topics.remove(&round_id).is_some();
            state.hub().prune(&round_id);
            send(tx, EVENT_LEFT_ROUND, &RoundAck { round_id, success })
        }
        ClientMessage::Tap { round_id } => {
            let now = OffsetDateTime::now_utc();
            let result = match round_service::tap_at(state, &round_id, user, now).await {
                Ok(TapSubmission::Committed(tap)) => TapResult {
                    success: true,
                    taps: tap.taps,
                    my_points: tap.points,
                    total_points: Some(tap.total_points),
                    ..TapResult::default()
                },
                Ok(TapSubmission::Rejected(rejection)) => TapResult::rejected(rejection),
                Err(err) => TapResult::failed(err.to_string()),
            };
            send(tx, EVENT_TAP_RESULT, &result)
        }
        ClientMessage::GetLeaderboard { round_id } => send_leaderboard(state, tx, &round_id).await,
        ClientMessage::Ping => send(tx, EVENT_PONG, &Pong {
            timestamp: OffsetDateTime::now_utc(),
        }),
    }
}

async fn send_leaderboard(state: &SharedState, tx: &Outbound, round_id: &str) -> Result<(), SessionError> {
    match round_service::leaderboard_at(state, round_id, OffsetDateTime::now_utc()).await {
        Ok(leaderboard) => send(tx, EVENT_LEADERBOARD, &leaderboard),
        Err(err) => send(tx, EVENT_ERROR, &ErrorMessage {
            message: err.to_string(),
        }),
    }
}

fn send<T: Serialize>(tx: &Outbound, event: &str, data: &T) -> Result<(), SessionError> {
    match ServerMessage::new(event, data) {
        Ok(message) => send_message_to_websocket(tx, &message),
        Err(err) => {
            warn!(event, error = %err, "failed to encode websocket message");
            Ok(())
        }
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; a closed writer is
/// reported as [`SessionError::ConnectionClosed`].
fn send_message_to_websocket(tx: &Outbound, message: &ServerMessage) -> Result<(), SessionError> {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, event = %message.event, "failed to serialize websocket message");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| SessionError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: Outbound) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
