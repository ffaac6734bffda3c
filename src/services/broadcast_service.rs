use std::time::Duration;

use futures::StreamExt;
use time::OffsetDateTime;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dto::events::{
        EventEnvelope, LeaderboardUpdateEvent, RoundEvent, RoundFinishedEvent, RoundUpdateEvent,
        UserTapEvent, WinnerSummary,
    },
    state::{
        SharedState,
        leaderboard::Leaderboard,
        round::{RoundStatus, RoundWindow},
        session::TapAccepted,
    },
};

const INITIAL_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Broadcast a committed tap to the round's subscribers.
pub fn broadcast_user_tap(state: &SharedState, round_id: &str, user_id: &str, tap: &TapAccepted) {
    publish(
        state,
        RoundEvent::UserTap(UserTapEvent {
            round_id: round_id.to_owned(),
            user_id: user_id.to_owned(),
            taps: tap.taps,
            points: tap.points,
            timestamp: tap.timestamp,
        }),
    );
}

/// Broadcast a round creation or status change to every client.
pub fn broadcast_round_update(
    state: &SharedState,
    round_id: &str,
    window: &RoundWindow,
    total_points: u64,
    status: RoundStatus,
) {
    publish(
        state,
        RoundEvent::RoundUpdate(RoundUpdateEvent {
            id: round_id.to_owned(),
            starts_at: window.starts_at(),
            ends_at: window.ends_at(),
            total_points,
            status,
        }),
    );
}

/// Broadcast the end of a round with its winner.
pub fn broadcast_round_finished(
    state: &SharedState,
    round_id: &str,
    total_points: u64,
    winner: Option<WinnerSummary>,
) {
    publish(
        state,
        RoundEvent::RoundFinished(RoundFinishedEvent {
            id: round_id.to_owned(),
            total_points,
            winner,
        }),
    );
}

/// Broadcast a full leaderboard snapshot to the round's subscribers.
pub fn broadcast_leaderboard(state: &SharedState, leaderboard: Leaderboard) {
    publish(
        state,
        RoundEvent::LeaderboardUpdate(LeaderboardUpdateEvent { leaderboard }),
    );
}

/// Deliver `event` locally, then hand it to the event bus in the background.
///
/// Bus failures are logged and never reach the caller.
pub fn publish(state: &SharedState, event: RoundEvent) {
    let envelope = EventEnvelope::new(
        state.instance_id(),
        OffsetDateTime::now_utc(),
        event.clone(),
    );
    state.hub().deliver(event);

    let bus = state.event_bus();
    tokio::spawn(async move {
        let kind = envelope.event.name();
        if let Err(err) = bus.publish(envelope).await {
            warn!(event = kind, error = %err, "failed to publish event to sibling instances");
        }
    });
}

/// Re-deliver an envelope received from the bus. Returns `false` for envelopes
/// this instance published itself.
pub fn relay_envelope(state: &SharedState, envelope: EventEnvelope) -> bool {
    if envelope.instance_id == state.instance_id() {
        return false;
    }
    debug!(
        from = %envelope.instance_id,
        event = envelope.event.name(),
        round_id = envelope.event.round_id(),
        "relaying event from sibling instance"
    );
    state.hub().deliver(envelope.event);
    true
}

/// Subscribe to the event bus and relay sibling events until `shutdown` flips.
///
/// A lost subscription is reopened with exponential backoff.
pub async fn run_relay(state: SharedState, mut shutdown: watch::Receiver<bool>) {
    let bus = state.event_bus();
    let mut delay = INITIAL_DELAY;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match bus.subscribe().await {
            Ok(mut stream) => {
                info!(instance_id = %state.instance_id(), "inter-instance relay subscribed");
                delay = INITIAL_DELAY;
                loop {
                    tokio::select! {
                        next = stream.next() => match next {
                            Some(envelope) => {
                                relay_envelope(&state, envelope);
                            }
                            None => {
                                warn!("inter-instance subscription ended; reconnecting");
                                break;
                            }
                        },
                        _ = shutdown.changed() => return,
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "inter-instance subscription failed");
            }
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
        delay = (delay * 2).min(MAX_DELAY);
    }
}
