use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, trace, warn};

use switchboard_core::ids::ChannelId;

use crate::sink::ChannelUpdate;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Serialize an update for the wire, or `None` when the client filtered it out.
pub fn encode_update(update: &ChannelUpdate, filter: Option<&ChannelId>) -> Option<String> {
    if filter.is_some_and(|channel| channel != update.channel_id()) {
        return None;
    }
    match serde_json::to_string(update) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "failed to serialize channel update");
            None
        }
    }
}

/// Stream updates to one client until either side goes away. The client
/// only ever listens; anything it sends besides a close is ignored.
pub async fn handle_ws_connection(
    socket: WebSocket,
    updates: broadcast::Receiver<ChannelUpdate>,
    filter: Option<ChannelId>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut updates = BroadcastStream::new(updates);
    info!(channel_filter = ?filter, "update stream opened");

    let writer = async {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                update = updates.next() => {
                    let update = match update {
                        Some(Ok(update)) => update,
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            warn!(skipped, "update stream lagged, dropped updates");
                            continue;
                        }
                        None => break,
                    };
                    let Some(json) = encode_update(&update, filter.as_ref()) else {
                        continue;
                    };
                    if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    trace!("sent ping");
                }
            }
        }
    };

    let reader = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let WsMessage::Close(_) = msg {
                break;
            }
        }
    };

    tokio::select! {
        () = writer => {},
        () = reader => {},
    }
    debug!("update stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::events::RenderUnit;
    use switchboard_core::ids::UnitId;

    fn posted(channel: &str) -> ChannelUpdate {
        ChannelUpdate::Posted {
            channel_id: ChannelId::from_raw(channel),
            unit_id: UnitId::from_raw("unit_1"),
            unit: RenderUnit::Text { text: "hi".into() },
        }
    }

    #[test]
    fn unfiltered_clients_get_everything() {
        let json = encode_update(&posted("C1"), None).unwrap();
        assert!(json.contains("\"type\":\"posted\""));
        assert!(json.contains("\"text\":\"hi\""));
    }

    #[test]
    fn filter_drops_other_channels() {
        let c1 = ChannelId::from_raw("C1");
        assert!(encode_update(&posted("C1"), Some(&c1)).is_some());
        assert!(encode_update(&posted("C2"), Some(&c1)).is_none());
    }
}
