use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use switchboard_core::collaborators::{ApprovalNotice, ApprovalNotifier, UpdateSink};
use switchboard_core::errors::CollaboratorError;
use switchboard_core::events::RenderUnit;
use switchboard_core::ids::{ChannelId, NoticeKey, UnitId};

/// Everything a chat front end needs to mirror a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelUpdate {
    Posted {
        channel_id: ChannelId,
        unit_id: UnitId,
        unit: RenderUnit,
    },
    Updated {
        channel_id: ChannelId,
        unit_id: UnitId,
        unit: RenderUnit,
    },
    ApprovalRequested {
        notice_key: NoticeKey,
        notice: ApprovalNotice,
    },
}

impl ChannelUpdate {
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Self::Posted { channel_id, .. } | Self::Updated { channel_id, .. } => channel_id,
            Self::ApprovalRequested { notice, .. } => &notice.channel_id,
        }
    }
}

/// Fans updates out to every connected client.
///
/// Posting with nobody listening is not an error; the run goes on. An
/// approval notice with nobody listening is, so the broker can fall back.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ChannelUpdate>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl UpdateSink for BroadcastSink {
    async fn post_update(&self, channel: &ChannelId, unit: RenderUnit) -> Result<UnitId, CollaboratorError> {
        let unit_id = UnitId::new();
        let _ = self.tx.send(ChannelUpdate::Posted {
            channel_id: channel.clone(),
            unit_id: unit_id.clone(),
            unit,
        });
        Ok(unit_id)
    }

    async fn update_unit(
        &self,
        channel: &ChannelId,
        unit_id: &UnitId,
        unit: RenderUnit,
    ) -> Result<(), CollaboratorError> {
        let _ = self.tx.send(ChannelUpdate::Updated {
            channel_id: channel.clone(),
            unit_id: unit_id.clone(),
            unit,
        });
        Ok(())
    }
}

#[async_trait]
impl ApprovalNotifier for BroadcastSink {
    async fn send_approval_request(&self, notice: &ApprovalNotice) -> Result<NoticeKey, CollaboratorError> {
        let notice_key = notice.notice_key.clone();
        self.tx
            .send(ChannelUpdate::ApprovalRequested {
                notice_key: notice_key.clone(),
                notice: notice.clone(),
            })
            .map_err(|_| CollaboratorError::Unavailable("no client is listening".into()))?;
        Ok(notice_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchboard_core::ids::ApprovalId;

    fn notice() -> ApprovalNotice {
        ApprovalNotice {
            request_id: ApprovalId::from_raw("perm_1"),
            notice_key: NoticeKey::from_raw("notice_1"),
            channel_id: ChannelId::from_raw("C1"),
            requester: Some("U1".into()),
            tool_name: "Bash".into(),
            input: serde_json::json!({"command": "ls"}),
            pivot: None,
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn posts_reach_subscribers() {
        let sink = BroadcastSink::new(16);
        let mut rx = sink.subscribe();
        let chan = ChannelId::from_raw("C1");

        let id = sink
            .post_update(&chan, RenderUnit::Text { text: "hi".into() })
            .await
            .unwrap();
        sink.update_unit(&chan, &id, RenderUnit::Stopped).await.unwrap();

        match rx.recv().await.unwrap() {
            ChannelUpdate::Posted { unit_id, unit, .. } => {
                assert_eq!(unit_id, id);
                assert_eq!(unit, RenderUnit::Text { text: "hi".into() });
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), ChannelUpdate::Updated { .. }));
    }

    #[tokio::test]
    async fn posting_without_listeners_succeeds() {
        let sink = BroadcastSink::new(16);
        assert_eq!(sink.subscriber_count(), 0);
        assert!(sink
            .post_update(&ChannelId::from_raw("C1"), RenderUnit::Stopped)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn notice_needs_a_listener() {
        let sink = BroadcastSink::new(16);
        assert!(matches!(
            sink.send_approval_request(&notice()).await,
            Err(CollaboratorError::Unavailable(_))
        ));

        let mut rx = sink.subscribe();
        let key = sink.send_approval_request(&notice()).await.unwrap();
        let update = rx.recv().await.unwrap();
        assert_eq!(update.channel_id(), &ChannelId::from_raw("C1"));
        assert!(matches!(update, ChannelUpdate::ApprovalRequested { notice_key, .. } if notice_key == key));
    }

    #[test]
    fn updates_are_tagged() {
        let update = ChannelUpdate::Posted {
            channel_id: ChannelId::from_raw("C1"),
            unit_id: UnitId::from_raw("unit_1"),
            unit: RenderUnit::Stopped,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "posted");
        assert_eq!(json["channel_id"], "C1");
        assert_eq!(json["unit"]["kind"], "stopped");
    }
}
