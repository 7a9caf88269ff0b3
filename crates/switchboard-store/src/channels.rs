use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use switchboard_core::collaborators::SessionStore;
use switchboard_core::errors::CollaboratorError;
use switchboard_core::ids::{AgentSessionId, ChannelId};

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelSessionRow {
    pub channel_id: ChannelId,
    pub session_id: AgentSessionId,
    pub display_name: String,
    pub updated_at: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelSessionRow> {
    Ok(ChannelSessionRow {
        channel_id: ChannelId::from_raw(row.get::<_, String>(0)?),
        session_id: AgentSessionId::from_raw(row.get::<_, String>(1)?),
        display_name: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// channel id -> agent session id, one row per channel.
pub struct ChannelSessionRepo {
    db: Database,
}

impl ChannelSessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(channel_id = %channel))]
    pub fn get(&self, channel: &ChannelId) -> Result<Option<ChannelSessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT channel_id, session_id, display_name, updated_at
                     FROM channel_sessions WHERE channel_id = ?1",
                    [channel.as_str()],
                    map_row,
                )
                .optional()?)
        })
    }

    /// Insert or overwrite. Last write wins.
    #[instrument(skip(self), fields(channel_id = %channel, session_id = %session))]
    pub fn upsert(
        &self,
        channel: &ChannelId,
        session: &AgentSessionId,
        display_name: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO channel_sessions (channel_id, session_id, display_name, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(channel_id) DO UPDATE SET
                     session_id = excluded.session_id,
                     display_name = excluded.display_name,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    channel.as_str(),
                    session.as_str(),
                    display_name,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    /// Returns whether a row was removed.
    #[instrument(skip(self), fields(channel_id = %channel))]
    pub fn delete(&self, channel: &ChannelId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM channel_sessions WHERE channel_id = ?1",
                [channel.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    /// Most recently updated first.
    pub fn list(&self) -> Result<Vec<ChannelSessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, session_id, display_name, updated_at
                 FROM channel_sessions ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

impl SessionStore for ChannelSessionRepo {
    fn get_session(&self, channel: &ChannelId) -> Result<Option<AgentSessionId>, CollaboratorError> {
        Ok(self.get(channel)?.map(|row| row.session_id))
    }

    fn set_session(
        &self,
        channel: &ChannelId,
        session_id: &AgentSessionId,
        display_name: &str,
    ) -> Result<(), CollaboratorError> {
        Ok(self.upsert(channel, session_id, display_name)?)
    }

    fn clear_session(&self, channel: &ChannelId) -> Result<(), CollaboratorError> {
        let _ = self.delete(channel)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ChannelSessionRepo {
        ChannelSessionRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn get_missing_is_none() {
        let repo = repo();
        assert!(repo.get(&ChannelId::from_raw("C1")).unwrap().is_none());
    }

    #[test]
    fn upsert_overwrites() {
        let repo = repo();
        let chan = ChannelId::from_raw("C1");
        repo.upsert(&chan, &AgentSessionId::from_raw("s1"), "general").unwrap();
        repo.upsert(&chan, &AgentSessionId::from_raw("s2"), "general").unwrap();

        let row = repo.get(&chan).unwrap().unwrap();
        assert_eq!(row.session_id.as_str(), "s2");
        assert_eq!(row.display_name, "general");
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn delete_reports_presence() {
        let repo = repo();
        let chan = ChannelId::from_raw("C1");
        repo.upsert(&chan, &AgentSessionId::from_raw("s1"), "").unwrap();
        assert!(repo.delete(&chan).unwrap());
        assert!(!repo.delete(&chan).unwrap());
    }

    #[test]
    fn session_store_trait() {
        let repo = repo();
        let store: &dyn SessionStore = &repo;
        let chan = ChannelId::from_raw("C9");

        store
            .set_session(&chan, &AgentSessionId::from_raw("sess_abc"), "ops")
            .unwrap();
        assert_eq!(
            store.get_session(&chan).unwrap(),
            Some(AgentSessionId::from_raw("sess_abc"))
        );

        store.clear_session(&chan).unwrap();
        assert_eq!(store.get_session(&chan).unwrap(), None);
        // clearing twice is fine
        store.clear_session(&chan).unwrap();
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let chan = ChannelId::from_raw("C1");
        {
            let repo = ChannelSessionRepo::new(Database::open(&path).unwrap());
            repo.upsert(&chan, &AgentSessionId::from_raw("s1"), "x").unwrap();
        }
        let repo = ChannelSessionRepo::new(Database::open(&path).unwrap());
        assert_eq!(repo.get(&chan).unwrap().unwrap().session_id.as_str(), "s1");
    }
}
