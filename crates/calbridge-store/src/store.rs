//! The relation store proper.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use calbridge_core::{ProviderKind, SyncError, SyncResult, TokenSet};

use crate::types::{
    AccountRecord, CalendarRecord, EventRecord, EventStatus, SubscriptionRecord,
};

/// SQLite store for accounts, calendars, event relations, and subscriptions.
pub struct RelationStore {
    conn: Mutex<Connection>,
}

impl RelationStore {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (tests and ephemeral runs).
    pub fn in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SyncResult<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                mail TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_type TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (mail, provider)
            );

            CREATE TABLE IF NOT EXISTS calendars (
                uuid TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                account_mail TEXT NOT NULL,
                principal_uuid TEXT
            );

            CREATE TABLE IF NOT EXISTS events (
                internal_id INTEGER PRIMARY KEY AUTOINCREMENT,
                calendar_uuid TEXT NOT NULL,
                provider_event_id TEXT NOT NULL,
                parent_id INTEGER,
                status TEXT NOT NULL DEFAULT 'synced',
                revision TEXT,
                UNIQUE (calendar_uuid, provider_event_id)
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                correlation TEXT PRIMARY KEY,
                calendar_uuid TEXT NOT NULL UNIQUE,
                provider_sub_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_calendar ON events(calendar_uuid);
            CREATE INDEX IF NOT EXISTS idx_events_parent ON events(parent_id);
            CREATE INDEX IF NOT EXISTS idx_calendars_principal ON calendars(principal_uuid);
            "#,
        )?;
        Ok(())
    }

    // ---- accounts ----

    /// Insert or replace an account with its token state.
    pub fn save_account(&self, account: &AccountRecord) -> SyncResult<()> {
        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO accounts
            (mail, provider, access_token, refresh_token, token_type, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                account.mail,
                account.provider.as_str(),
                account.tokens.access_token,
                account.tokens.refresh_token,
                account.tokens.token_type,
                account.tokens.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn account(&self, mail: &str, provider: ProviderKind) -> SyncResult<Option<AccountRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT mail, provider, access_token, refresh_token, token_type, expires_at
                 FROM accounts WHERE mail = ?1 AND provider = ?2",
                params![mail, provider.as_str()],
                Self::row_to_account,
            )
            .optional()?;
        Ok(record)
    }

    /// Persist a rotated token set. Touching zero rows means the account
    /// vanished underneath us and is surfaced as drift.
    pub fn update_account_tokens(
        &self,
        mail: &str,
        provider: ProviderKind,
        tokens: &TokenSet,
    ) -> SyncResult<()> {
        let affected = self.conn.lock().execute(
            "UPDATE accounts
             SET access_token = ?1, refresh_token = ?2, token_type = ?3, expires_at = ?4
             WHERE mail = ?5 AND provider = ?6",
            params![
                tokens.access_token,
                tokens.refresh_token,
                tokens.token_type,
                tokens.expires_at,
                mail,
                provider.as_str(),
            ],
        )?;

        if affected != 1 {
            return Err(SyncError::Inconsistent(format!(
                "token update for {}/{} touched {} rows",
                mail, provider, affected
            )));
        }
        Ok(())
    }

    // ---- calendars ----

    pub fn save_calendar(&self, calendar: &CalendarRecord) -> SyncResult<()> {
        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO calendars
            (uuid, provider, provider_id, account_mail, principal_uuid)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                calendar.uuid.to_string(),
                calendar.provider.as_str(),
                calendar.provider_id,
                calendar.account_mail,
                calendar.principal.map(|u| u.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn calendar(&self, uuid: Uuid) -> SyncResult<Option<CalendarRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT uuid, provider, provider_id, account_mail, principal_uuid
                 FROM calendars WHERE uuid = ?1",
                params![uuid.to_string()],
                Self::row_to_calendar,
            )
            .optional()?;
        Ok(record)
    }

    /// Calendars linked to the given principal.
    pub fn linked_calendars(&self, principal: Uuid) -> SyncResult<Vec<CalendarRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, provider, provider_id, account_mail, principal_uuid
             FROM calendars WHERE principal_uuid = ?1",
        )?;
        let rows = stmt.query_map(params![principal.to_string()], Self::row_to_calendar)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every calendar a change on `origin` fans out to: the linked
    /// calendars when `origin` is the principal, otherwise the principal
    /// plus the sibling linked calendars.
    pub fn related_calendars(&self, origin: &CalendarRecord) -> SyncResult<Vec<CalendarRecord>> {
        match origin.principal {
            None => self.linked_calendars(origin.uuid),
            Some(principal_uuid) => {
                let mut out = Vec::new();
                if let Some(principal) = self.calendar(principal_uuid)? {
                    out.push(principal);
                }
                out.extend(
                    self.linked_calendars(principal_uuid)?
                        .into_iter()
                        .filter(|c| c.uuid != origin.uuid),
                );
                Ok(out)
            }
        }
    }

    /// Resolve the calendar a notification belongs to from its
    /// subscription correlation key. `None` means the subscription is
    /// unknown (already torn down) and the notification is stale.
    pub fn calendar_from_subscription(
        &self,
        correlation: Uuid,
    ) -> SyncResult<Option<CalendarRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT c.uuid, c.provider, c.provider_id, c.account_mail, c.principal_uuid
                 FROM calendars c
                 JOIN subscriptions s ON s.calendar_uuid = c.uuid
                 WHERE s.correlation = ?1",
                params![correlation.to_string()],
                Self::row_to_calendar,
            )
            .optional()?;
        Ok(record)
    }

    pub fn subscription_exists(&self, correlation: Uuid) -> SyncResult<bool> {
        let count: u32 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM subscriptions WHERE correlation = ?1",
            params![correlation.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ---- events ----

    pub fn find_event(
        &self,
        calendar_uuid: Uuid,
        provider_event_id: &str,
    ) -> SyncResult<Option<EventRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT internal_id, calendar_uuid, provider_event_id, parent_id, status, revision
                 FROM events WHERE calendar_uuid = ?1 AND provider_event_id = ?2",
                params![calendar_uuid.to_string(), provider_event_id],
                Self::row_to_event,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert a relation record, returning its internal id.
    pub fn insert_event(
        &self,
        calendar_uuid: Uuid,
        provider_event_id: &str,
        parent: Option<i64>,
        revision: Option<&str>,
    ) -> SyncResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (calendar_uuid, provider_event_id, parent_id, status, revision)
             VALUES (?1, ?2, ?3, 'synced', ?4)",
            params![calendar_uuid.to_string(), provider_event_id, parent, revision],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All records in the same relation family, excluding the given one.
    ///
    /// The family root is the record's parent (or the record itself when it
    /// is the principal event); members are the root plus its children.
    pub fn related_events(&self, record: &EventRecord) -> SyncResult<Vec<EventRecord>> {
        let root = record.parent.unwrap_or(record.internal_id);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT internal_id, calendar_uuid, provider_event_id, parent_id, status, revision
             FROM events
             WHERE (internal_id = ?1 OR parent_id = ?1) AND internal_id != ?2",
        )?;
        let rows = stmt.query_map(params![root, record.internal_id], Self::row_to_event)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Whether the stored revision for (calendar, event) matches the given
    /// one, i.e. this notification was already applied.
    pub fn event_already_applied(
        &self,
        calendar_uuid: Uuid,
        provider_event_id: &str,
        revision: Option<&str>,
    ) -> SyncResult<bool> {
        let Some(record) = self.find_event(calendar_uuid, provider_event_id)? else {
            return Ok(false);
        };
        Ok(match (record.revision.as_deref(), revision) {
            (Some(stored), Some(seen)) => stored == seen,
            _ => false,
        })
    }

    pub fn update_event_revision(
        &self,
        internal_id: i64,
        revision: Option<&str>,
    ) -> SyncResult<()> {
        let affected = self.conn.lock().execute(
            "UPDATE events SET revision = ?1 WHERE internal_id = ?2",
            params![revision, internal_id],
        )?;
        if affected != 1 {
            return Err(SyncError::Inconsistent(format!(
                "revision update for event #{} touched {} rows",
                internal_id, affected
            )));
        }
        Ok(())
    }

    /// Mark an event permanently failed. Returns true when the record was
    /// newly marked, false when it was already broken (exactly-once mark).
    pub fn mark_event_broken(&self, internal_id: i64) -> SyncResult<bool> {
        let affected = self.conn.lock().execute(
            "UPDATE events SET status = 'broken' WHERE internal_id = ?1 AND status != 'broken'",
            params![internal_id],
        )?;
        Ok(affected == 1)
    }

    pub fn delete_event(&self, internal_id: i64) -> SyncResult<()> {
        let affected = self.conn.lock().execute(
            "DELETE FROM events WHERE internal_id = ?1",
            params![internal_id],
        )?;
        if affected != 1 {
            return Err(SyncError::Inconsistent(format!(
                "delete of event #{} touched {} rows",
                internal_id, affected
            )));
        }
        Ok(())
    }

    /// Provider event ids tracked for one calendar (delta reconciliation).
    pub fn tracked_event_ids(&self, calendar_uuid: Uuid) -> SyncResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT provider_event_id FROM events WHERE calendar_uuid = ?1 ORDER BY internal_id",
        )?;
        let rows = stmt.query_map(params![calendar_uuid.to_string()], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ---- subscriptions ----

    pub fn save_subscription(&self, subscription: &SubscriptionRecord) -> SyncResult<()> {
        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO subscriptions
            (correlation, calendar_uuid, provider_sub_id, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                subscription.correlation.to_string(),
                subscription.calendar_uuid.to_string(),
                subscription.provider_sub_id,
                subscription.expires_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn subscription_for_calendar(
        &self,
        calendar_uuid: Uuid,
    ) -> SyncResult<Option<SubscriptionRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT correlation, calendar_uuid, provider_sub_id, expires_at
                 FROM subscriptions WHERE calendar_uuid = ?1",
                params![calendar_uuid.to_string()],
                Self::row_to_subscription,
            )
            .optional()?;
        Ok(record)
    }

    pub fn subscriptions_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> SyncResult<Vec<SubscriptionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT correlation, calendar_uuid, provider_sub_id, expires_at
             FROM subscriptions WHERE expires_at < ?1 ORDER BY expires_at",
        )?;
        let rows = stmt.query_map(params![deadline.timestamp()], Self::row_to_subscription)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Subscriptions of the principal and all its linked calendars.
    pub fn subscriptions_for_graph(
        &self,
        principal: Uuid,
    ) -> SyncResult<Vec<SubscriptionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.correlation, s.calendar_uuid, s.provider_sub_id, s.expires_at
             FROM subscriptions s
             JOIN calendars c ON c.uuid = s.calendar_uuid
             WHERE c.uuid = ?1 OR c.principal_uuid = ?1",
        )?;
        let rows = stmt.query_map(params![principal.to_string()], Self::row_to_subscription)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Extend a subscription in place (providers with native renewal).
    pub fn update_subscription_expiry(
        &self,
        correlation: Uuid,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let affected = self.conn.lock().execute(
            "UPDATE subscriptions SET expires_at = ?1 WHERE correlation = ?2",
            params![expires_at.timestamp(), correlation.to_string()],
        )?;
        if affected != 1 {
            return Err(SyncError::Inconsistent(format!(
                "expiry update for subscription {} touched {} rows",
                correlation, affected
            )));
        }
        Ok(())
    }

    /// Swap in the replacement subscription created by delete-then-recreate
    /// renewal: the old row is removed and the new provider id written in
    /// one transaction, keeping the correlation key stable.
    pub fn replace_subscription(
        &self,
        correlation: Uuid,
        new_provider_sub_id: &str,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let calendar_uuid: String = tx
            .query_row(
                "SELECT calendar_uuid FROM subscriptions WHERE correlation = ?1",
                params![correlation.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                SyncError::Inconsistent(format!("subscription {} vanished during renewal", correlation))
            })?;

        tx.execute(
            "DELETE FROM subscriptions WHERE correlation = ?1",
            params![correlation.to_string()],
        )?;
        tx.execute(
            "INSERT INTO subscriptions (correlation, calendar_uuid, provider_sub_id, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                correlation.to_string(),
                calendar_uuid,
                new_provider_sub_id,
                expires_at.timestamp(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn delete_subscription(&self, correlation: Uuid) -> SyncResult<()> {
        let affected = self.conn.lock().execute(
            "DELETE FROM subscriptions WHERE correlation = ?1",
            params![correlation.to_string()],
        )?;
        if affected != 1 {
            return Err(SyncError::Inconsistent(format!(
                "delete of subscription {} touched {} rows",
                correlation, affected
            )));
        }
        Ok(())
    }

    /// Tear down the persisted sync graph of a principal calendar: every
    /// event relation record and subscription record of the principal and
    /// its linked calendars, in one transaction. A mid-sequence failure
    /// rolls the whole thing back.
    pub fn purge_sync_graph(&self, principal: Uuid) -> SyncResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let events = tx.execute(
            "DELETE FROM events WHERE calendar_uuid IN
             (SELECT uuid FROM calendars WHERE uuid = ?1 OR principal_uuid = ?1)",
            params![principal.to_string()],
        )?;
        let subscriptions = tx.execute(
            "DELETE FROM subscriptions WHERE calendar_uuid IN
             (SELECT uuid FROM calendars WHERE uuid = ?1 OR principal_uuid = ?1)",
            params![principal.to_string()],
        )?;

        tx.commit()?;
        tracing::info!(
            "purged sync graph for {}: {} events, {} subscriptions",
            principal,
            events,
            subscriptions
        );
        Ok(())
    }

    // ---- row mapping ----

    fn row_to_account(row: &Row) -> rusqlite::Result<AccountRecord> {
        let provider_str: String = row.get(1)?;
        Ok(AccountRecord {
            mail: row.get(0)?,
            provider: parse_provider(1, &provider_str)?,
            tokens: TokenSet {
                access_token: row.get(2)?,
                refresh_token: row.get(3)?,
                token_type: row.get(4)?,
                expires_at: row.get(5)?,
            },
        })
    }

    fn row_to_calendar(row: &Row) -> rusqlite::Result<CalendarRecord> {
        let uuid_str: String = row.get(0)?;
        let provider_str: String = row.get(1)?;
        let principal_str: Option<String> = row.get(4)?;
        Ok(CalendarRecord {
            uuid: parse_uuid(0, &uuid_str)?,
            provider: parse_provider(1, &provider_str)?,
            provider_id: row.get(2)?,
            account_mail: row.get(3)?,
            principal: principal_str.as_deref().map(|s| parse_uuid(4, s)).transpose()?,
        })
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<EventRecord> {
        let calendar_str: String = row.get(1)?;
        let status_str: String = row.get(4)?;
        Ok(EventRecord {
            internal_id: row.get(0)?,
            calendar_uuid: parse_uuid(1, &calendar_str)?,
            provider_event_id: row.get(2)?,
            parent: row.get(3)?,
            status: parse_status(4, &status_str)?,
            revision: row.get(5)?,
        })
    }

    fn row_to_subscription(row: &Row) -> rusqlite::Result<SubscriptionRecord> {
        let correlation_str: String = row.get(0)?;
        let calendar_str: String = row.get(1)?;
        let expires_ts: i64 = row.get(3)?;
        Ok(SubscriptionRecord {
            correlation: parse_uuid(0, &correlation_str)?,
            calendar_uuid: parse_uuid(1, &calendar_str)?,
            provider_sub_id: row.get(2)?,
            expires_at: DateTime::from_timestamp(expires_ts, 0).unwrap_or_default(),
        })
    }
}

fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_provider(idx: usize, s: &str) -> rusqlite::Result<ProviderKind> {
    ProviderKind::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown provider '{}'", s).into(),
        )
    })
}

fn parse_status(idx: usize, s: &str) -> rusqlite::Result<EventStatus> {
    EventStatus::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown event status '{}'", s).into(),
        )
    })
}
