use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::models::{ClientRecord, NewClient, RecordFilter, VerificationStatus};

/// Async-safe handle to the client record store.
///
/// Wraps `ClientStore` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. The mutex also serializes the
/// three write paths (insert, session attach, verify flip), so concurrent
/// requests for the same correlation id cannot interleave partial writes.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ClientStore>>,
}

impl DbHandle {
    pub fn new(store: ClientStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ClientStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }
}

pub struct ClientStore {
    conn: Connection,
}

const RECORD_COLUMNS: &str = "id, correlation_id, full_name, email, company, website, \
     project_type, description, status, vendor_session_id, created_at, verified_at, \
     client_ip, client_timezone, client_user_agent";

impl ClientStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA journal_mode = WAL;")
            .context("Failed to set journal mode")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS clients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    correlation_id TEXT NOT NULL UNIQUE,
                    full_name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    company TEXT NOT NULL DEFAULT '',
                    website TEXT NOT NULL DEFAULT '',
                    project_type TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending'
                        CHECK(status IN ('pending', 'verified')),
                    vendor_session_id TEXT,
                    created_at TEXT NOT NULL,
                    verified_at TEXT,
                    client_ip TEXT,
                    client_timezone TEXT,
                    client_user_agent TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_clients_status ON clients(status);
                CREATE INDEX IF NOT EXISTS idx_clients_created ON clients(created_at);
                ",
            )
            .context("Failed to create clients table")?;
        Ok(())
    }

    /// Insert a new pending record unless one with this correlation id
    /// already exists. Duplicate submissions are absorbed as no-ops, never
    /// errors, so at-least-once client delivery cannot corrupt the store.
    ///
    /// Returns `true` if a row was actually inserted.
    pub fn upsert_if_absent(&self, client: &NewClient) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO clients
                 (correlation_id, full_name, email, company, website, project_type,
                  description, status, created_at, client_ip, client_timezone, client_user_agent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10, ?11)",
                params![
                    client.correlation_id,
                    client.full_name,
                    client.email,
                    client.company,
                    client.website,
                    client.project_type,
                    client.description,
                    client.created_at,
                    client.client_ip,
                    client.client_timezone,
                    client.client_user_agent,
                ],
            )
            .context("Failed to insert client")?;
        Ok(changed == 1)
    }

    /// Record the vendor session id for a correlation id. No-op when no row
    /// matches; a repeated session creation overwrites with the newer id in
    /// a single statement.
    pub fn attach_session(&self, correlation_id: &str, session_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE clients SET vendor_session_id = ?1 WHERE correlation_id = ?2",
                params![session_id, correlation_id],
            )
            .context("Failed to attach session")?;
        Ok(changed > 0)
    }

    /// Flip a record to `verified` and stamp `verified_at`. A callback for an
    /// unknown correlation id is silently dropped (returns `false`); the
    /// webhook caller must never learn whether the id matched anything.
    /// The `status = 'pending'` guard keeps `verified_at` stable when the
    /// vendor redelivers an approved callback: the stamp is written exactly
    /// once.
    pub fn mark_verified(&self, correlation_id: &str, verified_at: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE clients SET status = 'verified', verified_at = ?1
                 WHERE correlation_id = ?2 AND status = 'pending'",
                params![verified_at, correlation_id],
            )
            .context("Failed to mark client verified")?;
        Ok(changed > 0)
    }

    /// Look up a single record by correlation id.
    pub fn get(&self, correlation_id: &str) -> Result<Option<ClientRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM clients WHERE correlation_id = ?1",
                RECORD_COLUMNS
            ))
            .context("Failed to prepare get")?;
        let mut rows = stmt
            .query_map(params![correlation_id], RecordRow::from_row)
            .context("Failed to query client")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read client row")?.into_record()?)),
            None => Ok(None),
        }
    }

    /// List records matching the filter, newest first.
    ///
    /// `search` matches as a case-insensitive substring (SQLite `LIKE`, ASCII
    /// case folding) against correlation id, full name, email, and company.
    pub fn query(&self, filter: &RecordFilter) -> Result<Vec<ClientRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM clients
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL
                        OR correlation_id LIKE '%' || ?2 || '%'
                        OR full_name LIKE '%' || ?2 || '%'
                        OR email LIKE '%' || ?2 || '%'
                        OR company LIKE '%' || ?2 || '%')
                 ORDER BY created_at DESC",
                RECORD_COLUMNS
            ))
            .context("Failed to prepare query")?;
        let status = filter.status.map(|s| s.as_str());
        let rows = stmt
            .query_map(params![status, filter.search], RecordRow::from_row)
            .context("Failed to query clients")?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read client row")?.into_record()?);
        }
        Ok(records)
    }
}

/// Raw row shape; `status` stays a string until checked conversion.
struct RecordRow {
    id: i64,
    correlation_id: String,
    full_name: String,
    email: String,
    company: String,
    website: String,
    project_type: String,
    description: String,
    status: String,
    vendor_session_id: Option<String>,
    created_at: String,
    verified_at: Option<String>,
    client_ip: Option<String>,
    client_timezone: Option<String>,
    client_user_agent: Option<String>,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            correlation_id: row.get(1)?,
            full_name: row.get(2)?,
            email: row.get(3)?,
            company: row.get(4)?,
            website: row.get(5)?,
            project_type: row.get(6)?,
            description: row.get(7)?,
            status: row.get(8)?,
            vendor_session_id: row.get(9)?,
            created_at: row.get(10)?,
            verified_at: row.get(11)?,
            client_ip: row.get(12)?,
            client_timezone: row.get(13)?,
            client_user_agent: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<ClientRecord> {
        let status: VerificationStatus = self
            .status
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Unexpected status value in database")?;
        Ok(ClientRecord {
            id: self.id,
            correlation_id: self.correlation_id,
            full_name: self.full_name,
            email: self.email,
            company: self.company,
            website: self.website,
            project_type: self.project_type,
            description: self.description,
            status,
            vendor_session_id: self.vendor_session_id,
            created_at: self.created_at,
            verified_at: self.verified_at,
            client_ip: self.client_ip,
            client_timezone: self.client_timezone,
            client_user_agent: self.client_user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client(correlation_id: &str, created_at: &str) -> NewClient {
        NewClient {
            correlation_id: correlation_id.to_string(),
            full_name: "Jane Doe".to_string(),
            email: "jane@x.com".to_string(),
            company: "Acme".to_string(),
            website: String::new(),
            project_type: String::new(),
            description: String::new(),
            created_at: created_at.to_string(),
            client_ip: None,
            client_timezone: None,
            client_user_agent: None,
        }
    }

    #[test]
    fn insert_then_get_returns_pending_record() {
        let store = ClientStore::new_in_memory().unwrap();
        let inserted = store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap();
        assert!(inserted);

        let record = store.get("abc123").unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Pending);
        assert_eq!(record.full_name, "Jane Doe");
        assert!(record.verified_at.is_none());
        assert!(record.vendor_session_id.is_none());
    }

    #[test]
    fn duplicate_insert_is_noop_not_error() {
        let store = ClientStore::new_in_memory().unwrap();
        assert!(store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap());

        // Second insert with the same correlation id but different details
        // must neither error nor overwrite.
        let mut again = sample_client("abc123", "2026-02-01T00:00:00.000Z");
        again.full_name = "Someone Else".to_string();
        assert!(!store.upsert_if_absent(&again).unwrap());

        let all = store.query(&RecordFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].full_name, "Jane Doe");
    }

    #[test]
    fn attach_session_sets_vendor_session_id() {
        let store = ClientStore::new_in_memory().unwrap();
        store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap();

        assert!(store.attach_session("abc123", "sess-1").unwrap());
        assert_eq!(
            store.get("abc123").unwrap().unwrap().vendor_session_id.as_deref(),
            Some("sess-1")
        );

        // A repeated session creation overwrites with the newer id.
        assert!(store.attach_session("abc123", "sess-2").unwrap());
        assert_eq!(
            store.get("abc123").unwrap().unwrap().vendor_session_id.as_deref(),
            Some("sess-2")
        );
    }

    #[test]
    fn attach_session_for_unknown_id_is_noop() {
        let store = ClientStore::new_in_memory().unwrap();
        assert!(!store.attach_session("unknown999", "sess-1").unwrap());
    }

    #[test]
    fn mark_verified_flips_status_and_stamps_time() {
        let store = ClientStore::new_in_memory().unwrap();
        store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap();

        assert!(store
            .mark_verified("abc123", "2026-01-02T09:30:00.000Z")
            .unwrap());
        let record = store.get("abc123").unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Verified);
        assert_eq!(record.verified_at.as_deref(), Some("2026-01-02T09:30:00.000Z"));
    }

    #[test]
    fn repeated_approved_callback_does_not_rewrite_verified_at() {
        let store = ClientStore::new_in_memory().unwrap();
        store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap();

        assert!(store
            .mark_verified("abc123", "2026-01-02T09:30:00.000Z")
            .unwrap());
        // At-least-once webhook delivery: a redelivered approval a day later
        // must leave the original stamp in place.
        assert!(!store
            .mark_verified("abc123", "2026-01-03T09:30:00.000Z")
            .unwrap());

        let record = store.get("abc123").unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Verified);
        assert_eq!(record.verified_at.as_deref(), Some("2026-01-02T09:30:00.000Z"));
    }

    #[test]
    fn mark_verified_for_unknown_id_mutates_nothing() {
        let store = ClientStore::new_in_memory().unwrap();
        store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap();

        assert!(!store
            .mark_verified("unknown999", "2026-01-02T09:30:00.000Z")
            .unwrap());
        let record = store.get("abc123").unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Pending);
        assert_eq!(store.query(&RecordFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn query_orders_newest_first() {
        let store = ClientStore::new_in_memory().unwrap();
        store
            .upsert_if_absent(&sample_client("older", "2026-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .upsert_if_absent(&sample_client("newer", "2026-03-01T00:00:00.000Z"))
            .unwrap();

        let all = store.query(&RecordFilter::default()).unwrap();
        assert_eq!(all[0].correlation_id, "newer");
        assert_eq!(all[1].correlation_id, "older");
    }

    #[test]
    fn query_filters_by_status() {
        let store = ClientStore::new_in_memory().unwrap();
        store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap();
        store
            .upsert_if_absent(&sample_client("def456", "2026-01-02T00:00:00.000Z"))
            .unwrap();
        store
            .mark_verified("abc123", "2026-01-03T00:00:00.000Z")
            .unwrap();

        let verified = store
            .query(&RecordFilter {
                status: Some(VerificationStatus::Verified),
                search: None,
            })
            .unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].correlation_id, "abc123");

        let pending = store
            .query(&RecordFilter {
                status: Some(VerificationStatus::Pending),
                search: None,
            })
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].correlation_id, "def456");
    }

    #[test]
    fn query_search_matches_email_substring_case_insensitively() {
        let store = ClientStore::new_in_memory().unwrap();
        store
            .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            .unwrap();
        let mut other = sample_client("def456", "2026-01-02T00:00:00.000Z");
        other.email = "bob@elsewhere.net".to_string();
        other.full_name = "Bob".to_string();
        other.company = "Umbrella".to_string();
        store.upsert_if_absent(&other).unwrap();

        let hits = store
            .query(&RecordFilter {
                status: None,
                search: Some("JANE@X".to_string()),
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].correlation_id, "abc123");

        // Company column is searched too.
        let hits = store
            .query(&RecordFilter {
                status: None,
                search: Some("umbrella".to_string()),
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].correlation_id, "def456");

        let none = store
            .query(&RecordFilter {
                status: None,
                search: Some("no-such-substring".to_string()),
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.db");
        {
            let store = ClientStore::new(&path).unwrap();
            store
                .upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
                .unwrap();
        }
        let store = ClientStore::new(&path).unwrap();
        assert!(store.get("abc123").unwrap().is_some());
    }

    #[tokio::test]
    async fn db_handle_runs_closures_off_thread() {
        let handle = DbHandle::new(ClientStore::new_in_memory().unwrap());
        handle
            .call(|store| {
                store.upsert_if_absent(&sample_client("abc123", "2026-01-01T00:00:00.000Z"))
            })
            .await
            .unwrap();
        let record = handle
            .call(|store| store.get("abc123"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.correlation_id, "abc123");
    }
}
