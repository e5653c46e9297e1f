//! Durable contact storage
//!
//! The [`Ledger`] trait is the persistence capability the journey depends on.
//! Rows follow [`RECORD_COLUMNS`], so any backend stores the same layout.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{JourneyError, Result};
use crate::models::{Contact, RECORD_COLUMNS};

/// Contacts table name
pub const CONTACTS_TABLE: &str = "contacts";

/// Persistence capability for contact records.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read one contact; `None` if the ledger has never seen it.
    async fn read_contact(&self, id: &str) -> Result<Option<Contact>>;

    /// Insert or replace a contact.
    async fn write_contact(&self, contact: &Contact) -> Result<()>;

    /// Every readable contact, ordered by id.
    async fn list_contacts(&self) -> Result<Vec<Contact>>;
}

/// In-process ledger, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    contacts: RwLock<BTreeMap<String, Contact>>,
}

impl MemoryLedger {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn read_contact(&self, id: &str) -> Result<Option<Contact>> {
        Ok(self.contacts.read().await.get(id).cloned())
    }

    async fn write_contact(&self, contact: &Contact) -> Result<()> {
        self.contacts.write().await.insert(contact.id.clone(), contact.clone());
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.contacts.read().await.values().cloned().collect())
    }
}

/// SQLite-backed ledger, one row per contact.
#[derive(Debug)]
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened ledger database");
        Self::with_connection(conn)
    }

    /// Ledger over an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        Self::run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Create the contacts table, and append any columns an older table lacks.
    fn run_migrations(conn: &Connection) -> Result<()> {
        let columns = RECORD_COLUMNS
            .iter()
            .map(|c| if *c == "contact_id" { format!("{c} TEXT PRIMARY KEY") } else { format!("{c} TEXT NOT NULL DEFAULT ''") })
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {CONTACTS_TABLE} ({columns});"))?;

        let existing = {
            let mut stmt = conn.prepare(&format!("SELECT name FROM pragma_table_info('{CONTACTS_TABLE}')"))?;
            let names = stmt.query_map(params![], |row| row.get::<_, String>(0))?;
            names.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for column in RECORD_COLUMNS.iter().filter(|c| !existing.iter().any(|e| e == *c)) {
            debug!(column, "Adding ledger column");
            conn.execute_batch(&format!("ALTER TABLE {CONTACTS_TABLE} ADD COLUMN {column} TEXT NOT NULL DEFAULT '';"))?;
        }
        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| JourneyError::Other("ledger connection lock poisoned".to_string()))
    }

    fn select_sql() -> String {
        format!("SELECT {} FROM {CONTACTS_TABLE}", RECORD_COLUMNS.join(", "))
    }

    fn row_cells(row: &rusqlite::Row<'_>) -> rusqlite::Result<Vec<String>> {
        (0..RECORD_COLUMNS.len()).map(|i| row.get::<_, String>(i)).collect()
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn read_contact(&self, id: &str) -> Result<Option<Contact>> {
        let conn = self.connection()?;
        let cells = conn
            .query_row(&format!("{} WHERE contact_id = ?1", Self::select_sql()), params![id], Self::row_cells)
            .optional()?;
        cells.map(|cells| Contact::from_record(&cells)).transpose()
    }

    async fn write_contact(&self, contact: &Contact) -> Result<()> {
        let placeholders = (1..=RECORD_COLUMNS.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let updates = RECORD_COLUMNS
            .iter()
            .skip(1)
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {CONTACTS_TABLE} ({}) VALUES ({placeholders}) ON CONFLICT(contact_id) DO UPDATE SET {updates}",
            RECORD_COLUMNS.join(", ")
        );

        let conn = self.connection()?;
        conn.execute(&sql, params_from_iter(contact.to_record()))?;
        Ok(())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY contact_id", Self::select_sql()))?;
        let rows = stmt.query_map(params![], Self::row_cells)?;

        let mut contacts = Vec::new();
        for cells in rows {
            let cells = cells?;
            match Contact::from_record(&cells) {
                Ok(contact) => contacts.push(contact),
                Err(e) => warn!(contact_id = %cells[0], error = %e, "Skipping unreadable ledger row"),
            }
        }
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap();
        let mut contact = Contact::new("42", None, now);
        ledger.write_contact(&contact).await.unwrap();

        contact.first_name = Some("Sarah".to_string());
        ledger.write_contact(&contact).await.unwrap();

        let all = ledger.list_contacts().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].first_name.as_deref(), Some("Sarah"));
    }

    #[tokio::test]
    async fn test_unknown_contact_reads_none() {
        let ledger = MemoryLedger::new();
        assert!(ledger.read_contact("nobody").await.unwrap().is_none());
    }
}
