//! Rider ledger: which riders are booked onto which offer.
//!
//! Seat capacity is checked against this ledger, so it is the durable record
//! of every accepted request. Two backends: in-memory for tests and
//! throwaway daemons, SQLite for anything that must survive a restart.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use ridelink_core::{OfferId, RideError};
use rusqlite::{params, Connection};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create ledger directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger lock poisoned")]
    Poisoned,
}

impl From<LedgerError> for RideError {
    fn from(e: LedgerError) -> Self {
        RideError::Storage(e.to_string())
    }
}

pub trait RiderLedger: Send + Sync {
    /// Book `rider_id` onto `offer_id`. Booking the same pair twice is a no-op.
    fn record(&self, offer_id: OfferId, rider_id: &str) -> Result<(), LedgerError>;

    fn rider_count(&self, offer_id: OfferId) -> Result<usize, LedgerError>;

    fn riders(&self, offer_id: OfferId) -> Result<Vec<String>, LedgerError>;

    /// Forget every booking on `offer_id`. Returns how many were dropped.
    fn drop_offer(&self, offer_id: OfferId) -> Result<usize, LedgerError>;

    /// Highest offer id with a booking, if any.
    fn max_offer_id(&self) -> Result<Option<OfferId>, LedgerError>;
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryLedger {
    bookings: DashMap<OfferId, BTreeSet<String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RiderLedger for InMemoryLedger {
    fn record(&self, offer_id: OfferId, rider_id: &str) -> Result<(), LedgerError> {
        self.bookings
            .entry(offer_id)
            .or_default()
            .insert(rider_id.to_string());
        Ok(())
    }

    fn rider_count(&self, offer_id: OfferId) -> Result<usize, LedgerError> {
        Ok(self.bookings.get(&offer_id).map(|r| r.len()).unwrap_or(0))
    }

    fn riders(&self, offer_id: OfferId) -> Result<Vec<String>, LedgerError> {
        Ok(self
            .bookings
            .get(&offer_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn drop_offer(&self, offer_id: OfferId) -> Result<usize, LedgerError> {
        Ok(self
            .bookings
            .remove(&offer_id)
            .map(|(_, r)| r.len())
            .unwrap_or(0))
    }

    fn max_offer_id(&self) -> Result<Option<OfferId>, LedgerError> {
        Ok(self.bookings.iter().map(|e| *e.key()).max())
    }
}

// ── SQLite ────────────────────────────────────────────────────────────────────

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS Rider (
        userID TEXT    NOT NULL,
        rideID INTEGER NOT NULL,
        PRIMARY KEY (userID, rideID)
    );
    CREATE INDEX IF NOT EXISTS rider_by_ride ON Rider (rideID);
";

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(f(&conn)?)
    }
}

impl RiderLedger for SqliteLedger {
    fn record(&self, offer_id: OfferId, rider_id: &str) -> Result<(), LedgerError> {
        self.with_conn(|c| {
            c.execute(
                "INSERT OR IGNORE INTO Rider (userID, rideID) VALUES (?1, ?2)",
                params![rider_id, offer_id as i64],
            )
            .map(|_| ())
        })
    }

    fn rider_count(&self, offer_id: OfferId) -> Result<usize, LedgerError> {
        self.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*) FROM Rider WHERE rideID = ?1",
                params![offer_id as i64],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
        })
    }

    fn riders(&self, offer_id: OfferId) -> Result<Vec<String>, LedgerError> {
        self.with_conn(|c| {
            let mut stmt =
                c.prepare("SELECT userID FROM Rider WHERE rideID = ?1 ORDER BY userID")?;
            let rows = stmt.query_map(params![offer_id as i64], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    fn drop_offer(&self, offer_id: OfferId) -> Result<usize, LedgerError> {
        self.with_conn(|c| c.execute("DELETE FROM Rider WHERE rideID = ?1", params![offer_id as i64]))
    }

    fn max_offer_id(&self) -> Result<Option<OfferId>, LedgerError> {
        self.with_conn(|c| {
            c.query_row("SELECT MAX(rideID) FROM Rider", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .map(|max| max.map(|id| id as OfferId))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(ledger: &dyn RiderLedger) {
        assert_eq!(ledger.rider_count(1).unwrap(), 0);
        assert_eq!(ledger.max_offer_id().unwrap(), None);

        ledger.record(1, "r1").unwrap();
        ledger.record(1, "r2").unwrap();
        ledger.record(1, "r1").unwrap();
        ledger.record(3, "r1").unwrap();

        assert_eq!(ledger.rider_count(1).unwrap(), 2);
        assert_eq!(ledger.riders(1).unwrap(), vec!["r1", "r2"]);
        assert_eq!(ledger.max_offer_id().unwrap(), Some(3));

        assert_eq!(ledger.drop_offer(1).unwrap(), 2);
        assert_eq!(ledger.rider_count(1).unwrap(), 0);
        assert_eq!(ledger.rider_count(3).unwrap(), 1);
    }

    #[test]
    fn in_memory_ledger() {
        exercise(&InMemoryLedger::new());
    }

    #[test]
    fn sqlite_ledger() {
        exercise(&SqliteLedger::open_in_memory().unwrap());
    }

    #[test]
    fn sqlite_ledger_survives_reopen() {
        let path = std::env::temp_dir().join(format!("ridelink-ledger-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.record(7, "r1").unwrap();
        }
        let ledger = SqliteLedger::open(&path).unwrap();
        assert_eq!(ledger.riders(7).unwrap(), vec!["r1"]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unusable_directory_is_reported() {
        let blocker = std::env::temp_dir().join(format!("ridelink-blocker-{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = SqliteLedger::open(&blocker.join("nested").join("ledger.db"))
            .err()
            .unwrap();
        assert!(matches!(err, LedgerError::CreateDir { .. }), "{err}");
        let _ = std::fs::remove_file(&blocker);
    }
}
