//! Audit Ledger
//!
//! `SQLite`-backed, append-only log of signing events. Each row is written in two
//! phases:
//!
//! 1. [`AuditLedger::begin_record`] inserts the row and commits before returning.
//!    The row id is the serial number of the certificate about to be signed.
//! 2. [`AuditLedger::finalize_record`] stores the DER of the signed certificate.
//!
//! A row that never reaches phase 2 is an aborted attempt and stays in the log as
//! such. Ids come from an `AUTOINCREMENT` key, so they are never reused, and the
//! connection mutex serializes id assignment between concurrent signers.

// SQLite hands back i64 for row ids; ours are always positive.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const SELECT_COLUMNS: &str =
    "SELECT id, created_at, principal, issuer_sha256, issuer_common_name, issued_certificate FROM signing_records";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("audit record not found: id={id}")]
    NotFound { id: u64 },

    /// Finalized records are immutable.
    #[error("audit record {id} is already finalized")]
    AlreadyFinalized { id: u64 },

    #[error("audit record {id} is corrupt: {reason}")]
    Corrupt { id: u64, reason: String },

    #[error("ledger connection lock poisoned")]
    Poisoned,
}

/// Who asked for a certificate. The ledger stores `Anonymous` as NULL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    User(String),
    Anonymous,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Principal::User(name.into())
    }

    fn as_column(&self) -> Option<&str> {
        match self {
            Principal::User(name) => Some(name),
            Principal::Anonymous => None,
        }
    }

    fn from_column(value: Option<String>) -> Self {
        value.map_or(Principal::Anonymous, Principal::User)
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::User(name) => f.write_str(name),
            Principal::Anonymous => f.write_str("<anonymous>"),
        }
    }
}

/// One signing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Serial number of the certificate this record covers.
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub principal: Principal,
    /// Hex SHA-256 of the issuing deployment certificate's DER.
    pub issuer_fingerprint: String,
    pub issuer_common_name: String,
    /// DER of the issued certificate; `None` until finalized.
    pub issued_certificate: Option<Vec<u8>>,
}

impl AuditRecord {
    pub fn is_finalized(&self) -> bool {
        self.issued_certificate.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total_records: u64,
    pub finalized_records: u64,
    /// Records whose signing attempt never completed.
    pub pending_records: u64,
}

pub struct AuditLedger {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl AuditLedger {
    /// Opens or creates the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory ledger for tests.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Phase one: durably create a record and hand back its freshly assigned id.
    pub fn begin_record(
        &self,
        principal: &Principal,
        issuer_fingerprint: &str,
        issuer_common_name: &str,
    ) -> Result<AuditRecord, LedgerError> {
        let created_at = Utc::now();
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO signing_records (created_at, principal, issuer_sha256, issuer_common_name)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                created_at.timestamp(),
                principal.as_column(),
                issuer_fingerprint,
                issuer_common_name,
            ],
        )?;
        let id = conn.last_insert_rowid() as u64;

        Ok(AuditRecord {
            id,
            created_at: from_unix(id, created_at.timestamp())?,
            principal: principal.clone(),
            issuer_fingerprint: issuer_fingerprint.to_string(),
            issuer_common_name: issuer_common_name.to_string(),
            issued_certificate: None,
        })
    }

    /// Phase two: attach the issued certificate. Only pending records can be finalized.
    pub fn finalize_record(&self, id: u64, der: &[u8]) -> Result<(), LedgerError> {
        let conn = self.conn()?;

        let updated = conn.execute(
            "UPDATE signing_records SET issued_certificate = ?2
             WHERE id = ?1 AND issued_certificate IS NULL",
            params![id as i64, der],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM signing_records WHERE id = ?1)",
            params![id as i64],
            |row| row.get(0),
        )?;
        if exists {
            Err(LedgerError::AlreadyFinalized { id })
        } else {
            Err(LedgerError::NotFound { id })
        }
    }

    pub fn get(&self, id: u64) -> Result<AuditRecord, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;

        let raw = stmt
            .query_row(params![id as i64], RawRecord::from_row)
            .optional()?
            .ok_or(LedgerError::NotFound { id })?;
        raw.into_record()
    }

    /// Most recent records first.
    pub fn list_recent(&self, limit: u32) -> Result<Vec<AuditRecord>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;

        let rows = stmt.query_map(params![limit], RawRecord::from_row)?;
        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.into_record()?);
        }
        Ok(records)
    }

    /// Highest id ever assigned, including ids of aborted attempts.
    pub fn last_assigned_id(&self) -> Result<Option<u64>, LedgerError> {
        let conn = self.conn()?;
        let seq: Option<i64> = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'signing_records'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq.map(|s| s as u64))
    }

    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let conn = self.conn()?;
        let (total, finalized): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(issued_certificate) FROM signing_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(LedgerStats {
            total_records: total as u64,
            finalized_records: finalized as u64,
            pending_records: (total - finalized) as u64,
        })
    }
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

struct RawRecord {
    id: i64,
    created_at: i64,
    principal: Option<String>,
    issuer_fingerprint: String,
    issuer_common_name: String,
    issued_certificate: Option<Vec<u8>>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            principal: row.get(2)?,
            issuer_fingerprint: row.get(3)?,
            issuer_common_name: row.get(4)?,
            issued_certificate: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<AuditRecord, LedgerError> {
        let id = self.id as u64;
        Ok(AuditRecord {
            id,
            created_at: from_unix(id, self.created_at)?,
            principal: Principal::from_column(self.principal),
            issuer_fingerprint: self.issuer_fingerprint,
            issuer_common_name: self.issuer_common_name,
            issued_certificate: self.issued_certificate,
        })
    }
}

fn from_unix(id: u64, secs: i64) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| LedgerError::Corrupt {
        id,
        reason: format!("created_at {} is out of range", secs),
    })
}
