//! SQLite-backed scorecard used by `compile-submissions harvest`: one row
//! per source submission plus a `touched` marker table so a harvest run can
//! resume without re-scoring files it already visited. Schema per
//! SPEC_FULL.md §6.

use anyhow::Result;
use rusqlite::{params, Connection};

pub struct Scorecard {
    conn: Connection,
}

impl Scorecard {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS score (
                source TEXT PRIMARY KEY,
                outcome TEXT,
                arxivfiles TEXT,
                clsfiles TEXT,
                styfiles TEXT,
                pdf TEXT,
                pdfchecksum TEXT,
                nrpages INTEGER,
                removed_unused_files TEXT,
                status INTEGER,
                success INTEGER
            );
            CREATE TABLE IF NOT EXISTS touched (
                filename TEXT PRIMARY KEY
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn is_touched(&self, filename: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM touched WHERE filename = ?1", params![filename], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn mark_touched(&self, filename: &str) -> Result<()> {
        self.conn.execute("INSERT OR IGNORE INTO touched (filename) VALUES (?1)", params![filename])?;
        Ok(())
    }

    /// Upsert one scorecard row inside its own transaction.
    pub fn record(&self, row: &ScoreRow) -> Result<()> {
        self.conn.execute_batch("BEGIN;")?;
        let result = self.conn.execute(
            "INSERT INTO score (source, outcome, arxivfiles, clsfiles, styfiles, pdf, pdfchecksum, nrpages, removed_unused_files, status, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(source) DO UPDATE SET
                outcome = excluded.outcome,
                arxivfiles = excluded.arxivfiles,
                clsfiles = excluded.clsfiles,
                styfiles = excluded.styfiles,
                pdf = excluded.pdf,
                pdfchecksum = excluded.pdfchecksum,
                nrpages = excluded.nrpages,
                removed_unused_files = excluded.removed_unused_files,
                status = excluded.status,
                success = excluded.success",
            params![
                row.source,
                row.outcome,
                row.arxivfiles,
                row.clsfiles,
                row.styfiles,
                row.pdf,
                row.pdfchecksum,
                row.nrpages,
                row.removed_unused_files,
                row.status,
                row.success as i64,
            ],
        );
        match result {
            Ok(_) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(())
            }
            Err(e) => {
                self.conn.execute_batch("ROLLBACK;")?;
                Err(e.into())
            }
        }
    }

    /// Remove every `score` row whose `success` flag is false, used by
    /// `harvest --purge-failed` to keep the scorecard limited to
    /// submissions that actually compiled.
    pub fn purge_failed(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM score WHERE success = 0", [])?;
        Ok(removed)
    }
}

pub struct ScoreRow {
    pub source: String,
    pub outcome: String,
    pub arxivfiles: String,
    pub clsfiles: String,
    pub styfiles: String,
    pub pdf: String,
    pub pdfchecksum: String,
    pub nrpages: i64,
    pub removed_unused_files: String,
    pub status: i64,
    pub success: bool,
}
