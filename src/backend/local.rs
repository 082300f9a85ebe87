//! Embedded relational backend: a single mutex-guarded SQLite connection.
//!
//! Schema is managed by a monotone version counter persisted via
//! `PRAGMA user_version`; migrations are an ordered list of DDL batches
//! applied in sequence, exactly as the reference SQLite driver does it.
//! Every write commits immediately after its own statement - the unit of
//! atomicity is one operation, except finalization, where the validating
//! read and the `finalized` flip happen inside one transaction.

use crate::backend::{HealthStatus, MetadataBackend, Page, VaultStatistics};
use crate::error::{DeuceError, Result};
use crate::ids::{format_unix_seconds, BlockId, FileId, ProjectId, StorageId, VaultId};
use crate::pagination::{effective_fetch_count, paginate};
use crate::validator::{self, AssignedBlock, FinalizeCheck};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordered DDL batches applied to bring a fresh or older database up to the
/// current schema version. Index `n` is applied to migrate from version `n`
/// to `n + 1`.
const SCHEMAS: &[&str] = &[
    r#"
    CREATE TABLE vaults (
        project_id TEXT NOT NULL,
        vault_id TEXT NOT NULL,
        PRIMARY KEY (project_id, vault_id)
    );
    CREATE TABLE files (
        project_id TEXT NOT NULL,
        vault_id TEXT NOT NULL,
        file_id TEXT NOT NULL,
        finalized INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (project_id, vault_id, file_id)
    );
    CREATE TABLE blocks (
        project_id TEXT NOT NULL,
        vault_id TEXT NOT NULL,
        block_id TEXT NOT NULL,
        storage_id TEXT NOT NULL,
        size INTEGER NOT NULL,
        mtime INTEGER NOT NULL,
        PRIMARY KEY (project_id, vault_id, block_id)
    );
    CREATE UNIQUE INDEX blocks_storage_id_idx ON blocks (project_id, vault_id, storage_id);
    CREATE TABLE fileblocks (
        project_id TEXT NOT NULL,
        vault_id TEXT NOT NULL,
        file_id TEXT NOT NULL,
        block_id TEXT NOT NULL,
        offset INTEGER NOT NULL,
        mtime INTEGER NOT NULL,
        PRIMARY KEY (project_id, vault_id, file_id, offset)
    );
    CREATE INDEX fileblocks_block_idx ON fileblocks (project_id, vault_id, block_id);
    "#,
];

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// The local transactional backend.
pub struct LocalBackend {
    conn: Mutex<Connection>,
    max_return_num: u32,
}

impl LocalBackend {
    /// Opens (creating if absent) the database at `path` and migrates its
    /// schema to the latest version.
    pub fn open(path: impl AsRef<Path>, max_return_num: u32) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, max_return_num)
    }

    /// Opens an in-memory database. Useful for tests.
    pub fn open_in_memory(max_return_num: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, max_return_num)
    }

    fn from_connection(conn: Connection, max_return_num: u32) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_return_num,
        })
    }

    fn effective_limit(&self, limit: Option<u32>) -> u32 {
        match limit {
            Some(l) => l.min(self.max_return_num),
            None => self.max_return_num,
        }
    }
}

fn get_user_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn set_user_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

fn migrate(conn: &Connection) -> Result<()> {
    let mut version = get_user_version(conn)? as usize;
    while version < SCHEMAS.len() {
        conn.execute_batch(SCHEMAS[version])?;
        version += 1;
        set_user_version(conn, version as u32)?;
        log::info!(
            "migrated local backend schema to version {} at {}",
            version,
            format_unix_seconds(now_unix())
        );
    }
    Ok(())
}

#[async_trait]
impl MetadataBackend for LocalBackend {
    async fn list_vaults(
        &self,
        project_id: &ProjectId,
        marker: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<VaultId>> {
        let limit = self.effective_limit(limit);
        let fetch = effective_fetch_count(Some(limit), limit);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT vault_id FROM vaults WHERE project_id = ?1 AND vault_id > ?2 ORDER BY vault_id LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![project_id.as_str(), marker.unwrap_or(""), fetch], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let (page, next_marker) = paginate(rows, limit, |s| s.clone());
        Ok((page.into_iter().map(VaultId::from).collect(), next_marker))
    }

    async fn create_vault(&self, project_id: &ProjectId, vault_id: &VaultId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO vaults (project_id, vault_id) VALUES (?1, ?2)",
            params![project_id.as_str(), vault_id.as_str()],
        )?;
        Ok(())
    }

    async fn delete_vault(&self, project_id: &ProjectId, vault_id: &VaultId) -> Result<()> {
        let conn = self.conn.lock();
        let file_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE project_id = ?1 AND vault_id = ?2",
            params![project_id.as_str(), vault_id.as_str()],
            |row| row.get(0),
        )?;
        let block_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocks WHERE project_id = ?1 AND vault_id = ?2",
            params![project_id.as_str(), vault_id.as_str()],
            |row| row.get(0),
        )?;
        if file_count > 0 || block_count > 0 {
            return Err(DeuceError::Constraint(format!(
                "vault {vault_id} is not empty: {file_count} files, {block_count} blocks"
            )));
        }
        conn.execute(
            "DELETE FROM vaults WHERE project_id = ?1 AND vault_id = ?2",
            params![project_id.as_str(), vault_id.as_str()],
        )?;
        Ok(())
    }

    async fn vault_statistics(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
    ) -> Result<VaultStatistics> {
        let conn = self.conn.lock();
        let file_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE project_id = ?1 AND vault_id = ?2",
            params![project_id.as_str(), vault_id.as_str()],
            |row| row.get(0),
        )?;
        let block_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blocks WHERE project_id = ?1 AND vault_id = ?2",
            params![project_id.as_str(), vault_id.as_str()],
            |row| row.get(0),
        )?;
        let total_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM blocks WHERE project_id = ?1 AND vault_id = ?2",
            params![project_id.as_str(), vault_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(VaultStatistics {
            file_count: file_count as u64,
            block_count: block_count as u64,
            total_size: total_size as u64,
        })
    }

    async fn create_file(&self, project_id: &ProjectId, vault_id: &VaultId) -> Result<FileId> {
        let file_id = FileId::new();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (project_id, vault_id, file_id, finalized) VALUES (?1, ?2, ?3, 0)",
            params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
        )?;
        Ok(file_id)
    }

    async fn has_file(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM files WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn is_finalized(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let finalized: i64 = conn
            .query_row(
                "SELECT finalized FROM files WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|_| DeuceError::FileNotFound {
                vault_id: vault_id.to_string(),
                file_id: file_id.to_string(),
            })?;
        Ok(finalized != 0)
    }

    async fn file_length(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<u64> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(b.size), 0) FROM fileblocks fb
             JOIN blocks b ON b.project_id = fb.project_id AND b.vault_id = fb.vault_id AND b.block_id = fb.block_id
             WHERE fb.project_id = ?1 AND fb.vault_id = ?2 AND fb.file_id = ?3",
            params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    async fn delete_file(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_unix();
        {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT block_id FROM fileblocks WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
            )?;
            let touched: Vec<String> = stmt
                .query_map(params![project_id.as_str(), vault_id.as_str(), file_id.as_str()], |row| {
                    row.get(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            tx.execute(
                "DELETE FROM fileblocks WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
            )?;
            for block_id in touched {
                tx.execute(
                    "UPDATE blocks SET mtime = ?1 WHERE project_id = ?2 AND vault_id = ?3 AND block_id = ?4",
                    params![now, project_id.as_str(), vault_id.as_str(), block_id],
                )?;
            }
        }
        tx.execute(
            "DELETE FROM files WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
            params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn list_files(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        marker: Option<&str>,
        limit: Option<u32>,
        finalized: bool,
    ) -> Result<Page<FileId>> {
        let limit = self.effective_limit(limit);
        let fetch = effective_fetch_count(Some(limit), limit);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT file_id FROM files
             WHERE project_id = ?1 AND vault_id = ?2 AND file_id > ?3 AND finalized = ?4
             ORDER BY file_id LIMIT ?5",
        )?;
        let rows = stmt
            .query_map(
                params![
                    project_id.as_str(),
                    vault_id.as_str(),
                    marker.unwrap_or(""),
                    finalized as i64,
                    fetch
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let (page, next_marker) = paginate(rows, limit, |s| s.clone());
        Ok((page.into_iter().map(FileId::from).collect(), next_marker))
    }

    async fn assign_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        block_id: &BlockId,
        offset: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let finalized: i64 = conn
            .query_row(
                "SELECT finalized FROM files WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|_| DeuceError::FileNotFound {
                vault_id: vault_id.to_string(),
                file_id: file_id.to_string(),
            })?;
        if finalized != 0 {
            return Err(DeuceError::AlreadyFinalized {
                file_id: file_id.to_string(),
            });
        }
        conn.execute(
            "INSERT OR REPLACE INTO fileblocks (project_id, vault_id, file_id, block_id, offset, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project_id.as_str(),
                vault_id.as_str(),
                file_id.as_str(),
                block_id.as_str(),
                offset,
                now_unix()
            ],
        )?;
        Ok(())
    }

    async fn finalize_file(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        file_size: Option<i64>,
    ) -> Result<FinalizeCheck> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let finalized: i64 = tx
            .query_row(
                "SELECT finalized FROM files WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|_| DeuceError::FileNotFound {
                vault_id: vault_id.to_string(),
                file_id: file_id.to_string(),
            })?;
        if finalized != 0 {
            return Ok(FinalizeCheck::Ok);
        }

        let unregistered: i64 = tx.query_row(
            "SELECT COUNT(*) FROM fileblocks fb
             WHERE fb.project_id = ?1 AND fb.vault_id = ?2 AND fb.file_id = ?3
             AND NOT EXISTS (
                 SELECT 1 FROM blocks b
                 WHERE b.project_id = fb.project_id AND b.vault_id = fb.vault_id AND b.block_id = fb.block_id
             )",
            params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
            |row| row.get(0),
        )?;
        if unregistered > 0 {
            return Err(DeuceError::Constraint(format!(
                "file {file_id} references {unregistered} unregistered block(s)"
            )));
        }

        let rows: Vec<AssignedBlock> = {
            let mut stmt = tx.prepare(
                "SELECT fb.block_id, fb.offset, b.size FROM fileblocks fb
                 JOIN blocks b ON b.project_id = fb.project_id AND b.vault_id = fb.vault_id AND b.block_id = fb.block_id
                 WHERE fb.project_id = ?1 AND fb.vault_id = ?2 AND fb.file_id = ?3
                 ORDER BY fb.offset ASC",
            )?;
            stmt.query_map(params![project_id.as_str(), vault_id.as_str(), file_id.as_str()], |row| {
                let block_id: String = row.get(0)?;
                let offset: i64 = row.get(1)?;
                let size: i64 = row.get(2)?;
                Ok(AssignedBlock::new(BlockId::from(block_id), offset, size))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let check = validator::validate(&rows, file_size);
        if check.is_ok() {
            tx.execute(
                "UPDATE files SET finalized = 1 WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), file_id.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(check)
    }

    async fn list_file_blocks(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        file_id: &FileId,
        offset_marker: Option<i64>,
        limit: Option<u32>,
    ) -> Result<(Vec<(BlockId, i64)>, Option<i64>)> {
        let limit = self.effective_limit(limit);
        let fetch = effective_fetch_count(Some(limit), limit);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT block_id, offset FROM fileblocks
             WHERE project_id = ?1 AND vault_id = ?2 AND file_id = ?3 AND offset >= ?4
             ORDER BY offset ASC LIMIT ?5",
        )?;
        let rows = stmt
            .query_map(
                params![
                    project_id.as_str(),
                    vault_id.as_str(),
                    file_id.as_str(),
                    offset_marker.unwrap_or(0),
                    fetch
                ],
                |row| {
                    let block_id: String = row.get(0)?;
                    let offset: i64 = row.get(1)?;
                    Ok((BlockId::from(block_id), offset))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let (page, next_marker) = paginate(rows, limit, |(_, offset)| *offset);
        Ok((page, next_marker))
    }

    async fn register_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
        storage_id: &StorageId,
        size: i64,
    ) -> Result<()> {
        if size < 0 {
            return Err(DeuceError::Constraint(format!("block size must be non-negative, got {size}")));
        }
        let conn = self.conn.lock();
        let existing: Option<(String, i64)> = conn
            .query_row(
                "SELECT storage_id, size FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((existing_storage_id, existing_size)) = &existing {
            if existing_storage_id != storage_id.as_str() {
                return Err(DeuceError::Constraint(format!(
                    "block {block_id} already registered under a different storage id"
                )));
            }
            if *existing_size != size {
                return Err(DeuceError::Constraint(format!(
                    "block {block_id} already registered with a different size"
                )));
            }
        }
        conn.execute(
            "INSERT OR REPLACE INTO blocks (project_id, vault_id, block_id, storage_id, size, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project_id.as_str(),
                vault_id.as_str(),
                block_id.as_str(),
                storage_id.as_str(),
                size,
                now_unix()
            ],
        )?;
        Ok(())
    }

    async fn has_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn get_block_size(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let size: Option<i64> = conn
            .query_row(
                "SELECT size FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(size)
    }

    async fn get_block_storage_id(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<StorageId>> {
        let conn = self.conn.lock();
        let storage_id: Option<String> = conn
            .query_row(
                "SELECT storage_id FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(storage_id.map(StorageId::from))
    }

    async fn get_block_metadata_id(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        storage_id: &StorageId,
    ) -> Result<Option<BlockId>> {
        let conn = self.conn.lock();
        let block_id: Option<String> = conn
            .query_row(
                "SELECT block_id FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND storage_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), storage_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block_id.map(BlockId::from))
    }

    async fn unregister_block(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let refcount: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fileblocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
            params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
            |row| row.get(0),
        )?;
        if refcount > 0 {
            return Err(DeuceError::Constraint(format!(
                "block {block_id} still has {refcount} referencing assignment(s)"
            )));
        }
        conn.execute(
            "DELETE FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
            params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
        )?;
        Ok(())
    }

    async fn list_blocks(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        marker: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<BlockId>> {
        let limit = self.effective_limit(limit);
        let fetch = effective_fetch_count(Some(limit), limit);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT block_id FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id > ?3
             ORDER BY block_id LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![project_id.as_str(), vault_id.as_str(), marker.unwrap_or(""), fetch],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let (page, next_marker) = paginate(rows, limit, |s| s.clone());
        Ok((page.into_iter().map(BlockId::from).collect(), next_marker))
    }

    async fn block_ref_count(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<u64>> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fileblocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
            params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(Some(count as u64))
    }

    async fn block_ref_modified(
        &self,
        project_id: &ProjectId,
        vault_id: &VaultId,
        block_id: &BlockId,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let own_mtime: Option<i64> = conn
            .query_row(
                "SELECT mtime FROM blocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
                params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(own_mtime) = own_mtime else {
            return Ok(None);
        };
        let max_assignment_mtime: Option<i64> = conn.query_row(
            "SELECT MAX(mtime) FROM fileblocks WHERE project_id = ?1 AND vault_id = ?2 AND block_id = ?3",
            params![project_id.as_str(), vault_id.as_str(), block_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(Some(max_assignment_mtime.unwrap_or(own_mtime)))
    }

    async fn health(&self) -> Result<HealthStatus> {
        let conn = self.conn.lock();
        match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => Ok(HealthStatus::Ok),
            Err(e) => Ok(HealthStatus::Degraded { reason: e.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LocalBackend {
        let _ = env_logger::builder().is_test(true).try_init();
        LocalBackend::open_in_memory(80).unwrap()
    }

    fn ids() -> (ProjectId, VaultId) {
        (ProjectId::from("p1"), VaultId::from("v1"))
    }

    #[tokio::test]
    async fn create_vault_is_idempotent() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        backend.create_vault(&p, &v).await.unwrap();
        let (vaults, marker) = backend.list_vaults(&p, None, None).await.unwrap();
        assert_eq!(vaults, vec![v]);
        assert_eq!(marker, None);
    }

    #[tokio::test]
    async fn delete_non_empty_vault_fails() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        backend.create_file(&p, &v).await.unwrap();
        let err = backend.delete_vault(&p, &v).await.unwrap_err();
        assert!(matches!(err, DeuceError::Constraint(_)));
    }

    #[tokio::test]
    async fn e1_empty_finalize() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let file_id = backend.create_file(&p, &v).await.unwrap();
        let check = backend.finalize_file(&p, &v, &file_id, None).await.unwrap();
        assert_eq!(check, FinalizeCheck::Ok);
        assert!(backend.is_finalized(&p, &v, &file_id).await.unwrap());
    }

    #[tokio::test]
    async fn e2_three_block_success() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let file_id = backend.create_file(&p, &v).await.unwrap();

        for (name, offset) in [("b1", 0), ("b2", 100), ("b3", 200)] {
            let block_id = BlockId::from(name);
            backend
                .register_block(&p, &v, &block_id, &StorageId::from(name), 100)
                .await
                .unwrap();
            backend.assign_block(&p, &v, &file_id, &block_id, offset).await.unwrap();
        }

        let check = backend.finalize_file(&p, &v, &file_id, Some(300)).await.unwrap();
        assert_eq!(check, FinalizeCheck::Ok);

        let (blocks, marker) = backend.list_file_blocks(&p, &v, &file_id, None, None).await.unwrap();
        assert_eq!(
            blocks,
            vec![
                (BlockId::from("b1"), 0),
                (BlockId::from("b2"), 100),
                (BlockId::from("b3"), 200),
            ]
        );
        assert_eq!(marker, None);
    }

    #[tokio::test]
    async fn e6_finalized_file_rejects_assignment() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let file_id = backend.create_file(&p, &v).await.unwrap();
        backend.finalize_file(&p, &v, &file_id, None).await.unwrap();

        let block_id = BlockId::from("b1");
        backend
            .register_block(&p, &v, &block_id, &StorageId::from("s1"), 10)
            .await
            .unwrap();
        let err = backend
            .assign_block(&p, &v, &file_id, &block_id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, DeuceError::AlreadyFinalized { .. }));
    }

    #[tokio::test]
    async fn e7_refcount_delete() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let f1 = backend.create_file(&p, &v).await.unwrap();
        let f2 = backend.create_file(&p, &v).await.unwrap();
        let b1 = BlockId::from("b1");
        backend
            .register_block(&p, &v, &b1, &StorageId::from("s1"), 10)
            .await
            .unwrap();
        backend.assign_block(&p, &v, &f1, &b1, 0).await.unwrap();
        backend.assign_block(&p, &v, &f2, &b1, 0).await.unwrap();

        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(2));
        backend.delete_file(&p, &v, &f1).await.unwrap();
        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(1));
        assert!(backend.unregister_block(&p, &v, &b1).await.is_err());
        backend.delete_file(&p, &v, &f2).await.unwrap();
        assert_eq!(backend.block_ref_count(&p, &v, &b1).await.unwrap(), Some(0));
        backend.unregister_block(&p, &v, &b1).await.unwrap();
    }

    #[tokio::test]
    async fn register_block_rejects_storage_id_change() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let block_id = BlockId::from("b1");
        backend
            .register_block(&p, &v, &block_id, &StorageId::from("s1"), 10)
            .await
            .unwrap();
        let err = backend
            .register_block(&p, &v, &block_id, &StorageId::from("s2"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DeuceError::Constraint(_)));
    }

    #[tokio::test]
    async fn register_block_rejects_conflicting_size() {
        let backend = backend();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        let block_id = BlockId::from("b1");
        backend
            .register_block(&p, &v, &block_id, &StorageId::from("s1"), 10)
            .await
            .unwrap();
        let err = backend
            .register_block(&p, &v, &block_id, &StorageId::from("s1"), 20)
            .await
            .unwrap_err();
        assert!(matches!(err, DeuceError::Constraint(_)));
    }

    #[tokio::test]
    async fn unknown_block_ref_count_is_none() {
        let backend = backend();
        let (p, v) = ids();
        assert_eq!(
            backend.block_ref_count(&p, &v, &BlockId::from("missing")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn e8_pagination_across_two_pages() {
        let backend = LocalBackend::open_in_memory(80).unwrap();
        let (p, v) = ids();
        backend.create_vault(&p, &v).await.unwrap();
        for _ in 0..120 {
            backend.create_file(&p, &v).await.unwrap();
        }

        let (first_page, marker) = backend.list_files(&p, &v, None, None, false).await.unwrap();
        assert_eq!(first_page.len(), 80);
        assert!(marker.is_some());

        let (second_page, marker) = backend
            .list_files(&p, &v, marker.as_deref(), None, false)
            .await
            .unwrap();
        assert_eq!(second_page.len(), 40);
        assert_eq!(marker, None);
    }
}
