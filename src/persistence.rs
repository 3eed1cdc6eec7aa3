//! Database persistence layer for fedchain

use crate::directory_block::{DirectoryBlock, EntryBlock};
use crate::error::ChainError;
use crate::primitives::Hash;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Abstraction for persistence backends: recorded directory blocks, the
/// signatures that finalized them, the admin and commit messages they
/// carry, entry blocks and pending commits.
///
/// Values are stored in their binary encoding; callers decode them.
pub trait Database: Send + Sync {
    fn put_dblock(&self, block: &DirectoryBlock) -> Result<(), ChainError>;
    fn get_dblock(&self, height: u32) -> Result<Option<DirectoryBlock>, ChainError>;
    /// All recorded blocks in height order.
    fn load_dblocks(&self) -> Result<Vec<DirectoryBlock>, ChainError>;
    fn put_dblock_signatures(&self, height: u32, sigs: &[Vec<u8>]) -> Result<(), ChainError>;
    fn get_dblock_signatures(&self, height: u32) -> Result<Vec<Vec<u8>>, ChainError>;
    /// Admin and commit messages of a height, in the order they were processed.
    fn put_dblock_payload(&self, height: u32, msgs: &[Vec<u8>]) -> Result<(), ChainError>;
    fn get_dblock_payload(&self, height: u32) -> Result<Vec<Vec<u8>>, ChainError>;
    fn put_eblock(&self, height: u32, eblock: &EntryBlock) -> Result<(), ChainError>;
    fn get_eblock(&self, height: u32, key_mr: &Hash) -> Result<Option<EntryBlock>, ChainError>;
    fn put_commit(&self, entry_hash: &Hash, commit: &[u8]) -> Result<(), ChainError>;
    fn get_commit(&self, entry_hash: &Hash) -> Result<Option<Vec<u8>>, ChainError>;
}

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dblocks (
                height INTEGER PRIMARY KEY,
                key_mr BLOB NOT NULL,
                data BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create dblocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dblock_sigs (
                height INTEGER NOT NULL,
                idx INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (height, idx)
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create dblock_sigs table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dblock_payload (
                height INTEGER NOT NULL,
                idx INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (height, idx)
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create dblock_payload table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS eblocks (
                height INTEGER NOT NULL,
                key_mr BLOB NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (height, key_mr)
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create eblocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS commits (
                entry_hash BLOB PRIMARY KEY,
                data BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create commits table: {}", e)))?;

        Ok(SqliteDatabase { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    /// Replaces the ordered rows kept for `height` in `table` atomically.
    fn replace_rows(&self, table: &str, height: u32, rows: &[Vec<u8>]) -> Result<(), ChainError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;
        tx.execute(
            &format!("DELETE FROM {} WHERE height = ?1", table),
            params![height as i64],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to clear {}: {}", table, e)))?;
        for (idx, row) in rows.iter().enumerate() {
            tx.execute(
                &format!("INSERT INTO {} (height, idx, data) VALUES (?1, ?2, ?3)", table),
                params![height as i64, idx as i64, row],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save {} row: {}", table, e)))?;
        }
        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    fn load_rows(&self, table: &str, height: u32) -> Result<Vec<Vec<u8>>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT data FROM {} WHERE height = ?1 ORDER BY idx ASC", table))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![height as i64], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query {}: {}", table, e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?,
            );
        }
        Ok(out)
    }
}

impl Database for SqliteDatabase {
    fn put_dblock(&self, block: &DirectoryBlock) -> Result<(), ChainError> {
        let data = block.marshal_binary()?;
        let key_mr = block.key_mr()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO dblocks (height, key_mr, data) VALUES (?1, ?2, ?3)",
            params![block.db_height() as i64, key_mr.as_bytes().to_vec(), data],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save dblock: {}", e)))?;
        Ok(())
    }

    fn get_dblock(&self, height: u32) -> Result<Option<DirectoryBlock>, ChainError> {
        let conn = self.lock()?;
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM dblocks WHERE height = ?1",
                params![height as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to load dblock: {}", e)))?;
        data.map(|d| DirectoryBlock::unmarshal_binary(&d)).transpose()
    }

    fn load_dblocks(&self) -> Result<Vec<DirectoryBlock>, ChainError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM dblocks ORDER BY height ASC")
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query dblocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            let data = row
                .map_err(|e| ChainError::DatabaseError(format!("Failed to read row: {}", e)))?;
            blocks.push(DirectoryBlock::unmarshal_binary(&data)?);
        }
        Ok(blocks)
    }

    fn put_dblock_signatures(&self, height: u32, sigs: &[Vec<u8>]) -> Result<(), ChainError> {
        self.replace_rows("dblock_sigs", height, sigs)
    }

    fn get_dblock_signatures(&self, height: u32) -> Result<Vec<Vec<u8>>, ChainError> {
        self.load_rows("dblock_sigs", height)
    }

    fn put_dblock_payload(&self, height: u32, msgs: &[Vec<u8>]) -> Result<(), ChainError> {
        self.replace_rows("dblock_payload", height, msgs)
    }

    fn get_dblock_payload(&self, height: u32) -> Result<Vec<Vec<u8>>, ChainError> {
        self.load_rows("dblock_payload", height)
    }

    fn put_eblock(&self, height: u32, eblock: &EntryBlock) -> Result<(), ChainError> {
        let data = eblock.marshal_binary()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO eblocks (height, key_mr, data) VALUES (?1, ?2, ?3)",
            params![height as i64, eblock.key_mr().as_bytes().to_vec(), data],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save eblock: {}", e)))?;
        Ok(())
    }

    fn get_eblock(&self, height: u32, key_mr: &Hash) -> Result<Option<EntryBlock>, ChainError> {
        let conn = self.lock()?;
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM eblocks WHERE height = ?1 AND key_mr = ?2",
                params![height as i64, key_mr.as_bytes().to_vec()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to load eblock: {}", e)))?;
        data.map(|d| EntryBlock::unmarshal_binary_data(&d).map(|(eb, _)| eb))
            .transpose()
    }

    fn put_commit(&self, entry_hash: &Hash, commit: &[u8]) -> Result<(), ChainError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO commits (entry_hash, data) VALUES (?1, ?2)",
            params![entry_hash.as_bytes().to_vec(), commit],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save commit: {}", e)))?;
        Ok(())
    }

    fn get_commit(&self, entry_hash: &Hash) -> Result<Option<Vec<u8>>, ChainError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT data FROM commits WHERE entry_hash = ?1",
            params![entry_hash.as_bytes().to_vec()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to load commit: {}", e)))
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    dblocks: Arc<Mutex<BTreeMap<u32, DirectoryBlock>>>,
    sigs: Arc<Mutex<HashMap<u32, Vec<Vec<u8>>>>>,
    payloads: Arc<Mutex<HashMap<u32, Vec<Vec<u8>>>>>,
    eblocks: Arc<Mutex<HashMap<(u32, Hash), EntryBlock>>>,
    commits: Arc<Mutex<HashMap<Hash, Vec<u8>>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::DatabaseError("Mutex poisoned".to_string())
}

impl Database for InMemoryDatabase {
    fn put_dblock(&self, block: &DirectoryBlock) -> Result<(), ChainError> {
        self.dblocks
            .lock()
            .map_err(poisoned)?
            .insert(block.db_height(), block.clone());
        Ok(())
    }

    fn get_dblock(&self, height: u32) -> Result<Option<DirectoryBlock>, ChainError> {
        Ok(self.dblocks.lock().map_err(poisoned)?.get(&height).cloned())
    }

    fn load_dblocks(&self) -> Result<Vec<DirectoryBlock>, ChainError> {
        Ok(self.dblocks.lock().map_err(poisoned)?.values().cloned().collect())
    }

    fn put_dblock_signatures(&self, height: u32, sigs: &[Vec<u8>]) -> Result<(), ChainError> {
        self.sigs.lock().map_err(poisoned)?.insert(height, sigs.to_vec());
        Ok(())
    }

    fn get_dblock_signatures(&self, height: u32) -> Result<Vec<Vec<u8>>, ChainError> {
        Ok(self
            .sigs
            .lock()
            .map_err(poisoned)?
            .get(&height)
            .cloned()
            .unwrap_or_default())
    }

    fn put_dblock_payload(&self, height: u32, msgs: &[Vec<u8>]) -> Result<(), ChainError> {
        self.payloads.lock().map_err(poisoned)?.insert(height, msgs.to_vec());
        Ok(())
    }

    fn get_dblock_payload(&self, height: u32) -> Result<Vec<Vec<u8>>, ChainError> {
        Ok(self
            .payloads
            .lock()
            .map_err(poisoned)?
            .get(&height)
            .cloned()
            .unwrap_or_default())
    }

    fn put_eblock(&self, height: u32, eblock: &EntryBlock) -> Result<(), ChainError> {
        self.eblocks
            .lock()
            .map_err(poisoned)?
            .insert((height, eblock.key_mr()), eblock.clone());
        Ok(())
    }

    fn get_eblock(&self, height: u32, key_mr: &Hash) -> Result<Option<EntryBlock>, ChainError> {
        Ok(self.eblocks.lock().map_err(poisoned)?.get(&(height, *key_mr)).cloned())
    }

    fn put_commit(&self, entry_hash: &Hash, commit: &[u8]) -> Result<(), ChainError> {
        self.commits
            .lock()
            .map_err(poisoned)?
            .insert(*entry_hash, commit.to_vec());
        Ok(())
    }

    fn get_commit(&self, entry_hash: &Hash) -> Result<Option<Vec<u8>>, ChainError> {
        Ok(self.commits.lock().map_err(poisoned)?.get(entry_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_block::{DBEntry, DBlockHeader, EC_CHAIN_ID};
    use tempfile::tempdir;

    fn block(height: u32) -> DirectoryBlock {
        let mut header = DBlockHeader::new();
        header.set_db_height(height);
        DirectoryBlock::new(header, vec![DBEntry::new(EC_CHAIN_ID, Hash::sha256(&[height as u8]))]).unwrap()
    }

    fn exercise(db: &dyn Database) {
        assert!(db.get_dblock(0).unwrap().is_none());
        db.put_dblock(&block(1)).unwrap();
        db.put_dblock(&block(0)).unwrap();
        assert!(db.get_dblock(1).unwrap().unwrap().is_same_as(&block(1)));
        let heights: Vec<u32> = db.load_dblocks().unwrap().iter().map(|b| b.db_height()).collect();
        assert_eq!(heights, vec![0, 1]);

        db.put_dblock_signatures(1, &[vec![1, 2], vec![3]]).unwrap();
        db.put_dblock_signatures(1, &[vec![9]]).unwrap();
        assert_eq!(db.get_dblock_signatures(1).unwrap(), vec![vec![9]]);
        assert!(db.get_dblock_signatures(5).unwrap().is_empty());

        db.put_dblock_payload(1, &[vec![7], vec![8, 8]]).unwrap();
        assert_eq!(db.get_dblock_payload(1).unwrap(), vec![vec![7], vec![8, 8]]);
        assert!(db.get_dblock_payload(0).unwrap().is_empty());
        assert_eq!(db.get_dblock_signatures(1).unwrap(), vec![vec![9]]);

        let mut eb = EntryBlock::new(Hash::sha256(b"chain"), 1);
        eb.add_entry(Hash::sha256(b"entry"));
        db.put_eblock(1, &eb).unwrap();
        assert_eq!(db.get_eblock(1, &eb.key_mr()).unwrap(), Some(eb.clone()));
        assert!(db.get_eblock(2, &eb.key_mr()).unwrap().is_none());

        let entry = Hash::sha256(b"entry");
        db.put_commit(&entry, &[5, 5]).unwrap();
        assert_eq!(db.get_commit(&entry).unwrap(), Some(vec![5, 5]));
    }

    #[test]
    fn test_in_memory() {
        exercise(&InMemoryDatabase::new());
    }

    #[test]
    fn test_sqlite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fedchain.db");
        exercise(&SqliteDatabase::open(path.to_str().unwrap()).unwrap());
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fedchain.db");
        let path = path.to_str().unwrap();
        SqliteDatabase::open(path).unwrap().put_dblock(&block(0)).unwrap();
        let reopened = SqliteDatabase::open(path).unwrap();
        assert_eq!(reopened.load_dblocks().unwrap().len(), 1);
    }
}
