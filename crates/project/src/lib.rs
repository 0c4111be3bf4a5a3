use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

mod models;
pub use models::*;

mod store;
pub use store::{EntityStore, Result, SnapshotStore, StoreError};

mod sqlite;
pub use sqlite::SqliteStore;

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("collab_studio")
}

/// Connections kept open against an on-disk database
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[(&str, &str)] = &[
    ("V0001__init", include_str!("../migrations/V0001__init.sql")),
    (
        "V0002__collaborators",
        include_str!("../migrations/V0002__collaborators.sql"),
    ),
];

/// SQLite-backed entity and snapshot store.
///
/// Each call checks a connection out of a pool and hands out a short-lived
/// `SqliteStore` view over it. On disk the database runs in WAL mode, so
/// readers never wait for a writer and only overlapping write transactions
/// queue on SQLite's own lock.
pub struct ProjectDb {
    pool: Pool<SqliteConnectionManager>,
    path: Option<PathBuf>,
}

impl ProjectDb {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size(path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        // journal mode is stored in the file, so it is set once up front
        {
            let mut conn = Connection::open(path)?;
            configure_connection(&mut conn)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            apply_migrations(&conn)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)?;
        info!(
            "Opened project database at {} ({} connections)",
            path.display(),
            pool.max_size()
        );
        Ok(Self {
            pool,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        // every in-memory connection is a separate database
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        apply_migrations(&*pool.get()?)?;
        debug!("Opened in-memory project database");
        Ok(Self { pool, path: None })
    }

    /// `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runs `f` against the store outside of an explicit transaction
    pub fn with_store<T, E>(
        &self,
        f: impl FnOnce(&SqliteStore<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.pool.get().map_err(StoreError::from)?;
        f(&SqliteStore::new(&conn))
    }

    /// Runs `f` inside one transaction: committed on `Ok`, rolled back on `Err`.
    ///
    /// The write lock is taken when the transaction begins, so a transaction
    /// never fails halfway through on a lock upgrade.
    pub fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&SqliteStore<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.pool.get().map_err(StoreError::from)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let out = f(&SqliteStore::new(&tx))?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    sqlite::register_functions(conn)
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT OR IGNORE INTO migrations(name, applied_at) VALUES(?1, strftime('%s','now'))",
            params![name],
        )?;
    }
    Ok(())
}
