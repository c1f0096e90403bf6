//! SQLite-backed record store.
//!
//! The database is accessed through SeaORM over a single-connection pool. Connection-level pragmas are part of the
//! connect options, so a connection the pool opens later gets them too. A storage quota can be emulated with
//! `max_page_count`: once the file would have to grow past it SQLite answers with `SQLITE_FULL`, which surfaces as
//! [`StoreError::QuotaExceeded`].
pub mod migrations;
pub mod record;

use async_trait::async_trait;
use fieldx::fxstruct;
use sea_orm::sea_query::OnConflict;
use sea_orm::ConnectOptions;
use sea_orm::ConnectionTrait;
use sea_orm::sqlx::sqlite::SqliteJournalMode;
use sea_orm::sqlx::sqlite::SqliteSynchronous;
use sea_orm::DatabaseConnection;
use sea_orm::DatabaseTransaction;
use sea_orm::EntityTrait;
use sea_orm::QueryOrder;
use sea_orm::TransactionTrait;
use sea_orm_migration::MigratorTrait;
use std::path::Path;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::error::Result;
use crate::error::StoreError;
use crate::traits::RecordStore;
use crate::types::StorageRecord;

use migrations::Migrator;

#[derive(Debug)]
#[fxstruct(sync, no_new)]
pub struct SqliteRecordStore {
    #[fieldx(get)]
    path: PathBuf,

    #[fieldx(get(copy))]
    max_page_count: Option<u32>,

    connection: Mutex<Option<DatabaseConnection>>,
}

impl SqliteRecordStore {
    /// The database file is created on first [`open()`](RecordStore::open).
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path:           path.as_ref().to_path_buf(),
            max_page_count: None,
            connection:     Mutex::new(None),
        }
    }

    pub fn with_max_page_count<P: AsRef<Path>>(path: P, max_page_count: u32) -> Self {
        Self {
            path:           path.as_ref().to_path_buf(),
            max_page_count: Some(max_page_count),
            connection:     Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<DatabaseConnection> {
        let url = format!("sqlite://{}?mode=rwc", self.path.display());
        let mut options = ConnectOptions::new(url);
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false)
            // The pool may replace its connection at any time; these must hold for every one of them.
            .map_sqlx_sqlite_opts(|opts| {
                opts.journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
            });

        let db = sea_orm::Database::connect(options)
            .await
            .inspect_err(|e| warn!("Error connecting to SQLite database {}: {e}", self.path.display()))?;

        Migrator::up(&db, None).await?;

        debug!("SQLite record store ready at {}", self.path.display());
        Ok(db)
    }

    // Return a handle to the open database, connecting first if necessary.
    async fn db(&self) -> Result<DatabaseConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(db) = guard.as_ref() {
            return Ok(db.clone());
        }
        let db = self.connect().await?;
        *guard = Some(db.clone());
        Ok(db)
    }

    fn database_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.path.clone()];
        for suffix in ["-wal", "-shm"] {
            let mut name = self.path.clone().into_os_string();
            name.push(suffix);
            files.push(PathBuf::from(name));
        }
        files
    }

    // Writes run in a transaction so the page limit set here applies to the very connection doing the write. It
    // can't be a connect-time pragma: SQLite raises a limit below the current file size up to that size, which for a
    // fresh file leaves no room for the schema.
    async fn begin_write(&self, db: &DatabaseConnection) -> Result<DatabaseTransaction> {
        let transaction = db.begin().await?;
        if let Some(pages) = self.max_page_count {
            transaction
                .execute_unprepared(&format!("PRAGMA max_page_count={pages};"))
                .await?;
        }
        Ok(transaction)
    }

    fn upsert() -> OnConflict {
        OnConflict::column(record::Column::Key)
            .update_columns([record::Column::Value, record::Column::UpdatedAt])
            .to_owned()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn open(&self) -> Result<()> {
        self.db().await.map(|_| ())
    }

    #[instrument(level = "trace", skip(self))]
    async fn get_all(&self) -> Result<Vec<StorageRecord>> {
        let db = self.db().await?;
        Ok(record::Entity::find()
            .order_by_asc(record::Column::Key)
            .all(&db)
            .await?
            .into_iter()
            .map(StorageRecord::from)
            .collect())
    }

    #[instrument(level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<StorageRecord>> {
        let db = self.db().await?;
        Ok(record::Entity::find_by_id(key.to_string())
            .one(&db)
            .await?
            .map(StorageRecord::from))
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn put(&self, key: &str, value: &str, updated_at: i64) -> Result<()> {
        let db = self.db().await?;
        let transaction = self.begin_write(&db).await?;
        let model: record::ActiveModel = StorageRecord::new(key, value, updated_at).into();
        record::Entity::insert(model)
            .on_conflict(Self::upsert())
            .exec_without_returning(&transaction)
            .await?;
        transaction.commit().await?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self, records), fields(count = records.len()))]
    async fn bulk_put(&self, records: Vec<StorageRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let db = self.db().await?;
        let transaction = self.begin_write(&db).await?;
        record::Entity::insert_many(records.into_iter().map(record::ActiveModel::from))
            .on_conflict(Self::upsert())
            .exec_without_returning(&transaction)
            .await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;

        if let Some(db) = guard.take() {
            // A failing connection may refuse to close cleanly; the files are going away regardless.
            if let Err(err) = db.close().await {
                warn!("Error closing SQLite database {}: {err}", self.path.display());
            }
        }

        for file in self.database_files() {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => debug!("Removed {}", file.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => return Err(StoreError::from(err)),
            }
        }

        *guard = Some(self.connect().await?);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(db) = self.connection.lock().await.take() {
            db.close().await?;
        }
        Ok(())
    }
}
