//! App and document metadata persistence.
//!
//! [`MetaStore`] is the seam between the engine and the metadata database.
//! [`SqliteMetaStore`] maps each operation to SQL against the `apps` and
//! `files` tables created by [`run_migrations`](crate::migrate::run_migrations).
//! Timestamps are stored as Unix seconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::error::Result;
use crate::migrate::run_migrations;
use crate::models::{AppRecord, AppStatus, DocumentRecord};

/// Outcome of [`MetaStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    Missing,
    /// The app is `INDEXING` and was left in place.
    Indexing,
}

/// Metadata operations the engine needs.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, app_id: &str) -> Result<Option<AppRecord>>;

    /// Insert or fully replace an app record.
    async fn upsert(&self, app: &AppRecord) -> Result<()>;

    /// Remove an app and all of its file records unless it is `INDEXING`.
    ///
    /// The status check and the delete are one statement, so a training
    /// run that starts concurrently either blocks the removal or never
    /// sees the app.
    async fn delete(&self, app_id: &str) -> Result<Removal>;

    /// All apps ordered by creation time, oldest first.
    async fn list(&self) -> Result<Vec<AppRecord>>;

    /// Atomically move an app to `INDEXING` unless it is already there.
    ///
    /// Returns `false` if the app does not exist or is already indexing.
    async fn begin_training(&self, app_id: &str) -> Result<bool>;

    /// Write the outcome of a training run: replace the record only while
    /// the app is still `INDEXING`. Returns `false` if it no longer is
    /// (deleted, or recovered as interrupted).
    async fn finish_training(&self, app: &AppRecord) -> Result<bool>;

    /// Insert or refresh a file record.
    async fn add_document(&self, doc: &DocumentRecord) -> Result<()>;

    /// File records of one app ordered by filename.
    async fn list_documents(&self, app_id: &str) -> Result<Vec<DocumentRecord>>;
}

/// SQLite implementation of [`MetaStore`].
pub struct SqliteMetaStore {
    pool: SqlitePool,
}

impl SqliteMetaStore {
    /// Open the database at `path`, creating tables on first use.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn ts(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn app_from_row(row: &SqliteRow) -> Result<AppRecord> {
    let status: String = row.get("status");
    let last_trained_at: Option<i64> = row.get("last_trained_at");
    Ok(AppRecord {
        app_id: row.get("app_id"),
        name: row.get("name"),
        status: status.parse()?,
        last_trained_at: last_trained_at.map(from_ts),
        document_count: row.get("document_count"),
        chunk_count: row.get("chunk_count"),
        failure_reason: row.get("failure_reason"),
        created_at: from_ts(row.get("created_at")),
        updated_at: from_ts(row.get("updated_at")),
    })
}

const APP_COLUMNS: &str = "app_id, name, status, last_trained_at, document_count, chunk_count, \
                           failure_reason, created_at, updated_at";

#[async_trait]
impl MetaStore for SqliteMetaStore {
    async fn get(&self, app_id: &str) -> Result<Option<AppRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM apps WHERE app_id = ?", APP_COLUMNS))
            .bind(app_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(app_from_row).transpose()
    }

    async fn upsert(&self, app: &AppRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO apps (app_id, name, status, last_trained_at, document_count,
                              chunk_count, failure_reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(app_id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                last_trained_at = excluded.last_trained_at,
                document_count = excluded.document_count,
                chunk_count = excluded.chunk_count,
                failure_reason = excluded.failure_reason,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&app.app_id)
        .bind(&app.name)
        .bind(app.status.as_str())
        .bind(app.last_trained_at.as_ref().map(ts))
        .bind(app.document_count)
        .bind(app.chunk_count)
        .bind(&app.failure_reason)
        .bind(ts(&app.created_at))
        .bind(ts(&app.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, app_id: &str) -> Result<Removal> {
        let mut tx = self.pool.begin().await?;

        // File rows reference the app, so they go first, under the same condition
        sqlx::query(
            "DELETE FROM files WHERE app_id = ? AND EXISTS \
             (SELECT 1 FROM apps WHERE app_id = ? AND status != 'INDEXING')",
        )
        .bind(app_id)
        .bind(app_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM apps WHERE app_id = ? AND status != 'INDEXING'")
            .bind(app_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM apps WHERE app_id = ?")
                    .bind(app_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(match status {
                Some(_) => Removal::Indexing,
                None => Removal::Missing,
            });
        }

        tx.commit().await?;
        Ok(Removal::Removed)
    }

    async fn list(&self) -> Result<Vec<AppRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM apps ORDER BY created_at ASC, app_id ASC",
            APP_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(app_from_row).collect()
    }

    async fn begin_training(&self, app_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE apps SET status = 'INDEXING', updated_at = ? \
             WHERE app_id = ? AND status != 'INDEXING'",
        )
        .bind(Utc::now().timestamp())
        .bind(app_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finish_training(&self, app: &AppRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE apps SET
                status = ?,
                last_trained_at = ?,
                document_count = ?,
                chunk_count = ?,
                failure_reason = ?,
                updated_at = ?
            WHERE app_id = ? AND status = 'INDEXING'
            "#,
        )
        .bind(app.status.as_str())
        .bind(app.last_trained_at.as_ref().map(ts))
        .bind(app.document_count)
        .bind(app.chunk_count)
        .bind(&app.failure_reason)
        .bind(ts(&app.updated_at))
        .bind(&app.app_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_document(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (app_id, filename, size_bytes, sha256, uploaded_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(app_id, filename) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                sha256 = excluded.sha256,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(&doc.app_id)
        .bind(&doc.filename)
        .bind(doc.size_bytes)
        .bind(&doc.sha256)
        .bind(ts(&doc.uploaded_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_documents(&self, app_id: &str) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT app_id, filename, size_bytes, sha256, uploaded_at FROM files \
             WHERE app_id = ? ORDER BY filename ASC",
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentRecord {
                app_id: row.get("app_id"),
                filename: row.get("filename"),
                size_bytes: row.get("size_bytes"),
                sha256: row.get("sha256"),
                uploaded_at: from_ts(row.get("uploaded_at")),
            })
            .collect())
    }
}

/// Apps whose status is `INDEXING`.
pub async fn list_indexing(store: &dyn MetaStore) -> Result<Vec<AppRecord>> {
    Ok(store
        .list()
        .await?
        .into_iter()
        .filter(|a| a.status == AppStatus::Indexing)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, SqliteMetaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMetaStore::open(&dir.path().join("metadata.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (_dir, store) = store().await;
        assert!(store.get("css").await.unwrap().is_none());

        let app = AppRecord::new("css", "CSS Docs");
        store.upsert(&app).await.unwrap();

        let loaded = store.get("css").await.unwrap().unwrap();
        assert_eq!(loaded.name, "CSS Docs");
        assert_eq!(loaded.status, AppStatus::Created);
        assert_eq!(loaded.created_at.timestamp(), app.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_begin_training_is_exclusive() {
        let (_dir, store) = store().await;
        store.upsert(&AppRecord::new("css", "CSS")).await.unwrap();

        assert!(store.begin_training("css").await.unwrap());
        assert!(!store.begin_training("css").await.unwrap());
        assert_eq!(
            store.get("css").await.unwrap().unwrap().status,
            AppStatus::Indexing
        );
        assert!(!store.begin_training("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_documents_sorted_and_refreshed() {
        let (_dir, store) = store().await;
        store.upsert(&AppRecord::new("css", "CSS")).await.unwrap();

        for (name, sha) in [("b.md", "1"), ("a.txt", "2"), ("b.md", "3")] {
            store
                .add_document(&DocumentRecord {
                    app_id: "css".into(),
                    filename: name.into(),
                    size_bytes: 10,
                    sha256: sha.into(),
                    uploaded_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let docs = store.list_documents("css").await.unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
        assert_eq!(docs[1].sha256, "3");
    }

    #[tokio::test]
    async fn test_delete_removes_files() {
        let (_dir, store) = store().await;
        store.upsert(&AppRecord::new("css", "CSS")).await.unwrap();
        store
            .add_document(&DocumentRecord {
                app_id: "css".into(),
                filename: "doc1.txt".into(),
                size_bytes: 3,
                sha256: "x".into(),
                uploaded_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(store.delete("css").await.unwrap(), Removal::Removed);
        assert_eq!(store.delete("css").await.unwrap(), Removal::Missing);
        assert!(store.list_documents("css").await.unwrap().is_empty());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_refused_while_indexing() {
        let (_dir, store) = store().await;
        store.upsert(&AppRecord::new("css", "CSS")).await.unwrap();
        store.begin_training("css").await.unwrap();

        assert_eq!(store.delete("css").await.unwrap(), Removal::Indexing);
        assert!(store.get("css").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finish_training_only_applies_while_indexing() {
        let (_dir, store) = store().await;
        let mut app = AppRecord::new("css", "CSS");
        store.upsert(&app).await.unwrap();

        app.status = AppStatus::Ready;
        app.chunk_count = 4;
        assert!(!store.finish_training(&app).await.unwrap());
        assert_eq!(store.get("css").await.unwrap().unwrap().status, AppStatus::Created);

        store.begin_training("css").await.unwrap();
        assert!(store.finish_training(&app).await.unwrap());
        let loaded = store.get("css").await.unwrap().unwrap();
        assert_eq!(loaded.status, AppStatus::Ready);
        assert_eq!(loaded.chunk_count, 4);

        // A deleted app is not brought back
        store.begin_training("css").await.unwrap();
        sqlx::query("DELETE FROM apps").execute(store.pool()).await.unwrap();
        assert!(!store.finish_training(&app).await.unwrap());
        assert!(store.get("css").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_indexing() {
        let (_dir, store) = store().await;
        store.upsert(&AppRecord::new("a1", "A")).await.unwrap();
        store.upsert(&AppRecord::new("b1", "B")).await.unwrap();
        store.begin_training("b1").await.unwrap();

        let stuck = list_indexing(&store).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].app_id, "b1");
    }
}
