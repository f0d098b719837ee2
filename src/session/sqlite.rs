//! SQLite-backed [`SessionStore`].
//!
//! One row per user in the `sessions` table; the session itself is stored
//! as a JSON text column.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::SessionStore;
use crate::db;
use crate::error::Result;
use crate::migrate;

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Opens the database at `db_path`, creating the schema if needed.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// User ids with a stored session, most recently updated first.
    pub async fn user_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT user_id FROM sessions ORDER BY updated_at DESC, user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, user_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT state_json FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("state_json")))
    }

    async fn put(&self, user_id: &str, state_json: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, state_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(state_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db").join("sessions.sqlite");

        let store = SqliteSessionStore::open(&path).await.unwrap();
        store.put("ada", "{\"a\":1}").await.unwrap();
        store.put("ada", "{\"a\":2}").await.unwrap();
        store.put("bob", "{}").await.unwrap();
        store.close().await;

        let store = SqliteSessionStore::open(&path).await.unwrap();
        assert_eq!(store.get("ada").await.unwrap().as_deref(), Some("{\"a\":2}"));
        let mut ids = store.user_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["ada".to_string(), "bob".to_string()]);

        store.delete("ada").await.unwrap();
        assert!(store.get("ada").await.unwrap().is_none());
    }
}
