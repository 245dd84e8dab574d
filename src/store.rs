use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};

use crate::{
    entities::{Document, EqualityFilter},
    error::StoreError,
};

/// Collection-oriented document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document in `collection` matching `filter`, in backend order.
    async fn query(
        &self,
        collection: &str,
        filter: &EqualityFilter,
    ) -> Result<Vec<Document>, StoreError>;

    /// Stores a new document and returns the id the backend assigned to it.
    async fn insert(
        &self,
        collection: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, StoreError>;
}

/// Opens (or creates) the SQLite database and makes sure the schema exists.
/// Missing parent directories of a file database are created.
pub async fn connect_sqlite(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    ensure_parent_dir_exists(database_url)?;
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // every connection to `sqlite::memory:` is its own database
    let pool = if database_url.starts_with("sqlite::memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY NOT NULL,
            email         TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at    TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id         TEXT PRIMARY KEY NOT NULL,
            collection TEXT NOT NULL,
            fields     TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS documents_collection ON documents (collection)")
        .execute(&pool)
        .await?;

    Ok(pool)
}

fn ensure_parent_dir_exists(database_url: &str) -> Result<(), sqlx::Error> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };

    fs::create_dir_all(parent).map_err(|err| {
        tracing::error!(dir = %parent.display(), error = %err, "cannot create database directory");
        sqlx::Error::Io(err)
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

/// Document store backed by the local `documents` table, fields kept as JSON.
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pub sqlite_pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(sqlite_pool: SqlitePool) -> Self {
        Self { sqlite_pool }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filter: &EqualityFilter,
    ) -> Result<Vec<Document>, StoreError> {
        let path = json_path(&filter.field)?;

        // bound parameters only, field names are checked by `json_path`
        let rows = sqlx::query(
            "SELECT id, fields, created_at FROM documents \
             WHERE collection = ? AND json_extract(fields, ?) = ?",
        )
        .bind(collection)
        .bind(path)
        .bind(&filter.value)
        .fetch_all(&self.sqlite_pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Document, StoreError> {
                let id: String = row.try_get("id")?;
                let raw: String = row.try_get("fields")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                Ok(Document {
                    id,
                    fields: serde_json::from_str(&raw)?,
                    created_at: Some(created_at),
                })
            })
            .collect()
    }

    async fn insert(
        &self,
        collection: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let raw = serde_json::to_string(&fields)?;

        sqlx::query("INSERT INTO documents (id, collection, fields, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(collection)
            .bind(raw)
            .bind(Utc::now())
            .execute(&self.sqlite_pool)
            .await?;

        Ok(id)
    }
}

fn json_path(field: &str) -> Result<String, StoreError> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidField(field.to_string()));
    }
    Ok(format!("$.{field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteDocumentStore {
        let pool = connect_sqlite("sqlite::memory:").await.expect("sqlite");
        SqliteDocumentStore::new(pool)
    }

    fn fields(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[tokio::test]
    async fn query_matches_on_field_equality_only() {
        let store = store().await;
        let first = store
            .insert("records", fields(json!({"text": "one", "user_id": "u1"})))
            .await
            .expect("insert");
        store
            .insert("records", fields(json!({"text": "two", "user_id": "u2"})))
            .await
            .expect("insert");
        store
            .insert("notes", fields(json!({"text": "three", "user_id": "u1"})))
            .await
            .expect("insert");

        let docs = store
            .query("records", &EqualityFilter::new("user_id", "u1"))
            .await
            .expect("query");

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, first);
        assert_eq!(docs[0].fields["text"], "one");
        assert!(docs[0].created_at.is_some());
    }

    #[tokio::test]
    async fn inserted_ids_are_unique() {
        let store = store().await;
        let a = store
            .insert("records", fields(json!({"text": "a"})))
            .await
            .expect("insert");
        let b = store
            .insert("records", fields(json!({"text": "a"})))
            .await
            .expect("insert");
        assert_ne!(a, b);
    }

    #[test]
    fn sqlite_path_ignores_memory_and_query_strings() {
        assert_eq!(sqlite_path("sqlite::memory:"), None);
        assert_eq!(
            sqlite_path("sqlite://./data/todo.db?mode=rwc"),
            Some(PathBuf::from("./data/todo.db"))
        );
        assert_eq!(sqlite_path("sqlite:todo.db"), Some(PathBuf::from("todo.db")));
    }

    #[tokio::test]
    async fn creates_missing_database_directories() {
        let root =
            std::env::temp_dir().join(format!("todo_client-{}", uuid::Uuid::new_v4().simple()));
        let file = root.join("nested").join("todo.db");
        let url = format!("sqlite://{}", file.display());

        let pool = connect_sqlite(&url).await.expect("sqlite");
        let store = SqliteDocumentStore::new(pool.clone());
        store
            .insert("records", fields(json!({"text": "a", "user_id": "u1"})))
            .await
            .expect("insert");
        pool.close().await;

        assert!(file.exists());
        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[tokio::test]
    async fn rejects_field_names_outside_identifier_charset() {
        let store = store().await;
        let err = store
            .query("records", &EqualityFilter::new("user_id') OR 1=1 --", "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)));
    }
}
