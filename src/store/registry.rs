//! User registry: who receives the daily morning invitation.
//!
//! Keyed by user id so several contacts can coexist. In single-contact mode
//! (the default) a new registration replaces every previous one.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::DatabaseError;
use crate::store::migrations;

/// Durable pointer to a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegistration {
    pub user_id: String,
    pub registered_at: DateTime<Utc>,
}

/// Persistent registry of contacts.
#[async_trait]
pub trait UserRegistry: Send + Sync {
    /// Persist a registration, overwriting any prior one for this user (and,
    /// in single-contact mode, every other user's).
    async fn register(&self, user_id: &str) -> Result<UserRegistration, DatabaseError>;

    /// The most recent registration, if any.
    async fn load(&self) -> Result<Option<UserRegistration>, DatabaseError>;

    /// Every registration, oldest first.
    async fn list(&self) -> Result<Vec<UserRegistration>, DatabaseError>;
}

/// libSQL-backed registry.
pub struct LibSqlRegistry {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    single_contact: bool,
}

impl LibSqlRegistry {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path, single_contact: bool) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let registry = Self::from_database(db, single_contact).await?;
        info!(path = %path.display(), "Registry database opened");
        Ok(registry)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory(single_contact: bool) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db, single_contact).await
    }

    async fn from_database(
        db: LibSqlDatabase,
        single_contact: bool,
    ) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            single_contact,
        })
    }

    async fn query_registrations(
        &self,
        sql: &str,
    ) -> Result<Vec<UserRegistration>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("registrations: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("registrations: {e}")))?
        {
            let user_id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Malformed(format!("user_id: {e}")))?;
            let registered_at: String = row
                .get(1)
                .map_err(|e| DatabaseError::Malformed(format!("registered_at: {e}")))?;
            out.push(UserRegistration {
                registered_at: parse_timestamp(&registered_at)?,
                user_id,
            });
        }
        Ok(out)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Malformed(format!("registered_at '{s}': {e}")))
}

#[async_trait]
impl UserRegistry for LibSqlRegistry {
    async fn register(&self, user_id: &str) -> Result<UserRegistration, DatabaseError> {
        let registration = UserRegistration {
            user_id: user_id.to_string(),
            registered_at: Utc::now(),
        };

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("register: {e}")))?;
        if self.single_contact {
            tx.execute(
                "DELETE FROM registrations WHERE user_id != ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("register: {e}")))?;
        }
        tx.execute(
            "INSERT INTO registrations (user_id, registered_at) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO UPDATE SET registered_at = ?2",
            params![
                user_id,
                registration
                    .registered_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true)
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("register: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("register commit: {e}")))?;

        Ok(registration)
    }

    async fn load(&self) -> Result<Option<UserRegistration>, DatabaseError> {
        let mut latest = self
            .query_registrations(
                "SELECT user_id, registered_at FROM registrations
                 ORDER BY registered_at DESC LIMIT 1",
            )
            .await?;
        Ok(latest.pop())
    }

    async fn list(&self) -> Result<Vec<UserRegistration>, DatabaseError> {
        self.query_registrations(
            "SELECT user_id, registered_at FROM registrations ORDER BY registered_at ASC",
        )
        .await
    }
}

/// In-memory registry with the same semantics, for tests and offline runs.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: RwLock<Vec<UserRegistration>>,
    single_contact: bool,
}

impl MemoryRegistry {
    pub fn new(single_contact: bool) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            single_contact,
        }
    }
}

#[async_trait]
impl UserRegistry for MemoryRegistry {
    async fn register(&self, user_id: &str) -> Result<UserRegistration, DatabaseError> {
        let registration = UserRegistration {
            user_id: user_id.to_string(),
            registered_at: Utc::now(),
        };
        let mut entries = self.entries.write().await;
        if self.single_contact {
            entries.clear();
        } else {
            entries.retain(|r| r.user_id != user_id);
        }
        entries.push(registration.clone());
        Ok(registration)
    }

    async fn load(&self) -> Result<Option<UserRegistration>, DatabaseError> {
        Ok(self.entries.read().await.last().cloned())
    }

    async fn list(&self) -> Result<Vec<UserRegistration>, DatabaseError> {
        Ok(self.entries.read().await.clone())
    }
}
