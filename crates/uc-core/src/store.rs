use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::source::{NormalizedSource, Replacement, RuleType, Source};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("source not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored source: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence port for sources. Every operation is scoped to the owning
/// user; a source belonging to someone else behaves as if it did not exist.
/// Listings are ordered by `priority` ascending, then insertion order.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn active_sources_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Source>>;

    async fn list_sources(&self, user_id: Uuid) -> StoreResult<Vec<Source>>;

    async fn get_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<Source>;

    async fn create_source(&self, user_id: Uuid, input: NormalizedSource) -> StoreResult<Source>;

    async fn update_source(
        &self,
        user_id: Uuid,
        source_id: Uuid,
        input: NormalizedSource,
    ) -> StoreResult<Source>;

    async fn delete_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<()>;

    async fn check_ready(&self) -> StoreResult<()>;
}

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const SOURCE_COLUMNS: &str = "source_id, user_id, name, rule_type, rule_value, param_name, param_value, replacements_json, priority, active, created_at, updated_at";

#[derive(Clone)]
pub struct PgSourceStore {
    pool: Pool<Postgres>,
}

impl PgSourceStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        MIGRATOR.run(&self.pool).await?;
        tracing::info!("migrations applied");
        Ok(())
    }
}

fn source_from_row(row: &PgRow) -> StoreResult<Source> {
    let rule_type: String = row.try_get("rule_type")?;
    let rule_type = rule_type
        .parse::<RuleType>()
        .map_err(|err| StoreError::Decode(err.to_string()))?;
    let replacements: Json<Vec<Replacement>> = row.try_get("replacements_json")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(Source {
        source_id: row.try_get("source_id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        rule_type,
        rule_value: row.try_get("rule_value")?,
        param_name: row.try_get("param_name")?,
        param_value: row.try_get("param_value")?,
        replacements: replacements.0,
        priority: row.try_get("priority")?,
        active: row.try_get("active")?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn active_sources_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Source>> {
        let rows = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM uc.sources WHERE user_id = $1 AND active ORDER BY priority ASC, insertion_seq ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(source_from_row).collect()
    }

    async fn list_sources(&self, user_id: Uuid) -> StoreResult<Vec<Source>> {
        let rows = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM uc.sources WHERE user_id = $1 ORDER BY priority ASC, insertion_seq ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(source_from_row).collect()
    }

    async fn get_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<Source> {
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM uc.sources WHERE source_id = $1 AND user_id = $2"
        ))
        .bind(source_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn create_source(&self, user_id: Uuid, input: NormalizedSource) -> StoreResult<Source> {
        let source_id = Uuid::new_v4();
        let row = sqlx::query(&format!(
            "INSERT INTO uc.sources \
             (source_id, user_id, name, rule_type, rule_value, param_name, param_value, replacements_json, priority, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(source_id)
        .bind(user_id)
        .bind(&input.name)
        .bind(input.rule_type.as_str())
        .bind(&input.rule_value)
        .bind(&input.param_name)
        .bind(&input.param_value)
        .bind(Json(&input.replacements))
        .bind(input.priority)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await?;

        source_from_row(&row)
    }

    async fn update_source(
        &self,
        user_id: Uuid,
        source_id: Uuid,
        input: NormalizedSource,
    ) -> StoreResult<Source> {
        let row = sqlx::query(&format!(
            "UPDATE uc.sources \
             SET name = $1, rule_type = $2, rule_value = $3, param_name = $4, param_value = $5, \
             replacements_json = $6, priority = $7, active = $8, updated_at = NOW() \
             WHERE source_id = $9 AND user_id = $10 \
             RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(&input.name)
        .bind(input.rule_type.as_str())
        .bind(&input.rule_value)
        .bind(&input.param_name)
        .bind(&input.param_value)
        .bind(Json(&input.replacements))
        .bind(input.priority)
        .bind(input.active)
        .bind(source_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM uc.sources WHERE source_id = $1 AND user_id = $2")
            .bind(source_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn check_ready(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct StoredSource {
    seq: u64,
    source: Source,
}

/// In-process store with the same ordering and scoping rules as
/// [`PgSourceStore`].
#[derive(Default)]
pub struct MemorySourceStore {
    sources: RwLock<Vec<StoredSource>>,
    next_seq: AtomicU64,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds already-built sources, keeping their ids. Input order becomes
    /// insertion order.
    pub async fn with_sources(sources: Vec<Source>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.sources.write().await;
            for source in sources {
                let seq = store.next_seq.fetch_add(1, Ordering::SeqCst);
                guard.push(StoredSource { seq, source });
            }
        }
        store
    }

    async fn ordered(&self, user_id: Uuid, active_only: bool) -> Vec<Source> {
        let guard = self.sources.read().await;
        let mut matching: Vec<&StoredSource> = guard
            .iter()
            .filter(|stored| stored.source.user_id == user_id)
            .filter(|stored| !active_only || stored.source.active)
            .collect();
        matching.sort_by_key(|stored| (stored.source.priority, stored.seq));
        matching
            .into_iter()
            .map(|stored| stored.source.clone())
            .collect()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn active_sources_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Source>> {
        Ok(self.ordered(user_id, true).await)
    }

    async fn list_sources(&self, user_id: Uuid) -> StoreResult<Vec<Source>> {
        Ok(self.ordered(user_id, false).await)
    }

    async fn get_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<Source> {
        let guard = self.sources.read().await;
        guard
            .iter()
            .find(|stored| stored.source.source_id == source_id && stored.source.user_id == user_id)
            .map(|stored| stored.source.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn create_source(&self, user_id: Uuid, input: NormalizedSource) -> StoreResult<Source> {
        let source = input.into_source(Uuid::new_v4(), user_id, Utc::now());
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.sources.write().await.push(StoredSource {
            seq,
            source: source.clone(),
        });
        Ok(source)
    }

    async fn update_source(
        &self,
        user_id: Uuid,
        source_id: Uuid,
        input: NormalizedSource,
    ) -> StoreResult<Source> {
        let mut guard = self.sources.write().await;
        let stored = guard
            .iter_mut()
            .find(|stored| stored.source.source_id == source_id && stored.source.user_id == user_id)
            .ok_or(StoreError::NotFound)?;

        let created_at = stored.source.created_at;
        let mut updated = input.into_source(source_id, user_id, Utc::now());
        updated.created_at = created_at;
        stored.source = updated.clone();
        Ok(updated)
    }

    async fn delete_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<()> {
        let mut guard = self.sources.write().await;
        let before = guard.len();
        guard.retain(|stored| {
            !(stored.source.source_id == source_id && stored.source.user_id == user_id)
        });
        if guard.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn check_ready(&self) -> StoreResult<()> {
        Ok(())
    }
}
