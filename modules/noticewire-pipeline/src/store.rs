//! Announced-notice persistence: the dedup gate's backing store.
//!
//! Recording happens strictly after a confirmed send, so a crash in the gap
//! can re-announce a notice on the next run. The insert is idempotent
//! (`ON CONFLICT DO NOTHING`), so even that window never double-inserts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use noticewire_common::AnnouncedRecord;

#[async_trait]
pub trait AnnouncedStore: Send + Sync {
    /// True if no announcement for this link has ever been recorded.
    async fn is_new(&self, link: &str) -> Result<bool>;

    /// Append an announced record. Idempotent per link; rows are never updated.
    async fn record_announced(&self, record: &AnnouncedRecord) -> Result<()>;
}

pub struct PgAnnouncedStore {
    pool: PgPool,
}

impl PgAnnouncedStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    /// Idempotent schema migration, run at startup.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS announced_notices (
                link         TEXT PRIMARY KEY,
                title        TEXT NOT NULL,
                date         TIMESTAMPTZ NOT NULL,
                announced_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create announced_notices table")?;

        info!("Announced-notice schema ready");
        Ok(())
    }
}

#[async_trait]
impl AnnouncedStore for PgAnnouncedStore {
    async fn is_new(&self, link: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM announced_notices WHERE link = $1")
            .bind(link)
            .fetch_one(&self.pool)
            .await
            .context("Dedup lookup failed")?;
        let count: i64 = row.get("n");
        Ok(count == 0)
    }

    async fn record_announced(&self, record: &AnnouncedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO announced_notices (link, title, date, announced_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (link) DO NOTHING
            "#,
        )
        .bind(&record.link)
        .bind(&record.title)
        .bind(record.date)
        .bind(record.announced_at)
        .execute(&self.pool)
        .await
        .context("Failed to record announced notice")?;
        Ok(())
    }
}
