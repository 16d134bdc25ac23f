//! Postgres-backed stores.
//!
//! ## Concurrency
//!
//! [`PostgresCampaignStore::apply`] runs inside a transaction that locks the campaign
//! row with `SELECT ... FOR UPDATE`. Concurrent workers touching the same campaign
//! are serialized by the row lock, so counters never lose updates; workers on
//! different campaigns do not contend.
//!
//! ## Error Mapping
//!
//! SQLx and JSON decoding errors become `StoreError::Storage` with the failing
//! operation named in the message. State machine rejections surface as
//! `StoreError::Domain` and roll the transaction back.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use auditflow_ai::{AuditParameter, ParameterSet};
use auditflow_campaigns::{
    AuditJob, AuditRecord, Campaign, CampaignCommand, CampaignConfig, CampaignFilter, CampaignStats,
    CampaignStatus, CampaignUsage,
};
use auditflow_core::{AuditId, CampaignId, Page, PageRequest, ParameterSetId, TenantId};

use super::{Applied, AuditResultStore, CampaignStore, ParameterSetStore, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_campaigns.sql");

const CAMPAIGN_COLUMNS: &str = r#"
    id, tenant_id, name, description, parameter_set_id, status,
    total_jobs, completed_jobs, failed_jobs, processing_jobs,
    jobs, config, usage, stats,
    created_at, updated_at, started_at, completed_at
"#;

/// Create the pipeline tables if they do not exist yet.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresCampaignStore {
    pool: Arc<PgPool>,
}

impl PostgresCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn save(tx: &mut Transaction<'_, Postgres>, c: &Campaign) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                name = $2,
                description = $3,
                status = $4,
                total_jobs = $5,
                completed_jobs = $6,
                failed_jobs = $7,
                processing_jobs = $8,
                jobs = $9,
                config = $10,
                usage = $11,
                stats = $12,
                updated_at = $13,
                started_at = $14,
                completed_at = $15
            WHERE id = $1
            "#,
        )
        .bind(*c.id.as_uuid())
        .bind(&c.name)
        .bind(&c.description)
        .bind(c.status.as_str())
        .bind(c.total_jobs as i32)
        .bind(c.completed_jobs as i32)
        .bind(c.failed_jobs as i32)
        .bind(c.processing_jobs as i32)
        .bind(Json(&c.jobs))
        .bind(Json(&c.config))
        .bind(Json(&c.usage))
        .bind(c.stats.as_ref().map(Json))
        .bind(c.updated_at)
        .bind(c.started_at)
        .bind(c.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_campaign", e))?;
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    #[instrument(skip(self, campaign), fields(campaign_id = %campaign.id, total_jobs = campaign.total_jobs), err)]
    async fn insert(&self, campaign: Campaign) -> Result<(), StoreError> {
        let c = &campaign;
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, description, parameter_set_id, status,
                total_jobs, completed_jobs, failed_jobs, processing_jobs,
                jobs, config, usage, stats,
                created_at, updated_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(*c.id.as_uuid())
        .bind(*c.tenant_id.as_uuid())
        .bind(&c.name)
        .bind(&c.description)
        .bind(*c.parameter_set_id.as_uuid())
        .bind(c.status.as_str())
        .bind(c.total_jobs as i32)
        .bind(c.completed_jobs as i32)
        .bind(c.failed_jobs as i32)
        .bind(c.processing_jobs as i32)
        .bind(Json(&c.jobs))
        .bind(Json(&c.config))
        .bind(Json(&c.usage))
        .bind(c.stats.as_ref().map(Json))
        .bind(c.created_at)
        .bind(c.updated_at)
        .bind(c.started_at)
        .bind(c.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_campaign", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(campaign_id = %id), err)]
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_campaign", e))?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    #[instrument(
        skip(self, filter),
        fields(page = page.page, limit = page.limit, returned = tracing::field::Empty),
        err
    )]
    async fn list(
        &self,
        filter: &CampaignFilter,
        page: PageRequest,
    ) -> Result<Page<Campaign>, StoreError> {
        let tenant = filter.tenant_id.map(Uuid::from);
        let status = filter.status.map(|s| s.as_str());
        let parameter_set = filter.parameter_set_id.map(Uuid::from);
        let search = filter.search.as_deref().map(escape_like);

        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR parameter_set_id = $3)
              AND ($4::text IS NULL OR name ILIKE '%' || $4 || '%')
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM campaigns {WHERE}"))
            .bind(tenant)
            .bind(status)
            .bind(parameter_set)
            .bind(&search)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_campaigns", e))?;

        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns {WHERE} ORDER BY created_at DESC, id DESC LIMIT $5 OFFSET $6"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant)
            .bind(status)
            .bind(parameter_set)
            .bind(&search)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_campaigns", e))?;

        let items = rows.iter().map(campaign_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("returned", items.len());
        Ok(Page::new(items, total.max(0) as u64, page))
    }

    #[instrument(skip(self), fields(campaign_id = %id), err)]
    async fn delete(&self, id: CampaignId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_campaign", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn list_with_unqueued_jobs(&self, limit: usize) -> Result<Vec<Campaign>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS} FROM campaigns
            WHERE status IN ('pending', 'processing')
              AND EXISTS (
                  SELECT 1 FROM jsonb_array_elements(jobs) AS j
                  WHERE j->>'status' = 'pending' AND j->>'queuedAt' IS NULL
              )
            ORDER BY created_at ASC
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_unqueued", e))?;
        rows.iter().map(campaign_from_row).collect()
    }

    #[instrument(skip(self, command), fields(campaign_id = %id, command = command.name()), err)]
    async fn apply(&self, id: CampaignId, command: CampaignCommand) -> Result<Applied, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_campaign", e))?;

        // Returning early drops `tx`, which rolls back and releases the row lock.
        let Some(row) = row else {
            return Err(StoreError::NotFound(id));
        };
        let mut campaign = campaign_from_row(&row)?;
        let outcome = campaign.execute(command, Utc::now())?;

        Self::save(&mut tx, &campaign).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Applied { campaign, outcome })
    }
}

#[derive(Debug, Clone)]
pub struct PostgresAuditResultStore {
    pool: Arc<PgPool>,
}

impl PostgresAuditResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AuditResultStore for PostgresAuditResultStore {
    #[instrument(
        skip(self, record),
        fields(campaign_id = %record.campaign_id, job_index = record.job_index),
        err
    )]
    async fn upsert(&self, record: AuditRecord) -> Result<AuditId, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO audit_results (
                id, tenant_id, campaign_id, job_index,
                overall_score, total_tokens, duration_ms, body, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (campaign_id, job_index)
            DO UPDATE SET
                overall_score = EXCLUDED.overall_score,
                total_tokens = EXCLUDED.total_tokens,
                duration_ms = EXCLUDED.duration_ms,
                body = EXCLUDED.body,
                created_at = EXCLUDED.created_at
            RETURNING id
            "#,
        )
        .bind(*record.id.as_uuid())
        .bind(*record.tenant_id.as_uuid())
        .bind(*record.campaign_id.as_uuid())
        .bind(record.job_index as i32)
        .bind(record.overall_score)
        .bind(record.token_usage.total_tokens as i64)
        .bind(record.duration_ms as i64)
        .bind(Json(&record))
        .bind(record.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_audit_result", e))?;

        Ok(AuditId::from_uuid(id))
    }

    #[instrument(skip(self), fields(audit_id = %id), err)]
    async fn get(&self, id: AuditId) -> Result<Option<AuditRecord>, StoreError> {
        let row = sqlx::query("SELECT id, body FROM audit_results WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_audit_result", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), fields(campaign_id = %campaign_id), err)]
    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, body FROM audit_results WHERE campaign_id = $1 ORDER BY job_index ASC",
        )
        .bind(*campaign_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audit_results", e))?;
        rows.iter().map(record_from_row).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PostgresParameterSetStore {
    pool: Arc<PgPool>,
}

impl PostgresParameterSetStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ParameterSetStore for PostgresParameterSetStore {
    #[instrument(skip(self), fields(parameter_set_id = %id), err)]
    async fn get(&self, id: ParameterSetId) -> Result<Option<ParameterSet>, StoreError> {
        let row = sqlx::query("SELECT id, tenant_id, name, parameters FROM parameter_sets WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_parameter_set", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| map_sqlx_error("decode_parameter_set", e);
        let parameters: Json<Vec<AuditParameter>> = row.try_get("parameters").map_err(decode)?;
        Ok(Some(ParameterSet {
            id: ParameterSetId::from_uuid(row.try_get("id").map_err(decode)?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
            name: row.try_get("name").map_err(decode)?,
            parameters: parameters.0,
        }))
    }

    #[instrument(skip(self, parameter_set), fields(parameter_set_id = %parameter_set.id), err)]
    async fn insert(&self, parameter_set: ParameterSet) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO parameter_sets (id, tenant_id, name, parameters)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id)
            DO UPDATE SET name = EXCLUDED.name, parameters = EXCLUDED.parameters
            "#,
        )
        .bind(*parameter_set.id.as_uuid())
        .bind(*parameter_set.tenant_id.as_uuid())
        .bind(&parameter_set.name)
        .bind(Json(&parameter_set.parameters))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_parameter_set", e))?;
        Ok(())
    }
}

fn campaign_from_row(row: &PgRow) -> Result<Campaign, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_campaign", e);
    let count = |col: &str| -> Result<u32, StoreError> {
        let v: i32 = row.try_get(col).map_err(decode)?;
        Ok(v.max(0) as u32)
    };

    let status: String = row.try_get("status").map_err(decode)?;
    let jobs: Json<Vec<AuditJob>> = row.try_get("jobs").map_err(decode)?;
    let config: Json<CampaignConfig> = row.try_get("config").map_err(decode)?;
    let usage: Json<CampaignUsage> = row.try_get("usage").map_err(decode)?;
    let stats: Option<Json<CampaignStats>> = row.try_get("stats").map_err(decode)?;

    Ok(Campaign {
        id: CampaignId::from_uuid(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        parameter_set_id: ParameterSetId::from_uuid(row.try_get("parameter_set_id").map_err(decode)?),
        status: CampaignStatus::from_str(&status)?,
        total_jobs: count("total_jobs")?,
        completed_jobs: count("completed_jobs")?,
        failed_jobs: count("failed_jobs")?,
        processing_jobs: count("processing_jobs")?,
        jobs: jobs.0,
        config: config.0,
        usage: usage.0,
        stats: stats.map(|s| s.0),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
        started_at: row.try_get("started_at").map_err(decode)?,
        completed_at: row.try_get("completed_at").map_err(decode)?,
    })
}

fn record_from_row(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_audit_result", e);
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let Json(mut record): Json<AuditRecord> = row.try_get("body").map_err(decode)?;
    // The body keeps the id of the delivery that wrote it; the column is authoritative.
    record.id = AuditId::from_uuid(id);
    Ok(record)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Storage(format!("failed to decode column {index} in {operation}: {source}"))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn schema_declares_every_table() {
        for table in ["campaigns", "audit_results", "parameter_sets"] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }
}
