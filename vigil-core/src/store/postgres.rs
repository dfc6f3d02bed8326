//! PostgreSQL scan store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;
use vigil_model::{
    CheckCounters, CheckId, CheckMetadata, CheckResult, CheckStatus, Scan, ScanId, ScanStatus,
    ServiceGroup, TargetRef,
};

use super::{ScanStore, StoreResult};
use crate::error::StoreError;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct PostgresScanStore {
    pool: PgPool,
}

impl PostgresScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Database(err.into()))
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct ScanRow {
    id: Uuid,
    tenant_id: String,
    display_name: Option<String>,
    technology: String,
    status: String,
    total_checks: i32,
    passed: i32,
    failed: i32,
    errors: i32,
    unknown: i32,
    skipped: i32,
    progress_percentage: i16,
    current_check: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    warnings: serde_json::Value,
}

impl TryFrom<ScanRow> for Scan {
    type Error = StoreError;

    fn try_from(row: ScanRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ScanStatus>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        Ok(Scan {
            id: ScanId(row.id),
            target: TargetRef {
                tenant_id: row.tenant_id,
                display_name: row.display_name,
            },
            technology: row.technology,
            status,
            total_checks: to_u32(row.total_checks),
            passed: to_u32(row.passed),
            failed: to_u32(row.failed),
            errors: to_u32(row.errors),
            unknown: to_u32(row.unknown),
            skipped: to_u32(row.skipped),
            progress_percentage: row.progress_percentage.clamp(0, 100) as u8,
            current_check: row.current_check,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            warnings: serde_json::from_value(row.warnings)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    scan_id: Uuid,
    check_id: String,
    status: String,
    category: String,
    tenant_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration: f64,
    details: serde_json::Value,
    error: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl TryFrom<ResultRow> for CheckResult {
    type Error = StoreError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<CheckStatus>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let category = row
            .category
            .parse::<ServiceGroup>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let metadata: Option<CheckMetadata> = row.metadata.map(serde_json::from_value).transpose()?;
        Ok(CheckResult {
            scan_id: ScanId(row.scan_id),
            check_id: CheckId(row.check_id),
            status,
            category,
            tenant_id: row.tenant_id,
            start_time: row.start_time,
            end_time: row.end_time,
            duration: row.duration,
            details: serde_json::from_value(row.details)?,
            error: row.error,
            metadata,
        })
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl ScanStore for PostgresScanStore {
    async fn insert_scan(&self, scan: &Scan) -> StoreResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO scans (
                id, tenant_id, display_name, technology, status,
                total_checks, passed, failed, errors, unknown, skipped,
                progress_percentage, current_check, created_at, started_at,
                completed_at, error_message, warnings
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(scan.id.to_uuid())
        .bind(&scan.target.tenant_id)
        .bind(&scan.target.display_name)
        .bind(&scan.technology)
        .bind(scan.status.as_str())
        .bind(to_i32(scan.total_checks))
        .bind(to_i32(scan.passed))
        .bind(to_i32(scan.failed))
        .bind(to_i32(scan.errors))
        .bind(to_i32(scan.unknown))
        .bind(to_i32(scan.skipped))
        .bind(i16::from(scan.progress_percentage))
        .bind(&scan.current_check)
        .bind(scan.created_at)
        .bind(scan.started_at)
        .bind(scan.completed_at)
        .bind(&scan.error_message)
        .bind(serde_json::to_value(&scan.warnings)?)
        .execute(self.pool())
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::ScanExists(scan.id));
        }
        Ok(())
    }

    async fn update_scan(&self, scan: &Scan) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE scans SET
                status = $2,
                total_checks = $3,
                passed = $4,
                failed = $5,
                errors = $6,
                unknown = $7,
                skipped = $8,
                progress_percentage = $9,
                current_check = $10,
                started_at = $11,
                completed_at = $12,
                error_message = $13,
                warnings = $14
            WHERE id = $1
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(scan.id.to_uuid())
        .bind(scan.status.as_str())
        .bind(to_i32(scan.total_checks))
        .bind(to_i32(scan.passed))
        .bind(to_i32(scan.failed))
        .bind(to_i32(scan.errors))
        .bind(to_i32(scan.unknown))
        .bind(to_i32(scan.skipped))
        .bind(i16::from(scan.progress_percentage))
        .bind(&scan.current_check)
        .bind(scan.started_at)
        .bind(scan.completed_at)
        .bind(&scan.error_message)
        .bind(serde_json::to_value(&scan.warnings)?)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 0 {
            return match self.get_scan(scan.id).await? {
                Some(_) => Err(StoreError::ScanTerminal(scan.id)),
                None => Err(StoreError::ScanNotFound(scan.id)),
            };
        }
        Ok(())
    }

    async fn get_scan(&self, id: ScanId) -> StoreResult<Option<Scan>> {
        let row = sqlx::query_as::<_, ScanRow>("SELECT * FROM scans WHERE id = $1")
            .bind(id.to_uuid())
            .fetch_optional(self.pool())
            .await?;
        row.map(Scan::try_from).transpose()
    }

    async fn list_scans(&self, limit: usize) -> StoreResult<Vec<Scan>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ScanRow>(
            "SELECT * FROM scans ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Scan::try_from).collect()
    }

    async fn append_results(&self, id: ScanId, results: &[CheckResult]) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query("SELECT status FROM scans WHERE id = $1 FOR UPDATE")
                .bind(id.to_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.try_get("status"))
                .transpose()?;
        let status = status
            .ok_or(StoreError::ScanNotFound(id))?
            .parse::<ScanStatus>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        if status.is_terminal() {
            return Err(StoreError::ScanTerminal(id));
        }

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO check_results (
                    scan_id, check_id, status, category, tenant_id,
                    start_time, end_time, duration, details, error, metadata
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(id.to_uuid())
            .bind(result.check_id.as_str())
            .bind(result.status.as_str())
            .bind(result.category.label())
            .bind(&result.tenant_id)
            .bind(result.start_time)
            .bind(result.end_time)
            .bind(result.duration)
            .bind(serde_json::to_value(&result.details)?)
            .bind(&result.error)
            .bind(result.metadata.as_ref().map(serde_json::to_value).transpose()?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(results.len())
    }

    async fn results(&self, id: ScanId) -> StoreResult<Vec<CheckResult>> {
        if self.get_scan(id).await?.is_none() {
            return Err(StoreError::ScanNotFound(id));
        }
        let rows = sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT scan_id, check_id, status, category, tenant_id, start_time,
                   end_time, duration, details, error, metadata
            FROM check_results
            WHERE scan_id = $1
            ORDER BY seq
            "#,
        )
        .bind(id.to_uuid())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(CheckResult::try_from).collect()
    }

    async fn counters(&self, id: ScanId) -> StoreResult<CheckCounters> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total FROM check_results WHERE scan_id = $1 GROUP BY status",
        )
        .bind(id.to_uuid())
        .fetch_all(self.pool())
        .await?;

        let mut counters = CheckCounters::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            let status = status
                .parse::<CheckStatus>()
                .map_err(|err| StoreError::Corrupt(err.to_string()))?;
            counters.add(status, u32::try_from(total).unwrap_or(u32::MAX));
        }
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::ScanStatus;

    fn scan() -> Scan {
        Scan::new(
            ScanId::new(),
            TargetRef {
                tenant_id: "tenant".into(),
                display_name: Some("Contoso".into()),
            },
            "m365",
        )
    }

    fn result(scan_id: ScanId, id: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            scan_id,
            check_id: CheckId::new(id),
            status,
            category: ServiceGroup::Directory,
            tenant_id: "tenant".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration: 1.5,
            details: vec![serde_json::json!({"user": "admin"})],
            error: None,
            metadata: None,
        }
    }

    #[sqlx::test(migrator = "crate::store::postgres::MIGRATOR")]
    async fn persists_scans_and_results_in_order(pool: PgPool) -> anyhow::Result<()> {
        let store = PostgresScanStore::new(pool);
        let mut scan = scan();
        store.insert_scan(&scan).await?;

        scan.status = ScanStatus::Running;
        scan.total_checks = 2;
        store.update_scan(&scan).await?;

        store
            .append_results(
                scan.id,
                &[
                    result(scan.id, "b", CheckStatus::Fail),
                    result(scan.id, "a", CheckStatus::Pass),
                    result(scan.id, "c", CheckStatus::Pass),
                ],
            )
            .await?;

        let loaded = store.get_scan(scan.id).await?.expect("scan stored");
        assert_eq!(loaded.status, ScanStatus::Running);
        assert_eq!(loaded.target.display_name.as_deref(), Some("Contoso"));

        let results = store.results(scan.id).await?;
        let ids: Vec<_> = results.iter().map(|r| r.check_id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
        assert_eq!(results[0].details, vec![serde_json::json!({"user": "admin"})]);

        let counters = store.counters(scan.id).await?;
        assert_eq!((counters.passed, counters.failed), (2, 1));
        assert_eq!(counters.completed, 3);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::store::postgres::MIGRATOR")]
    async fn duplicate_ids_are_reported_as_existing(pool: PgPool) -> anyhow::Result<()> {
        let store = PostgresScanStore::new(pool);
        let scan = scan();
        store.insert_scan(&scan).await?;

        assert!(matches!(
            store.insert_scan(&scan).await,
            Err(StoreError::ScanExists(_))
        ));
        Ok(())
    }

    #[sqlx::test(migrator = "crate::store::postgres::MIGRATOR")]
    async fn rejects_writes_after_terminal_status(pool: PgPool) -> anyhow::Result<()> {
        let store = PostgresScanStore::new(pool);
        let mut scan = scan();
        store.insert_scan(&scan).await?;
        scan.status = ScanStatus::Cancelled;
        store.update_scan(&scan).await?;

        let append = store
            .append_results(scan.id, &[result(scan.id, "late", CheckStatus::Pass)])
            .await;
        assert!(matches!(append, Err(StoreError::ScanTerminal(_))));
        assert!(matches!(
            store.update_scan(&scan).await,
            Err(StoreError::ScanTerminal(_))
        ));
        Ok(())
    }
}
