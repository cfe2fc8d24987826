//! PostgreSQL student store

use crate::config::DatabaseConfig;
use crate::error::{DedupError, Result};
use crate::model::{
    BillingPlan, ExternalCustomerLink, OrganizationCounts, PlanUsage, StudentRecord,
    StudentSummary, SubscriptionRecord,
};
use crate::store::{
    expect_row, DependentTransfer, PurgeCounts, StudentStore, SubscriptionAction, TransferCounts,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const STUDENT_SUMMARY_SELECT: &str = r#"
    SELECT
        s.id,
        s.user_id,
        u.first_name,
        u.last_name,
        u.email,
        u.cpf,
        s.is_active,
        s.created_at,
        ac.id AS link_id,
        ac.asaas_id,
        (SELECT COUNT(*) FROM student_subscriptions ss
            WHERE ss.student_id = s.id AND ss.is_active) AS active_subscriptions,
        (SELECT COUNT(*) FROM student_subscriptions ss
            WHERE ss.student_id = s.id) AS total_subscriptions,
        (SELECT COUNT(*) FROM attendances a
            WHERE a.student_id = s.id) AS attendance_count
    FROM students s
    JOIN users u ON u.id = s.user_id
    LEFT JOIN asaas_customers ac ON ac.student_id = s.id
    WHERE s.organization_id = $1
"#;

#[derive(Debug, sqlx::FromRow)]
struct StudentRow {
    id: Uuid,
    user_id: Uuid,
    first_name: String,
    last_name: String,
    email: Option<String>,
    cpf: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    link_id: Option<Uuid>,
    asaas_id: Option<String>,
    active_subscriptions: i64,
    total_subscriptions: i64,
    attendance_count: i64,
}

impl From<StudentRow> for StudentSummary {
    fn from(row: StudentRow) -> Self {
        let link = match (row.link_id, row.asaas_id) {
            (Some(id), Some(external_id)) => {
                Some(ExternalCustomerLink { id, student_id: row.id, external_id })
            }
            _ => None,
        };

        StudentSummary {
            student: StudentRecord {
                id: row.id,
                user_id: row.user_id,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                national_id: row.cpf,
                is_active: row.is_active,
                created_at: row.created_at,
            },
            link,
            active_subscriptions: row.active_subscriptions.max(0) as u64,
            total_subscriptions: row.total_subscriptions.max(0) as u64,
            attendance_count: row.attendance_count.max(0) as u64,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanUsageRow {
    id: Uuid,
    name: String,
    is_active: bool,
    active_subscriptions: i64,
}

/// Student store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStudentStore {
    pool: PgPool,
}

impl PgStudentStore {
    /// Connect a pool, applying bundled migrations when configured to
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        if config.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl StudentStore for PgStudentStore {
    async fn load_students(&self, organization_id: Uuid) -> Result<Vec<StudentSummary>> {
        let sql = format!("{STUDENT_SUMMARY_SELECT} ORDER BY s.created_at DESC");
        let rows: Vec<StudentRow> =
            sqlx::query_as(&sql).bind(organization_id).fetch_all(&self.pool).await?;

        debug!("Loaded {} students for organization {}", rows.len(), organization_id);
        Ok(rows.into_iter().map(StudentSummary::from).collect())
    }

    async fn transfer_dependents(&self, transfer: &DependentTransfer) -> Result<TransferCounts> {
        let mut tx = self.pool.begin().await?;

        let loser: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM students WHERE id = $1 FOR UPDATE")
                .bind(transfer.from)
            .fetch_optional(&mut *tx)
            .await?;
        if loser.is_none() {
            return Err(DedupError::not_found("student", transfer.from));
        }

        let keeper: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM students WHERE id = $1 FOR SHARE")
                .bind(transfer.to)
            .fetch_optional(&mut *tx)
            .await?;
        if keeper.is_none() {
            return Err(DedupError::constraint(format!("keeper {} does not exist", transfer.to)));
        }

        let subscriptions = match transfer.subscriptions {
            SubscriptionAction::Reassign => {
                sqlx::query("UPDATE student_subscriptions SET student_id = $2 WHERE student_id = $1")
                    .bind(transfer.from)
                    .bind(transfer.to)
                    .execute(&mut *tx)
                    .await
            }
            SubscriptionAction::Delete => {
                sqlx::query("DELETE FROM student_subscriptions WHERE student_id = $1")
                    .bind(transfer.from)
                    .execute(&mut *tx)
                    .await
            }
        }
        .map_err(DedupError::from_sqlx)?
        .rows_affected();

        let attendances =
            sqlx::query("UPDATE attendances SET student_id = $2 WHERE student_id = $1")
                .bind(transfer.from)
                .bind(transfer.to)
                .execute(&mut *tx)
                .await
                .map_err(DedupError::from_sqlx)?
                .rows_affected();

        tx.commit().await?;

        Ok(TransferCounts { subscriptions, attendances })
    }

    async fn delete_external_link(&self, link_id: Uuid) -> Result<()> {
        let rows = sqlx::query("DELETE FROM asaas_customers WHERE id = $1")
            .bind(link_id)
            .execute(&self.pool)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        expect_row(rows, "external customer link", link_id)
    }

    async fn deactivate_student(&self, student_id: Uuid) -> Result<()> {
        let rows = sqlx::query("UPDATE students SET is_active = FALSE WHERE id = $1")
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        expect_row(rows, "student", student_id)
    }

    async fn activate_student(&self, student_id: Uuid) -> Result<()> {
        let rows = sqlx::query("UPDATE students SET is_active = TRUE WHERE id = $1")
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        expect_row(rows, "student", student_id)
    }

    async fn purge_student(&self, student_id: Uuid, user_id: Uuid) -> Result<PurgeCounts> {
        let mut tx = self.pool.begin().await?;

        // Dependents and link first, then the student, then its user
        let subscriptions = sqlx::query("DELETE FROM student_subscriptions WHERE student_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        let attendances = sqlx::query("DELETE FROM attendances WHERE student_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        let links = sqlx::query("DELETE FROM asaas_customers WHERE student_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        let students = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();
        expect_row(students, "student", student_id)?;

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(DedupError::from_sqlx)?;

        tx.commit().await?;

        Ok(PurgeCounts { subscriptions, attendances, links })
    }

    async fn inactive_students_with_active_subscriptions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<StudentSummary>> {
        let sql = format!(
            "{STUDENT_SUMMARY_SELECT} AND NOT s.is_active AND EXISTS (
                SELECT 1 FROM student_subscriptions ss
                WHERE ss.student_id = s.id AND ss.is_active)
             ORDER BY s.created_at DESC"
        );
        let rows: Vec<StudentRow> =
            sqlx::query_as(&sql).bind(organization_id).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(StudentSummary::from).collect())
    }

    async fn deactivate_active_subscriptions(&self, student_id: Uuid) -> Result<u64> {
        let rows = sqlx::query(
            "UPDATE student_subscriptions SET is_active = FALSE WHERE student_id = $1 AND is_active",
        )
        .bind(student_id)
        .execute(&self.pool)
        .await
        .map_err(DedupError::from_sqlx)?
        .rows_affected();

        Ok(rows)
    }

    async fn active_subscriptions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<SubscriptionRecord>> {
        let rows = sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT ss.id, ss.student_id, ss.plan_id, bp.name AS plan_name,
                   ss.is_active, ss.current_price
            FROM student_subscriptions ss
            JOIN students s ON s.id = ss.student_id
            JOIN billing_plans bp ON bp.id = ss.plan_id
            WHERE s.organization_id = $1 AND ss.is_active
            ORDER BY s.created_at DESC, ss.student_id, ss.created_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn deactivate_subscription(&self, subscription_id: Uuid) -> Result<()> {
        let rows = sqlx::query("UPDATE student_subscriptions SET is_active = FALSE WHERE id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        expect_row(rows, "subscription", subscription_id)
    }

    async fn plan_usage(&self, organization_id: Uuid) -> Result<Vec<PlanUsage>> {
        let rows = sqlx::query_as::<_, PlanUsageRow>(
            r#"
            SELECT bp.id, bp.name, bp.is_active,
                   COUNT(ss.id) FILTER (WHERE ss.is_active) AS active_subscriptions
            FROM billing_plans bp
            LEFT JOIN student_subscriptions ss ON ss.plan_id = bp.id
            WHERE bp.organization_id = $1
            GROUP BY bp.id, bp.name, bp.is_active
            ORDER BY bp.name
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PlanUsage {
                plan: BillingPlan { id: row.id, name: row.name, is_active: row.is_active },
                active_subscriptions: row.active_subscriptions.max(0) as u64,
            })
            .collect())
    }

    async fn deactivate_plan(&self, plan_id: Uuid) -> Result<()> {
        let rows = sqlx::query("UPDATE billing_plans SET is_active = FALSE WHERE id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(DedupError::from_sqlx)?
            .rows_affected();

        expect_row(rows, "billing plan", plan_id)
    }

    async fn counts(&self, organization_id: Uuid) -> Result<OrganizationCounts> {
        let (students, active_students, active_subscriptions): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM students WHERE organization_id = $1),
                (SELECT COUNT(*) FROM students WHERE organization_id = $1 AND is_active),
                (SELECT COUNT(*) FROM student_subscriptions ss
                    JOIN students s ON s.id = ss.student_id
                    WHERE s.organization_id = $1 AND ss.is_active)
            "#,
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(OrganizationCounts {
            students: students.max(0) as u64,
            active_students: active_students.max(0) as u64,
            active_subscriptions: active_subscriptions.max(0) as u64,
        })
    }
}
