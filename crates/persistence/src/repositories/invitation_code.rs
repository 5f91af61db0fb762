//! Repository for invitation code database operations.

use chrono::{DateTime, Utc};
use domain::models::{
    CreatorType, InvitationCode, InvitationCodeStats, NewInvitationCode, Redemption,
    RedemptionState,
};
use domain::services::{InvitationStore, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{InvitationCodeEntity, InvitationCodeStatsEntity};
use crate::metrics::{record_query_error, QueryTimer};

const SELECT_COLUMNS: &str = "id, code, is_used, used_by, used_by_openid, used_at, expire_at, \
                              created_by, created_by_type, notes, created_at";

/// PostgreSQL unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Repository for invitation code operations.
#[derive(Clone)]
pub struct InvitationCodeRepository {
    pool: PgPool,
}

impl InvitationCodeRepository {
    /// Creates a new invitation code repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_by_code(&self, code: &str) -> Result<Option<InvitationCodeEntity>, sqlx::Error> {
        sqlx::query_as::<_, InvitationCodeEntity>(&format!(
            "SELECT {} FROM invitation_codes WHERE code = $1",
            SELECT_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
    }

    async fn exists(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM invitation_codes WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
    }
}

fn collect_codes(
    rows: Result<Vec<InvitationCodeEntity>, sqlx::Error>,
) -> Result<Vec<InvitationCode>, StoreError> {
    match rows {
        Ok(rows) => rows
            .into_iter()
            .map(InvitationCode::try_from)
            .collect::<Result<Vec<_>, _>>(),
        Err(e) => Err(StoreError::Storage(e.to_string())),
    }
}

/// Maps a sqlx error to a store error for the given code.
pub(crate) fn map_sqlx_error(err: sqlx::Error, code: &str) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::DuplicateCode(code.to_string())
        }
        sqlx::Error::RowNotFound => StoreError::Missing(code.to_string()),
        other => StoreError::Storage(other.to_string()),
    }
}

fn error_kind(err: &StoreError) -> &'static str {
    match err {
        StoreError::DuplicateCode(_) => "duplicate",
        StoreError::Missing(_) => "missing",
        StoreError::Conflict(_) => "conflict",
        StoreError::Inconsistent(_) => "inconsistent",
        StoreError::Storage(_) => "storage",
    }
}

/// Records the duration of a finished query and counts its failure, if any.
fn finish<T>(timer: QueryTimer, result: Result<T, StoreError>) -> Result<T, StoreError> {
    if let Err(e) = &result {
        record_query_error(timer.query_name(), error_kind(e));
        tracing::warn!(query = timer.query_name(), error = %e, "Invitation code query failed");
    }
    timer.record();
    result
}

#[async_trait::async_trait]
impl InvitationStore for InvitationCodeRepository {
    async fn get_by_code(&self, code: &str) -> Result<Option<InvitationCode>, StoreError> {
        let timer = QueryTimer::new("invitation_codes.get_by_code");
        let result = match self.fetch_by_code(code).await {
            Ok(Some(entity)) => InvitationCode::try_from(entity).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(map_sqlx_error(e, code)),
        };
        finish(timer, result)
    }

    async fn create(&self, new_code: NewInvitationCode) -> Result<InvitationCode, StoreError> {
        let timer = QueryTimer::new("invitation_codes.create");
        let result = sqlx::query_as::<_, InvitationCodeEntity>(&format!(
            r#"
            INSERT INTO invitation_codes (code, is_used, expire_at, created_by, created_by_type, notes)
            VALUES ($1, FALSE, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(&new_code.code)
        .bind(new_code.expire_at)
        .bind(new_code.created_by)
        .bind(new_code.created_by_type.as_str())
        .bind(&new_code.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, &new_code.code))
        .and_then(InvitationCode::try_from);
        finish(timer, result)
    }

    async fn commit_mutation(
        &self,
        expected: &RedemptionState,
        record: &InvitationCode,
    ) -> Result<(), StoreError> {
        let timer = QueryTimer::new("invitation_codes.commit_mutation");
        let redemption = record.state.redemption();
        let expected_used_at = expected.redemption().map(|r| r.used_at);

        // Single statement: the used/unused columns change together or not at
        // all, and only while the row still holds the state that was read
        let result = sqlx::query(
            r#"
            UPDATE invitation_codes
            SET is_used = $2,
                used_by = $3,
                used_by_openid = $4,
                used_at = $5,
                expire_at = $6,
                updated_at = NOW()
            WHERE id = $1
              AND is_used = $7
              AND used_at IS NOT DISTINCT FROM $8
            "#,
        )
        .bind(record.id)
        .bind(record.is_used())
        .bind(redemption.and_then(|r| r.used_by.as_deref()))
        .bind(redemption.and_then(|r| r.used_by_openid.as_deref()))
        .bind(redemption.map(|r| r.used_at))
        .bind(record.expire_at)
        .bind(expected.is_used())
        .bind(expected_used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, &record.code));

        let result = match result {
            Ok(done) if done.rows_affected() > 0 => Ok(()),
            Ok(_) => match self.exists(record.id).await {
                Ok(true) => Err(StoreError::Conflict(record.code.clone())),
                Ok(false) => Err(StoreError::Missing(record.code.clone())),
                Err(e) => Err(map_sqlx_error(e, &record.code)),
            },
            Err(e) => Err(e),
        };
        finish(timer, result)
    }

    async fn mark_used(&self, code: &str, redemption: &Redemption) -> Result<bool, StoreError> {
        let timer = QueryTimer::new("invitation_codes.mark_used");
        let result = sqlx::query(
            r#"
            UPDATE invitation_codes
            SET is_used = TRUE,
                used_by = $2,
                used_by_openid = $3,
                used_at = $4,
                updated_at = NOW()
            WHERE code = $1 AND is_used = FALSE AND expire_at > $4
            "#,
        )
        .bind(code)
        .bind(&redemption.used_by)
        .bind(&redemption.used_by_openid)
        .bind(redemption.used_at)
        .execute(&self.pool)
        .await
        .map(|done| done.rows_affected() > 0)
        .map_err(|e| map_sqlx_error(e, code));
        finish(timer, result)
    }

    async fn list(
        &self,
        include_used: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvitationCode>, StoreError> {
        let timer = QueryTimer::new("invitation_codes.list");
        let filter = if include_used {
            ""
        } else {
            "WHERE is_used = FALSE"
        };

        let rows = sqlx::query_as::<_, InvitationCodeEntity>(&format!(
            r#"
            SELECT {}
            FROM invitation_codes
            {}
            ORDER BY created_at DESC, code
            LIMIT $1 OFFSET $2
            "#,
            SELECT_COLUMNS, filter
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;

        finish(timer, collect_codes(rows))
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<InvitationCodeStats, StoreError> {
        let timer = QueryTimer::new("invitation_codes.stats");
        let result = sqlx::query_as::<_, InvitationCodeStatsEntity>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE is_used) AS used,
                COUNT(*) FILTER (WHERE NOT is_used AND expire_at <= $1) AS expired
            FROM invitation_codes
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map(InvitationCodeStats::from)
        .map_err(|e| StoreError::Storage(e.to_string()));
        finish(timer, result)
    }

    async fn list_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
    ) -> Result<Vec<InvitationCode>, StoreError> {
        let timer = QueryTimer::new("invitation_codes.list_by_creator");
        let rows = sqlx::query_as::<_, InvitationCodeEntity>(&format!(
            r#"
            SELECT {}
            FROM invitation_codes
            WHERE created_by = $1 AND created_by_type = $2
            ORDER BY created_at DESC, code
            "#,
            SELECT_COLUMNS
        ))
        .bind(created_by)
        .bind(created_by_type.as_str())
        .fetch_all(&self.pool)
        .await;

        finish(timer, collect_codes(rows))
    }

    async fn stats_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
        now: DateTime<Utc>,
    ) -> Result<InvitationCodeStats, StoreError> {
        let timer = QueryTimer::new("invitation_codes.stats_by_creator");
        let result = sqlx::query_as::<_, InvitationCodeStatsEntity>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE is_used) AS used,
                COUNT(*) FILTER (WHERE NOT is_used AND expire_at <= $3) AS expired
            FROM invitation_codes
            WHERE created_by = $1 AND created_by_type = $2
            "#,
        )
        .bind(created_by)
        .bind(created_by_type.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map(InvitationCodeStats::from)
        .map_err(|e| StoreError::Storage(e.to_string()));
        finish(timer, result)
    }
}
