//! Invitation code entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{CreatorType, InvitationCode, InvitationCodeStats, RedemptionState};
use domain::services::StoreError;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the invitation_codes table.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationCodeEntity {
    pub id: Uuid,
    pub code: String,
    pub is_used: bool,
    pub used_by: Option<String>,
    pub used_by_openid: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub expire_at: DateTime<Utc>,
    pub created_by: i64,
    pub created_by_type: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<InvitationCodeEntity> for InvitationCode {
    type Error = StoreError;

    fn try_from(entity: InvitationCodeEntity) -> Result<Self, Self::Error> {
        let state = RedemptionState::from_columns(
            entity.is_used,
            entity.used_by,
            entity.used_by_openid,
            entity.used_at,
        )
        .ok_or_else(|| {
            StoreError::Inconsistent(format!(
                "{}: redemption columns do not match is_used={}",
                entity.code, entity.is_used
            ))
        })?;

        let created_by_type = entity
            .created_by_type
            .parse::<CreatorType>()
            .map_err(|e| StoreError::Inconsistent(format!("{}: {}", entity.code, e)))?;

        Ok(InvitationCode {
            id: entity.id,
            code: entity.code,
            state,
            expire_at: entity.expire_at,
            created_by: entity.created_by,
            created_by_type,
            notes: entity.notes,
            created_at: entity.created_at,
        })
    }
}

/// Aggregate row returned by the stats query.
#[derive(Debug, Clone, FromRow)]
pub struct InvitationCodeStatsEntity {
    pub total: i64,
    pub used: i64,
    pub expired: i64,
}

impl From<InvitationCodeStatsEntity> for InvitationCodeStats {
    fn from(entity: InvitationCodeStatsEntity) -> Self {
        Self {
            total: entity.total,
            used: entity.used,
            expired: entity.expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> InvitationCodeEntity {
        InvitationCodeEntity {
            id: Uuid::new_v4(),
            code: "B1".to_string(),
            is_used: false,
            used_by: None,
            used_by_openid: None,
            used_at: None,
            expire_at: Utc::now(),
            created_by: 0,
            created_by_type: "admin".to_string(),
            notes: Some("auto-approve review code".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unused_row_maps_to_unused_state() {
        let code = InvitationCode::try_from(entity()).unwrap();
        assert_eq!(code.state, RedemptionState::Unused);
        assert_eq!(code.created_by_type, CreatorType::Admin);
    }

    #[test]
    fn test_used_row_maps_to_used_state() {
        let mut row = entity();
        row.is_used = true;
        row.used_by = Some("user42".to_string());
        row.used_at = Some(Utc::now());

        let code = InvitationCode::try_from(row).unwrap();
        assert!(code.is_used());
        assert_eq!(
            code.state.redemption().unwrap().used_by.as_deref(),
            Some("user42")
        );
    }

    #[test]
    fn test_inconsistent_row_is_rejected() {
        let mut row = entity();
        row.is_used = true;

        let err = InvitationCode::try_from(row).unwrap_err();
        assert!(matches!(err, StoreError::Inconsistent(_)));
    }

    #[test]
    fn test_unknown_creator_type_is_rejected() {
        let mut row = entity();
        row.created_by_type = "robot".to_string();

        assert!(matches!(
            InvitationCode::try_from(row),
            Err(StoreError::Inconsistent(_))
        ));
    }
}
