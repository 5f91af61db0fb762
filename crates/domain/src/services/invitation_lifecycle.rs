//! Invitation lifecycle service.
//!
//! Creates, seeds, redeems and resets invitation codes. All changes to the
//! redemption state and expiry of a code go through this service.

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::models::{
    generate_code, is_valid_code, CreatorCodes, CreatorType, GenerateCodesRequest,
    InvitationCode, InvitationCodeStats, InvitationEvent, NewInvitationCode, Redemption,
    TransitionError, DEFAULT_VALIDITY_DAYS,
};
use crate::services::invitation_store::{InvitationStore, StoreError};

/// Attempts per generated code before giving up on collisions.
const MAX_GENERATE_ATTEMPTS: usize = 16;

/// Errors returned by the lifecycle service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Invalid invitation code: {0:?}")]
    InvalidCode(String),

    #[error("Validity window must be positive")]
    InvalidValidityWindow,

    #[error("Invitation code not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of seeding a single code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The code did not exist and was created.
    Created,
    /// The code was used and has been returned to the unused state.
    Reset,
    /// The code exists and is unused; nothing changed.
    AlreadyActive,
}

impl std::fmt::Display for SeedOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedOutcome::Created => write!(f, "created"),
            SeedOutcome::Reset => write!(f, "reset"),
            SeedOutcome::AlreadyActive => write!(f, "already active"),
        }
    }
}

/// Provenance, notes and validity shared by the codes of one seed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedTemplate {
    pub created_by: i64,
    pub created_by_type: CreatorType,
    pub notes: Option<String>,
    pub validity_window: Duration,
}

impl SeedTemplate {
    /// Admin-created codes valid for [`DEFAULT_VALIDITY_DAYS`].
    pub fn admin(notes: impl Into<String>) -> Self {
        Self {
            created_by: 0,
            created_by_type: CreatorType::Admin,
            notes: Some(notes.into()),
            validity_window: Duration::days(DEFAULT_VALIDITY_DAYS),
        }
    }

    pub fn with_validity_window(mut self, validity_window: Duration) -> Self {
        self.validity_window = validity_window;
        self
    }
}

/// Lifecycle manager for invitation codes backed by an [`InvitationStore`].
#[derive(Debug, Clone)]
pub struct InvitationLifecycle<S> {
    store: S,
}

impl<S: InvitationStore> InvitationLifecycle<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ensures `code` exists and is unused.
    ///
    /// - absent: created unused with `expire_at = now + validity_window`
    /// - used: reset to unused and `expire_at` refreshed
    /// - unused: left untouched
    ///
    /// A lost insert race is settled by re-reading the winner's record. A reset
    /// that finds the record changed since it was read is retried once against
    /// a fresh read.
    pub async fn ensure_seeded(
        &self,
        code: &str,
        template: &SeedTemplate,
    ) -> Result<SeedOutcome, LifecycleError> {
        if !is_valid_code(code) {
            return Err(LifecycleError::InvalidCode(code.to_string()));
        }
        if template.validity_window <= Duration::zero() {
            return Err(LifecycleError::InvalidValidityWindow);
        }

        if let Some(existing) = self.store.get_by_code(code).await? {
            return self.settle_existing(existing, template).await;
        }

        let new_code = NewInvitationCode {
            code: code.to_string(),
            expire_at: Utc::now() + template.validity_window,
            created_by: template.created_by,
            created_by_type: template.created_by_type,
            notes: template.notes.clone(),
        };

        match self.store.create(new_code).await {
            Ok(record) => {
                info!(
                    code = %record.code,
                    expire_at = %record.expire_at,
                    "Invitation code created"
                );
                Ok(SeedOutcome::Created)
            }
            Err(StoreError::DuplicateCode(_)) => {
                warn!(code = %code, "Invitation code created concurrently, re-reading");
                let existing = self.reload(code).await?;
                self.settle_existing(existing, template).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reload(&self, code: &str) -> Result<InvitationCode, LifecycleError> {
        Ok(self
            .store
            .get_by_code(code)
            .await?
            .ok_or_else(|| StoreError::Missing(code.to_string()))?)
    }

    async fn settle_existing(
        &self,
        record: InvitationCode,
        template: &SeedTemplate,
    ) -> Result<SeedOutcome, LifecycleError> {
        match self.try_settle(record, template).await {
            Err(LifecycleError::Store(StoreError::Conflict(code))) => {
                warn!(code = %code, "Invitation code changed during reset, re-reading");
                let fresh = self.reload(&code).await?;
                self.try_settle(fresh, template).await
            }
            other => other,
        }
    }

    async fn try_settle(
        &self,
        mut record: InvitationCode,
        template: &SeedTemplate,
    ) -> Result<SeedOutcome, LifecycleError> {
        let now = Utc::now();

        if !record.is_used() {
            if record.is_expired_at(now) {
                warn!(
                    code = %record.code,
                    expire_at = %record.expire_at,
                    "Invitation code is unused but expired; it is only refreshed once used"
                );
            }
            debug!(code = %record.code, "Invitation code already active");
            return Ok(SeedOutcome::AlreadyActive);
        }

        let expected = record.state.clone();
        record.apply(InvitationEvent::Reset {
            now,
            validity_window: template.validity_window,
        })?;
        self.store.commit_mutation(&expected, &record).await?;

        info!(code = %record.code, expire_at = %record.expire_at, "Invitation code reset");
        Ok(SeedOutcome::Reset)
    }

    /// Redeems `code` for a user.
    ///
    /// Concurrent redemptions of the same code cannot both succeed.
    pub async fn redeem(
        &self,
        code: &str,
        used_by: Option<String>,
        used_by_openid: Option<String>,
    ) -> Result<InvitationCode, LifecycleError> {
        let mut record = self
            .store
            .get_by_code(code)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(code.to_string()))?;

        let redemption = Redemption {
            used_by,
            used_by_openid,
            used_at: Utc::now(),
        };
        record.apply(InvitationEvent::Redeem(redemption.clone()))?;

        if !self.store.mark_used(code, &redemption).await? {
            // Another redemption won between the read and the write
            return Err(TransitionError::AlreadyUsed(code.to_string()).into());
        }

        info!(code = %code, "Invitation code redeemed");
        Ok(record)
    }

    /// Generates `request.count` random unused codes.
    pub async fn generate(
        &self,
        request: &GenerateCodesRequest,
        created_by: i64,
        created_by_type: CreatorType,
    ) -> Result<Vec<InvitationCode>, LifecycleError> {
        request
            .validate()
            .map_err(|e| LifecycleError::InvalidRequest(e.to_string()))?;

        let validity_days = request.validity_days.unwrap_or(DEFAULT_VALIDITY_DAYS);
        let expire_at = Utc::now() + Duration::days(validity_days);
        let mut created = Vec::with_capacity(request.count as usize);

        for _ in 0..request.count {
            let mut attempts = 0;
            let record = loop {
                attempts += 1;
                let new_code = NewInvitationCode {
                    code: generate_code(),
                    expire_at,
                    created_by,
                    created_by_type,
                    notes: request.notes.clone(),
                };
                match self.store.create(new_code).await {
                    Ok(record) => break record,
                    Err(StoreError::DuplicateCode(code)) if attempts < MAX_GENERATE_ATTEMPTS => {
                        debug!(code = %code, attempts, "Generated code collided, retrying");
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            created.push(record);
        }

        info!(count = created.len(), "Invitation codes generated");
        Ok(created)
    }

    pub async fn list(
        &self,
        include_used: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvitationCode>, LifecycleError> {
        Ok(self.store.list(include_used, limit, offset).await?)
    }

    pub async fn stats(&self) -> Result<InvitationCodeStats, LifecycleError> {
        Ok(self.store.stats(Utc::now()).await?)
    }

    /// Codes handed out by one creator, with their counters.
    pub async fn creator_codes(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
    ) -> Result<CreatorCodes, LifecycleError> {
        let codes = self
            .store
            .list_by_creator(created_by, created_by_type)
            .await?;
        let stats = self
            .store
            .stats_by_creator(created_by, created_by_type, Utc::now())
            .await?;
        Ok(CreatorCodes {
            created_by,
            created_by_type,
            codes,
            stats,
        })
    }
}
