//! Invitation store port.
//!
//! The store exclusively owns persisted invitation code rows. The lifecycle
//! service is its only writer for the redemption and expiry fields.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    CreatorType, InvitationCode, InvitationCodeStats, NewInvitationCode, Redemption,
    RedemptionState,
};

/// Errors reported by an invitation store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Invitation code already exists: {0}")]
    DuplicateCode(String),

    #[error("Invitation code not found: {0}")]
    Missing(String),

    #[error("Invitation code changed concurrently: {0}")]
    Conflict(String),

    #[error("Inconsistent invitation record: {0}")]
    Inconsistent(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Durable keyed storage for invitation codes.
#[async_trait::async_trait]
pub trait InvitationStore: Send + Sync {
    /// Exact-match lookup. A miss is `Ok(None)`.
    async fn get_by_code(&self, code: &str) -> Result<Option<InvitationCode>, StoreError>;

    /// Inserts a new unused code. Fails with [`StoreError::DuplicateCode`] if
    /// the code already exists.
    async fn create(&self, new_code: NewInvitationCode) -> Result<InvitationCode, StoreError>;

    /// Persists the state and expiry of an existing record in one write.
    ///
    /// The write applies only while the stored state still equals `expected`,
    /// the state the mutation was computed from. Otherwise it fails with
    /// [`StoreError::Conflict`], or [`StoreError::Missing`] if the row is gone.
    async fn commit_mutation(
        &self,
        expected: &RedemptionState,
        record: &InvitationCode,
    ) -> Result<(), StoreError>;

    /// Marks an unused, unexpired code as used.
    ///
    /// Returns `false` if the code was already used or had expired at
    /// `redemption.used_at`.
    async fn mark_used(&self, code: &str, redemption: &Redemption) -> Result<bool, StoreError>;

    /// Lists codes, newest first.
    async fn list(
        &self,
        include_used: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvitationCode>, StoreError>;

    /// Counts codes by status as of `now`.
    async fn stats(&self, now: DateTime<Utc>) -> Result<InvitationCodeStats, StoreError>;

    /// Lists every code created by one creator, newest first.
    async fn list_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
    ) -> Result<Vec<InvitationCode>, StoreError>;

    /// Counts one creator's codes by status as of `now`.
    async fn stats_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
        now: DateTime<Utc>,
    ) -> Result<InvitationCodeStats, StoreError>;
}

#[async_trait::async_trait]
impl<S: InvitationStore + ?Sized> InvitationStore for std::sync::Arc<S> {
    async fn get_by_code(&self, code: &str) -> Result<Option<InvitationCode>, StoreError> {
        (**self).get_by_code(code).await
    }

    async fn create(&self, new_code: NewInvitationCode) -> Result<InvitationCode, StoreError> {
        (**self).create(new_code).await
    }

    async fn commit_mutation(
        &self,
        expected: &RedemptionState,
        record: &InvitationCode,
    ) -> Result<(), StoreError> {
        (**self).commit_mutation(expected, record).await
    }

    async fn mark_used(&self, code: &str, redemption: &Redemption) -> Result<bool, StoreError> {
        (**self).mark_used(code, redemption).await
    }

    async fn list(
        &self,
        include_used: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvitationCode>, StoreError> {
        (**self).list(include_used, limit, offset).await
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<InvitationCodeStats, StoreError> {
        (**self).stats(now).await
    }

    async fn list_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
    ) -> Result<Vec<InvitationCode>, StoreError> {
        (**self).list_by_creator(created_by, created_by_type).await
    }

    async fn stats_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
        now: DateTime<Utc>,
    ) -> Result<InvitationCodeStats, StoreError> {
        (**self)
            .stats_by_creator(created_by, created_by_type, now)
            .await
    }
}

/// Process-local invitation store for development and testing.
///
/// Can simulate commit failures and a concurrent writer that gets in first,
/// either on insert or between a read and the following commit.
#[derive(Debug, Default)]
pub struct InMemoryInvitationStore {
    records: Mutex<HashMap<String, InvitationCode>>,
    racing_inserts: Mutex<HashMap<String, InvitationCode>>,
    racing_commits: Mutex<HashMap<String, InvitationCode>>,
    fail_commits: AtomicBool,
}

impl InMemoryInvitationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, replacing any record with the same code.
    pub fn insert(&self, record: InvitationCode) -> Result<(), StoreError> {
        self.records()?.insert(record.code.clone(), record);
        Ok(())
    }

    /// Returns a copy of the record for `code`, if any.
    pub fn snapshot(&self, code: &str) -> Result<Option<InvitationCode>, StoreError> {
        Ok(self.records()?.get(code).cloned())
    }

    pub fn len(&self) -> usize {
        self.records().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every subsequent `commit_mutation` fail with a storage error.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Arranges for the next `create` of `record.code` to lose a race: the
    /// record is stored as if another writer inserted it first, and the
    /// create fails with [`StoreError::DuplicateCode`].
    pub fn race_next_create(&self, record: InvitationCode) -> Result<(), StoreError> {
        lock(&self.racing_inserts)?.insert(record.code.clone(), record);
        Ok(())
    }

    /// Arranges for `record` to be written just before the next
    /// `commit_mutation` of `record.code`, as if another writer committed
    /// between the caller's read and its write.
    pub fn race_next_commit(&self, record: InvitationCode) -> Result<(), StoreError> {
        lock(&self.racing_commits)?.insert(record.code.clone(), record);
        Ok(())
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<String, InvitationCode>>, StoreError> {
        lock(&self.records)
    }

    fn by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
    ) -> Result<Vec<InvitationCode>, StoreError> {
        let mut codes: Vec<InvitationCode> = self
            .records()?
            .values()
            .filter(|r| r.created_by == created_by && r.created_by_type == created_by_type)
            .cloned()
            .collect();
        sort_newest_first(&mut codes);
        Ok(codes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
}

fn sort_newest_first(codes: &mut [InvitationCode]) {
    codes.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.code.cmp(&b.code))
    });
}

#[async_trait::async_trait]
impl InvitationStore for InMemoryInvitationStore {
    async fn get_by_code(&self, code: &str) -> Result<Option<InvitationCode>, StoreError> {
        self.snapshot(code)
    }

    async fn create(&self, new_code: NewInvitationCode) -> Result<InvitationCode, StoreError> {
        let raced = lock(&self.racing_inserts)?.remove(&new_code.code);
        let mut records = self.records()?;

        if let Some(winner) = raced {
            tracing::debug!(code = %winner.code, "In-memory store simulating lost insert race");
            records.insert(winner.code.clone(), winner);
        }

        if records.contains_key(&new_code.code) {
            return Err(StoreError::DuplicateCode(new_code.code));
        }

        let record = InvitationCode {
            id: Uuid::new_v4(),
            code: new_code.code,
            state: RedemptionState::Unused,
            expire_at: new_code.expire_at,
            created_by: new_code.created_by,
            created_by_type: new_code.created_by_type,
            notes: new_code.notes,
            created_at: Utc::now(),
        };
        records.insert(record.code.clone(), record.clone());
        Ok(record)
    }

    async fn commit_mutation(
        &self,
        expected: &RedemptionState,
        record: &InvitationCode,
    ) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("simulated commit failure".to_string()));
        }

        let raced = lock(&self.racing_commits)?.remove(&record.code);
        let mut records = self.records()?;

        if let Some(winner) = raced {
            tracing::debug!(code = %winner.code, "In-memory store simulating concurrent commit");
            records.insert(winner.code.clone(), winner);
        }

        let stored = records
            .get_mut(&record.code)
            .filter(|stored| stored.id == record.id)
            .ok_or_else(|| StoreError::Missing(record.code.clone()))?;
        if stored.state != *expected {
            return Err(StoreError::Conflict(record.code.clone()));
        }
        stored.state = record.state.clone();
        stored.expire_at = record.expire_at;
        Ok(())
    }

    async fn mark_used(&self, code: &str, redemption: &Redemption) -> Result<bool, StoreError> {
        let mut records = self.records()?;
        match records.get_mut(code) {
            Some(stored) if stored.is_redeemable_at(redemption.used_at) => {
                stored.state = RedemptionState::Used(redemption.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(
        &self,
        include_used: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InvitationCode>, StoreError> {
        let mut codes: Vec<InvitationCode> = self
            .records()?
            .values()
            .filter(|record| include_used || !record.is_used())
            .cloned()
            .collect();
        sort_newest_first(&mut codes);

        Ok(codes
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<InvitationCodeStats, StoreError> {
        Ok(InvitationCodeStats::tally(self.records()?.values(), now))
    }

    async fn list_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
    ) -> Result<Vec<InvitationCode>, StoreError> {
        self.by_creator(created_by, created_by_type)
    }

    async fn stats_by_creator(
        &self,
        created_by: i64,
        created_by_type: CreatorType,
        now: DateTime<Utc>,
    ) -> Result<InvitationCodeStats, StoreError> {
        let codes = self.by_creator(created_by, created_by_type)?;
        Ok(InvitationCodeStats::tally(&codes, now))
    }
}
