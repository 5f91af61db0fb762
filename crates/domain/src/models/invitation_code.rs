//! Invitation code domain models.
//!
//! An invitation code gates the registration review workflow. Its redemption
//! status is persisted as flat columns (`is_used`, `used_by`, `used_by_openid`,
//! `used_at`) but is modelled here as an explicit [`RedemptionState`] so that
//! every change of status goes through [`InvitationCode::apply`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Default validity window for seeded and generated codes (30 days).
pub const DEFAULT_VALIDITY_DAYS: i64 = 30;

/// Maximum length of an invitation code.
pub const MAX_CODE_LENGTH: usize = 64;

/// Length of randomly generated codes.
pub const GENERATED_CODE_LENGTH: usize = 8;

/// Who created an invitation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatorType {
    Admin,
    User,
}

impl CreatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreatorType::Admin => "admin",
            CreatorType::User => "user",
        }
    }
}

impl std::fmt::Display for CreatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CreatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(CreatorType::Admin),
            "user" => Ok(CreatorType::User),
            other => Err(format!("unknown creator type: {}", other)),
        }
    }
}

/// Identity of the user who redeemed a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Redemption {
    pub used_by: Option<String>,
    pub used_by_openid: Option<String>,
    pub used_at: DateTime<Utc>,
}

/// Redemption status of a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RedemptionState {
    Unused,
    Used(Redemption),
}

impl RedemptionState {
    /// Rebuilds the state from its persisted columns.
    ///
    /// Returns `None` when the columns violate the invariant: a used code must
    /// carry `used_at`, an unused code must carry none of the `used_*` fields.
    pub fn from_columns(
        is_used: bool,
        used_by: Option<String>,
        used_by_openid: Option<String>,
        used_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        match (is_used, used_at) {
            (true, Some(used_at)) => Some(RedemptionState::Used(Redemption {
                used_by,
                used_by_openid,
                used_at,
            })),
            (false, None) if used_by.is_none() && used_by_openid.is_none() => {
                Some(RedemptionState::Unused)
            }
            _ => None,
        }
    }

    pub fn is_used(&self) -> bool {
        matches!(self, RedemptionState::Used(_))
    }

    pub fn redemption(&self) -> Option<&Redemption> {
        match self {
            RedemptionState::Used(redemption) => Some(redemption),
            RedemptionState::Unused => None,
        }
    }
}

/// An event that moves a code between redemption states.
#[derive(Debug, Clone)]
pub enum InvitationEvent {
    /// A user consumes the code.
    Redeem(Redemption),
    /// An administrator returns a used code to the pool.
    Reset {
        now: DateTime<Utc>,
        validity_window: Duration,
    },
}

/// A transition rejected by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invitation code {0} has already been used")]
    AlreadyUsed(String),

    #[error("Invitation code {0} has expired")]
    Expired(String),

    #[error("Invitation code {0} is not used")]
    NotUsed(String),
}

/// An invitation code record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationCode {
    pub id: Uuid,
    pub code: String,
    pub state: RedemptionState,
    pub expire_at: DateTime<Utc>,
    pub created_by: i64,
    pub created_by_type: CreatorType,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InvitationCode {
    pub fn is_used(&self) -> bool {
        self.state.is_used()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Whether a user could redeem this code at `now`.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_expired_at(now)
    }

    /// Applies an event to the code, enforcing the redemption state machine.
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, event: InvitationEvent) -> Result<(), TransitionError> {
        match (&self.state, event) {
            (RedemptionState::Used(_), InvitationEvent::Redeem(_)) => {
                Err(TransitionError::AlreadyUsed(self.code.clone()))
            }
            (RedemptionState::Unused, InvitationEvent::Redeem(redemption)) => {
                if self.is_expired_at(redemption.used_at) {
                    return Err(TransitionError::Expired(self.code.clone()));
                }
                self.state = RedemptionState::Used(redemption);
                Ok(())
            }
            (
                RedemptionState::Used(_),
                InvitationEvent::Reset {
                    now,
                    validity_window,
                },
            ) => {
                self.state = RedemptionState::Unused;
                self.expire_at = now + validity_window;
                Ok(())
            }
            (RedemptionState::Unused, InvitationEvent::Reset { .. }) => {
                Err(TransitionError::NotUsed(self.code.clone()))
            }
        }
    }
}

/// Fields required to insert a new, unused invitation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvitationCode {
    pub code: String,
    pub expire_at: DateTime<Utc>,
    pub created_by: i64,
    pub created_by_type: CreatorType,
    pub notes: Option<String>,
}

/// Aggregate counters over all invitation codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct InvitationCodeStats {
    pub total: i64,
    pub used: i64,
    /// Unused codes whose expiry has passed.
    pub expired: i64,
}

impl InvitationCodeStats {
    /// Unused codes that can still be redeemed.
    pub fn available(&self) -> i64 {
        (self.total - self.used - self.expired).max(0)
    }

    /// Counts `codes` by status as of `now`.
    pub fn tally<'a>(
        codes: impl IntoIterator<Item = &'a InvitationCode>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::default();
        for code in codes {
            stats.total += 1;
            if code.is_used() {
                stats.used += 1;
            } else if code.is_expired_at(now) {
                stats.expired += 1;
            }
        }
        stats
    }
}

/// The codes one creator handed out, with their counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CreatorCodes {
    pub created_by: i64,
    pub created_by_type: CreatorType,
    pub codes: Vec<InvitationCode>,
    pub stats: InvitationCodeStats,
}

/// Request to generate a batch of random codes.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct GenerateCodesRequest {
    /// Number of codes to generate (1-100)
    #[validate(range(min = 1, max = 100, message = "count must be between 1 and 100"))]
    pub count: u32,

    #[validate(length(max = 255, message = "notes must be at most 255 characters"))]
    pub notes: Option<String>,

    /// Days until expiry (1-365, default: 30)
    #[validate(range(min = 1, max = 365, message = "validity_days must be between 1 and 365"))]
    pub validity_days: Option<i64>,
}

lazy_static::lazy_static! {
    static ref CODE_REGEX: regex::Regex = regex::Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

/// Checks that a code is non-empty, at most [`MAX_CODE_LENGTH`] characters and
/// made of letters, digits, `_` or `-`.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= MAX_CODE_LENGTH && CODE_REGEX.is_match(code)
}

/// Generate a random code of [`GENERATED_CODE_LENGTH`] characters.
pub fn generate_code() -> String {
    use rand::Rng;
    // Avoiding confusing chars: 0, O, I, 1, L
    const CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();

    (0..GENERATED_CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unused_code(expire_at: DateTime<Utc>) -> InvitationCode {
        InvitationCode {
            id: Uuid::new_v4(),
            code: "B1".to_string(),
            state: RedemptionState::Unused,
            expire_at,
            created_by: 0,
            created_by_type: CreatorType::Admin,
            notes: None,
            created_at: Utc::now(),
        }
    }

    fn redemption(at: DateTime<Utc>) -> Redemption {
        Redemption {
            used_by: Some("user42".to_string()),
            used_by_openid: Some("openid-42".to_string()),
            used_at: at,
        }
    }

    #[test]
    fn test_from_columns_unused() {
        let state = RedemptionState::from_columns(false, None, None, None);
        assert_eq!(state, Some(RedemptionState::Unused));
    }

    #[test]
    fn test_from_columns_used() {
        let now = Utc::now();
        let state =
            RedemptionState::from_columns(true, Some("user42".into()), None, Some(now)).unwrap();
        assert!(state.is_used());
        assert_eq!(state.redemption().unwrap().used_by.as_deref(), Some("user42"));
    }

    #[test]
    fn test_from_columns_rejects_inconsistent_rows() {
        let now = Utc::now();
        // used without a timestamp
        assert!(RedemptionState::from_columns(true, Some("u".into()), None, None).is_none());
        // unused with leftover redemption data
        assert!(RedemptionState::from_columns(false, Some("u".into()), None, None).is_none());
        assert!(RedemptionState::from_columns(false, None, Some("o".into()), None).is_none());
        assert!(RedemptionState::from_columns(false, None, None, Some(now)).is_none());
    }

    #[test]
    fn test_redeem_unused_code() {
        let now = Utc::now();
        let mut code = unused_code(now + Duration::days(1));
        code.apply(InvitationEvent::Redeem(redemption(now))).unwrap();
        assert!(code.is_used());
        assert_eq!(code.state.redemption().unwrap().used_at, now);
    }

    #[test]
    fn test_redeem_used_code_fails() {
        let now = Utc::now();
        let mut code = unused_code(now + Duration::days(1));
        code.apply(InvitationEvent::Redeem(redemption(now))).unwrap();

        let err = code
            .apply(InvitationEvent::Redeem(redemption(now)))
            .unwrap_err();
        assert_eq!(err, TransitionError::AlreadyUsed("B1".to_string()));
    }

    #[test]
    fn test_redeem_expired_code_fails_and_leaves_state() {
        let now = Utc::now();
        let mut code = unused_code(now - Duration::seconds(1));
        let before = code.clone();

        let err = code
            .apply(InvitationEvent::Redeem(redemption(now)))
            .unwrap_err();
        assert_eq!(err, TransitionError::Expired("B1".to_string()));
        assert_eq!(code, before);
    }

    #[test]
    fn test_reset_used_code_clears_redemption_and_extends_expiry() {
        let now = Utc::now();
        let mut code = unused_code(now + Duration::days(1));
        code.apply(InvitationEvent::Redeem(redemption(now))).unwrap();

        code.apply(InvitationEvent::Reset {
            now,
            validity_window: Duration::days(DEFAULT_VALIDITY_DAYS),
        })
        .unwrap();

        assert_eq!(code.state, RedemptionState::Unused);
        assert_eq!(code.expire_at, now + Duration::days(30));
    }

    #[test]
    fn test_reset_unused_code_is_rejected() {
        let now = Utc::now();
        let mut code = unused_code(now + Duration::days(1));
        let err = code
            .apply(InvitationEvent::Reset {
                now,
                validity_window: Duration::days(30),
            })
            .unwrap_err();
        assert_eq!(err, TransitionError::NotUsed("B1".to_string()));
        assert_eq!(code.expire_at, now + Duration::days(1));
    }

    #[test]
    fn test_is_redeemable_at() {
        let now = Utc::now();
        assert!(unused_code(now + Duration::hours(1)).is_redeemable_at(now));
        assert!(!unused_code(now).is_redeemable_at(now));
    }

    #[test]
    fn test_stats_available() {
        let stats = InvitationCodeStats {
            total: 10,
            used: 4,
            expired: 2,
        };
        assert_eq!(stats.available(), 4);
        assert_eq!(InvitationCodeStats::default().available(), 0);
    }

    #[test]
    fn test_stats_tally() {
        let now = Utc::now();
        let mut used = unused_code(now + Duration::days(1));
        used.apply(InvitationEvent::Redeem(redemption(now))).unwrap();
        let codes = vec![
            used,
            unused_code(now + Duration::days(1)),
            unused_code(now - Duration::days(1)),
        ];

        let stats = InvitationCodeStats::tally(&codes, now);
        assert_eq!(
            stats,
            InvitationCodeStats {
                total: 3,
                used: 1,
                expired: 1,
            }
        );
        assert_eq!(stats.available(), 1);
    }

    #[test]
    fn test_creator_type_round_trip() {
        assert_eq!("admin".parse::<CreatorType>().unwrap(), CreatorType::Admin);
        assert_eq!(CreatorType::User.to_string(), "user");
        assert!("robot".parse::<CreatorType>().is_err());
    }

    #[test]
    fn test_is_valid_code() {
        assert!(is_valid_code("TEST_PASS_001"));
        assert!(is_valid_code("review-reject-1"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("has space"));
        assert!(!is_valid_code(&"A".repeat(MAX_CODE_LENGTH + 1)));
    }

    #[test]
    fn test_generate_code_format() {
        let code = generate_code();
        assert_eq!(code.len(), GENERATED_CODE_LENGTH);
        assert!(is_valid_code(&code));
        for c in code.chars() {
            assert!(c.is_ascii_uppercase() || c.is_ascii_digit());
            assert!(!matches!(c, 'O' | 'I' | 'L' | '0' | '1'), "Invalid char: {}", c);
        }
    }

    #[test]
    fn test_generate_codes_request_validation() {
        let valid = GenerateCodesRequest {
            count: 10,
            notes: Some("batch".to_string()),
            validity_days: Some(30),
        };
        assert!(valid.validate().is_ok());

        let too_many = GenerateCodesRequest {
            count: 500,
            notes: None,
            validity_days: None,
        };
        assert!(too_many.validate().is_err());

        let zero_days = GenerateCodesRequest {
            count: 1,
            notes: None,
            validity_days: Some(0),
        };
        assert!(zero_days.validate().is_err());
    }
}
