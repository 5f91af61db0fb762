//! Entity definitions (database row mappings).

pub mod invitation_code;

pub use invitation_code::{InvitationCodeEntity, InvitationCodeStatsEntity};
