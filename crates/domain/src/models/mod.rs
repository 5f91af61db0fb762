//! Domain models for the registration backend.

pub mod invitation_code;

pub use invitation_code::{
    generate_code, is_valid_code, CreatorCodes, CreatorType, GenerateCodesRequest,
    InvitationCode, InvitationCodeStats, InvitationEvent, NewInvitationCode, Redemption,
    RedemptionState, TransitionError, DEFAULT_VALIDITY_DAYS, GENERATED_CODE_LENGTH,
    MAX_CODE_LENGTH,
};
