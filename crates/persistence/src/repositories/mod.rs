//! Repository implementations for database operations.

pub mod invitation_code;

pub use invitation_code::InvitationCodeRepository;
