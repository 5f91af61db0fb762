//! Domain services for the registration backend.
//!
//! Services contain business logic that operates on domain models.

pub mod invitation_lifecycle;
pub mod invitation_store;

pub use invitation_lifecycle::{InvitationLifecycle, LifecycleError, SeedOutcome, SeedTemplate};
pub use invitation_store::{InMemoryInvitationStore, InvitationStore, StoreError};
