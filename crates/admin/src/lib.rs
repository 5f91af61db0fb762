//! Invitation code administration for the registration backend.
//!
//! The `register-admin` binary seeds the review bypass / reject codes and
//! offers generate, list and stats commands over the same lifecycle service.

pub mod args;
pub mod commands;
pub mod config;
pub mod logging;
pub mod seed;
