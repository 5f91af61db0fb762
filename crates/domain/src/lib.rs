//! Domain layer for the registration backend.
//!
//! This crate contains:
//! - Domain models (InvitationCode and its redemption state machine)
//! - The invitation store port and an in-memory implementation
//! - The invitation lifecycle service

pub mod models;
pub mod services;
