//! spacekeeper - community management agent for room-based federated chat.
//!
//! Keeps per-user administrative state (activity, power levels, bans,
//! verification) consistent across every room of a space, and orchestrates
//! room lifecycle changes that survive interruption.

pub mod censor;
pub mod commands;
pub mod community;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod outcome;
pub mod policy;
pub mod power;
pub mod queue;
pub mod tracker;
pub mod transport;
pub mod verification;
