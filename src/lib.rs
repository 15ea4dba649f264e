//! Lifecycle manager for temporary voice channels.
//!
//! Members joining a guild's creator channel get a channel of their own, which
//! is torn down once the last member leaves. Owners can hand the channel over,
//! grant or deny access and edit its properties. Live state is tracked in a
//! [`registry::TempResourceRegistry`] and mirrored to a
//! [`store::PersistentStore`]; [`reconcile::ReconciliationService`] repairs the
//! two against the [`platform::ExternalPlatform`] at startup.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod ownership;
pub mod platform;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod service;
pub mod store;

pub use error::{Error, Result};
