//! Threadkeep Discord - Discord record store and bot surface
//!
//! This crate backs the core `RecordStore` with the Discord API and wires
//! gateway events and control-card interactions into threadkeep.
//!
//! ## Configuration
//!
//! The bot token and access lists come from the environment via
//! `DiscordBotConfig::from_env()`; everything else comes from the TOML
//! config loaded by `threadkeep_core::config`.

pub mod bot;
pub mod config;
pub mod convert;
pub mod error;
pub mod handler;
pub mod interactions;
pub mod store;

pub use bot::ThreadkeepBot;
pub use config::DiscordBotConfig;
pub use error::{DiscordError, Result};
pub use handler::ThreadkeepHandler;
pub use interactions::DocumentControls;
pub use store::DiscordRecordStore;

// Re-export serenity for convenience
pub use serenity;
