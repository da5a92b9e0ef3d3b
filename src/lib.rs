//! Local-first storage and journal engine for a personal trading journal.
//!
//! All state lives in one database file, optionally encrypted with a
//! passphrase. [`Engine`] owns the lifecycle and the single lock; the
//! [`commands`] module exposes every operation, plus a JSON dispatcher
//! for transports that speak `{"cmd", "args"}`.

pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod vault;

pub use commands::{handle, handle_json, Request};
pub use config::{load_config, save_config, EngineConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
