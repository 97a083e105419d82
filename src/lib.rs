//! Redfire IVR - DTMF menu engine
//!
//! Matches caller keypresses against per-menu digit patterns and drives
//! calls through nested voice menus: prompts, retries, sub-menus, transfers
//! and dialplan applications. Audio and call control are supplied by the
//! host through the traits in [`interfaces`].

pub mod config;
pub mod core;
pub mod error;
pub mod interfaces;
pub mod protocols;
pub mod services;
pub mod testing;
pub mod utils;

pub use error::{Error, Result};

/// Engine version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
