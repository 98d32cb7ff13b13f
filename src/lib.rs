//! keeponline - keep a Telegram account online with a periodic status heartbeat

pub mod auth;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod telegram;
pub mod utils;

pub use config::Config;
pub use error::{ClientError, KeepOnlineError, Result};
