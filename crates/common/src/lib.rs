//! Shared types for Dark Messenger: errors, supervisor configuration,
//! typed application settings and the value objects exchanged over the
//! hidden service.

pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use config::{ConfigError, SupervisorConfig};
pub use error::{DarkMsgError, Result};
pub use settings::{
    Capabilities, PolicySnapshot, SchemeFlags, Settings, SettingsError, ONION_ADDRESS_POINTER,
};
pub use types::{
    Alias, ContactRequest, IncomingMessage, OnionAddress, TimestampMillis, ValidationError,
};
