//! Typed view of the application settings document.
//!
//! The UI stores settings as nested JSON where every leaf is an object of the
//! form `{"value": .., "default": .., "type": ..}`. This module parses that
//! document once into typed structures. Any node of the wrong shape is treated
//! as absent and falls back to the documented default:
//!
//! | setting | fallback |
//! |---|---|
//! | `general.allowAddMe` | `true` |
//! | `general.addBack` | `true` |
//! | `cryptography.useERK` | `false` |
//! | `cryptography.*.{ecies,rsa,crystalKyber}` | `true` |
//! | `tor.enabled` | `false` |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    Read(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Failed to write settings: {0}")]
    Write(String),
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// A single settings leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Setting<T> {
    #[serde(default = "none", deserialize_with = "lenient")]
    pub value: Option<T>,
    #[serde(default = "none", deserialize_with = "lenient")]
    pub default: Option<T>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Self {
            value: None,
            default: None,
            kind: None,
        }
    }
}

impl<T: Clone> Setting<T> {
    fn with_kind(value: Option<T>, kind: &str) -> Self {
        Self {
            value: value.clone(),
            default: value,
            kind: Some(kind.to_string()),
        }
    }

    /// The stored value, or `fallback` when absent
    pub fn value_or(&self, fallback: T) -> T {
        self.value.clone().unwrap_or(fallback)
    }
}

impl Setting<bool> {
    pub fn toggle(value: bool) -> Self {
        Self::with_kind(Some(value), "toggle")
    }
}

impl Setting<String> {
    pub fn text(value: Option<&str>) -> Self {
        Self::with_kind(value.map(str::to_string), "text")
    }
}

/// Root of the settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, deserialize_with = "or_default")]
    pub darkmessenger: AppSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default, deserialize_with = "or_default")]
    pub general: GeneralSettings,
    #[serde(default, deserialize_with = "or_default")]
    pub cryptography: CryptographySettings,
    #[serde(default, deserialize_with = "or_default")]
    pub tor: TorSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    #[serde(default, deserialize_with = "or_default")]
    pub username: Setting<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub onion_address: Setting<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub allow_add_me: Setting<bool>,
    #[serde(default, deserialize_with = "or_default")]
    pub add_back: Setting<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptographySettings {
    #[serde(rename = "useERK", default, deserialize_with = "or_default")]
    pub use_erk: Setting<bool>,
    #[serde(default, deserialize_with = "or_default")]
    pub offline_messages: SchemeSettings,
    #[serde(default, deserialize_with = "or_default")]
    pub online_messages: SchemeSettings,
    #[serde(default, deserialize_with = "or_default")]
    pub add_me: SchemeSettings,
}

/// Per-context encryption scheme toggles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeSettings {
    #[serde(default, deserialize_with = "or_default")]
    pub ecies: Setting<bool>,
    #[serde(default, deserialize_with = "or_default")]
    pub rsa: Setting<bool>,
    #[serde(default, deserialize_with = "or_default")]
    pub crystal_kyber: Setting<bool>,
}

impl SchemeSettings {
    fn bundled() -> Self {
        Self {
            ecies: Setting::toggle(true),
            rsa: Setting::toggle(true),
            crystal_kyber: Setting::toggle(true),
        }
    }

    fn flags(&self) -> SchemeFlags {
        SchemeFlags {
            ecies: self.ecies.value_or(true),
            rsa: self.rsa.value_or(true),
            crystal_kyber: self.crystal_kyber.value_or(true),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TorSettings {
    #[serde(default, deserialize_with = "or_default")]
    pub enabled: Setting<bool>,
}

/// Policy flags consulted by the protocol server and the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Strangers may request to be added as contacts
    pub allow_add_me: bool,
    /// Accepted requests create a local contact
    pub add_back: bool,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Settings::default().policy()
    }
}

/// Capability flags advertised on `GET /wcdyu`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub use_erk: bool,
    pub offline_messages: SchemeFlags,
    pub online_messages: SchemeFlags,
    pub add_me: SchemeFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeFlags {
    pub ecies: bool,
    pub rsa: bool,
    pub crystal_kyber: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Settings::default().capabilities()
    }
}

impl Settings {
    /// The document the application ships with
    pub fn bundled() -> Self {
        Self {
            darkmessenger: AppSettings {
                general: GeneralSettings {
                    username: Setting::text(None),
                    onion_address: Setting::text(Some("placeholder.onion")),
                    allow_add_me: Setting::toggle(true),
                    add_back: Setting::toggle(true),
                },
                cryptography: CryptographySettings {
                    use_erk: Setting::toggle(false),
                    offline_messages: SchemeSettings::bundled(),
                    online_messages: SchemeSettings::bundled(),
                    add_me: SchemeSettings::bundled(),
                },
                tor: TorSettings {
                    enabled: Setting::toggle(true),
                },
            },
        }
    }

    /// Parse the settings document
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(json).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    pub fn to_json_value(&self) -> Result<serde_json::Value, SettingsError> {
        serde_json::to_value(self).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    pub fn policy(&self) -> PolicySnapshot {
        let general = &self.darkmessenger.general;
        PolicySnapshot {
            allow_add_me: general.allow_add_me.value_or(true),
            add_back: general.add_back.value_or(true),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        let crypto = &self.darkmessenger.cryptography;
        Capabilities {
            use_erk: crypto.use_erk.value_or(false),
            offline_messages: crypto.offline_messages.flags(),
            online_messages: crypto.online_messages.flags(),
            add_me: crypto.add_me.flags(),
        }
    }

    pub fn tor_enabled(&self) -> bool {
        self.darkmessenger.tor.enabled.value_or(false)
    }

    pub fn onion_address(&self) -> Option<&str> {
        self.darkmessenger.general.onion_address.value.as_deref()
    }
}

/// JSON pointer of the local onion address leaf
pub const ONION_ADDRESS_POINTER: &str = "/darkmessenger/general/onionAddress/value";
