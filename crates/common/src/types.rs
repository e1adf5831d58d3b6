use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Maximum alias length accepted from remote peers
pub const MAX_ALIAS_LEN: usize = 99;

/// Length of a legacy (v2) onion label
pub const ONION_V2_LABEL_LEN: usize = 16;

/// Length of a modern (v3) onion label
pub const ONION_V3_LABEL_LEN: usize = 56;

const ONION_SUFFIX: &str = ".onion";

/// Format errors for values received over the hidden service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Alias can only use alphanumeric characters and be 1 to 99 characters long. Allowed characters: - _ . @")]
    InvalidAlias,
    #[error("Invalid onion address format")]
    InvalidOnionAddress,
}

/// Display name a peer submits with a contact request.
///
/// 1 to 99 characters from `[A-Za-z0-9-_.@]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Alias(String);

impl Alias {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ValidationError::InvalidAlias)
        }
    }

    pub fn is_valid(value: &str) -> bool {
        let len = value.chars().count();
        (1..=MAX_ALIAS_LEN).contains(&len)
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Alias {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Alias {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Alias> for String {
    fn from(value: Alias) -> Self {
        value.0
    }
}

/// A `.onion` hostname, either a 16 character legacy label or a 56 character
/// v3 label over the lowercase base32 alphabet `[a-z2-7]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionAddress(String);

impl OnionAddress {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ValidationError::InvalidOnionAddress)
        }
    }

    pub fn is_valid(value: &str) -> bool {
        let Some(label) = value.strip_suffix(ONION_SUFFIX) else {
            return false;
        };

        matches!(label.len(), ONION_V2_LABEL_LEN | ONION_V3_LABEL_LEN)
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
    }

    /// Whether this is a v3 (56 character) address
    pub fn is_v3(&self) -> bool {
        self.0.len() == ONION_V3_LABEL_LEN + ONION_SUFFIX.len()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OnionAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OnionAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OnionAddress> for String {
    fn from(value: OnionAddress) -> Self {
        value.0
    }
}

/// A validated `/addme` submission. Never persisted by the server itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRequest {
    pub alias: Alias,
    pub address: OnionAddress,
}

impl ContactRequest {
    /// Validates alias first, then address.
    pub fn parse(alias: &str, address: &str) -> Result<Self, ValidationError> {
        let alias = Alias::parse(alias)?;
        let address = OnionAddress::parse(address)?;
        Ok(Self { alias, address })
    }
}

/// A `/send` delivery after base64 decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Sender as claimed in the request
    pub from: String,
    /// Decoded plain text (or the raw body when it was not base64)
    pub text: String,
    /// Onion address replies should go to; the protocol uses `from` for this
    pub onion_address: String,
}

impl IncomingMessage {
    pub fn new(from: impl Into<String>, text: impl Into<String>) -> Self {
        let from = from.into();
        Self {
            onion_address: from.clone(),
            from,
            text: text.into(),
        }
    }
}

/// Timestamp in Unix epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampMillis(pub u64);

impl TimestampMillis {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimestampMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
