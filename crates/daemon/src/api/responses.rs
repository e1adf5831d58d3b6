/// Protocol response bodies

use darkmsg_common::Capabilities;
use serde::{Deserialize, Serialize};

/// `GET /` liveness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    /// Service name
    pub service: String,
    /// Protocol version
    pub version: String,
    /// Always `online` while the server answers
    pub status: String,
    /// Server time, human readable
    pub timestamp: String,
}

/// `GET /wcdyu` capability negotiation
pub type WcdyuResponse = Capabilities;

/// `GET /crypto` public-key retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoResponse {
    /// Whether the external replaceable key scheme is available
    pub use_erk: bool,
    /// Explanation when it is not
    pub message: String,
}
