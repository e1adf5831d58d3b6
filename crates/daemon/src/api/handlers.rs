/// Protocol request handlers

use super::responses::*;
use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use darkmsg_common::config::protocol::{SERVICE_NAME, VERSION};
use darkmsg_common::{ContactRequest, IncomingMessage, Settings};
use darkmsg_core::{EventSink, SettingsStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Standard alphabet, padding optional, trailing bits tolerated
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<dyn SettingsStore>,
    pub events: Arc<dyn EventSink>,
}

/// Handler for GET /
pub async fn root() -> Json<RootResponse> {
    debug!("Protocol: GET /");

    Json(RootResponse {
        service: SERVICE_NAME.to_string(),
        version: VERSION.to_string(),
        status: "online".to_string(),
        timestamp: chrono::Utc::now()
            .format("%a %b %d %H:%M:%S UTC %Y")
            .to_string(),
    })
}

/// Handler for GET /wcdyu
pub async fn wcdyu(State(state): State<AppState>) -> Result<Json<WcdyuResponse>, AppError> {
    debug!("Protocol: GET /wcdyu");

    let capabilities = load_settings(&state)?
        .map(|settings| settings.capabilities())
        .unwrap_or_default();

    Ok(Json(capabilities))
}

/// Handler for GET /crypto
pub async fn crypto() -> Json<CryptoResponse> {
    debug!("Protocol: GET /crypto");

    Json(CryptoResponse {
        use_erk: false,
        message: "ERK not enabled in this client".to_string(),
    })
}

/// Handler for POST /addme
pub async fn add_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, AppError> {
    debug!("Protocol: POST /addme");

    let body = json_object(&headers, &body)?;
    let (alias, address) = match (required(&body, "alias"), required(&body, "address")) {
        (Some(alias), Some(address)) => (alias, address),
        _ => return Err(AppError::bad_request("Alias and address are required")),
    };

    let request =
        ContactRequest::parse(alias, address).map_err(|e| AppError::bad_request(e.to_string()))?;

    let policy = load_settings(&state)?
        .map(|settings| settings.policy())
        .unwrap_or_default();
    if !policy.allow_add_me {
        warn!(address = %request.address, "Rejected contact request: add-me disabled");
        return Err(AppError::forbidden(
            "This server doesn't allow remote contact addition",
        ));
    }

    info!(alias = %request.alias, address = %request.address, "Contact request received");
    state.events.on_contact_request_received(&request);

    Ok("Contact added successfully")
}

/// Handler for POST /send
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, AppError> {
    debug!("Protocol: POST /send");

    let body = json_object(&headers, &body)?;
    let (from, message) = match (required(&body, "from"), required(&body, "message")) {
        (Some(from), Some(message)) => (from, message),
        _ => return Err(AppError::bad_request("From and message are required")),
    };

    let message = IncomingMessage::new(from, decode_message(message));
    info!(from = %message.from, "Message received");
    state.events.on_message_received(&message);

    Ok("Message received")
}

/// Anything that matched no route
pub async fn not_found() -> AppError {
    AppError::not_found("404 Not Found")
}

/// Base64-decode a message body. Anything that is not base64 encoded UTF-8
/// text is passed through as is.
pub fn decode_message(message: &str) -> String {
    let compact: String = message
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    LENIENT_BASE64
        .decode(compact)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

/// Only the first `Content-Length` bytes count; no header means no body
fn declared_body<'a>(headers: &HeaderMap, body: &'a [u8]) -> &'a [u8] {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    &body[..declared.min(body.len())]
}

fn json_object(headers: &HeaderMap, body: &[u8]) -> Result<Map<String, Value>, AppError> {
    match serde_json::from_slice::<Value>(declared_body(headers, body)) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(AppError::bad_request("Invalid JSON")),
    }
}

/// A non-empty string field; anything else counts as missing
fn required<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn load_settings(state: &AppState) -> Result<Option<Settings>, AppError> {
    state.settings.load().map_err(|e| {
        error!("Failed to read settings: {}", e);
        AppError::internal("Internal Server Error")
    })
}

/// Application error type
#[derive(Debug)]
pub struct AppError {
    message: String,
    status_code: StatusCode,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::FORBIDDEN,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("Protocol error: {}", self.message);
        } else {
            debug!("Protocol rejection ({}): {}", self.status_code, self.message);
        }

        (self.status_code, self.message).into_response()
    }
}
