/// Access to the application settings document
///
/// The supervisor and the protocol server only read settings, re-reading on
/// every use. The single write is the local onion address after discovery.

use darkmsg_common::settings::{Settings, SettingsError, ONION_ADDRESS_POINTER};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub trait SettingsStore: Send + Sync {
    /// Current settings; `None` when nothing has been saved yet
    fn load(&self) -> Result<Option<Settings>, SettingsError>;

    /// Record the local onion address
    fn update_onion_address(&self, address: &str) -> Result<(), SettingsError>;
}

/// Set the onion address leaf in a raw settings document, keeping every
/// other key as is
fn set_onion_address(document: &mut Value, address: &str) -> Result<(), SettingsError> {
    if let Some(slot) = document.pointer_mut(ONION_ADDRESS_POINTER) {
        *slot = Value::String(address.to_string());
        return Ok(());
    }

    let mut node = document;
    for key in ["darkmessenger", "general", "onionAddress"] {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        node = node
            .as_object_mut()
            .map(|map| map.entry(key).or_insert_with(|| Value::Object(Default::default())))
            .ok_or_else(|| SettingsError::Write("settings document is not an object".into()))?;
    }

    match node.as_object_mut() {
        Some(leaf) => {
            leaf.insert("value".into(), Value::String(address.to_string()));
            Ok(())
        }
        None => {
            *node = serde_json::json!({ "value": address, "type": "text" });
            Ok(())
        }
    }
}

/// Raw settings document; must be a JSON object
fn parse_document(contents: &str) -> Result<Value, SettingsError> {
    let document: Value =
        serde_json::from_str(contents).map_err(|e| SettingsError::Parse(e.to_string()))?;
    if !document.is_object() {
        return Err(SettingsError::Parse("settings document is not an object".into()));
    }
    Ok(document)
}

fn bundled_document() -> Result<Value, SettingsError> {
    Settings::bundled().to_json_value()
}

/// Settings kept as a JSON file on disk
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Result<Option<String>, SettingsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SettingsError::Read(format!("{}: {}", self.path.display(), e))),
        }
    }

    /// Replace the file contents; used by the host and tests
    pub fn save(&self, document: &Value) -> Result<(), SettingsError> {
        let contents = serde_json::to_string_pretty(document)
            .map_err(|e| SettingsError::Write(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::Write(format!("{}: {}", parent.display(), e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .map_err(|e| SettingsError::Write(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| SettingsError::Write(format!("{}: {}", self.path.display(), e)))
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Option<Settings>, SettingsError> {
        self.read_raw()?
            .map(|contents| Settings::from_json(&contents))
            .transpose()
    }

    fn update_onion_address(&self, address: &str) -> Result<(), SettingsError> {
        // A malformed file is left alone; only an absent one gets the defaults
        let mut document = match self.read_raw()? {
            Some(contents) => parse_document(&contents)?,
            None => bundled_document()?,
        };

        set_onion_address(&mut document, address)?;
        self.save(&document)?;
        debug!(path = %self.path.display(), "Stored onion address in settings");
        Ok(())
    }
}

/// In-memory settings document
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    document: Mutex<Option<String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(json: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(json.into())),
        }
    }

    pub fn set_json(&self, json: impl Into<String>) {
        if let Ok(mut document) = self.document.lock() {
            *document = Some(json.into());
        }
    }

    pub fn json(&self) -> Option<String> {
        self.document.lock().ok().and_then(|d| d.clone())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Option<Settings>, SettingsError> {
        self.json().map(|json| Settings::from_json(&json)).transpose()
    }

    fn update_onion_address(&self, address: &str) -> Result<(), SettingsError> {
        let mut document = match self.json() {
            Some(json) => parse_document(&json)?,
            None => bundled_document()?,
        };
        set_onion_address(&mut document, address)?;
        self.set_json(document.to_string());
        Ok(())
    }
}
