/// Headless application host
///
/// Receives the core's events and does what the UI shell would: keeps the
/// contact book (with add-back) and the inbox. Callbacks only enqueue; all
/// disk work happens on the host task.

use anyhow::{Context, Result};
use darkmsg_common::{ContactRequest, IncomingMessage, TimestampMillis};
use darkmsg_core::{EventSink, SettingsStore};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub const CONTACTS_FILE: &str = "contacts.json";
pub const INBOX_FILE: &str = "inbox.jsonl";

/// Event forwarded from a core callback to the host task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Message(IncomingMessage),
    ContactRequest(ContactRequest),
    AddressChanged(String),
}

/// `EventSink` that hands every event to the host task
#[derive(Debug, Clone)]
pub struct AppHost {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl AppHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            debug!("Host task gone, dropping event");
        }
    }
}

impl EventSink for AppHost {
    fn on_message_received(&self, message: &IncomingMessage) {
        self.forward(HostEvent::Message(message.clone()));
    }

    fn on_contact_request_received(&self, request: &ContactRequest) {
        self.forward(HostEvent::ContactRequest(request.clone()));
    }

    fn on_onion_address_changed(&self, address: &str) {
        self.forward(HostEvent::AddressChanged(address.to_string()));
    }

    // Supervisor log lines are already mirrored to tracing
    fn on_log_line(&self, _line: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub onion: String,
    /// Created for an unknown message sender rather than by request
    #[serde(default)]
    pub temporary: bool,
    pub added_at: TimestampMillis,
}

/// Contacts persisted as a JSON array
#[derive(Debug)]
pub struct ContactBook {
    path: PathBuf,
    contacts: Vec<Contact>,
}

impl ContactBook {
    /// Load the book, starting empty when the file does not exist yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contacts = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("malformed contact book {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Ok(Self { path, contacts })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn find_by_onion(&self, onion: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.onion == onion)
    }

    /// Whether a contact already uses this name or this onion address
    pub fn conflicts(&self, name: &str, onion: &str) -> bool {
        self.contacts.iter().any(|c| c.name == name || c.onion == onion)
    }

    pub fn add(&mut self, contact: Contact) -> Result<()> {
        self.contacts.push(contact);
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(&self.contacts)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// One line of `inbox.jsonl`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub received_at: TimestampMillis,
    pub from: String,
    pub onion_address: String,
    pub text: String,
}

/// Consumes host events until every `AppHost` is dropped
pub struct HostWorker {
    contacts: ContactBook,
    inbox: PathBuf,
    settings: Arc<dyn SettingsStore>,
}

impl HostWorker {
    pub fn new(app_dir: &Path, settings: Arc<dyn SettingsStore>) -> Result<Self> {
        Ok(Self {
            contacts: ContactBook::load(app_dir.join(CONTACTS_FILE))?,
            inbox: app_dir.join(INBOX_FILE),
            settings,
        })
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HostEvent>) -> Self {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle(event).await {
                error!("Host event failed: {:#}", e);
            }
        }
        self
    }

    pub async fn handle(&mut self, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::ContactRequest(request) => self.on_contact_request(request),
            HostEvent::Message(message) => self.on_message(message).await,
            HostEvent::AddressChanged(address) => {
                info!("Local onion address: {}", address);
                Ok(())
            }
        }
    }

    fn on_contact_request(&mut self, request: ContactRequest) -> Result<()> {
        let name = request.alias.as_str();
        let onion = request.address.as_str();

        if self.contacts.conflicts(name, onion) {
            debug!("Contact {} already exists", name);
            return Ok(());
        }

        // Unreadable settings fall back to the documented defaults here; the
        // request itself was already accepted by the server
        let add_back = match self.settings.load() {
            Ok(settings) => settings.map(|s| s.policy()).unwrap_or_default().add_back,
            Err(e) => {
                error!("Failed to read settings: {}", e);
                true
            }
        };
        if !add_back {
            info!("addBack disabled, ignoring contact request from {}", name);
            return Ok(());
        }

        self.contacts.add(Contact {
            name: name.to_string(),
            onion: onion.to_string(),
            temporary: false,
            added_at: TimestampMillis::now(),
        })?;
        info!("New contact added: {} ({})", name, onion);
        Ok(())
    }

    async fn on_message(&mut self, message: IncomingMessage) -> Result<()> {
        match self.contacts.find_by_onion(&message.onion_address) {
            Some(contact) => info!("New message from {}", contact.name),
            None => {
                let name = if message.from.is_empty() {
                    "Unknown".to_string()
                } else {
                    message.from.clone()
                };
                info!("Unknown sender, creating temporary contact {}", name);
                self.contacts.add(Contact {
                    name,
                    onion: message.onion_address.clone(),
                    temporary: true,
                    added_at: TimestampMillis::now(),
                })?;
            }
        }

        let entry = InboxEntry {
            received_at: TimestampMillis::now(),
            from: message.from,
            onion_address: message.onion_address,
            text: message.text,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut inbox = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inbox)
            .await
            .with_context(|| format!("failed to open {}", self.inbox.display()))?;
        inbox.write_all(line.as_bytes()).await?;
        inbox.flush().await?;
        Ok(())
    }
}
