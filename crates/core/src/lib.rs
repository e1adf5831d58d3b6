/// Dark Messenger core
///
/// Tor process supervision and the collaborator traits the supervisor and
/// the hidden-service server share with the host application.

pub mod events;
pub mod settings_store;
pub mod tor;

pub use events::{EventSink, ServiceLauncher};
pub use settings_store::{JsonSettingsStore, MemorySettingsStore, SettingsStore};
pub use tor::{Lifecycle, LogBuffer, TorStatus, TorSupervisor};
