/// Dark Messenger daemon library
///
/// The hidden-service protocol server and the headless host that wires it
/// to the Tor supervisor.

pub mod api;
pub mod host;
pub mod logging;

pub use api::{router, AppState, HiddenServiceServer};
pub use host::{AppHost, ContactBook, HostEvent, HostWorker};
