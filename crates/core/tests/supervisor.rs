//! Supervisor tests against a fake Tor executable (a shell script)

#![cfg(unix)]

use async_trait::async_trait;
use darkmsg_common::{ContactRequest, IncomingMessage, SupervisorConfig};
use darkmsg_core::{
    EventSink, Lifecycle, MemorySettingsStore, ServiceLauncher, SettingsStore, TorSupervisor,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

const ADDRESS: &str = "abcdefghijklmnop.onion";

/// Tests stage and exec binaries; running them one at a time keeps a
/// concurrent fork from holding a staged file open for writing
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct RecordingSink {
    addresses: Mutex<Vec<String>>,
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn addresses(&self) -> Vec<String> {
        self.addresses.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_message_received(&self, _message: &IncomingMessage) {}

    fn on_contact_request_received(&self, _request: &ContactRequest) {}

    fn on_onion_address_changed(&self, address: &str) {
        self.addresses.lock().unwrap().push(address.to_string());
    }

    fn on_log_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

#[derive(Default)]
struct RecordingLauncher {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingLauncher {
    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceLauncher for RecordingLauncher {
    async fn start_service(&self) -> bool {
        self.starts.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn stop_service(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    dir: TempDir,
    supervisor: TorSupervisor,
    sink: Arc<RecordingSink>,
    launcher: Arc<RecordingLauncher>,
    settings: Arc<MemorySettingsStore>,
}

impl Harness {
    /// A supervisor whose bundled "Tor" runs `script`
    fn new(script: &str) -> Self {
        Self::with_config(script, |config| config)
    }

    fn with_config(
        script: &str,
        customize: impl FnOnce(SupervisorConfig) -> SupervisorConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        let binary = assets.join("tor/x86_64/tor");
        std::fs::create_dir_all(binary.parent().unwrap()).unwrap();
        std::fs::write(&binary, format!("#!/bin/sh\n{}\n", script)).unwrap();

        let config = SupervisorConfig::default()
            .with_app_dir(dir.path().join("app"))
            .with_assets_dir(&assets)
            .with_abi("x86_64")
            .with_settle_delay(Duration::from_millis(50))
            .with_hostname_wait(Duration::from_secs(60), Duration::from_millis(50));
        let config = customize(config);

        let sink = Arc::new(RecordingSink::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let settings = Arc::new(MemorySettingsStore::new());
        let supervisor =
            TorSupervisor::new(config, sink.clone(), settings.clone(), launcher.clone());

        Self {
            dir,
            supervisor,
            sink,
            launcher,
            settings,
        }
    }

    fn hidden_service_dir(&self) -> PathBuf {
        self.dir.path().join("app/tor_data/hidden_service")
    }

    async fn logs_contain(&self, needle: &str) -> bool {
        self.supervisor
            .get_logs()
            .await
            .iter()
            .any(|line| line.contains(needle))
    }
}

/// Poll `check` until it holds or two seconds pass
async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn write_hostname(dir: &Path, address: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("hostname"), format!("{}\n", address)).unwrap();
}

#[tokio::test]
async fn test_existing_identity_reported_before_bootstrap() {
    let _serial = serial();
    let h = &Harness::new("exec sleep 30");
    write_hostname(&h.hidden_service_dir(), ADDRESS);

    assert!(h.supervisor.start().await);

    // no bootstrap line was ever printed
    assert_eq!(h.supervisor.generated_onion_address().await.as_deref(), Some(ADDRESS));
    assert_eq!(h.sink.addresses(), vec![ADDRESS.to_string()]);
    assert!(h.logs_contain("Existing hidden service found").await);
    assert_eq!(
        h.settings.load().unwrap().unwrap().onion_address(),
        Some(ADDRESS)
    );
    assert_eq!(h.supervisor.lifecycle().await, Lifecycle::Bootstrapping);
    assert!(h.supervisor.is_running().await);

    h.supervisor.stop().await;
    assert!(!h.supervisor.is_running().await);
}

#[tokio::test]
async fn test_torrc_and_binary_are_staged() {
    let _serial = serial();
    let h = &Harness::new("exec sleep 30");

    assert!(h.supervisor.start().await);
    assert!(h.logs_contain("No existing hidden service found. New one will be created.").await);

    let app = h.dir.path().join("app");
    assert!(app.join("tor_binary").is_file());
    let torrc = std::fs::read_to_string(app.join("tor_data/torrc")).unwrap();
    assert!(torrc.contains(&format!(
        "HiddenServiceDir {}",
        h.hidden_service_dir().display()
    )));

    h.supervisor.stop().await;
}

#[tokio::test]
async fn test_stop_before_settle_never_starts_server() {
    let _serial = serial();
    let h = &Harness::with_config(
        "echo 'Bootstrapped 100% (done): Done'\nexec sleep 30",
        |config| config.with_settle_delay(Duration::from_millis(300)),
    );

    assert!(h.supervisor.start().await);
    h.supervisor.stop().await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.launcher.starts(), 0);
    assert_eq!(h.supervisor.lifecycle().await, Lifecycle::Stopped);
    assert!(h.logs_contain("TOR: Stopped").await);
}

#[tokio::test]
async fn test_server_started_once_then_serving() {
    let _serial = serial();
    let h = &Harness::new(
        "echo 'Bootstrapped 45% (loading_descriptors): Loading relay descriptors'\n\
         echo 'Bootstrapped 100% (done): Done'\n\
         echo 'Bootstrapped 100% (done): Done'\n\
         echo 'Circuit build 100% complete'\n\
         sleep 0.3\n\
         printf 'abcdefghijklmnop.onion\\n' > hidden_service/hostname\n\
         echo 'Onion service published'\n\
         exec sleep 30",
    );

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { h.launcher.starts() == 1 }).await);
    assert!(wait_for(|| async move { h.supervisor.lifecycle().await == Lifecycle::Serving }).await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.launcher.starts(), 1);
    assert_eq!(h.sink.addresses(), vec![ADDRESS.to_string()]);

    let status = h.supervisor.status().await;
    assert_eq!(status.bootstrap_progress, 100);
    assert!(status.server_started);
    assert_eq!(status.onion_address.as_deref(), Some(ADDRESS));
    assert!(h.logs_contain("Hidden service address: abcdefghijklmnop.onion").await);

    h.supervisor.stop().await;
    assert!(h.launcher.stops.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_missing_hostname_warns_and_stays_pending() {
    let _serial = serial();
    let h = &Harness::with_config("echo 'Bootstrapped 100% (done): Done'\nexec sleep 30", |c| {
        c.with_hostname_wait(Duration::from_secs(0), Duration::from_millis(20))
    });

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { h.launcher.starts() == 1 }).await);
    assert!(wait_for(|| async move { h.logs_contain("WARNING").await }).await);
    assert_eq!(h.supervisor.lifecycle().await, Lifecycle::ServingPending);
    assert!(h.supervisor.is_running().await);

    // the address still counts once it shows up
    write_hostname(&h.hidden_service_dir(), ADDRESS);
    assert!(wait_for(|| async move { h.supervisor.lifecycle().await == Lifecycle::Serving }).await);

    h.supervisor.stop().await;
}

#[tokio::test]
async fn test_process_exit_returns_to_stopped() {
    let _serial = serial();
    let h = &Harness::with_config(
        "echo 'Bootstrapped 10% (conn): Connecting to a relay'\nexit 0",
        |config| config.with_settle_delay(Duration::from_millis(300)),
    );

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { !h.supervisor.is_running().await }).await);

    assert_eq!(h.supervisor.lifecycle().await, Lifecycle::Stopped);
    assert_eq!(h.supervisor.bootstrap_progress().await, 10);
    assert!(h.logs_contain("TOR: Process ended").await);

    // the pending server start belonged to the run that ended
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.launcher.starts(), 0);
}

#[tokio::test]
async fn test_first_bootstrapped_line_starts_server() {
    let _serial = serial();
    let h = &Harness::new("echo 'Bootstrapped 5% (conn): Connecting to a relay'\nexec sleep 30");

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { h.supervisor.status().await.server_started }).await);

    let status = h.supervisor.status().await;
    assert_eq!(status.lifecycle, Lifecycle::ServingPending);
    assert_eq!(status.bootstrap_progress, 5);
    assert_eq!(h.launcher.starts(), 1);

    h.supervisor.stop().await;
}

#[tokio::test]
async fn test_missing_binary_fails_start() {
    let _serial = serial();
    let h = &Harness::with_config("exit 0", |config| config.with_abi("arm64"));

    assert!(!h.supervisor.start().await);
    assert_eq!(h.supervisor.lifecycle().await, Lifecycle::Stopped);
    assert!(!h.supervisor.is_running().await);
    assert!(h.logs_contain("ERROR starting Tor").await);
    assert!(h
        .sink
        .lines
        .lock()
        .unwrap()
        .iter()
        .any(|line| line.starts_with("ERROR starting Tor")));
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let _serial = serial();
    let h = &Harness::new("echo 'Bootstrapped 100% (done): Done'\nexec sleep 30");

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { h.launcher.starts() == 1 }).await);

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { h.launcher.starts() == 2 }).await);
    assert!(h.logs_contain("TOR: Stopped").await);

    h.supervisor.stop().await;
}

#[tokio::test]
async fn test_log_buffer_is_bounded() {
    let _serial = serial();
    let h = &Harness::with_config(
        "i=0\nwhile [ $i -lt 40 ]; do echo \"line $i\"; i=$((i+1)); done\nexec sleep 30",
        |config| config.with_max_log_entries(5),
    );

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { h.logs_contain("TOR: line 39").await }).await);

    let logs = h.supervisor.get_logs().await;
    assert_eq!(logs.len(), 5);
    assert!(logs[4].ends_with("TOR: line 39"));
    assert!(logs[0].ends_with("TOR: line 35"));

    h.supervisor.clear_logs().await;
    assert!(h.supervisor.get_logs().await.is_empty());

    h.supervisor.stop().await;
}

#[tokio::test]
async fn test_invalid_config_fails_start() {
    let _serial = serial();
    let h = &Harness::with_config("exec sleep 30", |config| {
        config.with_hostname_wait(Duration::from_secs(60), Duration::ZERO)
    });

    assert!(!h.supervisor.start().await);
    assert_eq!(h.supervisor.lifecycle().await, Lifecycle::Stopped);
    assert!(h.logs_contain("hostname_poll_ms must be positive").await);
    assert!(!h.dir.path().join("app/tor_binary").exists());
}

#[tokio::test]
async fn test_unreadable_hostname_logged_once() {
    let _serial = serial();
    // a directory where the hostname file belongs cannot be read as text
    let h = &Harness::new(
        "mkdir hidden_service/hostname\n\
         echo 'Bootstrapped 100% (done): Done'\n\
         exec sleep 30",
    );

    assert!(h.supervisor.start().await);
    assert!(wait_for(|| async move { h.logs_contain("ERROR reading hidden service hostname").await }).await);

    // several more polls go by
    tokio::time::sleep(Duration::from_millis(400)).await;
    let errors = h
        .supervisor
        .get_logs()
        .await
        .iter()
        .filter(|line| line.contains("ERROR reading hidden service hostname"))
        .count();
    assert_eq!(errors, 1);
    assert_eq!(h.supervisor.lifecycle().await, Lifecycle::ServingPending);

    h.supervisor.stop().await;
}
