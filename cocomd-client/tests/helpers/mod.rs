//! Test helper modules for cocomd-client integration tests
//!
//! - TestServer: in-process mock inference server
//! - spawn_session: controller wired to a TestServer and a temp export dir
//! - wait_for / expect_event: bounded polling of session state and events

#![allow(dead_code)]

pub mod test_server;

use std::sync::Arc;
use std::time::Duration;

use cocomd_client::session::{SessionController, SessionHandle, SessionView};
use cocomd_client::DirectoryExporter;
use cocomd_common::config::ClientConfig;
use cocomd_common::events::{ClientEvent, EventBus};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use test_server::TestServer;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Running controller plus everything the test needs to inspect it
pub struct TestSession {
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<ClientEvent>,
    pub export_dir: TempDir,
    task: JoinHandle<()>,
}

impl TestSession {
    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        tokio::time::timeout(WAIT_TIMEOUT, self.task)
            .await
            .expect("controller did not stop")
            .unwrap();
    }
}

pub fn test_config(server: &TestServer, export_dir: &TempDir) -> ClientConfig {
    let mut config = ClientConfig::for_server(server.url());
    config.export_dir = export_dir.path().to_path_buf();
    config.upload_context.location = "Davao".to_string();
    config.upload_context.device = "cam-01".to_string();
    config
}

pub fn spawn_session(server: &TestServer) -> TestSession {
    spawn_session_with(server, |_| {})
}

pub fn spawn_session_with(
    server: &TestServer,
    customize: impl FnOnce(&mut ClientConfig),
) -> TestSession {
    let export_dir = TempDir::new().unwrap();
    let mut config = test_config(server, &export_dir);
    customize(&mut config);

    let exporter = DirectoryExporter::new(&config.export_dir, config.frame_file_name.clone());
    let bus = Arc::new(EventBus::new(1024));
    let events = bus.subscribe();
    let (handle, task) = SessionController::spawn(&config, Box::new(exporter), bus).unwrap();

    TestSession {
        handle,
        events,
        export_dir,
        task,
    }
}

/// Poll snapshots until `predicate` holds
pub async fn wait_for(
    handle: &SessionHandle,
    what: &str,
    predicate: impl Fn(&SessionView) -> bool,
) -> SessionView {
    let poll = async {
        loop {
            let view = handle.snapshot().await.unwrap();
            if predicate(&view) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT_TIMEOUT, poll)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// Receive events until one matches, skipping the rest
pub async fn expect_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    what: &str,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    let search = async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(WAIT_TIMEOUT, search)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for event: {}", what))
}

/// Poll a plain condition (server-side counters and the like)
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT_TIMEOUT, poll)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting until {}", what));
}
