//! Daemon runtime wiring: both jobs start, run, and stop on cancellation.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bridge_core::{Address, Project, TxHash, User};
use bridge_daemon::{
    BlockSource, BlockSourceFactory, BridgeConfig, ChannelBlockSource, Collaborators, DaemonError,
    Schedule,
};
use bridge_sync::{FactKey, LedgerClient, LedgerError, SourceError, UpdateSource};

struct CancellingSource {
    calls: AtomicUsize,
    cancel: CancellationToken,
}

impl UpdateSource for CancellingSource {
    fn user_updates(&self, _since: DateTime<Utc>) -> Result<Vec<User>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(Vec::new())
    }

    fn project_updates(&self, _since: DateTime<Utc>) -> Result<Vec<Project>, SourceError> {
        Ok(Vec::new())
    }
}

struct NoLedger;

impl LedgerClient for NoLedger {
    fn signer(&self) -> Address {
        Address::from("0x5160000000000000000000000000000000000000")
    }

    fn read_tx_data(&self, _: &Address, _: &Address, _: &FactKey) -> Result<Vec<u8>, LedgerError> {
        Err(LedgerError::NotFound)
    }

    fn write_tx_data(&self, _: &Address, _: &FactKey, _: &[u8]) -> Result<TxHash, LedgerError> {
        Err(LedgerError::Rejected("read-only".to_string()))
    }

    fn deploy_passport(&self, _: &Address) -> Result<Address, LedgerError> {
        Err(LedgerError::Rejected("read-only".to_string()))
    }
}

struct EmptyBlocks;

#[async_trait]
impl BlockSourceFactory for EmptyBlocks {
    async fn open(&self, _start: u64, _confirmations: u64) -> Result<Arc<dyn BlockSource>, DaemonError> {
        let (source, feed) = ChannelBlockSource::new(1);
        feed.finish();
        Ok(source)
    }
}

fn config(dir: &TempDir) -> BridgeConfig {
    BridgeConfig {
        db_path: dir.path().join("bridge.db"),
        source_url: "http://localhost:9".to_string(),
        source_token: "token".to_string(),
        did_address: Address::from("0xd1d0000000000000000000000000000000000000"),
        passport_factory: Address::from("0xfac0000000000000000000000000000000000000"),
        ..BridgeConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn runs_fact_pass_then_stops_on_cancel() {
    let dir = TempDir::new().expect("tempdir");
    let cancel = CancellationToken::new();
    let source = Arc::new(CancellingSource {
        calls: AtomicUsize::new(0),
        cancel: cancel.clone(),
    });
    let collaborators = Collaborators {
        source: Some(source.clone() as Arc<dyn UpdateSource>),
        ledger: Arc::new(NoLedger),
        blocks: Arc::new(EmptyBlocks),
    };

    bridge_daemon::run(config(&dir), collaborators, cancel)
        .await
        .expect("runtime");

    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert!(dir.path().join("bridge.db").exists());
}

#[tokio::test]
async fn invalid_config_fails_before_opening_store() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = config(&dir);
    config.passport_factory = Address::default();
    let collaborators = Collaborators {
        source: Some(Arc::new(CancellingSource {
            calls: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        })),
        ledger: Arc::new(NoLedger),
        blocks: Arc::new(EmptyBlocks),
    };

    let err = bridge_daemon::run(config, collaborators, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DaemonError::Config(_)));
    assert!(!dir.path().join("bridge.db").exists());
}

/// Answers `[]` to `requests` HTTP requests, recording each request line and
/// authorization header, then cancels the daemon.
fn serve_empty_updates(
    requests: usize,
    cancel: CancellationToken,
) -> (String, Arc<Mutex<Vec<(String, String)>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming().take(requests) {
            let mut stream = stream.expect("connection");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            let mut authorization = String::new();
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).expect("header");
                if header.trim().is_empty() {
                    break;
                }
                if header.to_ascii_lowercase().starts_with("authorization:") {
                    authorization = header.trim().to_string();
                }
            }
            log.lock()
                .unwrap()
                .push((request_line.trim().to_string(), authorization));
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n[]",
                )
                .expect("respond");
        }
        cancel.cancel();
    });
    (url, seen)
}

#[tokio::test]
async fn configured_record_store_is_used_without_injected_source() {
    let dir = TempDir::new().expect("tempdir");
    let cancel = CancellationToken::new();
    let (url, seen) = serve_empty_updates(2, cancel.clone());
    let config = BridgeConfig {
        source_url: url,
        processing: Schedule::new(Duration::from_secs(1), Duration::ZERO),
        ..config(&dir)
    };
    let collaborators = Collaborators {
        source: None,
        ledger: Arc::new(NoLedger),
        blocks: Arc::new(EmptyBlocks),
    };

    tokio::time::timeout(
        Duration::from_secs(30),
        bridge_daemon::run(config, collaborators, cancel),
    )
    .await
    .expect("daemon stops after the first pass")
    .expect("runtime");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].0.starts_with("GET /users?since=0 "), "{:?}", seen[0]);
    assert!(seen[1].0.starts_with("GET /projects?since=0 "), "{:?}", seen[1]);
    assert_eq!(seen[0].1, "Authorization: Bearer token");
}
