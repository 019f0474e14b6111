//! Block stream consumer against an in-memory store and scripted blocks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use bridge_core::{FactTarget, Store, TransactionId, TxHash, TxState, User, UserId};
use bridge_daemon::{
    Block, BlockSource, BlockSourceFactory, BlockStreamConsumer, BlockTransaction,
    ChannelBlockSource, DaemonError, ReconcileSettings, TxStatus,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Replays its blocks on every open. With `only_from_start` the blocks below
/// the requested start are skipped, like a real source would.
struct ScriptedBlocks {
    blocks: Vec<Block>,
    only_from_start: bool,
    close_when_drained: bool,
    opened: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedBlocks {
    fn new(blocks: Vec<Block>) -> Arc<Self> {
        Arc::new(Self {
            blocks,
            only_from_start: true,
            close_when_drained: true,
            opened: Mutex::new(Vec::new()),
        })
    }

    fn replaying(blocks: Vec<Block>) -> Arc<Self> {
        Arc::new(Self {
            blocks,
            only_from_start: false,
            close_when_drained: true,
            opened: Mutex::new(Vec::new()),
        })
    }

    fn open_ended(blocks: Vec<Block>) -> Arc<Self> {
        Arc::new(Self {
            blocks,
            only_from_start: true,
            close_when_drained: false,
            opened: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BlockSourceFactory for ScriptedBlocks {
    async fn open(
        &self,
        start_block: u64,
        confirmations: u64,
    ) -> Result<Arc<dyn BlockSource>, DaemonError> {
        self.opened.lock().unwrap().push((start_block, confirmations));
        let (source, feed) = ChannelBlockSource::new(self.blocks.len() + 1);
        for block in &self.blocks {
            if self.only_from_start && block.number < start_block {
                continue;
            }
            feed.send(block.clone()).await;
        }
        if self.close_when_drained {
            feed.finish();
        }
        Ok(source)
    }
}

fn block(number: u64, txs: &[(&str, TxStatus)]) -> Block {
    Block {
        number,
        transactions: txs
            .iter()
            .map(|(hash, status)| BlockTransaction {
                hash: TxHash::from(*hash),
                status: *status,
            })
            .collect(),
    }
}

fn settings(default_start_block: u64) -> ReconcileSettings {
    ReconcileSettings {
        default_start_block,
        confirmations: 2,
        audit_name: "validator".to_string(),
    }
}

fn store_with_user() -> Store {
    let store = Store::open_in_memory().expect("store");
    store
        .with_transaction(|tx| {
            tx.insert_user(&User {
                id: UserId(1),
                account: "0x1111111111111111111111111111111111111111".into(),
                invite_url_hash: "h".to_string(),
                validated: true,
                updated_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                mentors: vec![],
                mentorees: vec![],
            })
        })
        .expect("user");
    store
}

fn track(store: &Store, hash: &str) -> TransactionId {
    store
        .record_transaction(FactTarget::User(UserId(1)), &TxHash::from(hash), "signer")
        .expect("record")
}

fn state_of(store: &Store, id: TransactionId) -> TxState {
    store
        .get_transaction(id)
        .expect("get")
        .expect("transaction")
        .state
}

async fn run(store: &Store, factory: Arc<ScriptedBlocks>, start: u64) -> bridge_daemon::ReconcileReport {
    BlockStreamConsumer::new(store.clone(), factory, settings(start))
        .run(CancellationToken::new())
        .await
        .expect("reconcile run")
}

// ---------------------------------------------------------------------------
// 1. Finalization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_block_finalizes_and_moves_cursor() {
    let store = store_with_user();
    let id = track(&store, "0xabc");

    let factory = ScriptedBlocks::new(vec![block(100, &[("0xABC", TxStatus::Successful)])]);
    let report = run(&store, factory, 99).await;

    assert_eq!(report.blocks, 1);
    assert_eq!(report.successful, 1);
    assert_eq!(report.last_block, Some(100));
    assert_eq!(store.latest_processed_block().expect("cursor"), Some(100));
    let tx = store.get_transaction(id).expect("get").expect("transaction");
    assert_eq!(tx.state, TxState::Successful);
    assert_eq!(tx.modified_by, "validator");
}

#[tokio::test]
async fn failed_and_pending_statuses() {
    let store = store_with_user();
    let failed = track(&store, "0xf00");
    let pending = track(&store, "0xbee");

    let factory = ScriptedBlocks::new(vec![block(
        7,
        &[("0xf00", TxStatus::Failed), ("0xbee", TxStatus::Pending)],
    )]);
    let report = run(&store, factory, 6).await;

    assert_eq!(report.failed, 1);
    assert_eq!(state_of(&store, failed), TxState::Failed);
    assert_eq!(state_of(&store, pending), TxState::InProgress);
}

#[tokio::test]
async fn replayed_block_leaves_terminal_rows_and_cursor_alone() {
    let store = store_with_user();
    let id = track(&store, "0xabc");

    let first = ScriptedBlocks::replaying(vec![block(100, &[("0xabc", TxStatus::Successful)])]);
    run(&store, first, 99).await;

    // A later block reports the same hash as failed and an older block is
    // delivered again after a simulated crash.
    let second = ScriptedBlocks::replaying(vec![
        block(101, &[("0xabc", TxStatus::Failed)]),
        block(100, &[("0xabc", TxStatus::Successful)]),
    ]);
    let report = run(&store, second, 99).await;

    assert_eq!(report.blocks, 2);
    assert_eq!(report.successful + report.failed, 0);
    assert_eq!(state_of(&store, id), TxState::Successful);
    assert_eq!(store.latest_processed_block().expect("cursor"), Some(101));
}

// ---------------------------------------------------------------------------
// 2. Cursor and garbage collection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn opens_after_default_block_then_after_cursor() {
    let store = store_with_user();
    let factory = ScriptedBlocks::new(vec![block(50, &[]), block(51, &[])]);
    // No cursor yet: the default block counts as already processed.
    run(&store, factory.clone(), 49).await;
    run(&store, factory.clone(), 49).await;

    let opened = factory.opened.lock().unwrap().clone();
    assert_eq!(opened, vec![(50, 2), (52, 2)]);
}

#[tokio::test]
async fn unreferenced_successful_transactions_are_collected() {
    let store = store_with_user();
    let first = track(&store, "0x01");
    // Relinking the user releases the first transaction.
    let second = track(&store, "0x02");

    let factory = ScriptedBlocks::new(vec![
        block(10, &[("0x01", TxStatus::Successful)]),
        block(11, &[]),
    ]);
    let report = run(&store, factory, 9).await;

    assert_eq!(report.collected, 1);
    assert!(store.get_transaction(first).expect("get").is_none());
    assert_eq!(state_of(&store, second), TxState::InProgress);
}

// ---------------------------------------------------------------------------
// 3. Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_closes_source_and_returns() {
    let store = store_with_user();
    let factory = ScriptedBlocks::open_ended(vec![block(1, &[]), block(2, &[])]);
    let consumer = BlockStreamConsumer::new(store.clone(), factory, settings(0));
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { consumer.run(cancel).await }
    });
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run returns after cancellation")
        .expect("join")
        .expect("report");
    assert_eq!(report.blocks, 2);
    assert_eq!(store.latest_processed_block().expect("cursor"), Some(2));
}
