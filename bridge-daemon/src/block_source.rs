//! Confirmed-block delivery.
//!
//! Chain access is not part of this crate. A [`BlockSourceFactory`] opens a
//! [`BlockSource`] at a starting block; the source delivers blocks in order
//! over a channel until it is closed.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use bridge_core::TxHash;

use crate::error::DaemonError;

/// Outcome of a transaction as reported in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Successful,
    Failed,
    /// Anything not final; ignored by the reconciler.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTransaction {
    pub hash: TxHash,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub transactions: Vec<BlockTransaction>,
}

impl Block {
    /// Split the block's hashes into (successful, failed) sets.
    pub fn partition(&self) -> (Vec<TxHash>, Vec<TxHash>) {
        let mut successful = BTreeSet::new();
        let mut failed = BTreeSet::new();
        for tx in &self.transactions {
            match tx.status {
                TxStatus::Successful => {
                    successful.insert(tx.hash.clone());
                }
                TxStatus::Failed => {
                    failed.insert(tx.hash.clone());
                }
                TxStatus::Pending => {}
            }
        }
        (successful.into_iter().collect(), failed.into_iter().collect())
    }
}

/// An open stream of confirmed blocks.
pub trait BlockSource: Send + Sync {
    /// The block channel. Only the first call returns it.
    fn blocks(&self) -> Option<mpsc::Receiver<Block>>;

    /// Stop delivering. The channel ends once buffered blocks are drained.
    fn close(&self);
}

#[async_trait]
pub trait BlockSourceFactory: Send + Sync {
    async fn open(
        &self,
        start_block: u64,
        confirmations: u64,
    ) -> Result<Arc<dyn BlockSource>, DaemonError>;
}

// ---------------------------------------------------------------------------
// In-process channel source
// ---------------------------------------------------------------------------

/// A [`BlockSource`] fed from inside the process through a [`BlockFeed`].
pub struct ChannelBlockSource {
    receiver: Mutex<Option<mpsc::Receiver<Block>>>,
    sender: Arc<Mutex<Option<mpsc::Sender<Block>>>>,
}

/// Producer handle of a [`ChannelBlockSource`].
#[derive(Clone)]
pub struct BlockFeed {
    sender: Arc<Mutex<Option<mpsc::Sender<Block>>>>,
}

impl ChannelBlockSource {
    pub fn new(capacity: usize) -> (Arc<Self>, BlockFeed) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = Arc::new(Mutex::new(Some(tx)));
        let source = Arc::new(Self {
            receiver: Mutex::new(Some(rx)),
            sender: sender.clone(),
        });
        (source, BlockFeed { sender })
    }
}

impl BlockSource for ChannelBlockSource {
    fn blocks(&self) -> Option<mpsc::Receiver<Block>> {
        self.receiver.lock().ok().and_then(|mut rx| rx.take())
    }

    fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

impl BlockFeed {
    /// Deliver a block. Returns `false` once the source is closed.
    pub async fn send(&self, block: Block) -> bool {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        match sender {
            Some(sender) => sender.send(block).await.is_ok(),
            None => false,
        }
    }

    /// Close the source from the producer side.
    pub fn finish(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}
