//! Block stream consumer: reconcile tracked transactions against confirmed
//! blocks.
//!
//! Per delivered block, in order:
//!
//! 1. Garbage-collect Successful transactions no row references.
//! 2. Partition the block's hashes into successful and failed sets.
//! 3. Move matching InProgress rows to their terminal state and store the
//!    block number as the cursor, in one database transaction.
//!
//! A store error aborts the run before the cursor passes the failing block,
//! so that block is processed again on the next run.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bridge_core::{Store, StoreError, TxState};

use crate::block_source::{Block, BlockSourceFactory};
use crate::error::{join_err, DaemonError};

pub const DEFAULT_START_BLOCK: u64 = 4_029_220;
pub const DEFAULT_CONFIRMATIONS: u64 = 2;
pub const DEFAULT_AUDIT_NAME: &str = "block-reconciler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Treated as the last processed block while no cursor has been stored.
    pub default_start_block: u64,
    pub confirmations: u64,
    /// Recorded as `modified_by` on finalized rows.
    pub audit_name: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            default_start_block: DEFAULT_START_BLOCK,
            confirmations: DEFAULT_CONFIRMATIONS,
            audit_name: DEFAULT_AUDIT_NAME.to_string(),
        }
    }
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub start_block: u64,
    pub blocks: usize,
    pub successful: usize,
    pub failed: usize,
    pub collected: usize,
    pub last_block: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockOutcome {
    successful: usize,
    failed: usize,
    collected: usize,
}

pub struct BlockStreamConsumer {
    store: Store,
    factory: Arc<dyn BlockSourceFactory>,
    settings: ReconcileSettings,
}

impl BlockStreamConsumer {
    pub fn new(
        store: Store,
        factory: Arc<dyn BlockSourceFactory>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            factory,
            settings,
        }
    }

    /// Consume blocks until `cancel` fires, the source closes, or a store
    /// error occurs. The source is closed and the watcher task joined before
    /// this returns.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ReconcileReport, DaemonError> {
        let store = self.store.clone();
        let cursor = tokio::task::spawn_blocking(move || store.latest_processed_block())
            .await
            .map_err(|e| join_err("cursor read", e))??;
        let start_block = cursor.unwrap_or(self.settings.default_start_block) + 1;

        let source = self
            .factory
            .open(start_block, self.settings.confirmations)
            .await?;
        let Some(mut blocks) = source.blocks() else {
            source.close();
            return Err(DaemonError::BlockSource(
                "block channel was already taken".to_string(),
            ));
        };
        tracing::debug!(start_block, confirmations = self.settings.confirmations, "block source opened");

        let done = CancellationToken::new();
        let watcher = {
            let source = source.clone();
            let cancel = cancel.clone();
            let done = done.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("cancellation requested, closing block source");
                        source.close();
                    }
                    _ = done.cancelled() => {}
                }
            })
        };

        let mut report = ReconcileReport {
            start_block,
            ..ReconcileReport::default()
        };
        let result = self.consume(&mut blocks, &mut report).await;

        done.cancel();
        source.close();
        if let Err(err) = watcher.await {
            tracing::warn!(error = %err, "block source watcher failed");
        }

        result?;
        if report.blocks > 0 {
            tracing::info!(
                blocks = report.blocks,
                successful = report.successful,
                failed = report.failed,
                collected = report.collected,
                last_block = report.last_block,
                "reconciled confirmed blocks"
            );
        }
        Ok(report)
    }

    async fn consume(
        &self,
        blocks: &mut mpsc::Receiver<Block>,
        report: &mut ReconcileReport,
    ) -> Result<(), DaemonError> {
        while let Some(block) = blocks.recv().await {
            let number = block.number;
            let store = self.store.clone();
            let audit_name = self.settings.audit_name.clone();
            let outcome = tokio::task::spawn_blocking(move || apply_block(&store, &block, &audit_name))
                .await
                .map_err(|e| join_err("block apply", e))?
                .map_err(|err| {
                    tracing::error!(block = number, error = %err, "failed to reconcile block");
                    err
                })?;

            tracing::debug!(
                block = number,
                successful = outcome.successful,
                failed = outcome.failed,
                collected = outcome.collected,
                "block reconciled"
            );
            report.blocks += 1;
            report.successful += outcome.successful;
            report.failed += outcome.failed;
            report.collected += outcome.collected;
            report.last_block = Some(number);
        }
        Ok(())
    }
}

fn apply_block(store: &Store, block: &Block, audit_name: &str) -> Result<BlockOutcome, StoreError> {
    let collected = store.delete_finalized_unreferenced_transactions()?;
    let (successful, failed) = block.partition();
    store.with_transaction(|tx| {
        let now = Utc::now();
        let successful =
            tx.update_transaction_states(&successful, TxState::Successful, audit_name, now)?;
        let failed = tx.update_transaction_states(&failed, TxState::Failed, audit_name, now)?;
        tx.set_latest_processed_block(block.number)?;
        Ok(BlockOutcome {
            successful,
            failed,
            collected,
        })
    })
}
