use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bridge_core::Store;
use bridge_sync::{LedgerClient, UpdateSource};

use crate::block_source::BlockSourceFactory;
use crate::config::BridgeConfig;
use crate::error::{join_err, DaemonError};
use crate::job::{BlockReconcileJob, FactSyncJob, Supervisor};
use crate::reconcile::BlockStreamConsumer;

/// External systems the daemon talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// `None` reads from the record store API named in the configuration.
    pub source: Option<Arc<dyn UpdateSource>>,
    pub ledger: Arc<dyn LedgerClient>,
    pub blocks: Arc<dyn BlockSourceFactory>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(
    config: BridgeConfig,
    collaborators: Collaborators,
    log_format: LogFormat,
) -> Result<(), DaemonError> {
    init_tracing(log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| DaemonError::Runtime {
            context: "building tokio runtime",
            source,
        })?;
    runtime.block_on(run(config, collaborators, CancellationToken::new()))
}

/// Run both pipelines until `cancel` fires, ctrl-c is received, or a job
/// fails fatally.
pub async fn run(
    config: BridgeConfig,
    collaborators: Collaborators,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    config.validate()?;

    let db_path = config.db_path.clone();
    let store = tokio::task::spawn_blocking(move || Store::open(&db_path))
        .await
        .map_err(|e| join_err("store open", e))??;
    tracing::info!(db = %config.db_path.display(), "ledger bridge starting");

    let source: Arc<dyn UpdateSource> = match collaborators.source {
        Some(source) => source,
        None => {
            tracing::info!(url = %config.source_url, "reading updates from record store API");
            Arc::new(config.update_source())
        }
    };

    let fact_job = FactSyncJob {
        store: store.clone(),
        source,
        ledger: collaborators.ledger,
        settings: Arc::new(config.writer_settings()),
        schedule: config.processing,
    };
    let reconcile_job = BlockReconcileJob {
        consumer: BlockStreamConsumer::new(
            store,
            collaborators.blocks,
            config.reconcile_settings(),
        ),
        schedule: config.validating,
    };

    let signal_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => tracing::info!("received ctrl-c, shutting down"),
                        Err(err) => tracing::error!(error = %err, "ctrl-c handler failed, shutting down"),
                    }
                    cancel.cancel();
                }
            }
        })
    };

    let result = Supervisor::new()
        .with_job(Arc::new(fact_job))
        .with_job(Arc::new(reconcile_job))
        .run(cancel.clone())
        .await;

    cancel.cancel();
    signal_handle
        .await
        .map_err(|e| join_err("signal_handler", e))?;

    match &result {
        Ok(()) => tracing::info!("ledger bridge stopped"),
        Err(err) => tracing::error!(error = %err, "ledger bridge stopped with error"),
    }
    result
}

/// Install the global subscriber. `log` records from the sync crate are
/// forwarded through the subscriber's `tracing-log` bridge.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
}
