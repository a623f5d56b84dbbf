//! Poll loop across all configured accounts.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info};

use crate::config::FetcherConfig;
use crate::fetcher::account::{AccountReport, ReportPipeline, RunLimits, process_account};
use crate::mail::Connector;
use crate::state::ProcessedStore;

/// Drives polling cycles over every account.
pub struct Fetcher {
    config: FetcherConfig,
    connector: Arc<dyn Connector>,
    pipeline: ReportPipeline,
    processed: ProcessedStore,
}

impl Fetcher {
    pub fn new(
        config: FetcherConfig,
        connector: Arc<dyn Connector>,
        pipeline: ReportPipeline,
        processed: ProcessedStore,
    ) -> Self {
        Self {
            config,
            connector,
            pipeline,
            processed,
        }
    }

    pub fn processed(&self) -> &ProcessedStore {
        &self.processed
    }

    /// Process every account once, at most `worker_count()` at a time, then save state.
    pub async fn run_cycle(&self) -> Vec<AccountReport> {
        let limits = RunLimits::from(&self.config);

        let reports: Vec<AccountReport> = futures::stream::iter(&self.config.accounts)
            .map(|account| {
                process_account(
                    account,
                    self.connector.as_ref(),
                    &self.pipeline,
                    &self.processed,
                    &limits,
                )
            })
            .buffer_unordered(self.config.worker_count())
            .collect()
            .await;

        info!("Run complete. Saving state...");
        self.save_state().await;
        reports
    }

    /// Run cycles every `poll_interval_seconds` until `shutdown` resolves,
    /// then save state one last time.
    pub async fn run_forever<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Mail processor started with {} account(s), {} worker(s)",
            self.config.accounts.len(),
            self.config.worker_count()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.run_cycle() => {}
            }

            info!("Sleeping for {} seconds...", self.config.poll_interval_seconds);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("Graceful shutdown requested...");
        self.save_state().await;
        info!("State saved. Bye!");
    }

    async fn save_state(&self) {
        if let Err(e) = self.processed.save().await {
            error!("Failed to save state: {e}");
        }
    }
}
