use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    config::Config, metrics::RANKINGS_WORKER_TICKS_TOTAL,
    services::ranking_service::RankingService,
};

/// Periodic leaderboard recomputation. The manual trigger endpoint is a
/// freshness accelerator; this loop is what keeps rankings current.
pub struct RankingsWorker {
    ranking_service: RankingService,
    config: Config,
}

impl RankingsWorker {
    pub fn new(ranking_service: RankingService, config: Config) -> Self {
        Self {
            ranking_service,
            config,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let interval = Duration::from_secs(self.config.rankings.worker_interval_secs);
        info!(
            "Starting rankings worker loop (interval {}s)",
            interval.as_secs()
        );

        loop {
            match self.run_once().await {
                Ok(generated) => {
                    RANKINGS_WORKER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    info!(generated, "Rankings worker tick completed");
                }
                Err(err) => {
                    RANKINGS_WORKER_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "Rankings worker tick failed");
                }
            }

            sleep(interval).await;
        }
    }

    async fn run_once(&self) -> Result<usize> {
        self.ranking_service.recompute_all("worker").await
    }
}
