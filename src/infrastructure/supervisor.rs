use crate::config::Config;
use crate::domain::models::RefreshConfig;
use crate::domain::{feed_service, follows_service, ingest::SourceIndex, scoring_service};
use crate::infrastructure::atproto::AtprotoClient;
use crate::infrastructure::jetstream::JetstreamConsumer;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FIREHOSE_RESTART_DELAY: Duration = Duration::from_secs(30);
const FOLLOWS_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SCORING_INTERVAL: Duration = Duration::from_secs(15 * 60);
const FEED_REBUILD_INTERVAL: Duration = Duration::from_secs(5 * 60);
const FEED_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Owns the background half of the system: the firehose consumer plus the
/// follows, scoring, and feed tickers, all under one cancellation scope.
pub struct Supervisor {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Spawn all four worker tasks. Tickers fire immediately once and then
    /// on their interval.
    pub fn start(pool: SqlitePool, config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let token = CancellationToken::new();
        let index = SourceIndex::new();

        let consumer = JetstreamConsumer::new(pool.clone(), index.clone(), &config.jetstream_url)?;
        let client = AtprotoClient::new(&config.bsky_api_base, config.bsky_access_token.clone())?;

        let handles = vec![
            tokio::spawn(firehose_task(consumer, token.child_token())),
            tokio::spawn(follows_task(
                pool.clone(),
                client,
                index,
                token.child_token(),
            )),
            tokio::spawn(scoring_task(pool.clone(), token.child_token())),
            tokio::spawn(feed_task(pool, token.child_token())),
        ];

        tracing::info!("Worker supervisor started ({} tasks)", handles.len());

        Ok(Self { token, handles })
    }

    /// Cancel every task and wait for all of them to observe it.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down worker supervisor");
        self.token.cancel();

        for handle in self.handles {
            if let Err(error) = handle.await {
                tracing::warn!("Worker task ended abnormally: {}", error);
            }
        }

        tracing::info!("Worker supervisor stopped");
    }
}

/// The consumer has its own reconnect loop and only returns on
/// cancellation; anything else is unexpected and restarts it after a pause.
async fn firehose_task(consumer: JetstreamConsumer, token: CancellationToken) {
    loop {
        consumer.run(token.clone()).await;

        if token.is_cancelled() {
            break;
        }

        tracing::error!(
            "Firehose consumer returned unexpectedly; restarting in {}s",
            FIREHOSE_RESTART_DELAY.as_secs()
        );
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(FIREHOSE_RESTART_DELAY) => {}
        }
    }
}

async fn follows_task(
    pool: SqlitePool,
    client: AtprotoClient,
    index: SourceIndex,
    token: CancellationToken,
) {
    let refresh_config = RefreshConfig::default();
    let mut ticker = tokio::time::interval(FOLLOWS_REFRESH_INTERVAL);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                match follows_service::refresh_batch(&pool, &client, &refresh_config, &token).await {
                    Ok(refreshed) => {
                        if refreshed > 0 {
                            // New follows change what the firehose filter
                            // should match.
                            match index.reload(&pool).await {
                                Ok(tracked) => tracing::info!(
                                    "Subscriber refresh batch done: {} refreshed, {} tracked sources",
                                    refreshed,
                                    tracked
                                ),
                                Err(error) => tracing::warn!(
                                    "Source index reload failed: {}",
                                    error
                                ),
                            }
                        }
                    }
                    Err(error) => {
                        tracing::error!("Follows refresh batch failed: {}", error);
                    }
                }
            }
        }
    }
}

async fn scoring_task(pool: SqlitePool, token: CancellationToken) {
    let mut ticker = tokio::time::interval(SCORING_INTERVAL);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(error) = scoring_service::run_scoring(&pool).await {
                    tracing::error!("Scoring pass failed: {}", error);
                }
            }
        }
    }
}

async fn feed_task(pool: SqlitePool, token: CancellationToken) {
    let mut rebuild_ticker = tokio::time::interval(FEED_REBUILD_INTERVAL);
    let mut maintenance_ticker = tokio::time::interval(FEED_MAINTENANCE_INTERVAL);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = rebuild_ticker.tick() => {
                if let Err(error) = feed_service::rebuild_global_feed(&pool).await {
                    tracing::error!("Global feed rebuild failed: {}", error);
                }
            }
            _ = maintenance_ticker.tick() => {
                cleanup_hook();
                metrics_hook();
            }
        }
    }
}

/// Hook for expiring stale feed data. Intentionally empty for now.
fn cleanup_hook() {
    tracing::debug!("Feed cleanup hook (no-op)");
}

/// Hook for exporting feed metrics. Intentionally empty for now.
fn metrics_hook() {
    tracing::debug!("Feed metrics hook (no-op)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_supervisor_shutdown_joins_all_tasks() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            port: 0,
            host: "127.0.0.1".to_string(),
            // Nothing listens here; the consumer sits in its retry loop
            // until cancellation.
            jetstream_url: "ws://127.0.0.1:1/subscribe".to_string(),
            bsky_api_base: "http://127.0.0.1:1".to_string(),
            bsky_access_token: None,
        };

        let supervisor = Supervisor::start(pool, &config).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
            .await
            .expect("shutdown must complete promptly after cancellation");
    }
}
