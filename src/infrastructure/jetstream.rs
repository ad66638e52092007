use crate::domain::article_service::RefreshGuard;
use crate::domain::ingest::{self, SourceIndex};
use crate::infrastructure::article_fetcher::{ArticleFetcher, FetchError};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const READ_DEADLINE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Log a counter summary every this many received frames.
const SUMMARY_EVERY: u64 = 10_000;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no frame within the read deadline")]
    ReadTimeout,

    #[error("stream closed by server")]
    Closed,
}

#[derive(Debug, Default)]
struct ConnectionCounters {
    received: u64,
    matched: u64,
    articles_created: u64,
    shares_inserted: u64,
    links_skipped: u64,
    link_errors: u64,
}

impl ConnectionCounters {
    fn absorb(&mut self, summary: ingest::ProcessSummary) {
        self.received += 1;
        if summary.matched {
            self.matched += 1;
        }
        self.articles_created += summary.articles_created;
        self.shares_inserted += summary.shares_inserted;
        self.links_skipped += summary.links_skipped;
        self.link_errors += summary.link_errors;
    }

    fn log(&self, context: &str) {
        tracing::info!(
            "Jetstream {}: received={} matched={} articles_created={} shares_inserted={} links_skipped={} link_errors={}",
            context,
            self.received,
            self.matched,
            self.articles_created,
            self.shares_inserted,
            self.links_skipped,
            self.link_errors,
        );
    }
}

/// Streaming consumer of the post firehose.
///
/// There is deliberately no cursor or resume: the stream is high-volume and
/// the write path idempotent, so events dropped during a reconnect window
/// are an accepted loss.
pub struct JetstreamConsumer {
    pool: SqlitePool,
    fetcher: ArticleFetcher,
    guard: RefreshGuard,
    index: SourceIndex,
    subscribe_url: String,
}

impl JetstreamConsumer {
    pub fn new(
        pool: SqlitePool,
        index: SourceIndex,
        jetstream_url: &str,
    ) -> Result<Self, FetchError> {
        let subscribe_url = format!(
            "{}?wantedCollections={}",
            jetstream_url,
            ingest::POST_COLLECTION
        );

        Ok(Self {
            pool,
            fetcher: ArticleFetcher::new()?,
            guard: RefreshGuard::default(),
            index,
            subscribe_url,
        })
    }

    /// Consume the firehose until cancelled, reconnecting after a fixed
    /// delay on any connection or read error.
    pub async fn run(&self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }

            match self.run_connection(&token).await {
                Ok(()) => break, // cancellation observed inside
                Err(error) => {
                    tracing::warn!(
                        "Jetstream connection failed, reconnecting in {}s: {}",
                        RECONNECT_DELAY.as_secs(),
                        error
                    );
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }

        tracing::info!("Jetstream consumer stopped");
    }

    async fn run_connection(&self, token: &CancellationToken) -> Result<(), StreamError> {
        let tracked = self.index.reload(&self.pool).await?;
        tracing::info!(
            "Connecting to jetstream at {} ({} tracked sources)",
            self.subscribe_url,
            tracked
        );

        let (stream, _response) = connect_async(self.subscribe_url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        tracing::info!("Jetstream connected");

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // the first tick is immediate

        let mut counters = ConnectionCounters::default();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    counters.log("final");
                    return Ok(());
                }
                _ = ping.tick() => {
                    sink.send(Message::Ping(Vec::new())).await?;
                }
                frame = tokio::time::timeout(READ_DEADLINE, source.next()) => {
                    // Any inbound frame (data, ping, or pong) extends the
                    // read deadline for the next cycle.
                    let frame = match frame {
                        Ok(Some(frame)) => frame?,
                        Ok(None) => {
                            counters.log("disconnect");
                            return Err(StreamError::Closed);
                        }
                        Err(_elapsed) => {
                            counters.log("stalled");
                            return Err(StreamError::ReadTimeout);
                        }
                    };

                    match frame {
                        Message::Text(text) => {
                            let summary = ingest::process_message(
                                &self.pool,
                                &self.fetcher,
                                &self.guard,
                                &self.index,
                                &text,
                            )
                            .await;
                            counters.absorb(summary);

                            if counters.received % SUMMARY_EVERY == 0 {
                                counters.log("progress");
                            }
                        }
                        Message::Ping(payload) => {
                            sink.send(Message::Pong(payload)).await?;
                        }
                        Message::Pong(_) => {}
                        Message::Close(_) => {
                            counters.log("disconnect");
                            return Err(StreamError::Closed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_url_constrains_collection() {
        let index = SourceIndex::new();
        // The pool is only touched once a connection is opened.
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();

        let consumer =
            JetstreamConsumer::new(pool, index, "wss://jetstream.example/subscribe").unwrap();

        assert_eq!(
            consumer.subscribe_url,
            "wss://jetstream.example/subscribe?wantedCollections=app.bsky.feed.post"
        );
    }
}
