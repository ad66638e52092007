use crate::domain::article_service::{self, RefreshGuard, SharePost, ShareOutcome};
use crate::domain::canonical::canonicalize_url;
use crate::infrastructure::article_fetcher::ArticleFetcher;
use crate::infrastructure::repository;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// The commit collection carrying posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Facet feature type marking a link span.
const LINK_FEATURE_TYPE: &str = "app.bsky.richtext.facet#link";

/// A post shorter than this that still carries facets is assumed to be a
/// quote-style repost rather than an original story share.
const REPOST_TEXT_THRESHOLD: usize = 50;

// Firehose event shapes. Required-in-lexicon fields are kept optional where
// real traffic has been seen to omit them; events that turn out unusable
// are skipped one by one instead of failing the decode of the whole frame.

#[derive(Debug, Deserialize)]
pub struct JetstreamEvent {
    pub did: String,
    #[serde(default)]
    pub time_us: Option<i64>,
    pub kind: String,
    #[serde(default)]
    pub commit: Option<CommitEvent>,
}

#[derive(Debug, Deserialize)]
pub struct CommitEvent {
    pub operation: String,
    pub collection: String,
    pub rkey: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub facets: Option<Vec<Facet>>,
    #[serde(default)]
    pub embed: Option<Embed>,
    #[serde(default)]
    pub reply: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct Facet {
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Deserialize)]
pub struct FacetFeature {
    #[serde(rename = "$type", default)]
    pub feature_type: String,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub external: Option<ExternalEmbed>,
}

#[derive(Debug, Deserialize)]
pub struct ExternalEmbed {
    pub uri: String,
}

/// Shared set of tracked DIDs the firehose reader filters against.
///
/// The full-network stream is far too hot for a storage round-trip per
/// message; the index is reloaded at (re)connect time and after each
/// follows-import batch, which matches the pipeline's eventual-consistency
/// posture.
#[derive(Clone, Default)]
pub struct SourceIndex {
    dids: Arc<RwLock<HashSet<String>>>,
}

impl SourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with the current tracked-source set.
    pub async fn reload(&self, pool: &SqlitePool) -> Result<usize, sqlx::Error> {
        let dids = repository::list_tracked_dids(pool).await?;
        let count = dids.len();

        let mut guard = self.dids.write().await;
        *guard = dids.into_iter().collect();

        Ok(count)
    }

    pub async fn contains(&self, did: &str) -> bool {
        self.dids.read().await.contains(did)
    }

    pub async fn len(&self) -> usize {
        self.dids.read().await.len()
    }
}

/// Links mentioned by a post, in first-seen order, de-duplicated by exact
/// string: facet link features first, then an external embed, then raw
/// `http(s)://` tokens in the text (trailing punctuation stripped).
pub fn extract_links(record: &PostRecord) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut push = |uri: &str, links: &mut Vec<String>, seen: &mut HashSet<String>| {
        if seen.insert(uri.to_string()) {
            links.push(uri.to_string());
        }
    };

    if let Some(facets) = &record.facets {
        for facet in facets {
            for feature in &facet.features {
                if feature.feature_type == LINK_FEATURE_TYPE {
                    if let Some(uri) = &feature.uri {
                        push(uri, &mut links, &mut seen);
                    }
                }
            }
        }
    }

    if let Some(embed) = &record.embed {
        if let Some(external) = &embed.external {
            push(&external.uri, &mut links, &mut seen);
        }
    }

    for token in record.text.split_whitespace() {
        let trimmed = token.trim_end_matches(['.', ',', '!', '?', ';', ':']);
        if (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
            && Url::parse(trimmed).is_ok()
        {
            push(trimmed, &mut links, &mut seen);
        }
    }

    links
}

/// Repost heuristic: an explicit reply, or a very short post that still
/// carries facets. Known to also catch genuinely short original link posts.
pub fn is_repost(record: &PostRecord) -> bool {
    if record.reply.is_some() {
        return true;
    }

    record.text.trim().len() < REPOST_TEXT_THRESHOLD
        && record
            .facets
            .as_ref()
            .map(|facets| !facets.is_empty())
            .unwrap_or(false)
}

/// Per-message processing totals, aggregated by the consumer into its
/// per-connection counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSummary {
    pub matched: bool,
    pub articles_created: u64,
    pub shares_inserted: u64,
    pub links_skipped: u64,
    pub link_errors: u64,
}

/// Handle one raw firehose frame end to end: decode, gate, filter by
/// tracked author, then canonicalise and record every distinct article
/// link. Per-link failures are logged and never abort the rest of the post.
pub async fn process_message(
    pool: &SqlitePool,
    fetcher: &ArticleFetcher,
    guard: &RefreshGuard,
    index: &SourceIndex,
    raw: &str,
) -> ProcessSummary {
    let mut summary = ProcessSummary::default();

    let event: JetstreamEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(error) => {
            tracing::debug!("Skipping undecodable event: {}", error);
            return summary;
        }
    };

    if event.kind != "commit" {
        return summary;
    }
    let Some(commit) = event.commit else {
        return summary;
    };
    if commit.collection != POST_COLLECTION || commit.operation != "create" {
        return summary;
    }

    // The common case: a post by an author nobody tracks.
    if !index.contains(&event.did).await {
        return summary;
    }
    summary.matched = true;

    let source = match repository::get_source_by_did(pool, &event.did).await {
        Ok(Some(source)) => source,
        Ok(None) => {
            // Index can run ahead of a source deletion; drop the post.
            tracing::debug!("Tracked DID without source row: {}", event.did);
            return summary;
        }
        Err(error) => {
            tracing::warn!("Source lookup failed for {}: {}", event.did, error);
            return summary;
        }
    };

    let Some(record_value) = commit.record else {
        return summary;
    };
    let record: PostRecord = match serde_json::from_value(record_value) {
        Ok(record) => record,
        Err(error) => {
            tracing::debug!("Skipping undecodable post record from {}: {}", event.did, error);
            return summary;
        }
    };

    let links = extract_links(&record);
    if links.is_empty() {
        return summary;
    }

    let post = SharePost {
        post_uri: format!("at://{}/{}/{}", event.did, POST_COLLECTION, commit.rkey),
        post_cid: commit.cid.unwrap_or_default(),
        text: record.text.clone(),
        is_repost: is_repost(&record),
        posted_at: parse_created_at(record.created_at.as_deref()),
    };

    let mut seen_canonical: HashSet<String> = HashSet::new();
    for link in links {
        let canonical = canonicalize_url(&link);

        match Url::parse(&canonical) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => continue,
        }

        // Two raw links can collapse to one canonical URL; fetch it once.
        if !seen_canonical.insert(canonical.clone()) {
            continue;
        }

        match article_service::record_share(pool, fetcher, guard, &canonical, &source, &post).await
        {
            Ok(ShareOutcome::Recorded {
                article_created,
                share_inserted,
            }) => {
                if article_created {
                    summary.articles_created += 1;
                }
                if share_inserted {
                    summary.shares_inserted += 1;
                }
            }
            Ok(ShareOutcome::NotNews) | Ok(ShareOutcome::ContentError) => {
                summary.links_skipped += 1;
            }
            Err(error) => {
                summary.link_errors += 1;
                tracing::warn!("Failed to record share for {}: {}", canonical, error);
            }
        }
    }

    summary
}

fn parse_created_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_from_json(json: &str) -> PostRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_event_decoding() {
        let raw = r#"{
            "did": "did:plc:abc",
            "time_us": 1700000000000000,
            "kind": "commit",
            "commit": {
                "rev": "xyz",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "r1",
                "cid": "c1",
                "record": {"text": "hello", "createdAt": "2025-01-01T00:00:00Z"}
            }
        }"#;

        let event: JetstreamEvent = serde_json::from_str(raw).unwrap();
        let commit = event.commit.unwrap();

        assert_eq!(event.did, "did:plc:abc");
        assert_eq!(event.kind, "commit");
        assert_eq!(commit.collection, POST_COLLECTION);
        assert_eq!(commit.operation, "create");
        assert_eq!(commit.rkey, "r1");
    }

    #[test]
    fn test_extract_links_from_facets() {
        let record = record_from_json(
            r#"{
                "text": "read this",
                "facets": [{
                    "features": [
                        {"$type": "app.bsky.richtext.facet#link", "uri": "https://news.example/a"},
                        {"$type": "app.bsky.richtext.facet#mention", "did": "did:plc:x"}
                    ]
                }]
            }"#,
        );

        assert_eq!(extract_links(&record), vec!["https://news.example/a"]);
    }

    #[test]
    fn test_extract_links_order_and_dedup() {
        let record = record_from_json(
            r#"{
                "text": "see https://news.example/c and https://news.example/a",
                "facets": [{
                    "features": [
                        {"$type": "app.bsky.richtext.facet#link", "uri": "https://news.example/a"}
                    ]
                }],
                "embed": {"external": {"uri": "https://news.example/b"}}
            }"#,
        );

        assert_eq!(
            extract_links(&record),
            vec![
                "https://news.example/a",
                "https://news.example/b",
                "https://news.example/c",
            ]
        );
    }

    #[test]
    fn test_extract_links_strips_trailing_punctuation() {
        let record = record_from_json(r#"{"text": "breaking: https://news.example/story!?"}"#);

        assert_eq!(extract_links(&record), vec!["https://news.example/story"]);
    }

    #[test]
    fn test_extract_links_ignores_non_urls() {
        let record = record_from_json(
            r#"{"text": "https://  http:// nothing herehttps://news.example/x"}"#,
        );

        assert!(extract_links(&record).is_empty());
    }

    #[test]
    fn test_is_repost_for_reply() {
        let record = record_from_json(
            r#"{"text": "a perfectly long and thoughtful response to the original post",
                "reply": {"root": {}, "parent": {}}}"#,
        );

        assert!(is_repost(&record));
    }

    #[test]
    fn test_is_repost_for_short_faceted_post() {
        let record = record_from_json(
            r#"{"text": "look",
                "facets": [{"features": [{"$type": "app.bsky.richtext.facet#link", "uri": "https://n.example/a"}]}]}"#,
        );

        assert!(is_repost(&record));
    }

    #[test]
    fn test_is_not_repost_for_long_original_post() {
        let record = record_from_json(
            r#"{"text": "a long original post that happily rambles past the fifty character mark",
                "facets": [{"features": [{"$type": "app.bsky.richtext.facet#link", "uri": "https://n.example/a"}]}]}"#,
        );

        assert!(!is_repost(&record));
    }

    #[test]
    fn test_is_not_repost_for_short_plain_post() {
        let record = record_from_json(r#"{"text": "tiny"}"#);

        assert!(!is_repost(&record));
    }

    #[test]
    fn test_parse_created_at() {
        assert_eq!(
            parse_created_at(Some("2025-01-01T00:00:00Z"))
                .unwrap()
                .to_rfc3339(),
            "2025-01-01T00:00:00+00:00"
        );
        assert!(parse_created_at(Some("not a date")).is_none());
        assert!(parse_created_at(None).is_none());
    }

    #[tokio::test]
    async fn test_source_index_contains_after_reload() {
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        repository::upsert_source(&pool, "did:plc:tracked", "t.example", None, None)
            .await
            .unwrap();

        let index = SourceIndex::new();
        assert!(!index.contains("did:plc:tracked").await);

        let loaded = index.reload(&pool).await.unwrap();

        assert_eq!(loaded, 1);
        assert!(index.contains("did:plc:tracked").await);
        assert!(!index.contains("did:plc:other").await);
    }
}
