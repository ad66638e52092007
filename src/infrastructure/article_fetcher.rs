use chrono::{DateTime, Utc};
use reqwest::{header, redirect, Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Deadline for the cheap "is this a news article at all" fetch.
pub const VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for the full metadata fetch.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_REDIRECTS: usize = 10;
const WORDS_PER_MINUTE: f64 = 225.0;
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP request failed with status {0}")]
    HttpStatus(StatusCode),

    #[error("response is not HTML: {0}")]
    NotHtml(String),

    #[error("page is not a news article")]
    NotNews,
}

/// Whether an extraction failure means the host could not be reached (and a
/// later retry may succeed), as opposed to the host answering with something
/// that is not a usable news article.
///
/// Reachability: DNS failure, refused/reset connections, timeouts, network
/// unreachable, and HTTP 408/429 or any 5xx. Everything else — other 4xx,
/// non-HTML bodies, pages that are not news — is a content failure and is
/// never retried.
pub fn is_reachability_error(error: &FetchError) -> bool {
    match error {
        FetchError::Network(err) => is_connection_dns_or_timeout_error(err),
        FetchError::HttpStatus(status) => {
            matches!(status.as_u16(), 408 | 429) || status.is_server_error()
        }
        FetchError::NotHtml(_) | FetchError::NotNews => false,
    }
}

/// Check if a reqwest error is a connection, DNS, or timeout error
fn is_connection_dns_or_timeout_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }

    // Walk the source chain; reqwest's own Display is shallow
    let mut message = err.to_string().to_lowercase();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(&inner.to_string().to_lowercase());
        source = std::error::Error::source(inner);
    }

    message.contains("dns")
        || message.contains("name resolution")
        || message.contains("connection refused")
        || message.contains("connection reset")
        || message.contains("network unreachable")
}

/// Everything we can pull out of one article page.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: String,
    pub description: String,
    pub author: String,
    pub site_name: String,
    pub image_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub language: String,
    pub word_count: i64,
    pub reading_time_minutes: i64,
    pub og_data: String,
    pub jsonld_data: String,
    pub raw_html: String,
    pub text_content: String,
    pub is_news_article: bool,
}

pub struct ArticleFetcher {
    client: Client,
}

impl ArticleFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(crate::user_agent())
            .gzip(true)
            .brotli(true)
            .timeout(EXTRACT_TIMEOUT)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self { client })
    }

    /// Short-deadline fetch that only has to answer "is this a news
    /// article". Fails with `FetchError::NotNews` when the page parses but
    /// carries no NewsArticle JSON-LD type.
    pub async fn validate(&self, url: &str) -> Result<Metadata, FetchError> {
        let metadata = self.fetch_and_parse(url, VALIDATE_TIMEOUT).await?;

        if !metadata.is_news_article {
            return Err(FetchError::NotNews);
        }

        Ok(metadata)
    }

    /// Full-deadline fetch returning whatever metadata the page yields.
    /// Classification is reported, not enforced; callers decide.
    pub async fn extract(&self, url: &str) -> Result<Metadata, FetchError> {
        self.fetch_and_parse(url, EXTRACT_TIMEOUT).await
    }

    async fn fetch_and_parse(&self, url: &str, deadline: Duration) -> Result<Metadata, FetchError> {
        tracing::debug!("Fetching article: {}", url);

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, ACCEPT_HTML)
            .timeout(deadline)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Article fetch failed with status {}: {}", status, url);
            return Err(FetchError::HttpStatus(status));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        // A missing Content-Type is given the benefit of the doubt
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(FetchError::NotHtml(content_type));
        }

        let body = response.text().await?;

        Ok(extract_metadata(&body))
    }
}

/// Parse an HTML document into article metadata. Pure; all fetch concerns
/// live in `ArticleFetcher`.
pub fn extract_metadata(raw_html: &str) -> Metadata {
    let document = Html::parse_document(raw_html);

    let meta_selector = Selector::parse("meta").expect("static selector");
    let mut og_properties = serde_json::Map::new();
    let mut meta_by_name: HashMap<String, String> = HashMap::new();
    let mut meta_by_property: HashMap<String, String> = HashMap::new();

    for element in document.select(&meta_selector) {
        let Some(content) = element.value().attr("content") else {
            continue;
        };

        if let Some(property) = element.value().attr("property") {
            if property.starts_with("og:") && !og_properties.contains_key(property) {
                og_properties.insert(property.to_string(), Value::String(content.to_string()));
            }
            meta_by_property
                .entry(property.to_string())
                .or_insert_with(|| content.to_string());
        }

        if let Some(name) = element.value().attr("name") {
            meta_by_name
                .entry(name.to_string())
                .or_insert_with(|| content.to_string());
        }
    }

    let og_data = if og_properties.is_empty() {
        String::new()
    } else {
        Value::Object(og_properties.clone()).to_string()
    };
    let og = |key: &str| -> Option<String> {
        og_properties
            .get(key)
            .and_then(|value| value.as_str())
            .map(|s| s.to_string())
    };

    let jsonld_selector =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector");
    let jsonld_data = document
        .select(&jsonld_selector)
        .map(|script| script.text().collect::<String>().trim().to_string())
        .find(|payload| !payload.is_empty())
        .unwrap_or_default();
    let jsonld: Option<Value> = serde_json::from_str(&jsonld_data).ok();

    let title_selector = Selector::parse("title").expect("static selector");
    let title_tag = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string());

    let title = og("og:title")
        .or_else(|| jsonld.as_ref().and_then(|v| jsonld_string(v, "headline")))
        .or(title_tag)
        .unwrap_or_default();

    let description = og("og:description")
        .or_else(|| meta_by_name.get("description").cloned())
        .or_else(|| {
            jsonld
                .as_ref()
                .and_then(|v| jsonld_string(v, "description"))
        })
        .unwrap_or_default();

    let author = jsonld
        .as_ref()
        .and_then(jsonld_author)
        .or_else(|| meta_by_name.get("author").cloned())
        .or_else(|| meta_by_property.get("article:author").cloned())
        .unwrap_or_default();

    let site_name = og("og:site_name")
        .or_else(|| {
            jsonld
                .as_ref()
                .and_then(|v| jsonld_find(v, "publisher"))
                .and_then(|publisher| {
                    publisher
                        .get("name")
                        .and_then(|n| n.as_str())
                        .map(|s| s.to_string())
                })
        })
        .unwrap_or_default();

    let image_url = og("og:image")
        .or_else(|| meta_by_name.get("twitter:image").cloned())
        .or_else(|| meta_by_property.get("twitter:image").cloned())
        .or_else(|| jsonld.as_ref().and_then(jsonld_image))
        .unwrap_or_default();

    let published_at = jsonld
        .as_ref()
        .and_then(|v| jsonld_string(v, "datePublished"))
        .or_else(|| meta_by_property.get("article:published_time").cloned())
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let language = document
        .root_element()
        .value()
        .attr("lang")
        .unwrap_or_default()
        .to_string();

    let text_content = extract_text_content(&document);
    let word_count = text_content.split_whitespace().count() as i64;
    let reading_time_minutes =
        ((word_count as f64 / WORDS_PER_MINUTE).round() as i64).max(1);

    let is_news_article = jsonld
        .as_ref()
        .map(contains_news_article_type)
        .unwrap_or(false);

    Metadata {
        title: ammonia::clean(&title),
        description: ammonia::clean(&description),
        author: ammonia::clean(&author),
        site_name: ammonia::clean(&site_name),
        image_url,
        published_at,
        language,
        word_count,
        reading_time_minutes,
        og_data,
        jsonld_data,
        raw_html: raw_html.to_string(),
        text_content,
        is_news_article,
    }
}

/// Plain text of the page, preferring the first `<article>`, then `<main>`,
/// then `<body>`; script/style subtrees excluded, whitespace collapsed.
fn extract_text_content(document: &Html) -> String {
    let article_selector = Selector::parse("article").expect("static selector");
    let main_selector = Selector::parse("main").expect("static selector");
    let body_selector = Selector::parse("body").expect("static selector");

    let root = document
        .select(&article_selector)
        .next()
        .or_else(|| document.select(&main_selector).next())
        .or_else(|| document.select(&body_selector).next());

    let Some(root) = root else {
        return String::new();
    };

    let mut out = String::new();
    collect_text(root, &mut out);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if name != "script" && name != "style" {
                collect_text(child_element, out);
            }
        } else if let scraper::Node::Text(text) = child.value() {
            out.push_str(&text.text);
            out.push(' ');
        }
    }
}

/// True iff an object with `@type` "NewsArticle" (as string, or member of a
/// type array) exists anywhere reachable in the JSON-LD document. `@graph`
/// arrays are always traversed; objects without an `@type` are otherwise
/// skipped rather than recursed into.
pub fn contains_news_article_type(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(contains_news_article_type),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                if contains_news_article_type(graph) {
                    return true;
                }
            }

            match map.get("@type") {
                None => false,
                Some(type_value) => {
                    if type_matches_news_article(type_value) {
                        return true;
                    }
                    map.iter()
                        .filter(|(key, _)| key.as_str() != "@graph")
                        .any(|(_, nested)| {
                            matches!(nested, Value::Object(_) | Value::Array(_))
                                && contains_news_article_type(nested)
                        })
                }
            }
        }
        _ => false,
    }
}

fn type_matches_news_article(type_value: &Value) -> bool {
    match type_value {
        Value::String(s) => s == "NewsArticle",
        Value::Array(items) => items.iter().any(|item| item.as_str() == Some("NewsArticle")),
        _ => false,
    }
}

/// First value stored under `key` anywhere in the document, scanning objects
/// in insertion order and arrays front to back.
fn jsonld_find(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Array(items) => items.iter().find_map(|item| jsonld_find(item, key)),
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found.clone());
            }
            map.values()
                .filter(|nested| matches!(nested, Value::Object(_) | Value::Array(_)))
                .find_map(|nested| jsonld_find(nested, key))
        }
        _ => None,
    }
}

fn jsonld_string(value: &Value, key: &str) -> Option<String> {
    jsonld_find(value, key)
        .and_then(|found| found.as_str().map(|s| s.to_string()))
        .filter(|s| !s.is_empty())
}

/// `author` may be a plain string, an object with a `name`, or an array of
/// either.
fn jsonld_author(value: &Value) -> Option<String> {
    let author = jsonld_find(value, "author")?;

    let name_of = |item: &Value| -> Option<String> {
        match item {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(map) => map
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            _ => None,
        }
    };

    match &author {
        Value::Array(items) => items.iter().find_map(name_of),
        other => name_of(other),
    }
}

/// `image` may be a URL string, an object with a `url`, or an array of
/// either.
fn jsonld_image(value: &Value) -> Option<String> {
    let image = jsonld_find(value, "image")?;

    let url_of = |item: &Value| -> Option<String> {
        match item {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(map) => map
                .get("url")
                .and_then(|u| u.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            _ => None,
        }
    };

    match &image {
        Value::Array(items) => items.iter().find_map(url_of),
        other => url_of(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWS_PAGE: &str = r#"<!DOCTYPE html>
        <html lang="en">
        <head>
            <title>Fallback Title</title>
            <meta property="og:title" content="OG Title">
            <meta property="og:description" content="OG description of the story">
            <meta property="og:site_name" content="News Example">
            <meta property="og:image" content="https://news.example/hero.jpg">
            <meta name="description" content="Meta description">
            <meta name="author" content="Meta Author">
            <meta property="article:published_time" content="2024-03-01T08:00:00Z">
            <script type="application/ld+json">
                {"@type": "NewsArticle", "headline": "JSON-LD Headline",
                 "author": {"@type": "Person", "name": "Jane Writer"},
                 "datePublished": "2024-03-01T07:30:00Z",
                 "publisher": {"@type": "Organization", "name": "News Example Org"}}
            </script>
            <style>body { color: red }</style>
        </head>
        <body>
            <nav>Site navigation links</nav>
            <article>
                <h1>OG Title</h1>
                <p>First paragraph of the story body with several words.</p>
                <script>console.log("tracking")</script>
                <p>Second   paragraph with    odd whitespace.</p>
            </article>
            <footer>Footer text outside the article</footer>
        </body>
        </html>"#;

    #[test]
    fn test_title_prefers_open_graph() {
        let metadata = extract_metadata(NEWS_PAGE);
        assert_eq!(metadata.title, "OG Title");
    }

    #[test]
    fn test_title_falls_back_to_jsonld_then_title_tag() {
        let jsonld_only = r#"<html><head><title>Tag Title</title>
            <script type="application/ld+json">{"@type":"Article","headline":"LD Headline"}</script>
            </head><body></body></html>"#;
        assert_eq!(extract_metadata(jsonld_only).title, "LD Headline");

        let tag_only = "<html><head><title>Tag Title</title></head><body></body></html>";
        assert_eq!(extract_metadata(tag_only).title, "Tag Title");
    }

    #[test]
    fn test_author_prefers_jsonld_object_name() {
        let metadata = extract_metadata(NEWS_PAGE);
        assert_eq!(metadata.author, "Jane Writer");
    }

    #[test]
    fn test_author_falls_back_to_meta() {
        let page = r#"<html><head><meta name="author" content="Meta Author"></head><body></body></html>"#;
        assert_eq!(extract_metadata(page).author, "Meta Author");
    }

    #[test]
    fn test_published_at_prefers_jsonld() {
        let metadata = extract_metadata(NEWS_PAGE);
        assert_eq!(
            metadata.published_at.unwrap().to_rfc3339(),
            "2024-03-01T07:30:00+00:00"
        );
    }

    #[test]
    fn test_published_at_from_article_meta() {
        let page = r#"<html><head>
            <meta property="article:published_time" content="2024-03-01T08:00:00Z">
            </head><body></body></html>"#;
        let metadata = extract_metadata(page);
        assert_eq!(
            metadata.published_at.unwrap().to_rfc3339(),
            "2024-03-01T08:00:00+00:00"
        );
    }

    #[test]
    fn test_language_from_html_attribute() {
        assert_eq!(extract_metadata(NEWS_PAGE).language, "en");
    }

    #[test]
    fn test_og_blob_is_valid_json() {
        let metadata = extract_metadata(NEWS_PAGE);
        let parsed: Value = serde_json::from_str(&metadata.og_data).unwrap();
        assert_eq!(parsed["og:title"], "OG Title");
        assert_eq!(parsed["og:site_name"], "News Example");
    }

    #[test]
    fn test_text_content_prefers_article_and_skips_scripts() {
        let metadata = extract_metadata(NEWS_PAGE);

        assert!(metadata.text_content.contains("First paragraph"));
        assert!(metadata.text_content.contains("Second paragraph with odd whitespace."));
        assert!(!metadata.text_content.contains("tracking"));
        assert!(!metadata.text_content.contains("Site navigation"));
        assert!(!metadata.text_content.contains("Footer text"));
    }

    #[test]
    fn test_text_content_falls_back_to_body() {
        let page = "<html><body><p>Only body text here</p></body></html>";
        assert_eq!(extract_metadata(page).text_content, "Only body text here");
    }

    #[test]
    fn test_word_count_and_reading_time() {
        let words = (0..450).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let page = format!("<html><body><article>{words}</article></body></html>");
        let metadata = extract_metadata(&page);

        assert_eq!(metadata.word_count, 450);
        assert_eq!(metadata.reading_time_minutes, 2);
    }

    #[test]
    fn test_reading_time_has_floor_of_one_minute() {
        let page = "<html><body><article>short</article></body></html>";
        assert_eq!(extract_metadata(page).reading_time_minutes, 1);
    }

    #[test]
    fn test_classifies_news_article() {
        assert!(extract_metadata(NEWS_PAGE).is_news_article);
    }

    #[test]
    fn test_webpage_type_is_not_news() {
        let page = r#"<html><head>
            <script type="application/ld+json">{"@type":"WebPage","name":"About us"}</script>
            </head><body></body></html>"#;
        assert!(!extract_metadata(page).is_news_article);
    }

    #[test]
    fn test_news_article_in_type_array() {
        let value: Value =
            serde_json::from_str(r#"{"@type":["ReportageNewsArticle","NewsArticle"]}"#).unwrap();
        assert!(contains_news_article_type(&value));
    }

    #[test]
    fn test_news_article_in_graph() {
        let value: Value = serde_json::from_str(
            r#"{"@context":"https://schema.org",
                "@graph":[{"@type":"WebSite"},{"@type":"NewsArticle","headline":"H"}]}"#,
        )
        .unwrap();
        assert!(contains_news_article_type(&value));
    }

    #[test]
    fn test_news_article_in_top_level_array() {
        let value: Value =
            serde_json::from_str(r#"[{"@type":"BreadcrumbList"},{"@type":"NewsArticle"}]"#)
                .unwrap();
        assert!(contains_news_article_type(&value));
    }

    #[test]
    fn test_untyped_objects_are_not_recursed_into() {
        let value: Value =
            serde_json::from_str(r#"{"wrapper":{"@type":"NewsArticle"}}"#).unwrap();
        assert!(!contains_news_article_type(&value));
    }

    #[test]
    fn test_first_nonempty_jsonld_script_wins() {
        let page = r#"<html><head>
            <script type="application/ld+json">   </script>
            <script type="application/ld+json">{"@type":"NewsArticle","headline":"Kept"}</script>
            <script type="application/ld+json">{"@type":"WebPage"}</script>
            </head><body></body></html>"#;
        let metadata = extract_metadata(page);

        assert!(metadata.jsonld_data.contains("Kept"));
        assert!(metadata.is_news_article);
    }

    #[test]
    fn test_malformed_jsonld_is_kept_raw_but_not_news() {
        let page = r#"<html><head>
            <script type="application/ld+json">{not json</script>
            </head><body></body></html>"#;
        let metadata = extract_metadata(page);

        assert_eq!(metadata.jsonld_data, "{not json");
        assert!(!metadata.is_news_article);
    }

    #[test]
    fn test_image_fallback_chain() {
        let twitter = r#"<html><head><meta name="twitter:image" content="https://t.example/i.jpg"></head><body></body></html>"#;
        assert_eq!(extract_metadata(twitter).image_url, "https://t.example/i.jpg");

        let jsonld = r#"<html><head>
            <script type="application/ld+json">{"@type":"NewsArticle","image":[{"@type":"ImageObject","url":"https://l.example/i.jpg"}]}</script>
            </head><body></body></html>"#;
        assert_eq!(extract_metadata(jsonld).image_url, "https://l.example/i.jpg");
    }

    #[test]
    fn test_site_name_from_jsonld_publisher() {
        let page = r#"<html><head>
            <script type="application/ld+json">{"@type":"NewsArticle","publisher":{"name":"The Org"}}</script>
            </head><body></body></html>"#;
        assert_eq!(extract_metadata(page).site_name, "The Org");
    }

    #[test]
    fn test_display_strings_are_sanitised() {
        let page = r#"<html><head>
            <meta property="og:title" content="<script>alert(1)</script>Breaking News">
            <meta property="og:description" content="<script>alert(2)</script>A summary">
            <meta property="og:site_name" content="<iframe src=x></iframe>News Example">
            <meta name="author" content="<b onclick=x>Jane</b>">
            </head><body></body></html>"#;
        let metadata = extract_metadata(page);

        assert!(!metadata.title.contains("<script"));
        assert!(metadata.title.contains("Breaking News"));
        assert!(!metadata.description.contains("<script"));
        assert!(metadata.description.contains("A summary"));
        assert!(!metadata.site_name.contains("<iframe"));
        assert!(metadata.site_name.contains("News Example"));
        assert!(!metadata.author.contains("onclick"));
        assert!(metadata.author.contains("Jane"));
    }

    #[test]
    fn test_status_based_reachability_classification() {
        for status in [408u16, 429, 500, 502, 503, 504, 599] {
            let error = FetchError::HttpStatus(StatusCode::from_u16(status).unwrap());
            assert!(is_reachability_error(&error), "status {status}");
        }

        for status in [400u16, 401, 403, 404, 410, 451] {
            let error = FetchError::HttpStatus(StatusCode::from_u16(status).unwrap());
            assert!(!is_reachability_error(&error), "status {status}");
        }
    }

    #[test]
    fn test_content_errors_are_not_reachability_errors() {
        assert!(!is_reachability_error(&FetchError::NotNews));
        assert!(!is_reachability_error(&FetchError::NotHtml(
            "application/pdf".to_string()
        )));
    }

    #[tokio::test]
    async fn test_dns_failure_is_reachability_error() {
        let fetcher = ArticleFetcher::new().unwrap();

        let error = fetcher
            .extract("http://no-such-host.invalid/a")
            .await
            .expect_err("fetch of .invalid host must fail");

        assert!(is_reachability_error(&error));
        assert!(!error.to_string().is_empty());
    }
}
