//! Web search through DuckDuckGo's HTML endpoint.
//!
//! Search is best effort: any failure is logged and yields no results, so a
//! web-search chat still gets an answer from the model alone.

use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use crate::crawler::attributes;
use crate::db::models::SearchResult;
use crate::doc_processor::html_to_text;

pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a>").unwrap());

pub struct WebSearch {
    client: Client,
    endpoint: String,
    max_results: usize,
}

impl WebSearch {
    pub fn new(client: Client, endpoint: impl Into<String>, max_results: usize) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            max_results,
        }
    }

    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let mut url = match Url::parse(&self.endpoint) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "invalid search endpoint");
                return Vec::new();
            }
        };
        // `df=d` restricts results to the past day.
        url.query_pairs_mut().append_pair("q", query).append_pair("df", "d");

        let html = match self.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(error = %e, "web search failed");
                return Vec::new();
            }
        };
        let results = parse_results(&url, &html, self.max_results);
        tracing::info!(results = results.len(), "web search finished");
        results
    }

    async fn fetch(&self, url: &Url) -> reqwest::Result<String> {
        self.client
            .get(url.clone())
            .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

/// Result titles are `a.result__a`, snippets the following `a.result__snippet`.
pub fn parse_results(page: &Url, html: &str, limit: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = Vec::new();
    for anchor in ANCHOR.captures_iter(html) {
        let attrs = attributes(&anchor[1]);
        let Some(class) = attrs.get("class") else {
            continue;
        };
        let classes: Vec<&str> = class.split_whitespace().collect();
        let text = inline_text(&anchor[2]);

        if classes.contains(&"result__a") {
            if results.len() == limit {
                break;
            }
            let href = attrs.get("href").map(String::as_str).unwrap_or("");
            if text.is_empty() || href.is_empty() {
                continue;
            }
            results.push(SearchResult {
                title: text,
                url: target_url(page, href),
                snippet: String::new(),
            });
        } else if classes.contains(&"result__snippet") {
            if let Some(last) = results.last_mut().filter(|r| r.snippet.is_empty()) {
                last.snippet = text;
            }
        }
    }
    results
}

fn inline_text(fragment: &str) -> String {
    html_to_text(fragment).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// DuckDuckGo wraps targets in a redirect carrying the real URL in `uddg`.
fn target_url(page: &Url, href: &str) -> String {
    let Ok(absolute) = page.join(href) else {
        return href.to_string();
    };
    absolute
        .query_pairs()
        .find(|(key, _)| key == "uddg")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| absolute.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <div class="result results_links">
          <h2 class="result__title">
            <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fblog.rust-lang.org%2F&amp;rut=abc">The <b>Rust</b> Blog</a>
          </h2>
          <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Empowering everyone to build <b>reliable</b> software.</a>
        </div>
        <div class="result">
          <a class="result__a" href="https://doc.rust-lang.org/">Docs</a>
        </div>
        <div class="result">
          <a class="result__a" href="https://crates.io/">Crates</a>
          <a class="result__snippet">The Rust package registry</a>
        </div>
    "#;

    fn page() -> Url {
        Url::parse(DEFAULT_SEARCH_URL).unwrap()
    }

    #[test]
    fn parses_titles_targets_and_snippets() {
        let results = parse_results(&page(), PAGE, 5);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "The Rust Blog");
        assert_eq!(results[0].url, "https://blog.rust-lang.org/");
        assert_eq!(results[0].snippet, "Empowering everyone to build reliable software.");
        assert_eq!(results[1].url, "https://doc.rust-lang.org/");
        assert!(results[1].snippet.is_empty());
        assert_eq!(results[2].snippet, "The Rust package registry");
    }

    #[test]
    fn stops_at_limit() {
        let results = parse_results(&page(), PAGE, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].title, "Docs");
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_nothing() {
        let search = WebSearch::new(Client::new(), "http://127.0.0.1:9/html/", 5);
        assert!(search.search("rust").await.is_empty());
    }
}
