use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

use crate::doc_processor::{decode_entities, html_to_text};
use crate::error::{AppError, AppResult};

/// What a processed link contributes: preview fields plus the page text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPreview {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub content: String,
}

pub async fn fetch(client: &Client, url: &Url) -> AppResult<LinkPreview> {
    let resp = client
        .get(url.clone())
        .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
        .send()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::Upstream(format!("{} returned {}", url, resp.status())));
    }

    let html = resp
        .text()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    tracing::debug!(%url, bytes = html.len(), "fetched link");
    Ok(extract_preview(url, &html))
}

static TAG_WITH_ATTRS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(meta|link|img)\b([^>]*)>").unwrap());
static ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static TITLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

pub(crate) fn attributes(raw: &str) -> HashMap<String, String> {
    ATTR.captures_iter(raw)
        .map(|c| {
            let value = c.get(2).or_else(|| c.get(3)).map(|m| m.as_str()).unwrap_or("");
            (c[1].to_lowercase(), decode_entities(value).trim().to_string())
        })
        .collect()
}

/// Pull the preview out of a page. Title falls back to the URL; relative
/// image URLs are resolved against the page.
pub fn extract_preview(url: &Url, html: &str) -> LinkPreview {
    let mut meta: HashMap<String, String> = HashMap::new();
    let mut first_image: Option<String> = None;
    let mut icon: Option<String> = None;

    for tag in TAG_WITH_ATTRS.captures_iter(html) {
        let attrs = attributes(&tag[2]);
        match tag[1].to_lowercase().as_str() {
            "meta" => {
                let key = attrs.get("property").or_else(|| attrs.get("name"));
                if let (Some(key), Some(content)) = (key, attrs.get("content")) {
                    if !content.is_empty() {
                        meta.entry(key.to_lowercase()).or_insert_with(|| content.clone());
                    }
                }
            }
            "img" if first_image.is_none() => {
                first_image = attrs.get("src").filter(|s| !s.is_empty()).cloned();
            }
            "link" if icon.is_none() => {
                let is_icon = attrs
                    .get("rel")
                    .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("icon")));
                if is_icon {
                    icon = attrs.get("href").filter(|s| !s.is_empty()).cloned();
                }
            }
            _ => {}
        }
    }

    let title = meta
        .get("og:title")
        .cloned()
        .or_else(|| {
            TITLE
                .captures(html)
                .map(|c| decode_entities(c[1].trim()))
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| url.to_string());

    let description = meta
        .get("og:description")
        .or_else(|| meta.get("description"))
        .cloned();

    let image = meta
        .get("og:image")
        .or_else(|| meta.get("twitter:image"))
        .cloned()
        .or(first_image)
        .or(icon)
        .map(|src| url.join(&src).map(|u| u.to_string()).unwrap_or(src));

    LinkPreview {
        url: url.to_string(),
        title,
        description,
        image,
        content: html_to_text(html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://example.com/blog/post").unwrap()
    }

    #[test]
    fn open_graph_wins() {
        let html = r#"<html><head>
            <title>Plain title</title>
            <meta property="og:title" content="OG &amp; title">
            <meta name="description" content="plain description">
            <meta property="og:description" content="og description">
            <meta property="og:image" content="/img/cover.png">
            </head><body><p>Body text</p></body></html>"#;
        let preview = extract_preview(&page(), html);
        assert_eq!(preview.title, "OG & title");
        assert_eq!(preview.description.as_deref(), Some("og description"));
        assert_eq!(preview.image.as_deref(), Some("https://example.com/img/cover.png"));
        assert!(preview.content.contains("Body text"));
    }

    #[test]
    fn falls_back_through_title_img_and_icon() {
        let html = r#"<html><head><title> Just a title </title>
            <link rel="shortcut icon" href="/favicon.ico">
            <meta name='description' content='described'>
            </head><body><img alt="x" src="pics/a.jpg"></body></html>"#;
        let preview = extract_preview(&page(), html);
        assert_eq!(preview.title, "Just a title");
        assert_eq!(preview.description.as_deref(), Some("described"));
        assert_eq!(preview.image.as_deref(), Some("https://example.com/blog/pics/a.jpg"));
    }

    #[test]
    fn icon_used_when_no_images() {
        let html = r#"<head><link rel="icon" href="https://cdn.example.com/i.png"></head>"#;
        let preview = extract_preview(&page(), html);
        assert_eq!(preview.image.as_deref(), Some("https://cdn.example.com/i.png"));
    }

    #[test]
    fn bare_page_uses_url_as_title() {
        let preview = extract_preview(&page(), "<p>nothing here</p>");
        assert_eq!(preview.title, "https://example.com/blog/post");
        assert_eq!(preview.description, None);
        assert_eq!(preview.image, None);
        assert_eq!(preview.content, "nothing here");
    }
}
