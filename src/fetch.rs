//! Page fetching and content extraction.
//!
//! Downloads a document's page with bounded retry (network errors and non-2xx
//! responses both count as retryable) and extracts readable text with an
//! optional CSS selector. A selector that matches nothing falls back to
//! whole-page extraction rather than failing the document.
//!
//! Retry strategy: up to `fetch.max_retries` attempts with exponential
//! backoff (1s, 2s, 4s, ...).

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::config::FetchConfig;

/// Extracted page: readable text plus capture metadata.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedPage {
    pub content: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
}

pub struct PageFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl PageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// Fetch a page and extract its text content.
    ///
    /// Retries transport failures and error statuses with exponential
    /// backoff; returns the last error once attempts are exhausted.
    pub async fn fetch_page(&self, url: &str, selector: Option<&str>) -> Result<FetchedPage> {
        let mut last_err = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(url, attempt, "retrying fetch after {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            let resp = match self.client.get(url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(url, attempt, "fetch failed: {}", e);
                    last_err = Some(anyhow::Error::from(e));
                    continue;
                }
            };

            let status = resp.status();
            if !status.is_success() {
                tracing::warn!(url, attempt, %status, "fetch returned error status");
                last_err = Some(anyhow::anyhow!("HTTP {} fetching {}", status, url));
                continue;
            }

            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let final_url = resp.url().to_string();
            let body = resp.text().await?;

            return Ok(extract_page(&body, url, &final_url, &content_type, selector));
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Fetch failed for {}", url)))
    }
}

/// Parse the HTML body and pull out text, title, and page metadata.
fn extract_page(
    body: &str,
    url: &str,
    final_url: &str,
    content_type: &str,
    selector: Option<&str>,
) -> FetchedPage {
    let document = Html::parse_document(body);

    let content = match selector {
        Some(sel) => match Selector::parse(sel) {
            Ok(parsed) => {
                let selected: Vec<String> = document
                    .select(&parsed)
                    .map(|e| element_text(&e))
                    .filter(|t| !t.is_empty())
                    .collect();
                if selected.is_empty() {
                    tracing::warn!(url, selector = sel, "selector matched nothing, falling back to full content");
                    extract_full_content(&document)
                } else {
                    selected.join("\n\n")
                }
            }
            Err(_) => {
                tracing::warn!(url, selector = sel, "invalid selector, falling back to full content");
                extract_full_content(&document)
            }
        },
        None => extract_full_content(&document),
    };

    let title = Selector::parse("title")
        .ok()
        .and_then(|s| document.select(&s).next())
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let description = Selector::parse(r#"meta[name="description"]"#)
        .ok()
        .and_then(|s| document.select(&s).next())
        .and_then(|e| e.value().attr("content").map(str::to_string));

    let metadata = serde_json::json!({
        "url": url,
        "final_url": final_url,
        "content_type": content_type,
        "description": description,
        "fetched_at": Utc::now().to_rfc3339(),
    });

    FetchedPage {
        content,
        title,
        metadata,
    }
}

/// Extract readable text from the whole page: text-bearing block elements,
/// one per line. Script/style content never appears because those tags hold
/// no matching elements.
fn extract_full_content(document: &Html) -> String {
    let selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, td, th, blockquote, pre, dt, dd")
        .expect("static selector");

    let mut lines: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        // Skip containers whose text is fully covered by a matching child
        // (e.g. an <li> wrapping a <p>) to avoid doubled lines.
        if element
            .children()
            .filter_map(scraper::ElementRef::wrap)
            .any(|child| selector.matches(&child))
        {
            continue;
        }
        let text = element_text(&element);
        if !text.is_empty() {
            lines.push(text);
        }
    }

    if lines.is_empty() {
        // Non-HTML or unstructured body: fall back to raw text nodes
        document
            .root_element()
            .text()
            .collect::<String>()
            .trim()
            .to_string()
    } else {
        lines.join("\n")
    }
}

fn element_text(element: &scraper::ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><head><title>Acme Terms</title>
<meta name="description" content="Acme terms of service"></head>
<body><nav>Home</nav>
<div id="legal"><h1>Terms of Service</h1><p>You agree to the terms.</p></div>
<script>analytics()</script>
<footer><p>Copyright 2024</p></footer></body></html>"#;

    #[test]
    fn selector_extraction_scopes_content() {
        let page = extract_page(PAGE, "http://x", "http://x", "text/html", Some("#legal"));
        assert!(page.content.contains("You agree to the terms."));
        assert!(!page.content.contains("Copyright 2024"));
        assert_eq!(page.title.as_deref(), Some("Acme Terms"));
    }

    #[test]
    fn missing_selector_falls_back_to_full_content() {
        let page = extract_page(PAGE, "http://x", "http://x", "text/html", Some("#nope"));
        assert!(page.content.contains("You agree to the terms."));
        assert!(page.content.contains("Copyright 2024"));
        assert!(!page.content.contains("analytics()"));
    }

    #[tokio::test]
    async fn fetch_retries_until_success() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tos"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tos"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let fetcher = PageFetcher::new(&crate::config::FetchConfig::default()).unwrap();
        let page = fetcher
            .fetch_page(&format!("{}/tos", server.uri()), None)
            .await
            .unwrap();
        assert!(page.content.contains("You agree to the terms."));
    }

    #[tokio::test]
    async fn fetch_gives_up_after_max_retries() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tos"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = crate::config::FetchConfig {
            max_retries: 2,
            ..Default::default()
        };
        let fetcher = PageFetcher::new(&config).unwrap();
        let err = fetcher
            .fetch_page(&format!("{}/tos", server.uri()), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
