use once_cell::sync::Lazy;
use reqwest::{header::USER_AGENT, Client, StatusCode};
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CrawlerConfig;

static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));
static META_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("meta").expect("static selector"));
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Elements whose text never reaches the model.
const HIDDEN_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Link schemes that never lead to a crawlable page.
const IGNORED_LINK_PREFIXES: [&str; 9] = [
    "mailto:",
    "tel:",
    "javascript:",
    "whatsapp:",
    "viber:",
    "tg:",
    "#",
    "sms:",
    "skype:",
];

/// Second-level labels under two-letter country TLDs (`example.co.uk`).
const COUNTRY_SECOND_LEVEL: [&str; 7] = ["co", "com", "net", "org", "gov", "edu", "ac"];

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub meta: BTreeMap<String, String>,
    pub text: String,
    pub links: Vec<String>,
}

/// Everything the model sees about a site.
#[derive(Debug, Clone, Serialize)]
pub struct SiteSnapshot {
    pub start_url: String,
    pub pages: Vec<PageSnapshot>,
    pub count: usize,
}

/// Validates a caller-supplied site URL. Bare hosts get `https://`.
pub fn parse_site_url(raw: &str) -> Result<Url, CrawlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CrawlError::InvalidUrl("site_url is required".to_string()));
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&candidate)
        .map_err(|e| CrawlError::InvalidUrl(format!("site_url is not a valid URL ({e}): {raw}")))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CrawlError::InvalidUrl(format!(
            "site_url must be an http(s) URL: {raw}"
        )));
    }
    Ok(url)
}

/// Resolves `href` against `base`, dropping fragments and non-page links.
pub fn normalize_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || IGNORED_LINK_PREFIXES.iter().any(|p| href.starts_with(p)) {
        return None;
    }

    let without_fragment = href.split('#').next().unwrap_or_default();
    let mut url = if without_fragment.starts_with("//") {
        Url::parse(&format!("https:{without_fragment}")).ok()?
    } else {
        base.join(without_fragment).ok()?
    };
    url.set_fragment(None);

    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Approximates the registrable domain of a host (`shop.example.co.uk` → `example.co.uk`).
pub fn registered_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let keep = match labels.as_slice() {
        [.., second, tld] if labels.len() >= 3 && tld.len() == 2 && COUNTRY_SECOND_LEVEL.contains(second) => 3,
        _ => 2,
    };
    labels[labels.len().saturating_sub(keep)..].join(".")
}

pub fn same_domain(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(a), Some(b)) => registered_domain(a) == registered_domain(b),
        _ => false,
    }
}

/// Extracts title, meta tags, visible text and outgoing links from one page.
pub fn parse_page(url: &Url, html: &str, max_text_chars: usize) -> PageSnapshot {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let meta = document
        .select(&META_SELECTOR)
        .filter_map(|m| {
            let attrs = m.value();
            let key = attrs
                .attr("name")
                .filter(|n| !n.is_empty())
                .or_else(|| attrs.attr("property").filter(|p| !p.is_empty()))?;
            Some((key.to_string(), attrs.attr("content").unwrap_or_default().to_string()))
        })
        .collect();

    let text: String = document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
            });
            let trimmed = text.trim();
            (!hidden && !trimmed.is_empty()).then_some(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .chars()
        .take(max_text_chars)
        .collect();

    let links = document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| normalize_link(url, href))
        .map(String::from)
        .collect();

    PageSnapshot {
        url: url.to_string(),
        title,
        meta,
        text,
        links,
    }
}

/// Breadth-first, same-domain crawler with page and depth bounds.
#[derive(Clone)]
pub struct SiteCrawler {
    client: Client,
    config: CrawlerConfig,
}

impl SiteCrawler {
    pub fn new(config: CrawlerConfig) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    /// Page fetch failures are logged and skipped; the crawl itself never fails.
    pub async fn crawl(&self, start_url: &Url) -> SiteSnapshot {
        let max_pages = self.config.max_pages;
        info!(
            "Starting crawl: {} (max_pages={}, depth={})",
            start_url, max_pages, self.config.max_depth
        );

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, usize)> = VecDeque::from([(start_url.clone(), 0)]);
        let mut pages: Vec<PageSnapshot> = Vec::new();

        while pages.len() < max_pages {
            let Some((url, depth)) = queue.pop_front() else {
                break;
            };
            if depth > self.config.max_depth || !visited.insert(url.to_string()) {
                continue;
            }

            debug!("[{}/{}] fetching {}", pages.len() + 1, max_pages, url);
            let Some(html) = self.fetch_html(&url).await else {
                continue;
            };

            let mut page = parse_page(&url, &html, self.config.max_text_chars);
            page.links.retain(|link| {
                Url::parse(link).is_ok_and(|l| same_domain(start_url, &l))
            });
            debug!(
                "Parsed {}: {} chars of text, {} same-domain links",
                url,
                page.text.chars().count(),
                page.links.len()
            );

            if depth < self.config.max_depth {
                for link in &page.links {
                    if !visited.contains(link) {
                        if let Ok(next) = Url::parse(link) {
                            queue.push_back((next, depth + 1));
                        }
                    }
                }
            }
            pages.push(page);
        }

        info!("Crawl finished: {} page(s) from {}", pages.len(), start_url);
        SiteSnapshot {
            start_url: start_url.to_string(),
            count: pages.len(),
            pages,
        }
    }

    async fn fetch_html(&self, url: &Url) -> Option<String> {
        let response = match self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.config.user_agent)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("Timeout fetching {}", url);
                return None;
            }
            Err(e) => {
                warn!("Network error for {}: {}", url, e);
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            warn!("Skipping {}: status {}", url, response.status());
            return None;
        }

        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Failed to read body of {}: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_site_url() {
        assert_eq!(parse_site_url("example.com").unwrap().as_str(), "https://example.com/");
        assert_eq!(
            parse_site_url(" http://example.com/a ").unwrap().as_str(),
            "http://example.com/a"
        );
        assert!(parse_site_url("").is_err());
        assert!(parse_site_url("ftp://example.com").is_err());
        assert!(parse_site_url("http://").is_err());
    }

    #[test]
    fn test_normalize_link() {
        let base = url("https://example.com/blog/post");

        assert_eq!(
            normalize_link(&base, "/about#team").unwrap().as_str(),
            "https://example.com/about"
        );
        assert_eq!(
            normalize_link(&base, "next").unwrap().as_str(),
            "https://example.com/blog/next"
        );
        assert_eq!(
            normalize_link(&base, "//cdn.example.com/x").unwrap().as_str(),
            "https://cdn.example.com/x"
        );
        assert_eq!(
            normalize_link(&base, "http://other.org/page#top").unwrap().as_str(),
            "http://other.org/page"
        );

        for ignored in ["mailto:a@b.c", "tel:+100", "javascript:void(0)", "#top", "tg:x", "  "] {
            assert!(normalize_link(&base, ignored).is_none(), "{ignored}");
        }
    }

    #[test]
    fn test_registered_domain() {
        assert_eq!(registered_domain("www.example.com"), "example.com");
        assert_eq!(registered_domain("a.b.example.com."), "example.com");
        assert_eq!(registered_domain("shop.example.co.uk"), "example.co.uk");
        assert_eq!(registered_domain("example.de"), "example.de");
        assert_eq!(registered_domain("localhost"), "localhost");
        assert_eq!(registered_domain("127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn test_same_domain() {
        let start = url("https://www.example.com/");
        assert!(same_domain(&start, &url("https://blog.example.com/post")));
        assert!(!same_domain(&start, &url("https://example.org/")));
    }

    #[test]
    fn test_parse_page_extracts_visible_content() {
        let html = r#"
            <html>
              <head>
                <title>  Acme Widgets </title>
                <meta name="description" content="Best widgets">
                <meta property="og:title" content="Acme">
                <meta charset="utf-8">
                <style>body { color: red; }</style>
              </head>
              <body>
                <h1>Welcome</h1>
                <script>var tracking = 1;</script>
                <noscript>Enable JS</noscript>
                <p>We sell   widgets.</p>
                <a href="/pricing#plans">Pricing</a>
                <a href="mailto:sales@acme.test">Mail</a>
              </body>
            </html>"#;

        let page = parse_page(&url("https://acme.test/"), html, 20_000);

        assert_eq!(page.title, "Acme Widgets");
        assert_eq!(page.meta.get("description").map(String::as_str), Some("Best widgets"));
        assert_eq!(page.meta.get("og:title").map(String::as_str), Some("Acme"));
        assert_eq!(page.meta.len(), 2);
        assert!(page.text.contains("Welcome"));
        assert!(page.text.contains("We sell   widgets."));
        assert!(!page.text.contains("tracking"));
        assert!(!page.text.contains("color: red"));
        assert!(!page.text.contains("Enable JS"));
        assert_eq!(page.links, vec!["https://acme.test/pricing".to_string()]);
    }

    #[test]
    fn test_parse_page_truncates_text() {
        let html = format!("<html><body><p>{}</p></body></html>", "ж".repeat(50));
        let page = parse_page(&url("https://acme.test/"), &html, 10);
        assert_eq!(page.text.chars().count(), 10);
    }
}
