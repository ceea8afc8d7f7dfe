//! Minimal `reqwest`-backed default [`Scraper`]: single-page fetch plus a
//! naive HTML-to-markdown pass. No crawl-queue/BFS logic — that belongs to
//! the real external crawler product this pipeline calls out to in
//! production. SSRF protection blocks requests to private, loopback,
//! link-local and cloud-metadata addresses before any socket is opened.

use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use entity_enrich_core::model::{CrawledPage, MetadataSource};
use scraper::{Html, Selector};
use url::Url;

use crate::error::{Error, Result};
use crate::traits::{CrawlRequest, CrawlStatus, ScrapeResult, Scraper};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// SSRF protection configuration; private by default, matching this
/// collaborator's network-exposure posture.
#[derive(Debug, Clone)]
pub struct SsrfConfig {
    pub allow_private_ips: bool,
    pub allow_non_standard_ports: bool,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            allow_private_ips: false,
            allow_non_standard_ports: false,
        }
    }
}

impl SsrfConfig {
    fn is_blocked_ip(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_multicast()
                    || v4.is_unspecified()
                    || v4.is_broadcast()
                    || *v4 == std::net::Ipv4Addr::new(169, 254, 169, 254)
            }
            IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || v6.is_multicast(),
        }
    }

    fn validate(&self, url: &Url) -> std::result::Result<(), String> {
        let scheme_ok = matches!(url.scheme(), "http" | "https");
        if !scheme_ok {
            return Err(format!("unsupported scheme '{}'", url.scheme()));
        }
        let host = url.host_str().ok_or_else(|| "missing host".to_string())?;
        let port = url.port_or_known_default().unwrap_or(443);
        if !self.allow_non_standard_ports && port != 80 && port != 443 {
            return Err(format!("non-standard port {port} blocked"));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            if !self.allow_private_ips && Self::is_blocked_ip(&ip) {
                return Err(format!("address {ip} is private/internal"));
            }
            return Ok(());
        }
        let resolved = (host, port)
            .to_socket_addrs()
            .map_err(|e| format!("failed to resolve host '{host}': {e}"))?;
        for addr in resolved {
            if !self.allow_private_ips && Self::is_blocked_ip(&addr.ip()) {
                return Err(format!("host '{host}' resolves to private/internal address {}", addr.ip()));
            }
        }
        Ok(())
    }
}

pub struct ReqwestScraper {
    client: reqwest::Client,
    ssrf: SsrfConfig,
}

impl ReqwestScraper {
    pub fn new() -> Self {
        Self::with_ssrf_config(SsrfConfig::default())
    }

    pub fn with_ssrf_config(ssrf: SsrfConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, ssrf }
    }

    fn extract_title(document: &Html) -> String {
        let selector = Selector::parse("title").expect("static selector");
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default()
    }

    /// Naive HTML-to-markdown: strip script/style/noscript, keep block-level
    /// text with blank-line separation. Real Markdown fidelity (lists,
    /// headings, links) is out of scope for this fallback implementation.
    fn extract_markdown(document: &Html) -> String {
        let body_selector = Selector::parse("body").expect("static selector");
        let Some(body) = document.select(&body_selector).next() else {
            return String::new();
        };

        use ego_tree::iter::Edge;
        let mut blocks = Vec::new();
        let mut skip_depth = 0usize;
        for edge in body.traverse() {
            match edge {
                Edge::Open(node) => match node.value() {
                    scraper::Node::Element(el) if matches!(el.name(), "script" | "style" | "noscript") => {
                        skip_depth += 1;
                    }
                    scraper::Node::Text(text) if skip_depth == 0 => {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            blocks.push(trimmed.to_string());
                        }
                    }
                    _ => {}
                },
                Edge::Close(node) => {
                    if let scraper::Node::Element(el) = node.value() {
                        if matches!(el.name(), "script" | "style" | "noscript") && skip_depth > 0 {
                            skip_depth -= 1;
                        }
                    }
                }
            }
        }
        blocks.join("\n\n")
    }
}

impl Default for ReqwestScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scraper for ReqwestScraper {
    async fn scrape(&self, url_str: &str) -> Result<ScrapeResult> {
        let url = Url::parse(url_str).map_err(|e| Error::Http(format!("invalid url '{url_str}': {e}")))?;
        self.ssrf
            .validate(&url)
            .map_err(|reason| Error::SsrfBlocked { url: url_str.to_string(), reason })?;

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus(status.as_u16()));
        }
        let html = response.text().await.map_err(|e| Error::Http(e.to_string()))?;
        let document = Html::parse_document(&html);

        Ok(ScrapeResult {
            page: CrawledPage {
                url: url_str.to_string(),
                title: Self::extract_title(&document),
                markdown: Self::extract_markdown(&document),
                status_code: status.as_u16(),
                metadata: None,
            },
            source: MetadataSource::Regex,
        })
    }

    async fn crawl(&self, _request: CrawlRequest<'_>) -> Result<String> {
        Err(Error::Http(
            "multi-page crawl requires the production crawler collaborator; this default only fetches single pages".to_string(),
        ))
    }

    async fn crawl_status(&self, _crawl_id: &str) -> Result<CrawlStatus> {
        Err(Error::NotFound)
    }
}
