use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use spider_client::shapes::request::{
    Delay, IdleNetwork, RequestType, ReturnFormat, ReturnFormatHandling, Timeout, WaitFor,
};
use spider_client::{RequestParams, Spider};
use tracing::{debug, info, warn};

use crate::download::USER_AGENT;

/// Page HTML after whatever rendering the backend performs.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
}

/// What a rendering backend waits for before it snapshots the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWait {
    None,
    /// Until the network goes quiet, at most this long.
    NetworkIdle(Duration),
    /// A fixed pause after load.
    Delay(Duration),
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub timeout: Duration,
    pub wait: PageWait,
    /// Scroll towards the bottom for this long so lazy carousels load.
    pub scroll: Option<Duration>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            timeout: Duration::from_secs(30),
            wait: PageWait::Delay(Duration::from_millis(3000)),
            scroll: Some(Duration::from_millis(2000)),
        }
    }
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn render(&self, url: &str, opts: &RenderOptions) -> Result<RenderedPage>;
}

/// Browser-like client shared by page fetches and image downloads, so
/// cookies from the first response ride along on the rest.
pub fn browser_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .cookie_store(true)
        .build()
        .context("Failed to build HTTP client")
}

/// Plain GET. No script execution, so lazy-loaded sliders only show up
/// through their `data-*` attributes; `wait` and `scroll` do not apply.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn render(&self, url: &str, opts: &RenderOptions) -> Result<RenderedPage> {
        let response = self
            .client
            .get(url)
            .timeout(opts.timeout)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()?;

        let final_url = response.url().to_string();
        let html = response.text().await.context("Failed reading page body")?;
        Ok(RenderedPage { html, final_url })
    }
}

/// Chrome rendering through spider.cloud.
pub struct SpiderRenderer {
    spider: Spider,
}

impl SpiderRenderer {
    pub fn new(api_key: String) -> Result<Self> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow::anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self { spider })
    }

    /// `None` when `SPIDER_API_KEY` is unset.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var("SPIDER_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Self::new(key).map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl PageRenderer for SpiderRenderer {
    fn name(&self) -> &'static str {
        "spider"
    }

    async fn render(&self, url: &str, opts: &RenderOptions) -> Result<RenderedPage> {
        let params = spider_params(opts);

        let response = tokio::time::timeout(
            opts.timeout,
            self.spider.scrape_url(url, Some(params), "application/json"),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Spider render timed out after {}s", opts.timeout.as_secs()))?
        .map_err(|e| anyhow::anyhow!("Spider scrape failed: {}", e))?;

        parse_spider_response(response, url)
    }
}

/// Chrome request returning raw HTML, with the page wait and scroll applied.
pub fn spider_params(opts: &RenderOptions) -> RequestParams {
    let timeout = |d: Duration| Timeout {
        secs: d.as_secs(),
        nanos: d.subsec_nanos(),
    };
    let wait_for = match opts.wait {
        PageWait::None => None,
        PageWait::NetworkIdle(d) => Some(WaitFor {
            idle_network: Some(IdleNetwork { timeout: timeout(d) }),
            ..Default::default()
        }),
        PageWait::Delay(d) => Some(WaitFor {
            delay: Some(Delay { timeout: timeout(d) }),
            ..Default::default()
        }),
    };

    RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        request: Some(RequestType::Chrome),
        wait_for,
        scroll: opts.scroll.map(|d| u32::try_from(d.as_millis()).unwrap_or(u32::MAX)),
        ..Default::default()
    }
}

/// Pull HTML out of a spider.cloud response: a JSON array (sometimes sent as
/// a string) whose first entry carries `content` and, usually, `url`.
pub fn parse_spider_response(response: serde_json::Value, requested: &str) -> Result<RenderedPage> {
    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };

    let first = parsed.as_array().and_then(|arr| arr.first());

    if let Some(status) = first.and_then(|o| o.get("status")).and_then(|s| s.as_i64()) {
        if !(200..400).contains(&status) {
            anyhow::bail!("Spider returned status {} for {}", status, requested);
        }
    }

    let html = first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("No content in spider response"))?
        .to_string();

    let final_url = first
        .and_then(|obj| obj.get("url"))
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .unwrap_or(requested)
        .to_string();

    Ok(RenderedPage { html, final_url })
}

/// Tries each backend in order; the first success wins.
pub struct FallbackRenderer {
    backends: Vec<Box<dyn PageRenderer>>,
}

impl FallbackRenderer {
    pub fn new(backends: Vec<Box<dyn PageRenderer>>) -> Self {
        Self { backends }
    }

    /// Spider first when an API key is configured, plain HTTP always.
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let mut backends: Vec<Box<dyn PageRenderer>> = Vec::new();
        if let Some(spider) = SpiderRenderer::from_env()? {
            backends.push(Box::new(spider));
        }
        backends.push(Box::new(HttpRenderer::new(client)));
        info!(
            "Page backends: {}",
            backends.iter().map(|b| b.name()).collect::<Vec<_>>().join(" -> ")
        );
        Ok(Self::new(backends))
    }
}

#[async_trait]
impl PageRenderer for FallbackRenderer {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn render(&self, url: &str, opts: &RenderOptions) -> Result<RenderedPage> {
        let mut last_err = None;
        for backend in &self.backends {
            debug!("Rendering {} with {}", url, backend.name());
            match backend.render(url, opts).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    warn!("{} backend failed for {}: {:#}", backend.name(), url, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("No page backends configured")))
    }
}
