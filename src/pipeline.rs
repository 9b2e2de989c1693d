use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::candidates::{normalize, Candidate};
use crate::classify::{classify, ClassifierRules};
use crate::config::Settings;
use crate::download::{DownloadOptions, Downloader, HttpTransport, Transport};
use crate::manifest::Manifest;
use crate::parser::{extract_references, ParserKind};
use crate::render::{browser_client, FallbackRenderer, PageRenderer, RenderOptions, RenderedPage};

/// Everything one site scrape produced.
#[derive(Debug)]
pub struct ScrapeReport {
    pub site_name: String,
    pub dest: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

/// render -> extract -> normalize -> classify -> download -> manifest.
pub struct Pipeline {
    renderer: Arc<dyn PageRenderer>,
    downloader: Downloader,
    rules: ClassifierRules,
    parser: ParserKind,
    render_opts: RenderOptions,
}

impl Pipeline {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        transport: Arc<dyn Transport>,
        rules: ClassifierRules,
        parser: ParserKind,
        render_opts: RenderOptions,
        download_opts: DownloadOptions,
    ) -> Self {
        Pipeline {
            renderer,
            downloader: Downloader::new(transport, download_opts),
            rules,
            parser,
            render_opts,
        }
    }

    /// Real network backends, sharing one cookie jar between page and image fetches.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = browser_client()?;
        let renderer = FallbackRenderer::from_env(client.clone())?;
        let transport = HttpTransport::new(client);
        Ok(Self::new(
            Arc::new(renderer),
            Arc::new(transport),
            settings.classifier_rules(),
            settings.parser,
            settings.render_options(),
            settings.download_options(),
        ))
    }

    pub async fn scrape_site(
        &self,
        url: &str,
        output: &Path,
        include_all: bool,
        cancel: &CancellationToken,
    ) -> Result<ScrapeReport> {
        let source = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let site = site_name(url, &source);
        let dest = output.join(&site);
        std::fs::create_dir_all(&dest).with_context(|| format!("Failed to create {}", dest.display()))?;

        info!("Fetching {} ...", url);
        let page = match self.renderer.render(url, &self.render_opts).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Page fetch failed for {}: {:#}; continuing with an empty page", url, e);
                RenderedPage {
                    html: String::new(),
                    final_url: url.to_string(),
                }
            }
        };
        info!("Received {} bytes of HTML", page.html.len());

        let base = Url::parse(&page.final_url).unwrap_or(source);
        let refs = extract_references(&page.html, &base, self.parser);
        let unique = normalize(refs);
        let total_images_found = unique.len();
        info!("Found {} unique images", total_images_found);

        let mut selected: Vec<Candidate> = Vec::new();
        let mut denied = 0;
        for c in unique.into_values() {
            let verdict = classify(&c, &self.rules, include_all);
            debug!(
                "{} banner={} keyword={} url_pattern={} size_ok={} denied={}",
                c.url, verdict.is_banner, verdict.has_keyword, verdict.has_promo_url_pattern, verdict.size_ok, verdict.denied
            );
            denied += verdict.denied as usize;
            if verdict.is_banner {
                selected.push(c);
            }
        }
        let label = if include_all { "images" } else { "banner candidates" };
        info!("Identified {} {} ({} denylisted)", selected.len(), label, denied);
        if selected.is_empty() {
            warn!("No banners found. Try --all-images to download every image.");
        }

        let outcomes = self.downloader.download_all(&selected, &dest, cancel).await;

        let manifest = Manifest::new(
            url,
            &page.final_url,
            total_images_found,
            selected.len(),
            include_all,
            outcomes,
        );
        let manifest_path = manifest.write(&dest)?;
        info!("Manifest saved to {}", manifest_path.display());

        Ok(ScrapeReport {
            site_name: site,
            dest,
            manifest_path,
            manifest,
        })
    }
}

/// Directory name for a site: host and any port written in `raw`, with `.`
/// and `:` as `_`. `Url` drops a spelled-out default port, so `raw` is checked too.
pub fn site_name(raw: &str, url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    let port = match url.port() {
        Some(port) => Some(port),
        None if has_written_port(raw) => url.port_or_known_default(),
        None => None,
    };
    let netloc = match port {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    netloc.replace(['.', ':'], "_")
}

fn has_written_port(raw: &str) -> bool {
    let rest = raw.trim().split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    host_port
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}
