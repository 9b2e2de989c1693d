use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pipeline::Pipeline;

pub const SUMMARY_FILE: &str = "batch_summary.txt";

/// Outcome of one site in a batch.
#[derive(Debug, Clone)]
pub struct SiteResult {
    pub url: String,
    pub site_name: String,
    pub banners_downloaded: usize,
    pub error: Option<String>,
}

impl SiteResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub total_sites: usize,
    /// Sites that yielded at least one banner.
    pub successful_sites: usize,
    pub failed_sites: usize,
    pub total_banners: usize,
}

impl BatchStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_sites == 0 {
            return 0.0;
        }
        self.successful_sites as f64 / self.total_sites as f64 * 100.0
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<SiteResult>,
    pub stats: BatchStats,
}

impl BatchReport {
    fn record(&mut self, result: SiteResult) {
        match &result.error {
            Some(_) => self.stats.failed_sites += 1,
            None if result.banners_downloaded > 0 => {
                self.stats.successful_sites += 1;
                self.stats.total_banners += result.banners_downloaded;
            }
            None => {}
        }
        self.results.push(result);
    }

    /// Sites with banners, most banners first; ties keep input order.
    pub fn top_sites(&self, n: usize) -> Vec<&SiteResult> {
        let mut ranked: Vec<_> = self
            .results
            .iter()
            .filter(|r| r.succeeded() && r.banners_downloaded > 0)
            .collect();
        ranked.sort_by(|a, b| b.banners_downloaded.cmp(&a.banners_downloaded));
        ranked.truncate(n);
        ranked
    }

    pub fn summary_text(&self) -> String {
        let s = &self.stats;
        let mut out = String::new();
        let _ = writeln!(out, "BATCH BANNER EXTRACTION SUMMARY");
        let _ = writeln!(out, "{}\n", "=".repeat(40));
        let _ = writeln!(out, "Total Sites:   {}", s.total_sites);
        let _ = writeln!(out, "Successful:    {}", s.successful_sites);
        let _ = writeln!(out, "Failed:        {}", s.failed_sites);
        let _ = writeln!(out, "Total Banners: {}", s.total_banners);
        let _ = writeln!(out, "Success Rate:  {:.1}%\n", s.success_rate());

        let _ = writeln!(out, "SUCCESSFUL EXTRACTIONS");
        let _ = writeln!(out, "{}", "-".repeat(25));
        for r in self.results.iter().filter(|r| r.succeeded() && r.banners_downloaded > 0) {
            let _ = writeln!(out, "{}: {} banners", r.site_name, r.banners_downloaded);
        }

        let _ = writeln!(out, "\nFAILED EXTRACTIONS");
        let _ = writeln!(out, "{}", "-".repeat(20));
        for r in &self.results {
            if let Some(e) = &r.error {
                let _ = writeln!(out, "{}: {}", r.url, e);
            }
        }
        out
    }

    pub fn write_summary(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        std::fs::write(&path, self.summary_text()).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// One URL per line; blank lines and `#` comments skipped.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

/// `--urls a.com,b.com`
pub fn split_url_arg(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn load_urls(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to load URL file {}", path.display()))?;
    Ok(parse_url_list(&text))
}

/// Bare hosts get `https://`.
pub fn normalize_site_url(raw: &str) -> String {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

/// Scrape each site in turn. A failing site is recorded and the batch moves on.
pub async fn run_batch(
    pipeline: &Pipeline,
    urls: &[String],
    output: &Path,
    include_all: bool,
    pause: Duration,
    cancel: &CancellationToken,
) -> Result<BatchReport> {
    std::fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))?;

    let mut report = BatchReport {
        stats: BatchStats {
            total_sites: urls.len(),
            ..Default::default()
        },
        ..Default::default()
    };
    info!("Starting batch extraction from {} sites", urls.len());

    for (i, raw) in urls.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("Batch cancelled after {} of {} sites", i, urls.len());
            break;
        }
        let url = normalize_site_url(raw);
        info!("Processing {}/{}: {}", i + 1, urls.len(), url);

        let result = match pipeline.scrape_site(&url, output, include_all, cancel).await {
            Ok(site) => {
                let n = site.manifest.banners_downloaded;
                if n > 0 {
                    info!("{}: {} banners", site.site_name, n);
                } else {
                    warn!("{}: no banners found", site.site_name);
                }
                SiteResult {
                    url,
                    site_name: site.site_name,
                    banners_downloaded: n,
                    error: None,
                }
            }
            Err(e) => {
                error!("{}: {:#}", url, e);
                SiteResult {
                    site_name: url.clone(),
                    url,
                    banners_downloaded: 0,
                    error: Some(format!("{:#}", e)),
                }
            }
        };
        report.record(result);

        if i + 1 < urls.len() && !pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    let summary = report.write_summary(output)?;
    info!("Summary saved to {}", summary.display());
    Ok(report)
}
