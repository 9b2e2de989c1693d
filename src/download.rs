use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidates::Candidate;
use crate::parser::SourceChannel;
use crate::sniff::{self, ImageFormat};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Raw response from a byte transport.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Fetches image bytes. Shared across download workers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
}

/// reqwest-backed transport. Clone the page client into it so cookies set
/// while fetching the page travel with image requests.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "image/avif,image/webp,image/*,*/*;q=0.8")
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("request failed for {}", url))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed reading body of {}", url))?;

        Ok(FetchResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    #[error("transport error")]
    TransportError,
    #[error("response is not an image")]
    NotImageContentType,
    #[error("body too small")]
    TooSmall,
    #[error("body too large")]
    TooLarge,
    #[error("unrecognized format, saved as jpg")]
    UnrecognizedFormatDefaulted,
    #[error("interrupted")]
    Interrupted,
    #[error("could not write file")]
    IoError,
}

/// One download attempt. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub index: usize,
    #[serde(rename = "url")]
    pub candidate_url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub alt: String,
    pub title: String,
    pub context: String,
    pub channels: Vec<SourceChannel>,
}

impl DownloadOutcome {
    fn base(candidate: &Candidate, index: usize) -> Self {
        DownloadOutcome {
            index,
            candidate_url: candidate.url.clone(),
            success: false,
            filename: None,
            format: None,
            size_bytes: None,
            width: None,
            height: None,
            reason: None,
            detail: None,
            alt: candidate.alt.clone(),
            title: candidate.title.clone(),
            context: candidate.context.clone(),
            channels: candidate.channels.iter().copied().collect(),
        }
    }

    fn failed(candidate: &Candidate, index: usize, reason: FailureReason, detail: impl Into<String>) -> Self {
        DownloadOutcome {
            reason: Some(reason),
            detail: Some(detail.into()),
            ..Self::base(candidate, index)
        }
    }

    fn stored(candidate: &Candidate, index: usize, file: StoredFile) -> Self {
        DownloadOutcome {
            success: true,
            filename: Some(file.filename),
            format: Some(file.format),
            size_bytes: Some(file.size_bytes),
            width: Some(file.width),
            height: Some(file.height),
            reason: file.defaulted.then_some(FailureReason::UnrecognizedFormatDefaulted),
            ..Self::base(candidate, index)
        }
    }
}

struct StoredFile {
    filename: String,
    format: ImageFormat,
    size_bytes: usize,
    width: u32,
    height: u32,
    defaulted: bool,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub timeout: Duration,
    /// Pause each worker takes after every attempt.
    pub delay: Duration,
    pub concurrency: usize,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions {
            timeout: Duration::from_secs(15),
            delay: Duration::from_millis(300),
            concurrency: 6,
            min_bytes: 500,
            max_bytes: 10 * 1024 * 1024,
            progress: true,
        }
    }
}

pub struct Downloader {
    transport: Arc<dyn Transport>,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, options: DownloadOptions) -> Self {
        Self { transport, options }
    }

    /// Download every candidate into `dest`, at most `concurrency` at a time.
    /// Outcomes come back in candidate order whatever order fetches finish in.
    pub async fn download_all(
        &self,
        candidates: &[Candidate],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Vec<DownloadOutcome> {
        let total = candidates.len();
        let concurrency = self.options.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let pb = if self.options.progress {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            {
                pb.set_style(style.progress_chars("=> "));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        // Workers send outcomes back; the loop below reorders them by index.
        let (tx, mut rx) = mpsc::channel::<DownloadOutcome>(concurrency * 2);

        for (i, candidate) in candidates.iter().enumerate() {
            let job = Job {
                index: i + 1,
                candidate: candidate.clone(),
                dest: dest.to_path_buf(),
                transport: Arc::clone(&self.transport),
                options: self.options.clone(),
            };
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => job.interrupted("cancelled before start"),
                    permit = sem.acquire_owned() => match permit {
                        Ok(_permit) => {
                            let outcome = job.run(&cancel).await;
                            // politeness pause, still holding this worker's slot
                            if !job.options.delay.is_zero() && !cancel.is_cancelled() {
                                tokio::select! {
                                    _ = cancel.cancelled() => {}
                                    _ = tokio::time::sleep(job.options.delay) => {}
                                }
                            }
                            outcome
                        }
                        Err(_) => job.interrupted("worker pool closed"),
                    },
                };
                let _ = tx.send(outcome).await;
            });
        }

        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            match (&outcome.reason, outcome.success) {
                (_, true) => info!(
                    "Saved {} ({}x{}, {} bytes)",
                    outcome.filename.as_deref().unwrap_or_default(),
                    outcome.width.unwrap_or(0),
                    outcome.height.unwrap_or(0),
                    outcome.size_bytes.unwrap_or(0)
                ),
                (Some(reason), false) => warn!(
                    "Skipped {}: {} ({})",
                    outcome.candidate_url,
                    reason,
                    outcome.detail.as_deref().unwrap_or_default()
                ),
                (None, false) => {}
            }
            outcomes.push(outcome);
            pb.inc(1);
        }
        pb.finish_and_clear();

        outcomes.sort_by_key(|o| o.index);
        outcomes
    }
}

struct Job {
    index: usize,
    candidate: Candidate,
    dest: PathBuf,
    transport: Arc<dyn Transport>,
    options: DownloadOptions,
}

impl Job {
    fn interrupted(&self, detail: &str) -> DownloadOutcome {
        DownloadOutcome::failed(&self.candidate, self.index, FailureReason::Interrupted, detail)
    }

    fn stem(&self) -> String {
        file_stem(self.index, &self.candidate.url)
    }

    fn part_path(&self) -> PathBuf {
        self.dest.join(format!("{}.part", self.stem()))
    }

    async fn run(&self, cancel: &CancellationToken) -> DownloadOutcome {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.interrupted("cancelled during download"),
            fetched = self.fetch_checked() => fetched,
        };
        let accepted = match accepted {
            Ok(accepted) => accepted,
            Err(outcome) => return outcome,
        };

        // the write always runs to completion so nothing is left mid-flight
        let outcome = self.store(accepted).await;
        if cancel.is_cancelled() {
            let _ = tokio::fs::remove_file(self.part_path()).await;
            if let Some(name) = &outcome.filename {
                let _ = tokio::fs::remove_file(self.dest.join(name)).await;
            }
            return self.interrupted("cancelled while saving");
        }
        outcome
    }

    fn fail(&self, reason: FailureReason, detail: String) -> DownloadOutcome {
        DownloadOutcome::failed(&self.candidate, self.index, reason, detail)
    }

    /// Fetch and validate; `Err` carries the failed outcome.
    async fn fetch_checked(&self) -> Result<Accepted, DownloadOutcome> {
        let url = self.candidate.url.as_str();
        debug!("Downloading #{} {}", self.index, url);

        let fetched = tokio::time::timeout(self.options.timeout, self.transport.fetch(url, self.options.timeout)).await;
        let response = match fetched {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => return Err(self.fail(FailureReason::TransportError, format!("{:#}", e))),
            Err(_) => {
                return Err(self.fail(
                    FailureReason::TransportError,
                    format!("timed out after {:.1}s", self.options.timeout.as_secs_f64()),
                ))
            }
        };

        if !(200..300).contains(&response.status) {
            return Err(self.fail(FailureReason::TransportError, format!("HTTP {}", response.status)));
        }

        let content_type = response.content_type.to_ascii_lowercase();
        if !content_type.contains("image") && !content_type.contains("octet-stream") {
            return Err(self.fail(
                FailureReason::NotImageContentType,
                format!("content-type {:?}", response.content_type),
            ));
        }

        let size = response.body.len();
        if size < self.options.min_bytes {
            return Err(self.fail(FailureReason::TooSmall, format!("{} bytes", size)));
        }
        if size > self.options.max_bytes {
            return Err(self.fail(FailureReason::TooLarge, format!("{} bytes", size)));
        }

        let (format, defaulted) = match sniff::detect_format(&response.body)
            .or_else(|| ImageFormat::from_content_type(&content_type))
        {
            Some(format) => (format, false),
            None => (ImageFormat::Jpg, true),
        };

        Ok(Accepted {
            body: response.body,
            format,
            defaulted,
        })
    }

    async fn store(&self, accepted: Accepted) -> DownloadOutcome {
        let filename = format!("{}.{}", self.stem(), accepted.format.extension());
        let final_path = self.dest.join(&filename);
        if let Err(e) = write_atomically(&self.part_path(), &final_path, &accepted.body).await {
            let _ = tokio::fs::remove_file(self.part_path()).await;
            return self.fail(FailureReason::IoError, format!("{:#}", e));
        }

        let (width, height) = match tokio::fs::read(&final_path).await {
            Ok(bytes) => sniff::read_dimensions(&bytes),
            Err(e) => {
                warn!("Could not re-read {}: {}", final_path.display(), e);
                (0, 0)
            }
        };

        DownloadOutcome::stored(
            &self.candidate,
            self.index,
            StoredFile {
                filename,
                format: accepted.format,
                size_bytes: accepted.body.len(),
                width,
                height,
                defaulted: accepted.defaulted,
            },
        )
    }
}

/// Response bytes that passed every check and are ready to write.
struct Accepted {
    body: Vec<u8>,
    format: ImageFormat,
    defaulted: bool,
}

/// Write to a `.part` sibling and rename, so the final name only ever holds
/// complete bytes.
async fn write_atomically(part: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(part, bytes)
        .await
        .with_context(|| format!("writing {}", part.display()))?;
    tokio::fs::rename(part, dest)
        .await
        .with_context(|| format!("renaming to {}", dest.display()))?;
    Ok(())
}

/// Short, stable hash of a URL: first 8 hex digits of its MD5.
pub fn url_hash(url: &str) -> String {
    let digest = format!("{:x}", md5::compute(url.as_bytes()));
    digest[..8].to_string()
}

pub fn file_stem(index: usize, url: &str) -> String {
    format!("banner_{:03}_{}", index, url_hash(url))
}
