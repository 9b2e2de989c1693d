use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::download::DownloadOutcome;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Record of one scrape run, written next to the images it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub source_url: String,
    pub final_url: String,
    pub scraped_at: String,
    pub total_images_found: usize,
    pub banner_candidates: usize,
    pub banners_downloaded: usize,
    pub all_images_mode: bool,
    pub images: Vec<DownloadOutcome>,
}

impl Manifest {
    pub fn new(
        source_url: &str,
        final_url: &str,
        total_images_found: usize,
        banner_candidates: usize,
        all_images_mode: bool,
        images: Vec<DownloadOutcome>,
    ) -> Self {
        Manifest {
            source_url: source_url.to_string(),
            final_url: final_url.to_string(),
            scraped_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            total_images_found,
            banner_candidates,
            banners_downloaded: images.iter().filter(|o| o.success).count(),
            all_images_mode,
            images,
        }
    }

    pub fn failures(&self) -> usize {
        self.images.len() - self.banners_downloaded
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    #[cfg(test)]
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Malformed manifest {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::FailureReason;
    use crate::parser::SourceChannel;
    use crate::sniff::ImageFormat;

    fn outcome(index: usize, success: bool) -> DownloadOutcome {
        DownloadOutcome {
            index,
            candidate_url: format!("https://e.com/promo/{}.png", index),
            success,
            filename: success.then(|| format!("banner_{:03}_deadbeef.png", index)),
            format: success.then_some(ImageFormat::Png),
            size_bytes: success.then_some(2048),
            width: success.then_some(800),
            height: success.then_some(200),
            reason: (!success).then_some(FailureReason::TooSmall),
            detail: (!success).then(|| "120 bytes".to_string()),
            alt: String::new(),
            title: String::new(),
            context: String::new(),
            channels: vec![SourceChannel::Img],
        }
    }

    #[test]
    fn counts_successes() {
        let m = Manifest::new("https://e.com", "https://e.com/", 12, 3, false, vec![outcome(1, true), outcome(2, false), outcome(3, true)]);
        assert_eq!(m.banners_downloaded, 2);
        assert_eq!(m.failures(), 1);
        assert!(m.scraped_at.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&m.scraped_at).is_ok());
    }

    #[test]
    fn json_shape() {
        let m = Manifest::new("https://e.com", "https://e.com/", 1, 2, true, vec![outcome(1, true), outcome(2, false)]);
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["all_images_mode"], true);
        assert_eq!(v["images"][0]["url"], "https://e.com/promo/1.png");
        assert_eq!(v["images"][0]["format"], "png");
        assert!(v["images"][0].get("reason").is_none());
        assert_eq!(v["images"][1]["reason"], "too-small");
        assert_eq!(v["images"][1]["channels"][0], "img");
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let m = Manifest::new("https://e.com", "https://e.com/", 0, 0, false, Vec::new());
        let path = m.write(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), MANIFEST_FILE);
        let back = Manifest::read(&path).unwrap();
        assert_eq!(back.banners_downloaded, 0);
        assert!(back.images.is_empty());
        assert_eq!(back.scraped_at, m.scraped_at);
    }
}
