mod batch;
mod candidates;
mod classify;
mod config;
mod download;
mod manifest;
mod parser;
mod pipeline;
mod render;
mod sniff;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::parser::ParserKind;
use crate::pipeline::Pipeline;

const BATCH_PAUSE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "banner_scraper", about = "Promotional banner image extractor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by `scrape` and `batch`; unset ones fall back to config/env.
#[derive(clap::Args)]
struct Tuning {
    /// Download every image, not just detected banners (denylist still applies)
    #[arg(long)]
    all_images: bool,
    /// Minimum declared size, WIDTHxHEIGHT
    #[arg(long, value_name = "WxH")]
    min_size: Option<String>,
    /// Accepted width/height ratio, MIN:MAX
    #[arg(long, value_name = "MIN:MAX")]
    aspect: Option<String>,
    /// Simultaneous image downloads
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,
    /// HTML parser backend
    #[arg(long, value_enum)]
    parser: Option<ParserKind>,
}

impl Tuning {
    fn apply(&self, settings: &mut Settings) -> anyhow::Result<()> {
        if let Some(raw) = &self.min_size {
            settings.apply_min_size(raw)?;
        }
        if let Some(raw) = &self.aspect {
            settings.apply_aspect(raw)?;
        }
        if let Some(n) = self.concurrency {
            settings.concurrency = n;
        }
        if let Some(p) = self.parser {
            settings.parser = p;
        }
        settings.validate()?;
        Ok(())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Extract banners from one page
    Scrape {
        #[arg(short, long, default_value = "https://www.novadreams.com/")]
        url: String,
        #[arg(short, long, default_value = "novadreams_banners")]
        output: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Extract banners from many sites, one after another
    Batch {
        /// Comma-separated URLs
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        urls: Option<String>,
        /// File with one URL per line (# comments allowed)
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(short, long, default_value = "batch_banners")]
        output: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Print format and dimensions of local image files
    Sniff {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing up...");
            on_interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Scrape { url, output, tuning } => {
            let mut settings = Settings::load()?;
            tuning.apply(&mut settings)?;
            let pipeline = Pipeline::from_settings(&settings)?;

            println!("Scraping banners from {}", url);
            let report = pipeline.scrape_site(&url, &output, tuning.all_images, &cancel).await?;
            let m = &report.manifest;

            let saved: Vec<_> = m.images.iter().filter(|o| o.success).collect();
            if saved.is_empty() {
                println!("\nNo banner images found.");
                println!("Tip: try --all-images to grab everything, or check a subpage like /promotions");
            } else {
                println!("\nDownloaded {} banner images ({} skipped)", saved.len(), m.failures());
                println!("Output: {}", report.dest.display());
                for o in saved.iter().take(5) {
                    println!(
                        "  - {}  {}x{}  {} bytes",
                        o.filename.as_deref().unwrap_or_default(),
                        o.width.unwrap_or(0),
                        o.height.unwrap_or(0),
                        o.size_bytes.unwrap_or(0)
                    );
                }
                if saved.len() > 5 {
                    println!("  ... and {} more", saved.len() - 5);
                }
            }
            println!("\nManifest: {}", report.manifest_path.display());
            Ok(())
        }
        Commands::Batch { urls, file, output, tuning } => {
            let list = match (&urls, &file) {
                (Some(arg), _) => batch::split_url_arg(arg),
                (None, Some(path)) => batch::load_urls(path)?,
                (None, None) => Vec::new(),
            };
            if list.is_empty() {
                println!("No URLs provided or file is empty.");
                return Ok(());
            }

            let mut settings = Settings::load()?;
            tuning.apply(&mut settings)?;
            let pipeline = Pipeline::from_settings(&settings)?;

            println!("Starting batch extraction from {} sites", list.len());
            let report = batch::run_batch(&pipeline, &list, &output, tuning.all_images, BATCH_PAUSE, &cancel).await?;
            let s = &report.stats;

            println!(
                "\n{:>3} | {:<32} | {:>7} | {}",
                "#", "Site", "Banners", "Status"
            );
            println!("{}", "-".repeat(60));
            for (i, r) in report.results.iter().enumerate() {
                let status = match &r.error {
                    Some(e) => format!("error: {}", truncate(e, 40)),
                    None => "ok".to_string(),
                };
                println!(
                    "{:>3} | {:<32} | {:>7} | {}",
                    i + 1,
                    truncate(&r.site_name, 32),
                    r.banners_downloaded,
                    status
                );
            }

            println!(
                "\nResults: {}/{} sites successful, {} failed",
                s.successful_sites, s.total_sites, s.failed_sites
            );
            println!("Total banners: {}", s.total_banners);
            println!("Output: {}", output.display());

            let top = report.top_sites(5);
            if !top.is_empty() {
                println!("\nTop sites:");
                for r in top {
                    println!("  {}: {} banners", r.site_name, r.banners_downloaded);
                }
            }
            Ok(())
        }
        Commands::Sniff { files } => {
            for path in &files {
                match std::fs::read(path) {
                    Ok(bytes) => {
                        let (w, h) = sniff::read_dimensions(&bytes);
                        let format = sniff::detect_format(&bytes)
                            .map(|f| f.extension())
                            .unwrap_or("unknown");
                        println!("{}: {} {}x{} ({} bytes)", path.display(), format, w, h, bytes.len());
                    }
                    Err(e) => println!("{}: unreadable ({})", path.display(), e),
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
