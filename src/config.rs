use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::classify::{lowercase_all, ClassifierRules};
use crate::download::DownloadOptions;
use crate::parser::ParserKind;
use crate::render::{PageWait, RenderOptions};

const CONFIG_FILE: &str = "banner_scraper";
const ENV_PREFIX: &str = "BANNER";
const MAX_CONCURRENCY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid minimum size {0:?}: expected WIDTHxHEIGHT, e.g. 200x80")]
    MinSize(String),
    #[error("invalid aspect bounds {0:?}: expected MIN:MAX, e.g. 0.8:8.0")]
    Aspect(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// How a rendered page settles before its HTML is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    Idle,
    Delay,
    None,
}

/// Run settings: defaults, then `banner_scraper.toml`, then `BANNER_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub min_width: u32,
    pub min_height: u32,
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub concurrency: usize,
    pub delay_ms: u64,
    pub timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub parser: ParserKind,
    pub render_wait: WaitMode,
    pub render_wait_ms: u64,
    /// 0 disables the scroll step.
    pub render_scroll_ms: u64,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub denylist: Option<Vec<String>>,
    #[serde(default)]
    pub url_patterns: Option<Vec<String>>,
}

impl Settings {
    pub fn load() -> Result<Self, SettingsError> {
        let cfg = Self::defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("keywords")
                    .with_list_parse_key("denylist")
                    .with_list_parse_key("url_patterns"),
            )
            .build()?;
        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, SettingsError> {
        Ok(Config::builder()
            .set_default("min_width", 200_i64)?
            .set_default("min_height", 80_i64)?
            .set_default("min_aspect", 0.8_f64)?
            .set_default("max_aspect", 8.0_f64)?
            .set_default("concurrency", 6_i64)?
            .set_default("delay_ms", 300_i64)?
            .set_default("timeout_secs", 15_i64)?
            .set_default("page_timeout_secs", 30_i64)?
            .set_default("min_bytes", 500_i64)?
            .set_default("max_bytes", 10_i64 * 1024 * 1024)?
            .set_default("parser", "dom")?
            .set_default("render_wait", "delay")?
            .set_default("render_wait_ms", 3000_i64)?
            .set_default("render_scroll_ms", 2000_i64)?)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(self.min_aspect > 0.0 && self.min_aspect <= self.max_aspect && self.max_aspect.is_finite()) {
            return Err(SettingsError::Invalid(format!(
                "aspect bounds must satisfy 0 < min <= max, got {}:{}",
                self.min_aspect, self.max_aspect
            )));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(SettingsError::Invalid(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }
        if self.min_bytes >= self.max_bytes {
            return Err(SettingsError::Invalid(format!(
                "min_bytes ({}) must be below max_bytes ({})",
                self.min_bytes, self.max_bytes
            )));
        }
        Ok(())
    }

    /// `--min-size 300x100`
    pub fn apply_min_size(&mut self, raw: &str) -> Result<(), SettingsError> {
        let (w, h) = parse_min_size(raw)?;
        self.min_width = w;
        self.min_height = h;
        Ok(())
    }

    /// `--aspect 1.2:6`
    pub fn apply_aspect(&mut self, raw: &str) -> Result<(), SettingsError> {
        let (lo, hi) = parse_aspect(raw)?;
        self.min_aspect = lo;
        self.max_aspect = hi;
        self.validate()
    }

    pub fn classifier_rules(&self) -> ClassifierRules {
        let defaults = ClassifierRules::default();
        ClassifierRules {
            keywords: self.keywords.as_deref().map(|t| lowercase_all(t)).unwrap_or(defaults.keywords),
            denylist: self.denylist.as_deref().map(|t| lowercase_all(t)).unwrap_or(defaults.denylist),
            url_patterns: self.url_patterns.as_deref().map(|t| lowercase_all(t)).unwrap_or(defaults.url_patterns),
            min_width: self.min_width,
            min_height: self.min_height,
            min_aspect: self.min_aspect,
            max_aspect: self.max_aspect,
        }
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            delay: Duration::from_millis(self.delay_ms),
            concurrency: self.concurrency,
            min_bytes: self.min_bytes,
            max_bytes: self.max_bytes,
            progress: true,
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        let wait = Duration::from_millis(self.render_wait_ms);
        RenderOptions {
            timeout: Duration::from_secs(self.page_timeout_secs),
            wait: match self.render_wait {
                WaitMode::Idle => PageWait::NetworkIdle(wait),
                WaitMode::Delay => PageWait::Delay(wait),
                WaitMode::None => PageWait::None,
            },
            scroll: (self.render_scroll_ms > 0).then(|| Duration::from_millis(self.render_scroll_ms)),
        }
    }
}

pub fn parse_min_size(raw: &str) -> Result<(u32, u32), SettingsError> {
    let err = || SettingsError::MinSize(raw.to_string());
    let lower = raw.trim().to_ascii_lowercase();
    let (w, h) = lower.split_once('x').ok_or_else(err)?;
    let w = w.trim().parse::<u32>().map_err(|_| err())?;
    let h = h.trim().parse::<u32>().map_err(|_| err())?;
    Ok((w, h))
}

pub fn parse_aspect(raw: &str) -> Result<(f64, f64), SettingsError> {
    let err = || SettingsError::Aspect(raw.to_string());
    let (lo, hi) = raw.trim().split_once(':').ok_or_else(err)?;
    let lo = lo.trim().parse::<f64>().map_err(|_| err())?;
    let hi = hi.trim().parse::<f64>().map_err(|_| err())?;
    if !(lo > 0.0 && lo <= hi && hi.is_finite()) {
        return Err(err());
    }
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Settings {
        Settings::defaults().unwrap().build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn builtin_defaults() {
        let s = defaults();
        assert_eq!((s.min_width, s.min_height), (200, 80));
        assert_eq!((s.min_aspect, s.max_aspect), (0.8, 8.0));
        assert_eq!(s.max_bytes, 10 * 1024 * 1024);
        assert_eq!(s.parser, ParserKind::Dom);
        assert!(s.validate().is_ok());
        assert_eq!(s.classifier_rules().keywords.len(), crate::classify::DEFAULT_KEYWORDS.len());
    }

    #[test]
    fn min_size_formats() {
        assert_eq!(parse_min_size("200x80").unwrap(), (200, 80));
        assert_eq!(parse_min_size(" 728X90 ").unwrap(), (728, 90));
        for bad in ["200", "200x", "x80", "wide x tall", "-1x80", "200*80"] {
            assert!(matches!(parse_min_size(bad), Err(SettingsError::MinSize(_))), "{bad}");
        }
    }

    #[test]
    fn aspect_formats() {
        assert_eq!(parse_aspect("1.2:6").unwrap(), (1.2, 6.0));
        for bad in ["1.2", "6:1.2", "0:4", "a:b", "1:inf"] {
            assert!(matches!(parse_aspect(bad), Err(SettingsError::Aspect(_))), "{bad}");
        }
    }

    #[test]
    fn overrides_flow_into_rules() {
        let mut s = defaults();
        s.apply_min_size("300x100").unwrap();
        s.apply_aspect("1.2:6.0").unwrap();
        s.keywords = Some(vec!["VIP".into(), "Rakeback".into()]);
        let rules = s.classifier_rules();
        assert_eq!((rules.min_width, rules.min_height), (300, 100));
        assert_eq!((rules.min_aspect, rules.max_aspect), (1.2, 6.0));
        assert_eq!(rules.keywords, vec!["vip", "rakeback"]);
        assert!(!rules.denylist.is_empty());
    }

    #[test]
    fn page_wait_settings() {
        let s = defaults();
        let opts = s.render_options();
        assert_eq!(opts.timeout, Duration::from_secs(30));
        assert_eq!(opts.wait, PageWait::Delay(Duration::from_millis(3000)));
        assert_eq!(opts.scroll, Some(Duration::from_millis(2000)));

        let cfg: Settings = Settings::defaults()
            .unwrap()
            .set_override("render_wait", "idle")
            .unwrap()
            .set_override("render_wait_ms", 5000_i64)
            .unwrap()
            .set_override("render_scroll_ms", 0_i64)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let opts = cfg.render_options();
        assert_eq!(opts.wait, PageWait::NetworkIdle(Duration::from_secs(5)));
        assert_eq!(opts.scroll, None);
    }

    #[test]
    fn rejects_bad_concurrency_and_sizes() {
        let mut s = defaults();
        s.concurrency = 0;
        assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
        let mut s = defaults();
        s.min_bytes = s.max_bytes;
        assert!(s.validate().is_err());
    }
}
