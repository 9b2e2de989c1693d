use crate::candidates::Candidate;

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "banner", "promo", "promotion", "offer", "welcome", "deposit",
    "free", "spin", "jackpot", "casino", "bet", "win", "reward",
    "special", "exclusive", "limited", "cashback", "match", "reload",
    "bonus", "hero", "slider", "carousel", "campaign", "featured",
    "cta", "signup", "sign-up", "register", "deal", "tournament",
];

pub const DEFAULT_DENYLIST: &[&str] = &[
    "favicon", "icon-", "logo-small", "pixel", "spacer",
    "1x1", "tracking", "analytics", "badge", ".svg",
    "emoji", "avatar", "flag-", "payment-", "visa", "mastercard",
];

pub const DEFAULT_URL_PATTERNS: &[&str] =
    &["banner", "promo", "bonus", "offer", "campaign", "hero", "slide"];

/// Heuristic tables and size gates. Terms are stored lowercased.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    pub keywords: Vec<String>,
    pub denylist: Vec<String>,
    pub url_patterns: Vec<String>,
    pub min_width: u32,
    pub min_height: u32,
    pub min_aspect: f64,
    pub max_aspect: f64,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        ClassifierRules {
            keywords: lowercase_all(DEFAULT_KEYWORDS),
            denylist: lowercase_all(DEFAULT_DENYLIST),
            url_patterns: lowercase_all(DEFAULT_URL_PATTERNS),
            min_width: 200,
            min_height: 80,
            min_aspect: 0.8,
            max_aspect: 8.0,
        }
    }
}

pub fn lowercase_all<S: AsRef<str>>(terms: &[S]) -> Vec<String> {
    terms.iter().map(|t| t.as_ref().to_lowercase()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub is_banner: bool,
    pub denied: bool,
    pub has_keyword: bool,
    pub has_promo_url_pattern: bool,
    pub size_ok: bool,
}

pub fn classify(c: &Candidate, rules: &ClassifierRules, include_all: bool) -> Classification {
    let url = c.url.to_lowercase();

    if rules.denylist.iter().any(|d| url.contains(d.as_str())) {
        return Classification {
            denied: true,
            ..Default::default()
        };
    }

    let size_ok = size_ok(c.width, c.height, rules);
    if include_all {
        return Classification {
            is_banner: true,
            size_ok,
            ..Default::default()
        };
    }

    let text = format!("{} {} {} {} {}", c.alt, c.title, c.css_classes, c.url, c.context).to_lowercase();
    let has_keyword = rules.keywords.iter().any(|k| text.contains(k.as_str()));
    let has_promo_url_pattern = rules.url_patterns.iter().any(|p| url.contains(p.as_str()));

    Classification {
        is_banner: (has_keyword || has_promo_url_pattern) && size_ok,
        denied: false,
        has_keyword,
        has_promo_url_pattern,
        size_ok,
    }
}

#[cfg(test)]
pub fn is_banner(c: &Candidate, rules: &ClassifierRules, include_all: bool) -> bool {
    classify(c, rules, include_all).is_banner
}

/// Unknown dimensions pass; known ones must clear the minimums and the
/// aspect window.
fn size_ok(width: u32, height: u32, rules: &ClassifierRules) -> bool {
    if width == 0 || height == 0 {
        return true;
    }
    let ratio = width as f64 / height as f64;
    width >= rules.min_width
        && height >= rules.min_height
        && ratio >= rules.min_aspect
        && ratio <= rules.max_aspect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::normalize;
    use crate::parser::{dom::DomExtractor, ReferenceExtractor};
    use url::Url;

    fn candidate(url: &str, alt: &str, width: u32, height: u32) -> Candidate {
        Candidate {
            url: url.to_string(),
            alt: alt.to_string(),
            title: String::new(),
            css_classes: String::new(),
            context: String::new(),
            width,
            height,
            channels: Default::default(),
        }
    }

    #[test]
    fn keyword_with_unknown_size_accepted() {
        let c = candidate("https://e.com/img/a.jpg", "Welcome offer", 0, 0);
        let r = classify(&c, &ClassifierRules::default(), false);
        assert!(r.is_banner);
        assert!(r.has_keyword);
        assert!(!r.has_promo_url_pattern);
    }

    #[test]
    fn url_pattern_alone_accepted() {
        let c = candidate("https://e.com/campaign/q3.jpg", "", 970, 250);
        let r = classify(&c, &ClassifierRules::default(), false);
        assert!(r.has_promo_url_pattern);
        assert!(r.is_banner);
    }

    #[test]
    fn no_signal_rejected() {
        let c = candidate("https://e.com/games/starburst.jpg", "Starburst", 400, 200);
        assert!(!is_banner(&c, &ClassifierRules::default(), false));
    }

    #[test]
    fn aspect_ratio_is_a_hard_gate() {
        let rules = ClassifierRules::default();
        // tall skyscraper and ultra-wide strip, both full of keywords
        let tall = candidate("https://e.com/promo/bonus-banner.jpg", "Bonus", 300, 600);
        let wide = candidate("https://e.com/promo/bonus-banner.jpg", "Bonus", 1800, 200);
        assert!(!is_banner(&tall, &rules, false));
        assert!(!is_banner(&wide, &rules, false));
    }

    #[test]
    fn minimum_size_gate() {
        let rules = ClassifierRules::default();
        assert!(!is_banner(&candidate("https://e.com/promo.jpg", "", 199, 100), &rules, false));
        assert!(!is_banner(&candidate("https://e.com/promo.jpg", "", 400, 79), &rules, false));
        assert!(is_banner(&candidate("https://e.com/promo.jpg", "", 200, 80), &rules, false));
    }

    #[test]
    fn aspect_bounds_are_configurable() {
        let c = candidate("https://e.com/promo/square.jpg", "", 600, 600);
        let narrow = ClassifierRules {
            min_aspect: 1.2,
            max_aspect: 6.0,
            ..Default::default()
        };
        assert!(!is_banner(&c, &narrow, false));
        assert!(is_banner(&c, &ClassifierRules::default(), false));
    }

    #[test]
    fn denylist_beats_include_all() {
        let rules = ClassifierRules::default();
        for url in [
            "https://e.com/favicon.ico",
            "https://e.com/promo/bonus.svg",
            "https://e.com/img/payment-visa.png",
            "https://e.com/t/1x1.gif",
        ] {
            let c = candidate(url, "Welcome bonus", 0, 0);
            let r = classify(&c, &rules, true);
            assert!(r.denied, "{url}");
            assert!(!r.is_banner, "{url}");
        }
    }

    #[test]
    fn include_all_ignores_size_and_keywords() {
        let c = candidate("https://e.com/games/thumb.jpg", "", 50, 50);
        assert!(is_banner(&c, &ClassifierRules::default(), true));
    }

    #[test]
    fn deterministic() {
        let c = candidate("https://e.com/promo/x.jpg", "Jackpot", 728, 90);
        let rules = ClassifierRules::default();
        assert_eq!(classify(&c, &rules, false), classify(&c, &rules, false));
    }

    #[test]
    fn welcome_bonus_end_to_end() {
        let html = r#"<img src="/promo/welcome-bonus.jpg" width="728" height="90" alt="Welcome Bonus">
                      <img src="/icons/favicon.svg">"#;
        let refs = DomExtractor.extract(html, &Url::parse("https://example.com/").unwrap());
        assert_eq!(refs.len(), 2);
        let candidates = normalize(refs);
        assert_eq!(candidates.len(), 2);

        let banner = &candidates[0];
        let favicon = &candidates[1];

        // 728/90 ≈ 8.09 sits outside both [1.2, 6.0] and [0.8, 8.0]
        for (lo, hi) in [(1.2, 6.0), (0.8, 8.0)] {
            let rules = ClassifierRules {
                min_aspect: lo,
                max_aspect: hi,
                ..Default::default()
            };
            let r = classify(banner, &rules, false);
            assert!(r.has_keyword && r.has_promo_url_pattern);
            assert!(!r.size_ok);
            assert!(!r.is_banner);
        }

        let wide = ClassifierRules {
            max_aspect: 9.0,
            ..Default::default()
        };
        assert!(is_banner(banner, &wide, false));
        assert!(classify(favicon, &wide, false).denied);
        assert!(!is_banner(favicon, &wide, true));
    }
}
